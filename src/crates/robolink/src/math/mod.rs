//! Dense matrices and homogeneous poses.
//!
//! A pose is a 4×4 [`Matrix`] whose upper-left 3×3 block is a rotation, whose
//! last column holds the translation, and whose last row is `[0, 0, 0, 1]`.
//! Euler conversions take and return degrees; the elementary rotations take
//! radians.

mod matrix;
mod multiply;
mod pose;

use thiserror::Error;

pub use matrix::Matrix;
pub use multiply::BLOCK_THRESHOLD;

/// Local precondition failures raised by matrix operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatrixError {
    #[error("{op}: incompatible dimensions {left:?} and {right:?}")]
    DimensionMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },
    #[error("expected a homogeneous 4x4 pose, got a {rows}x{cols} matrix")]
    NotHomogeneous { rows: usize, cols: usize },
    #[error("expected a 4x4 matrix, got {rows}x{cols}")]
    NotPose { rows: usize, cols: usize },
    #[error("expected {expected} values, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("quaternion has zero norm")]
    DegenerateQuaternion,
}
