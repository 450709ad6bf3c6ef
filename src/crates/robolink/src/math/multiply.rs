use super::{Matrix, MatrixError};

/// Largest operand dimension below which multiplication uses the direct
/// triple loop instead of the block decomposition.
pub const BLOCK_THRESHOLD: usize = 32;

impl Matrix {
    /// Matrix product `self · other`.
    ///
    /// Small operands use the direct triple loop. Once any dimension reaches
    /// [`BLOCK_THRESHOLD`] the operands are padded (conceptually, with zeros) to
    /// the next power-of-two square and split into quadrants combined through
    /// seven sub-products. Both paths produce the same result up to rounding.
    pub fn multiply(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        check_inner(self, other)?;

        let largest = self.rows().max(self.cols()).max(other.rows()).max(other.cols());
        if largest < BLOCK_THRESHOLD {
            return Ok(direct(self, other));
        }

        let half = largest.next_power_of_two() / 2;

        // Top level reads past the logical bounds as zero.
        let a = Quadrants::padded(self, half);
        let b = Quadrants::padded(other, half);
        let [c11, c12, c21, c22] = seven_products(&a, &b);

        let mut out = Matrix::zeros(self.rows(), other.cols());
        for i in 0..out.rows() {
            for j in 0..out.cols() {
                out[(i, j)] = match (i < half, j < half) {
                    (true, true) => c11[(i, j)],
                    (true, false) => c12[(i, j - half)],
                    (false, true) => c21[(i - half, j)],
                    (false, false) => c22[(i - half, j - half)],
                };
            }
        }
        Ok(out)
    }

    /// Matrix product through the plain triple loop, regardless of size.
    pub fn multiply_direct(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        check_inner(self, other)?;
        Ok(direct(self, other))
    }

    /// Pose composition `self · other`; alias of [`Matrix::multiply`].
    pub fn compose(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        self.multiply(other)
    }
}

fn check_inner(a: &Matrix, b: &Matrix) -> Result<(), MatrixError> {
    if a.cols() != b.rows() {
        return Err(MatrixError::DimensionMismatch {
            op: "multiply",
            left: a.shape(),
            right: b.shape(),
        });
    }
    Ok(())
}

fn direct(a: &Matrix, b: &Matrix) -> Matrix {
    let (rows, inner, cols) = (a.rows(), a.cols(), b.cols());
    let lhs = a.as_slice();
    let rhs = b.as_slice();
    let mut out = vec![0.0; rows * cols];
    for i in 0..rows {
        for j in 0..cols {
            let mut acc = 0.0;
            for k in 0..inner {
                acc += lhs[i * inner + k] * rhs[k * cols + j];
            }
            out[i * cols + j] = acc;
        }
    }
    Matrix::from_raw(rows, cols, out)
}

struct Quadrants {
    q11: Matrix,
    q12: Matrix,
    q21: Matrix,
    q22: Matrix,
}

impl Quadrants {
    /// Slice `m` into four `half`-sized blocks, treating cells outside `m` as 0.
    fn padded(m: &Matrix, half: usize) -> Self {
        Self {
            q11: block(m, 0, 0, half),
            q12: block(m, 0, half, half),
            q21: block(m, half, 0, half),
            q22: block(m, half, half, half),
        }
    }

    /// Split a square power-of-two matrix into its exact quadrants.
    fn exact(m: &Matrix) -> Self {
        debug_assert!(m.is_square() && m.rows().is_power_of_two());
        Self::padded(m, m.rows() / 2)
    }
}

fn block(m: &Matrix, row0: usize, col0: usize, size: usize) -> Matrix {
    let mut out = vec![0.0; size * size];
    let rows = m.rows().saturating_sub(row0).min(size);
    let cols = m.cols().saturating_sub(col0).min(size);
    let src = m.as_slice();
    for i in 0..rows {
        let start = (row0 + i) * m.cols() + col0;
        out[i * size..i * size + cols].copy_from_slice(&src[start..start + cols]);
    }
    Matrix::from_raw(size, size, out)
}

fn sum(a: &Matrix, b: &Matrix) -> Matrix {
    elementwise(a, b, |x, y| x + y)
}

fn diff(a: &Matrix, b: &Matrix) -> Matrix {
    elementwise(a, b, |x, y| x - y)
}

fn elementwise(a: &Matrix, b: &Matrix, f: impl Fn(f64, f64) -> f64) -> Matrix {
    debug_assert_eq!(a.shape(), b.shape());
    let data = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| f(*x, *y))
        .collect();
    Matrix::from_raw(a.rows(), a.cols(), data)
}

/// Seven-product combination of two quadrant sets, returning
/// `[C11, C12, C21, C22]`.
fn seven_products(a: &Quadrants, b: &Quadrants) -> [Matrix; 4] {
    let m1 = square(&sum(&a.q11, &a.q22), &sum(&b.q11, &b.q22));
    let m2 = square(&sum(&a.q21, &a.q22), &b.q11);
    let m3 = square(&a.q11, &diff(&b.q12, &b.q22));
    let m4 = square(&a.q22, &diff(&b.q21, &b.q11));
    let m5 = square(&sum(&a.q11, &a.q12), &b.q22);
    let m6 = square(&diff(&a.q21, &a.q11), &sum(&b.q11, &b.q12));
    let m7 = square(&diff(&a.q12, &a.q22), &sum(&b.q21, &b.q22));

    let c11 = sum(&diff(&sum(&m1, &m4), &m5), &m7);
    let c12 = sum(&m3, &m5);
    let c21 = sum(&m2, &m4);
    let c22 = sum(&sum(&diff(&m1, &m2), &m3), &m6);
    [c11, c12, c21, c22]
}

/// Product of two equally sized power-of-two square blocks.
fn square(a: &Matrix, b: &Matrix) -> Matrix {
    let size = a.rows();
    if size < BLOCK_THRESHOLD {
        return direct(a, b);
    }

    let [c11, c12, c21, c22] = seven_products(&Quadrants::exact(a), &Quadrants::exact(b));
    let half = size / 2;
    let mut out = Matrix::zeros(size, size);
    for i in 0..half {
        for j in 0..half {
            out[(i, j)] = c11[(i, j)];
            out[(i, j + half)] = c12[(i, j)];
            out[(i + half, j)] = c21[(i, j)];
            out[(i + half, j + half)] = c22[(i, j)];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(rows: usize, cols: usize, seed: u64) -> Matrix {
        // Small deterministic LCG keeps the fixtures reproducible.
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let mut values = Vec::with_capacity(rows * cols);
        for _ in 0..rows * cols {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            values.push(((state >> 33) as f64 / u32::MAX as f64) * 2.0 - 1.0);
        }
        Matrix::from_rows(rows, cols, &values).unwrap()
    }

    #[test]
    fn block_path_matches_direct_above_threshold() {
        let a = filled(64, 64, 1);
        let b = filled(64, 64, 2);
        let fast = a.multiply(&b).unwrap();
        let slow = a.multiply_direct(&b).unwrap();
        assert!(fast.approx_eq(&slow, 1e-9), "diff {}", fast.max_abs_diff(&slow).unwrap());
    }

    #[test]
    fn small_operands_take_the_direct_path_exactly() {
        let a = filled(8, 8, 3);
        let b = filled(8, 8, 4);
        assert_eq!(a.multiply(&b).unwrap(), a.multiply_direct(&b).unwrap());
    }

    #[test]
    fn ragged_shapes_are_zero_padded() {
        let a = filled(33, 47, 5);
        let b = filled(47, 40, 6);
        let fast = a.multiply(&b).unwrap();
        assert_eq!(fast.shape(), (33, 40));
        assert!(fast.approx_eq(&a.multiply_direct(&b).unwrap(), 1e-9));
    }

    #[test]
    fn tall_times_wide_crosses_threshold_on_one_side() {
        let a = filled(70, 3, 7);
        let b = filled(3, 5, 8);
        let fast = a.multiply(&b).unwrap();
        assert!(fast.approx_eq(&a.multiply_direct(&b).unwrap(), 1e-12));
    }

    #[test]
    fn mismatched_inner_dimension_is_rejected() {
        let err = Matrix::zeros(2, 3).multiply(&Matrix::zeros(2, 3)).unwrap_err();
        assert_eq!(
            err,
            MatrixError::DimensionMismatch {
                op: "multiply",
                left: (2, 3),
                right: (2, 3),
            }
        );
    }
}
