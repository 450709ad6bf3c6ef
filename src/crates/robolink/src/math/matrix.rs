use std::fmt;
use std::ops::{Index, IndexMut, Neg};

use super::MatrixError;

/// Dense row-major matrix of `f64`.
///
/// Operations never share storage: every arithmetic method returns a fresh
/// matrix, so two holders of a `Matrix` can never observe each other's writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Matrix of the given shape filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Square identity matrix.
    pub fn identity(size: usize) -> Self {
        let mut out = Self::zeros(size, size);
        for i in 0..size {
            out[(i, i)] = 1.0;
        }
        out
    }

    pub(super) fn from_raw(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        Self { rows, cols, data }
    }

    /// Build from row-major values.
    pub fn from_rows(rows: usize, cols: usize, values: &[f64]) -> Result<Self, MatrixError> {
        if values.len() != rows * cols {
            return Err(MatrixError::InvalidLength {
                expected: rows * cols,
                got: values.len(),
            });
        }
        Ok(Self {
            rows,
            cols,
            data: values.to_vec(),
        })
    }

    /// Build from column-major values, the order used on the wire.
    pub fn from_column_major(
        rows: usize,
        cols: usize,
        values: &[f64],
    ) -> Result<Self, MatrixError> {
        if values.len() != rows * cols {
            return Err(MatrixError::InvalidLength {
                expected: rows * cols,
                got: values.len(),
            });
        }
        let mut out = Self::zeros(rows, cols);
        let mut idx = 0;
        for j in 0..cols {
            for i in 0..rows {
                out[(i, j)] = values[idx];
                idx += 1;
            }
        }
        Ok(out)
    }

    /// Values in column-major order (column index outer, row index inner).
    pub fn to_column_major(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.data.len());
        for j in 0..self.cols {
            for i in 0..self.rows {
                out.push(self[(i, j)]);
            }
        }
        out
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element at `(row, col)`, or `None` when out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    /// Set the element at `(row, col)`.
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<(), MatrixError> {
        if row >= self.rows || col >= self.cols {
            return Err(MatrixError::DimensionMismatch {
                op: "set",
                left: self.shape(),
                right: (row + 1, col + 1),
            });
        }
        self.data[row * self.cols + col] = value;
        Ok(())
    }

    /// Row-major backing slice.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Column `k` as a vector of length `rows`.
    pub fn column(&self, k: usize) -> Option<Vec<f64>> {
        if k >= self.cols {
            return None;
        }
        Some((0..self.rows).map(|i| self[(i, k)]).collect())
    }

    /// All columns, each as a vector. Joint solution matrices store one
    /// configuration per column.
    pub fn columns(&self) -> Vec<Vec<f64>> {
        (0..self.cols)
            .map(|k| (0..self.rows).map(|i| self[(i, k)]).collect())
            .collect()
    }

    /// Overwrite column `k`.
    pub fn set_column(&mut self, k: usize, values: &[f64]) -> Result<(), MatrixError> {
        if values.len() != self.rows {
            return Err(MatrixError::InvalidLength {
                expected: self.rows,
                got: values.len(),
            });
        }
        if k >= self.cols {
            return Err(MatrixError::DimensionMismatch {
                op: "set_column",
                left: self.shape(),
                right: (values.len(), k + 1),
            });
        }
        for (i, value) in values.iter().enumerate() {
            self[(i, k)] = *value;
        }
        Ok(())
    }

    pub fn transpose(&self) -> Matrix {
        let mut out = Matrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                out[(j, i)] = self[(i, j)];
            }
        }
        out
    }

    pub fn add(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        self.zip_with("add", other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        self.zip_with("sub", other, |a, b| a - b)
    }

    /// Multiply every element by `factor`.
    pub fn scale(&self, factor: f64) -> Matrix {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|v| v * factor).collect(),
        }
    }

    /// Largest absolute element-wise difference, used for tolerance checks.
    pub fn max_abs_diff(&self, other: &Matrix) -> Result<f64, MatrixError> {
        let diff = self.sub(other)?;
        Ok(diff.data.iter().fold(0.0_f64, |acc, v| acc.max(v.abs())))
    }

    /// Whether every element differs from `other` by at most `tolerance`.
    pub fn approx_eq(&self, other: &Matrix, tolerance: f64) -> bool {
        self.max_abs_diff(other)
            .map(|diff| diff <= tolerance)
            .unwrap_or(false)
    }

    fn zip_with(
        &self,
        op: &'static str,
        other: &Matrix,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Matrix, MatrixError> {
        if self.shape() != other.shape() {
            return Err(MatrixError::DimensionMismatch {
                op,
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| f(*a, *b))
                .collect(),
        })
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        assert!(row < self.rows && col < self.cols, "matrix index out of bounds");
        &self.data[row * self.cols + col]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f64 {
        assert!(row < self.rows && col < self.cols, "matrix index out of bounds");
        &mut self.data[row * self.cols + col]
    }
}

impl Neg for &Matrix {
    type Output = Matrix;

    fn neg(self) -> Matrix {
        self.scale(-1.0)
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.rows {
            for j in 0..self.cols {
                if j > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{:>9.3}", self[(i, j)])?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_major_round_trip_preserves_layout() {
        let m = Matrix::from_rows(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let cm = m.to_column_major();
        assert_eq!(cm, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(Matrix::from_column_major(2, 3, &cm).unwrap(), m);
    }

    #[test]
    fn add_and_sub_reject_mismatched_shapes() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(3, 2);
        assert!(matches!(
            a.add(&b),
            Err(MatrixError::DimensionMismatch { op: "add", .. })
        ));
        assert!(matches!(
            a.sub(&b),
            Err(MatrixError::DimensionMismatch { op: "sub", .. })
        ));
    }

    #[test]
    fn transpose_swaps_indices() {
        let m = Matrix::from_rows(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let t = m.transpose();
        assert_eq!(t.shape(), (3, 2));
        assert_eq!(t[(2, 1)], 6.0);
        assert_eq!(t[(0, 1)], 4.0);
    }

    #[test]
    fn columns_split_joint_solutions() {
        let m = Matrix::from_column_major(2, 2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(m.columns(), vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(m.column(2), None);
    }

    #[test]
    fn negation_and_scale_agree() {
        let m = Matrix::identity(3);
        assert_eq!(-&m, m.scale(-1.0));
        assert_eq!(m.add(&-&m).unwrap(), Matrix::zeros(3, 3));
    }
}
