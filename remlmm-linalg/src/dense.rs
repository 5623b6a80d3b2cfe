#![allow(clippy::needless_range_loop)]
//! Dense matrix operations backed by faer.
//!
//! Wraps faer's column-major `Mat<f64>` with the operations the REML
//! evaluator uses most: products (plain and transposed), Kronecker
//! products, traces of products and column access.

use faer::Mat;

/// A dense matrix wrapper around faer's `Mat<f64>`.
///
/// Column-major layout, so `to_col_major` is exactly `vec(A)`.
#[derive(Debug, Clone)]
pub struct DenseMatrix {
    inner: Mat<f64>,
}

impl DenseMatrix {
    /// Create a new dense matrix filled with zeros.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            inner: Mat::zeros(nrows, ncols),
        }
    }

    /// Create a dense matrix from a 2D slice (row-major input).
    pub fn from_row_major(nrows: usize, ncols: usize, data: &[f64]) -> Self {
        assert_eq!(data.len(), nrows * ncols);
        let inner = Mat::from_fn(nrows, ncols, |i, j| data[i * ncols + j]);
        Self { inner }
    }

    /// Build a matrix from a closure over (row, col).
    pub fn from_fn(nrows: usize, ncols: usize, f: impl FnMut(usize, usize) -> f64) -> Self {
        Self {
            inner: Mat::from_fn(nrows, ncols, f),
        }
    }

    /// Create an identity matrix of size n x n.
    pub fn identity(n: usize) -> Self {
        let inner = Mat::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.0 });
        Self { inner }
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    pub fn is_square(&self) -> bool {
        self.nrows() == self.ncols()
    }

    /// Get element at (row, col).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.inner[(row, col)]
    }

    /// Set element at (row, col).
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.inner[(row, col)] = value;
    }

    /// Add `value` to the element at (row, col).
    pub fn add_at(&mut self, row: usize, col: usize, value: f64) {
        self.inner[(row, col)] += value;
    }

    /// Get a reference to the underlying faer matrix.
    pub fn as_faer(&self) -> &Mat<f64> {
        &self.inner
    }

    /// Create from a faer matrix.
    pub fn from_faer(mat: Mat<f64>) -> Self {
        Self { inner: mat }
    }

    /// Matrix-vector product: self * v -> result vector.
    pub fn mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.ncols(), v.len());
        let n = self.nrows();
        let mut result = vec![0.0; n];
        for j in 0..self.ncols() {
            let vj = v[j];
            if vj == 0.0 {
                continue;
            }
            for i in 0..n {
                result[i] += self.inner[(i, j)] * vj;
            }
        }
        result
    }

    /// Transposed matrix-vector product: self' * v.
    pub fn t_mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.nrows(), v.len());
        (0..self.ncols())
            .map(|j| (0..self.nrows()).map(|i| self.inner[(i, j)] * v[i]).sum())
            .collect()
    }

    /// Matrix-matrix product: self * other.
    pub fn mat_mul(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.ncols(), other.nrows());
        let result = &self.inner * &other.inner;
        DenseMatrix { inner: result }
    }

    /// Transposed product: self' * other, without materializing self'.
    pub fn t_mat_mul(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.nrows(), other.nrows());
        let result = self.inner.transpose() * &other.inner;
        DenseMatrix { inner: result }
    }

    /// Transpose.
    pub fn transpose(&self) -> DenseMatrix {
        let inner = self.inner.transpose().to_owned();
        DenseMatrix { inner }
    }

    /// Extract column as a Vec<f64>.
    pub fn col(&self, j: usize) -> Vec<f64> {
        (0..self.nrows()).map(|i| self.inner[(i, j)]).collect()
    }

    /// Set an entire column from a slice.
    pub fn set_col(&mut self, j: usize, data: &[f64]) {
        assert_eq!(data.len(), self.nrows());
        for i in 0..self.nrows() {
            self.inner[(i, j)] = data[i];
        }
    }

    /// Element-wise addition: self + other.
    pub fn add(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.nrows(), other.nrows());
        assert_eq!(self.ncols(), other.ncols());
        let inner = Mat::from_fn(self.nrows(), self.ncols(), |i, j| {
            self.inner[(i, j)] + other.inner[(i, j)]
        });
        DenseMatrix { inner }
    }

    /// Element-wise subtraction: self - other.
    pub fn sub(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.nrows(), other.nrows());
        assert_eq!(self.ncols(), other.ncols());
        let inner = Mat::from_fn(self.nrows(), self.ncols(), |i, j| {
            self.inner[(i, j)] - other.inner[(i, j)]
        });
        DenseMatrix { inner }
    }

    /// Scalar multiplication.
    pub fn scale(&self, s: f64) -> DenseMatrix {
        let inner = Mat::from_fn(self.nrows(), self.ncols(), |i, j| self.inner[(i, j)] * s);
        DenseMatrix { inner }
    }

    /// Diagonal of a square matrix.
    pub fn diag(&self) -> Vec<f64> {
        let n = self.nrows().min(self.ncols());
        (0..n).map(|i| self.inner[(i, i)]).collect()
    }

    /// Create a diagonal matrix from a vector.
    pub fn from_diag(diag: &[f64]) -> Self {
        let n = diag.len();
        let inner = Mat::from_fn(n, n, |i, j| if i == j { diag[i] } else { 0.0 });
        Self { inner }
    }

    /// trace(self * other) in O(n*m) without forming the product.
    pub fn trace_of_product(&self, other: &DenseMatrix) -> f64 {
        assert_eq!(self.ncols(), other.nrows());
        assert_eq!(self.nrows(), other.ncols());
        let mut sum = 0.0;
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                sum += self.inner[(i, j)] * other.inner[(j, i)];
            }
        }
        sum
    }

    /// Quadratic form a' * self * b.
    pub fn quad_form(&self, a: &[f64], b: &[f64]) -> f64 {
        let sb = self.mat_vec(b);
        DenseMatrix::dot(a, &sb)
    }

    /// Replace the matrix by (A + A') / 2.
    pub fn symmetrize(&mut self) {
        let n = self.nrows();
        assert_eq!(n, self.ncols());
        for j in 0..n {
            for i in (j + 1)..n {
                let avg = 0.5 * (self.inner[(i, j)] + self.inner[(j, i)]);
                self.inner[(i, j)] = avg;
                self.inner[(j, i)] = avg;
            }
        }
    }

    /// Largest absolute element-wise difference to another matrix.
    pub fn max_abs_diff(&self, other: &DenseMatrix) -> f64 {
        assert_eq!(self.nrows(), other.nrows());
        assert_eq!(self.ncols(), other.ncols());
        let mut max = 0.0f64;
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                max = max.max((self.inner[(i, j)] - other.inner[(i, j)]).abs());
            }
        }
        max
    }

    /// Kronecker product self ⊗ other.
    pub fn kron(&self, other: &DenseMatrix) -> DenseMatrix {
        let (m, n) = (self.nrows(), self.ncols());
        let (p, q) = (other.nrows(), other.ncols());
        let inner = Mat::from_fn(m * p, n * q, |r, c| {
            self.inner[(r / p, c / q)] * other.inner[(r % p, c % q)]
        });
        DenseMatrix { inner }
    }

    /// Dot product of two vectors.
    pub fn dot(a: &[f64], b: &[f64]) -> f64 {
        assert_eq!(a.len(), b.len());
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    /// Euclidean norm of a vector.
    pub fn norm(a: &[f64]) -> f64 {
        DenseMatrix::dot(a, a).sqrt()
    }

    /// Extract column data as a flat Vec in column-major order, i.e. vec(A).
    pub fn to_col_major(&self) -> Vec<f64> {
        let mut data = Vec::with_capacity(self.nrows() * self.ncols());
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                data.push(self.inner[(i, j)]);
            }
        }
        data
    }

    /// True when every entry is exactly zero.
    pub fn is_zero(&self) -> bool {
        (0..self.ncols()).all(|j| (0..self.nrows()).all(|i| self.inner[(i, j)] == 0.0))
    }

    /// True when the matrix is exactly the identity.
    pub fn is_identity(&self) -> bool {
        self.is_square()
            && (0..self.ncols()).all(|j| {
                (0..self.nrows()).all(|i| {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    self.inner[(i, j)] == expected
                })
            })
    }
}
