#![allow(clippy::needless_range_loop)]
//! Sparse matrix operations backed by sprs.
//!
//! CSR storage for design matrices, block covariance matrices and the
//! constant derivative matrices of the REML objective.

use sprs::{CsMat, CsMatI, TriMat};

use crate::dense::DenseMatrix;

/// A sparse matrix wrapper around sprs CSR format.
#[derive(Debug, Clone)]
pub struct SparseMatrix {
    inner: CsMatI<f64, usize>,
    nrows: usize,
    ncols: usize,
}

impl SparseMatrix {
    /// Create from (row, col, value) entries.
    pub fn from_entries(nrows: usize, ncols: usize, entries: &[(usize, usize, f64)]) -> Self {
        let mut tri = TriMat::with_capacity((nrows, ncols), entries.len());
        for &(i, j, v) in entries {
            tri.add_triplet(i, j, v);
        }
        Self {
            inner: tri.to_csr(),
            nrows,
            ncols,
        }
    }

    /// Create from a dense matrix (keeps only non-zero entries).
    pub fn from_dense(dense: &DenseMatrix) -> Self {
        let (nrows, ncols) = (dense.nrows(), dense.ncols());
        let mut tri = TriMat::new((nrows, ncols));
        for j in 0..ncols {
            for i in 0..nrows {
                let val = dense.get(i, j);
                if val != 0.0 {
                    tri.add_triplet(i, j, val);
                }
            }
        }
        Self {
            inner: tri.to_csr(),
            nrows,
            ncols,
        }
    }

    /// Create a sparse identity matrix.
    pub fn identity(n: usize) -> Self {
        let inner = CsMat::eye(n);
        Self {
            inner,
            nrows: n,
            ncols: n,
        }
    }

    /// An all-zero matrix with no stored entries.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self::from_entries(nrows, ncols, &[])
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of non-zero entries.
    pub fn nnz(&self) -> usize {
        self.inner.nnz()
    }

    /// Get element at (row, col). Returns 0.0 if not stored.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        match self.inner.get(row, col) {
            Some(&v) => v,
            None => 0.0,
        }
    }

    /// All stored entries as (row, col, value), row by row.
    pub fn entries(&self) -> Vec<(usize, usize, f64)> {
        let mut out = Vec::with_capacity(self.nnz());
        for (i, row) in self.inner.outer_iterator().enumerate() {
            for (j, &v) in row.iter() {
                out.push((i, j, v));
            }
        }
        out
    }

    /// Stored entries grouped by column: `result[j]` holds (row, value) pairs.
    pub fn column_entries(&self) -> Vec<Vec<(usize, f64)>> {
        let mut cols = vec![Vec::new(); self.ncols];
        for (i, row) in self.inner.outer_iterator().enumerate() {
            for (j, &v) in row.iter() {
                cols[j].push((i, v));
            }
        }
        cols
    }

    /// Sparse matrix-vector product: self * v.
    pub fn mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(v.len(), self.ncols);
        let mut result = vec![0.0; self.nrows];
        for (i, row) in self.inner.outer_iterator().enumerate() {
            let mut sum = 0.0;
            for (j, &a) in row.iter() {
                sum += a * v[j];
            }
            result[i] = sum;
        }
        result
    }

    /// Transposed product self' * v without forming the transpose.
    pub fn t_mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(v.len(), self.nrows);
        let mut result = vec![0.0; self.ncols];
        for (i, row) in self.inner.outer_iterator().enumerate() {
            let vi = v[i];
            if vi == 0.0 {
                continue;
            }
            for (j, &a) in row.iter() {
                result[j] += a * vi;
            }
        }
        result
    }

    /// Sparse-sparse product self * other.
    pub fn mat_mul(&self, other: &SparseMatrix) -> SparseMatrix {
        assert_eq!(self.ncols, other.nrows);
        let product = &self.inner * &other.inner;
        SparseMatrix {
            inner: product.to_csr(),
            nrows: self.nrows,
            ncols: other.ncols,
        }
    }

    /// Transpose.
    pub fn transpose(&self) -> SparseMatrix {
        SparseMatrix {
            inner: self.inner.transpose_view().to_csr(),
            nrows: self.ncols,
            ncols: self.nrows,
        }
    }

    /// Dense copy.
    pub fn to_dense(&self) -> DenseMatrix {
        let mut out = DenseMatrix::zeros(self.nrows, self.ncols);
        for (i, row) in self.inner.outer_iterator().enumerate() {
            for (j, &v) in row.iter() {
                out.add_at(i, j, v);
            }
        }
        out
    }

    /// Scale all entries by a scalar.
    pub fn scale(&self, s: f64) -> SparseMatrix {
        let scaled = self.inner.map(|v| v * s);
        SparseMatrix {
            inner: scaled,
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }

    /// Entrywise absolute value. Products of such matrices cannot cancel,
    /// so they carry the full structural pattern.
    pub fn abs(&self) -> SparseMatrix {
        SparseMatrix {
            inner: self.inner.map(|v| v.abs()),
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }

    /// Add two sparse matrices (same dimensions).
    pub fn add(&self, other: &SparseMatrix) -> SparseMatrix {
        assert_eq!(self.nrows, other.nrows);
        assert_eq!(self.ncols, other.ncols);
        let result = &self.inner + &other.inner;
        SparseMatrix {
            inner: result.to_csr(),
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }

    /// Kronecker product self ⊗ other.
    pub fn kron(&self, other: &SparseMatrix) -> SparseMatrix {
        let (p, q) = (other.nrows, other.ncols);
        let a = self.entries();
        let b = other.entries();
        let mut tri = TriMat::with_capacity((self.nrows * p, self.ncols * q), a.len() * b.len());
        for &(i, j, av) in &a {
            for &(k, l, bv) in &b {
                tri.add_triplet(i * p + k, j * q + l, av * bv);
            }
        }
        SparseMatrix {
            inner: tri.to_csr(),
            nrows: self.nrows * p,
            ncols: self.ncols * q,
        }
    }

    /// Horizontal concatenation of matrices sharing a row count.
    pub fn hstack(blocks: &[&SparseMatrix]) -> SparseMatrix {
        assert!(!blocks.is_empty());
        let nrows = blocks[0].nrows;
        let ncols: usize = blocks.iter().map(|b| b.ncols).sum();
        let mut entries = Vec::new();
        let mut offset = 0;
        for block in blocks {
            assert_eq!(block.nrows, nrows);
            entries.extend(block.entries().into_iter().map(|(i, j, v)| (i, j + offset, v)));
            offset += block.ncols;
        }
        SparseMatrix::from_entries(nrows, ncols, &entries)
    }

    /// Block-diagonal matrix from a list of blocks.
    pub fn block_diag(blocks: &[SparseMatrix]) -> SparseMatrix {
        let nrows: usize = blocks.iter().map(|b| b.nrows).sum();
        let ncols: usize = blocks.iter().map(|b| b.ncols).sum();
        let mut entries = Vec::new();
        let (mut r0, mut c0) = (0, 0);
        for block in blocks {
            entries.extend(block.entries().into_iter().map(|(i, j, v)| (i + r0, j + c0, v)));
            r0 += block.nrows;
            c0 += block.ncols;
        }
        SparseMatrix::from_entries(nrows, ncols, &entries)
    }

    /// Columns `start..end` as a new matrix.
    pub fn column_slice(&self, start: usize, end: usize) -> SparseMatrix {
        assert!(start <= end && end <= self.ncols);
        let entries: Vec<_> = self
            .entries()
            .into_iter()
            .filter(|&(_, j, _)| j >= start && j < end)
            .map(|(i, j, v)| (i, j - start, v))
            .collect();
        SparseMatrix::from_entries(self.nrows, end - start, &entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let m = SparseMatrix::identity(3);
        assert_eq!(m.nrows(), 3);
        assert_eq!(m.ncols(), 3);
        assert_eq!(m.nnz(), 3);
        assert_eq!(m.get(0, 0), 1.0);
        assert_eq!(m.get(0, 1), 0.0);
    }

    #[test]
    fn test_mat_vec() {
        let m =
            SparseMatrix::from_entries(3, 3, &[(0, 0, 1.0), (1, 1, 2.0), (2, 2, 3.0), (0, 2, 0.5)]);
        let v = vec![1.0, 1.0, 1.0];
        let result = m.mat_vec(&v);
        assert!((result[0] - 1.5).abs() < 1e-10);
        assert!((result[1] - 2.0).abs() < 1e-10);
        assert!((result[2] - 3.0).abs() < 1e-10);
        let t = m.t_mat_vec(&v);
        assert!((t[2] - 3.5).abs() < 1e-10);
    }

    #[test]
    fn test_from_entries_sums_duplicates() {
        let m = SparseMatrix::from_entries(2, 2, &[(0, 0, 3.0), (1, 1, 7.0), (1, 1, 1.0)]);
        assert_eq!(m.get(0, 0), 3.0);
        assert_eq!(m.get(1, 1), 8.0);
        assert_eq!(m.get(0, 1), 0.0);
    }

    #[test]
    fn test_mat_mul_matches_dense() {
        let a = SparseMatrix::from_entries(2, 3, &[(0, 0, 1.0), (0, 2, 2.0), (1, 1, 3.0)]);
        let b = SparseMatrix::from_entries(3, 2, &[(0, 1, 4.0), (1, 0, 5.0), (2, 1, 6.0)]);
        let c = a.mat_mul(&b).to_dense();
        let expected = a.to_dense().mat_mul(&b.to_dense());
        assert!(c.max_abs_diff(&expected) < 1e-12);
    }

    #[test]
    fn test_transpose() {
        let a = SparseMatrix::from_entries(2, 3, &[(0, 2, 1.5), (1, 0, -2.0)]);
        let t = a.transpose();
        assert_eq!(t.nrows(), 3);
        assert_eq!(t.ncols(), 2);
        assert_eq!(t.get(2, 0), 1.5);
        assert_eq!(t.get(0, 1), -2.0);
    }

    #[test]
    fn test_kron_matches_dense() {
        let a = SparseMatrix::from_entries(2, 2, &[(0, 0, 1.0), (1, 0, 2.0), (1, 1, 3.0)]);
        let b = SparseMatrix::from_entries(2, 3, &[(0, 2, 4.0), (1, 0, 5.0)]);
        let k = a.kron(&b).to_dense();
        let expected = a.to_dense().kron(&b.to_dense());
        assert!(k.max_abs_diff(&expected) < 1e-12);
    }

    #[test]
    fn test_hstack_and_slice() {
        let a = SparseMatrix::identity(2);
        let b = SparseMatrix::from_entries(2, 1, &[(1, 0, 9.0)]);
        let h = SparseMatrix::hstack(&[&a, &b]);
        assert_eq!(h.ncols(), 3);
        assert_eq!(h.get(1, 2), 9.0);
        let s = h.column_slice(1, 3);
        assert_eq!(s.ncols(), 2);
        assert_eq!(s.get(1, 0), 1.0);
        assert_eq!(s.get(1, 1), 9.0);
    }

    #[test]
    fn test_block_diag() {
        let bd = SparseMatrix::block_diag(&[SparseMatrix::identity(2), SparseMatrix::identity(1).scale(4.0)]);
        assert_eq!(bd.nrows(), 3);
        assert_eq!(bd.get(2, 2), 4.0);
        assert_eq!(bd.get(0, 2), 0.0);
    }
}
