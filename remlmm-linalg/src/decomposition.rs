#![allow(clippy::needless_range_loop)]
//! Dense matrix decompositions and solvers.
//!
//! Cholesky (solve, inverse, log-determinant) and a symmetric
//! eigendecomposition backed by faer for pseudo-inverses.

use crate::dense::DenseMatrix;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinalgError {
    #[error("Matrix is not positive definite")]
    NotPositiveDefinite,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Eigendecomposition failed to converge")]
    EigenNotConverged,

    #[error("Entry ({row}, {col}) lies outside the analysed sparsity pattern")]
    PatternMismatch { row: usize, col: usize },

    #[error("Ordering is not a permutation")]
    InvalidPermutation,

    #[error("Symbolic factorization failed: {0}")]
    SymbolicFailed(String),
}

/// Result of a Cholesky decomposition.
#[derive(Debug, Clone)]
pub struct CholeskyDecomp {
    /// Lower triangular factor L such that A = L * L'.
    pub l: DenseMatrix,
}

impl CholeskyDecomp {
    /// Compute the Cholesky decomposition of a symmetric positive definite matrix.
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: a.ncols(),
            });
        }
        let mut l = DenseMatrix::zeros(n, n);

        for j in 0..n {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l.get(j, k) * l.get(j, k);
            }
            let diag = a.get(j, j) - sum;
            if diag <= 0.0 || !diag.is_finite() {
                return Err(LinalgError::NotPositiveDefinite);
            }
            l.set(j, j, diag.sqrt());

            for i in (j + 1)..n {
                let mut sum = 0.0;
                for k in 0..j {
                    sum += l.get(i, k) * l.get(j, k);
                }
                l.set(i, j, (a.get(i, j) - sum) / l.get(j, j));
            }
        }

        Ok(CholeskyDecomp { l })
    }

    /// Dimension of the factored matrix.
    pub fn dim(&self) -> usize {
        self.l.nrows()
    }

    /// log|A| = 2 * sum(log(diag(L))).
    pub fn log_determinant(&self) -> f64 {
        2.0 * (0..self.dim()).map(|i| self.l.get(i, i).ln()).sum::<f64>()
    }

    /// Solve L * L' * x = b.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let n = self.l.nrows();
        assert_eq!(b.len(), n);

        // Forward substitution: L * y = b
        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut sum = 0.0;
            for j in 0..i {
                sum += self.l.get(i, j) * y[j];
            }
            y[i] = (b[i] - sum) / self.l.get(i, i);
        }

        // Backward substitution: L' * x = y
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = 0.0;
            for j in (i + 1)..n {
                sum += self.l.get(j, i) * x[j];
            }
            x[i] = (y[i] - sum) / self.l.get(i, i);
        }

        x
    }

    /// Solve A * X = B column by column.
    pub fn solve_mat(&self, b: &DenseMatrix) -> DenseMatrix {
        let mut out = DenseMatrix::zeros(b.nrows(), b.ncols());
        for j in 0..b.ncols() {
            let col = self.solve(&b.col(j));
            out.set_col(j, &col);
        }
        out
    }

    /// Compute the inverse of the original matrix A^{-1} = (L L')^{-1}.
    pub fn inverse(&self) -> DenseMatrix {
        let n = self.l.nrows();
        let mut inv = DenseMatrix::zeros(n, n);
        for j in 0..n {
            let mut e = vec![0.0; n];
            e[j] = 1.0;
            let col = self.solve(&e);
            inv.set_col(j, &col);
        }
        inv.symmetrize();
        inv
    }
}

/// Eigendecomposition A = U diag(s) U' of a symmetric matrix.
/// Eigenvalues are in nondecreasing order.
pub struct SymmetricEigen {
    pub values: Vec<f64>,
    pub vectors: DenseMatrix,
}

impl SymmetricEigen {
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: a.ncols(),
            });
        }
        let evd = a
            .as_faer()
            .self_adjoint_eigen(faer::Side::Lower)
            .map_err(|_| LinalgError::EigenNotConverged)?;
        let s = evd.S().column_vector();
        let u = evd.U();
        let values: Vec<f64> = (0..n).map(|i| s[i]).collect();
        let vectors = DenseMatrix::from_fn(n, n, |i, j| u[(i, j)]);
        Ok(Self { values, vectors })
    }

    /// Moore-Penrose pseudo-inverse, dropping eigenvalues below
    /// `n * eps * max|s|` in magnitude.
    pub fn pseudo_inverse(&self) -> DenseMatrix {
        let n = self.values.len();
        let max_abs = self.values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let cutoff = (n.max(1) as f64) * f64::EPSILON * max_abs;
        let mut out = DenseMatrix::zeros(n, n);
        for (k, &s) in self.values.iter().enumerate() {
            if s.abs() <= cutoff {
                continue;
            }
            let inv = 1.0 / s;
            for j in 0..n {
                let ujk = self.vectors.get(j, k) * inv;
                if ujk == 0.0 {
                    continue;
                }
                for i in 0..n {
                    out.add_at(i, j, self.vectors.get(i, k) * ujk);
                }
            }
        }
        out.symmetrize();
        out
    }
}

/// Pseudo-inverse of a symmetric matrix.
pub fn pseudo_inverse(a: &DenseMatrix) -> Result<DenseMatrix, LinalgError> {
    Ok(SymmetricEigen::new(a)?.pseudo_inverse())
}

/// Compute the inverse of a symmetric positive definite matrix.
pub fn inverse_spd(a: &DenseMatrix) -> Result<DenseMatrix, LinalgError> {
    let chol = CholeskyDecomp::new(a)?;
    Ok(chol.inverse())
}
