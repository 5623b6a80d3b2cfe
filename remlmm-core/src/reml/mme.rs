//! REML objective through the mixed-model equations.
//!
//! With F = [X Z], C = F' R^{-1} F + diag(0, G^{-1}) and b = F' R^{-1} y,
//! the augmented matrix
//!
//!   M = [ C   b       ]
//!       [ b'  y'R^{-1}y ]
//!
//! has Cholesky factor whose last pivot squared is y'Py, and
//! log|C| = log|M| - log(y'Py). Then
//!
//!   -2 l_R = log|R| + log|G| + log|C| + y'Py   (up to a constant).

use remlmm_linalg::sparse_cholesky::SymbolicAnalysis;
use remlmm_linalg::{DenseMatrix, LinalgError, SparseMatrix};

use super::covariance::InverseCovariance;
use crate::design::DesignMatrices;
use crate::error::NumericalError;

/// Terms of the REML objective at one theta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemlTerms {
    pub log_det_r: f64,
    pub log_det_g: f64,
    pub log_det_c: f64,
    pub yt_py: f64,
}

impl RemlTerms {
    /// -2 times the restricted log-likelihood, constants dropped.
    pub fn value(&self) -> f64 {
        self.log_det_r + self.log_det_c + self.log_det_g + self.yt_py
    }
}

/// diag(0, G^{-1}) padded to the order of C.
fn penalty(n_fixed: usize, g_inv: &SparseMatrix) -> SparseMatrix {
    SparseMatrix::block_diag(&[SparseMatrix::zeros(n_fixed, n_fixed), g_inv.clone()])
}

fn numerical(err: LinalgError) -> NumericalError {
    match err {
        LinalgError::NotPositiveDefinite => NumericalError::not_pd("mixed model equations"),
        other => NumericalError::Linalg(other),
    }
}

/// Mixed-model equation system for a fixed design.
#[derive(Debug, Clone)]
pub struct MixedModelEquations {
    xz: SparseMatrix,
    y: Vec<f64>,
    n_fixed: usize,
    /// Symbolic factorization of M. C is ordered by AMD and the augmented
    /// row is pivoted last.
    analysis: SymbolicAnalysis,
}

impl MixedModelEquations {
    /// Fix the design and analyse the sparsity of M once. `structural`
    /// must be an inverse covariance whose blocks show their full pattern
    /// (see `VarianceComponents::structural_theta`).
    pub fn new(design: &DesignMatrices, structural: &InverseCovariance) -> Result<Self, NumericalError> {
        let x = SparseMatrix::from_dense(&design.x);
        let xz = SparseMatrix::hstack(&[&x, &design.z]);
        let n_fixed = design.x.ncols();
        let d = xz.ncols();

        let f = xz.abs();
        let c = f
            .transpose()
            .mat_mul(&structural.r_inv.abs().mat_mul(&f))
            .add(&penalty(n_fixed, &structural.g_inv.abs()));
        let mut ordering = SymbolicAnalysis::new(&c).map_err(numerical)?.permutation();
        ordering.push(d);

        let mut entries = c.entries();
        entries.extend((0..=d).flat_map(|i| [(i, d, 1.0), (d, i, 1.0)]));
        let m = SparseMatrix::from_entries(d + 1, d + 1, &entries);
        let analysis = SymbolicAnalysis::with_ordering(&m, &ordering).map_err(numerical)?;

        Ok(Self {
            xz,
            y: design.y.clone(),
            n_fixed,
            analysis,
        })
    }

    /// Order of C.
    pub fn dim(&self) -> usize {
        self.xz.ncols()
    }

    /// Elimination order of M, `perm[new] = old`.
    pub fn ordering(&self) -> Vec<usize> {
        self.analysis.permutation()
    }

    /// C = [X Z]' R^{-1} [X Z] + diag(0, G^{-1}).
    pub fn coefficient_matrix(&self, inv: &InverseCovariance) -> SparseMatrix {
        let rxz = inv.r_inv.mat_mul(&self.xz);
        let ftrf = self.xz.transpose().mat_mul(&rxz);
        ftrf.add(&penalty(self.n_fixed, &inv.g_inv))
    }

    /// The augmented matrix M with y'R^{-1}y in the last position.
    pub fn augmented_matrix(&self, inv: &InverseCovariance) -> SparseMatrix {
        let d = self.dim();
        let c = self.coefficient_matrix(inv);
        let ry = inv.r_inv.mat_vec(&self.y);
        let b = self.xz.t_mat_vec(&ry);
        let yry = DenseMatrix::dot(&self.y, &ry);

        let mut entries = c.entries();
        for (i, &bi) in b.iter().enumerate() {
            if bi != 0.0 {
                entries.push((i, d, bi));
                entries.push((d, i, bi));
            }
        }
        entries.push((d, d, yry));
        SparseMatrix::from_entries(d + 1, d + 1, &entries)
    }

    /// Factor M and split its log-determinant into the REML terms.
    pub fn evaluate(&self, inv: &InverseCovariance) -> Result<RemlTerms, NumericalError> {
        let m = self.augmented_matrix(inv);
        let chol = self.analysis.factorize(&m).map_err(numerical)?;
        let last = chol.factor_diagonal()[self.dim()];
        let yt_py = last * last;
        let terms = RemlTerms {
            log_det_r: inv.log_det_r,
            log_det_g: inv.log_det_g,
            log_det_c: chol.log_determinant() - yt_py.ln(),
            yt_py,
        };
        if !terms.value().is_finite() {
            return Err(NumericalError::non_finite("REML objective"));
        }
        Ok(terms)
    }
}
