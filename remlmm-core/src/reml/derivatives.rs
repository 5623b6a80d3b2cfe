//! Derivative matrices of vec(V) with respect to theta.
//!
//! V = sum_k Z_k (A_k ⊗ Sigma_k) Z_k' + A_e ⊗ Sigma_e is linear in theta,
//! so dvec(V)/dtheta is a constant sparse matrix, built once per model.
//! For a block with structure A (m x m) and covariance Sigma (s x s):
//!
//!   dvec(A ⊗ Sigma)/dvech(Sigma) = Kv (vec(A) ⊗ I_{s^2}) D(s)
//!
//! with Kv = kronvec_mat((m, m), (s, s)); random-effect blocks are then
//! mapped through Z_k ⊗ Z_k.

use rayon::prelude::*;

use remlmm_linalg::structured::{duplication, kronvec_mat, vec_sparse};
use remlmm_linalg::{DenseMatrix, SparseMatrix};

use super::covariance::VarianceComponents;
use crate::design::DesignMatrices;

/// dvec(A ⊗ Sigma)/dvech(Sigma) for an m x m structure and s x s Sigma.
pub fn structured_covariance_derivative(a: &SparseMatrix, s: usize) -> SparseMatrix {
    let m = a.nrows();
    let kv = kronvec_mat((m, m), (s, s));
    let lifted = vec_sparse(a).kron(&SparseMatrix::identity(s * s));
    kv.mat_mul(&lifted).mat_mul(&duplication(s))
}

/// One column of the stacked derivative matrix reshaped to N x N,
/// stored as (row, col, value) entries.
#[derive(Debug, Clone, Default)]
pub struct Jacobian {
    entries: Vec<(usize, usize, f64)>,
}

impl Jacobian {
    pub fn entries(&self) -> &[(usize, usize, f64)] {
        &self.entries
    }

    /// J v
    pub fn mat_vec(&self, v: &[f64], n: usize) -> Vec<f64> {
        let mut out = vec![0.0; n];
        for &(a, b, val) in &self.entries {
            out[a] += val * v[b];
        }
        out
    }

    /// P J for dense P.
    pub fn left_multiply(&self, p: &DenseMatrix) -> DenseMatrix {
        let n = p.nrows();
        let mut out = DenseMatrix::zeros(n, n);
        for &(a, b, val) in &self.entries {
            for i in 0..n {
                out.add_at(i, b, p.get(i, a) * val);
            }
        }
        out
    }
}

/// Constant derivative matrices of a model.
#[derive(Debug, Clone)]
pub struct DerivativeMatrices {
    /// One N^2 x n_params_k matrix per block, error last.
    blocks: Vec<SparseMatrix>,
    jacobians: Vec<Jacobian>,
    n: usize,
}

impl DerivativeMatrices {
    pub fn build(design: &DesignMatrices, components: &VarianceComponents) -> Self {
        let dims = components.dims();
        let n = design.n_rows();

        let mut blocks: Vec<SparseMatrix> = dims
            .random_effects()
            .par_iter()
            .zip(dims.z_ranges().into_par_iter())
            .enumerate()
            .map(|(k, (entry, range))| {
                let d_g = structured_covariance_derivative(&components.structure(k), entry.n_vars);
                let z_k = design.z.column_slice(range.start, range.end);
                z_k.kron(&z_k).mat_mul(&d_g)
            })
            .collect();
        blocks.push(structured_covariance_derivative(
            &components.error_structure(),
            dims.error().n_vars,
        ));

        let mut jacobians = Vec::with_capacity(dims.n_params());
        for block in &blocks {
            for column in block.column_entries() {
                let entries = column
                    .into_iter()
                    .map(|(row, val)| (row % n, row / n, val))
                    .collect();
                jacobians.push(Jacobian { entries });
            }
        }

        Self {
            blocks,
            jacobians,
            n,
        }
    }

    /// Per-block derivative matrices, error last.
    pub fn blocks(&self) -> &[SparseMatrix] {
        &self.blocks
    }

    /// All blocks side by side: N^2 x n_params.
    pub fn stacked(&self) -> SparseMatrix {
        SparseMatrix::hstack(&self.blocks.iter().collect::<Vec<_>>())
    }

    /// dV/dtheta_i as N x N entry lists.
    pub fn jacobians(&self) -> &[Jacobian] {
        &self.jacobians
    }

    /// Observations N = n * v.
    pub fn n(&self) -> usize {
        self.n
    }
}
