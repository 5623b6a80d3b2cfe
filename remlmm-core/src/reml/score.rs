//! Gradient and Hessian of the REML objective.
//!
//! With P = V^{-1} - V^{-1} X (X'V^{-1}X)^{-1} X'V^{-1} and J_i = dV/dtheta_i:
//!
//!   g_k  = D_k' vec(P) - D_k' (Py ⊗ Py)
//!   H_ij = -tr(P J_i P J_j) + 2 (Py)' J_i P J_j Py
//!
//! Both are derivatives of -2 l_R, matching `MixedModelEquations::evaluate`.

use rayon::prelude::*;
use tracing::debug;

use remlmm_linalg::decomposition::{CholeskyDecomp, LinalgError};
use remlmm_linalg::woodbury::woodbury_inverse;
use remlmm_linalg::{DenseMatrix, SparseMatrix};

use super::covariance::InverseCovariance;
use super::derivatives::DerivativeMatrices;
use crate::error::NumericalError;

/// V^{-1} through the Woodbury identity.
pub fn weight_matrix(z: &SparseMatrix, inv: &InverseCovariance) -> Result<DenseMatrix, NumericalError> {
    woodbury_inverse(z, &inv.g_inv, &inv.r_inv).map_err(|err| match err {
        LinalgError::NotPositiveDefinite => NumericalError::SingularWoodbury,
        other => NumericalError::Linalg(other),
    })
}

/// Generalized least squares pieces at a fixed weight matrix W = V^{-1}.
#[derive(Debug, Clone)]
pub struct GlsSolution {
    /// (X'WX)^{-1}
    pub information_inverse: DenseMatrix,
    /// b = (X'WX)^{-1} X'Wy
    pub coefficients: Vec<f64>,
    /// log|X'WX|
    pub log_det_information: f64,
}

pub fn gls(x: &DenseMatrix, w: &DenseMatrix, y: &[f64]) -> Result<GlsSolution, NumericalError> {
    let wx = w.mat_mul(x);
    let xtwx = x.t_mat_mul(&wx);
    let chol = CholeskyDecomp::new(&xtwx)
        .map_err(|_| NumericalError::not_pd("fixed-effect information matrix"))?;
    let xtwy = wx.t_mat_vec(y);
    Ok(GlsSolution {
        information_inverse: chol.inverse(),
        coefficients: chol.solve(&xtwy),
        log_det_information: chol.log_determinant(),
    })
}

/// P and Py at one theta.
#[derive(Debug, Clone)]
pub struct Projection {
    pub p: DenseMatrix,
    pub py: Vec<f64>,
}

impl Projection {
    pub fn new(x: &DenseMatrix, w: &DenseMatrix, y: &[f64]) -> Result<Self, NumericalError> {
        let wx = w.mat_mul(x);
        let xtwx = x.t_mat_mul(&wx);
        let chol = CholeskyDecomp::new(&xtwx)
            .map_err(|_| NumericalError::not_pd("fixed-effect information matrix"))?;
        // P = W - WX (X'WX)^{-1} X'W
        let s = chol.solve_mat(&wx.transpose());
        let mut p = w.sub(&wx.mat_mul(&s));
        p.symmetrize();
        let py = p.mat_vec(y);
        if py.iter().any(|v| !v.is_finite()) {
            return Err(NumericalError::non_finite("projection matrix"));
        }
        Ok(Self { p, py })
    }
}

/// Gradient of -2 l_R, one block of D at a time.
pub fn gradient(derivatives: &DerivativeMatrices, projection: &Projection) -> Vec<f64> {
    let n = derivatives.n();
    let py = &projection.py;
    // vec(P) - Py ⊗ Py
    let mut residual = projection.p.to_col_major();
    for b in 0..n {
        for a in 0..n {
            residual[a + n * b] -= py[a] * py[b];
        }
    }
    derivatives
        .blocks()
        .iter()
        .flat_map(|d_k| d_k.t_mat_vec(&residual))
        .collect()
}

/// Hessian of -2 l_R. P J_i is formed once per parameter; the upper
/// triangle is filled in parallel and mirrored.
pub fn hessian(derivatives: &DerivativeMatrices, projection: &Projection) -> DenseMatrix {
    let n = derivatives.n();
    let jacobians = derivatives.jacobians();
    let k = jacobians.len();
    let p = &projection.p;

    let pj: Vec<DenseMatrix> = jacobians.par_iter().map(|j| j.left_multiply(p)).collect();
    let jpy: Vec<Vec<f64>> = jacobians.par_iter().map(|j| j.mat_vec(&projection.py, n)).collect();
    let pjpy: Vec<Vec<f64>> = jpy.par_iter().map(|v| p.mat_vec(v)).collect();

    let pairs: Vec<(usize, usize)> = (0..k).flat_map(|i| (i..k).map(move |j| (i, j))).collect();
    let values: Vec<f64> = pairs
        .par_iter()
        .map(|&(i, j)| -pj[i].trace_of_product(&pj[j]) + 2.0 * DenseMatrix::dot(&jpy[i], &pjpy[j]))
        .collect();

    let mut h = DenseMatrix::zeros(k, k);
    for (&(i, j), &v) in pairs.iter().zip(values.iter()) {
        h.set(i, j, v);
        h.set(j, i, v);
    }
    debug!("Hessian assembled for {} parameters", k);
    h
}
