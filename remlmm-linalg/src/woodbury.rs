//! Woodbury identity for V = Z G Z' + R.
//!
//! V^{-1} = R^{-1} - R^{-1} Z (G^{-1} + Z' R^{-1} Z)^{-1} Z' R^{-1}
//!
//! Only the inner q x q system is factorized, with the sparse Cholesky;
//! R^{-1} and G^{-1} come in already inverted, which is cheap for the
//! block-Kronecker structures they have here.

use crate::decomposition::LinalgError;
use crate::dense::DenseMatrix;
use crate::sparse::SparseMatrix;
use crate::sparse_cholesky::SparseCholesky;

/// Inverse of Z G Z' + R from Z, G^{-1} and R^{-1}.
pub fn woodbury_inverse(
    z: &SparseMatrix,
    g_inv: &SparseMatrix,
    r_inv: &SparseMatrix,
) -> Result<DenseMatrix, LinalgError> {
    let n = r_inv.nrows();
    if z.nrows() != n {
        return Err(LinalgError::DimensionMismatch {
            expected: n,
            got: z.nrows(),
        });
    }
    if g_inv.nrows() != z.ncols() {
        return Err(LinalgError::DimensionMismatch {
            expected: z.ncols(),
            got: g_inv.nrows(),
        });
    }
    let r_inv_dense = r_inv.to_dense();
    if z.ncols() == 0 {
        return Ok(r_inv_dense);
    }

    let rz = r_inv.mat_mul(z);
    let inner = g_inv.add(&z.transpose().mat_mul(&rz));
    let chol = SparseCholesky::new(&inner)?;

    let rz_dense = rz.to_dense();
    // S = inner^{-1} (R^{-1} Z)'
    let s = chol.solve_mat(&rz_dense.transpose());
    let mut v_inv = r_inv_dense.sub(&rz_dense.mat_mul(&s));
    v_inv.symmetrize();
    Ok(v_inv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomposition::inverse_spd;

    #[test]
    fn test_woodbury_matches_dense_inverse() {
        // Two groups of three observations, random intercept.
        let z = SparseMatrix::from_entries(
            6,
            2,
            &[(0, 0, 1.0), (1, 0, 1.0), (2, 0, 1.0), (3, 1, 1.0), (4, 1, 1.0), (5, 1, 1.0)],
        );
        let g = SparseMatrix::identity(2).scale(0.7);
        let r = SparseMatrix::from_entries(
            6,
            6,
            &(0..6).map(|i| (i, i, 1.0 + 0.1 * i as f64)).collect::<Vec<_>>(),
        );
        let g_inv = SparseMatrix::identity(2).scale(1.0 / 0.7);
        let r_inv = SparseMatrix::from_entries(
            6,
            6,
            &(0..6).map(|i| (i, i, 1.0 / (1.0 + 0.1 * i as f64))).collect::<Vec<_>>(),
        );

        let zd = z.to_dense();
        let v = zd.mat_mul(&g.to_dense()).mat_mul(&zd.transpose()).add(&r.to_dense());
        let expected = inverse_spd(&v).unwrap();
        let got = woodbury_inverse(&z, &g_inv, &r_inv).unwrap();
        assert!(got.max_abs_diff(&expected) < 1e-10);
    }

    #[test]
    fn test_woodbury_without_random_effects() {
        let z = SparseMatrix::zeros(3, 0);
        let g_inv = SparseMatrix::zeros(0, 0);
        let r_inv = SparseMatrix::identity(3).scale(2.0);
        let got = woodbury_inverse(&z, &g_inv, &r_inv).unwrap();
        assert!(got.max_abs_diff(&DenseMatrix::identity(3).scale(2.0)) < 1e-15);
    }

    #[test]
    fn test_woodbury_rejects_indefinite_inner() {
        let z = SparseMatrix::identity(2);
        let g_inv = SparseMatrix::identity(2).scale(-5.0);
        let r_inv = SparseMatrix::identity(2);
        assert_eq!(
            woodbury_inverse(&z, &g_inv, &r_inv).unwrap_err(),
            LinalgError::NotPositiveDefinite
        );
    }
}
