//! Variance-component parameterization.
//!
//! theta holds vech(Sigma_k) for every random-effect block followed by
//! vech(Sigma_error). Block covariances are G_k = A_k ⊗ Sigma_k and
//! R = A_e ⊗ Sigma_error, with A the between-unit structure matrices.

use remlmm_linalg::decomposition::CholeskyDecomp;
use remlmm_linalg::structured::{invech, vech};
use remlmm_linalg::{DenseMatrix, SparseMatrix};

use crate::design::{Dims, Structures};
use crate::error::{NumericalError, Result, SpecificationError};
use crate::optim::Bound;

/// Lower bound of every variance. Sigma must factor, so exactly 0 is
/// never feasible.
pub const VARIANCE_FLOOR: f64 = 1e-8;

/// Between-unit structure matrix A of one block.
#[derive(Debug, Clone)]
enum BetweenUnit {
    Identity(usize),
    Dense {
        a: DenseMatrix,
        a_inv: DenseMatrix,
        log_det: f64,
    },
}

impl BetweenUnit {
    fn new(size: usize, a: Option<&DenseMatrix>) -> Result<Self> {
        match a {
            None => Ok(BetweenUnit::Identity(size)),
            Some(a) => {
                let chol = CholeskyDecomp::new(a)?;
                Ok(BetweenUnit::Dense {
                    a: a.clone(),
                    a_inv: chol.inverse(),
                    log_det: chol.log_determinant(),
                })
            }
        }
    }

    fn size(&self) -> usize {
        match self {
            BetweenUnit::Identity(n) => *n,
            BetweenUnit::Dense { a, .. } => a.nrows(),
        }
    }

    fn log_det(&self) -> f64 {
        match self {
            BetweenUnit::Identity(_) => 0.0,
            BetweenUnit::Dense { log_det, .. } => *log_det,
        }
    }

    fn matrix(&self) -> SparseMatrix {
        match self {
            BetweenUnit::Identity(n) => SparseMatrix::identity(*n),
            BetweenUnit::Dense { a, .. } => SparseMatrix::from_dense(a),
        }
    }

    fn inverse(&self) -> SparseMatrix {
        match self {
            BetweenUnit::Identity(n) => SparseMatrix::identity(*n),
            BetweenUnit::Dense { a_inv, .. } => SparseMatrix::from_dense(a_inv),
        }
    }
}

/// G, R and the small covariance matrices at one theta.
#[derive(Debug, Clone)]
pub struct Covariance {
    pub g: SparseMatrix,
    pub r: SparseMatrix,
    pub sigmas: Vec<DenseMatrix>,
    pub sigma_error: DenseMatrix,
}

/// G^{-1}, R^{-1} and their log-determinants at one theta.
#[derive(Debug, Clone)]
pub struct InverseCovariance {
    pub g_inv: SparseMatrix,
    pub r_inv: SparseMatrix,
    pub log_det_g: f64,
    pub log_det_r: f64,
}

/// Inverse covariance restricted to blocks whose Sigma_k is not
/// identically zero.
#[derive(Debug, Clone)]
pub struct ReducedInverse {
    pub inverse: InverseCovariance,
    /// One flag per random-effect block.
    pub active: Vec<bool>,
}

#[derive(Debug, Clone)]
pub struct VarianceComponents {
    dims: Dims,
    random: Vec<BetweenUnit>,
    error: BetweenUnit,
}

impl VarianceComponents {
    pub fn new(dims: &Dims, structures: &Structures) -> Result<Self> {
        let random = dims
            .random_effects()
            .iter()
            .enumerate()
            .map(|(k, e)| BetweenUnit::new(e.n_groups, structures.random.get(k).and_then(Option::as_ref)))
            .collect::<Result<Vec<_>>>()?;
        let error = BetweenUnit::new(dims.error().n_groups, structures.error.as_ref())?;
        Ok(Self {
            dims: dims.clone(),
            random,
            error,
        })
    }

    pub fn dims(&self) -> &Dims {
        &self.dims
    }

    pub fn n_params(&self) -> usize {
        self.dims.n_params()
    }

    /// Structure matrix A_k of a random-effect block.
    pub fn structure(&self, k: usize) -> SparseMatrix {
        self.random[k].matrix()
    }

    /// Structure matrix A_e of the error block.
    pub fn error_structure(&self) -> SparseMatrix {
        self.error.matrix()
    }

    /// Split theta into Sigma_k (per block) and Sigma_error.
    pub fn unpack(&self, theta: &[f64]) -> Result<(Vec<DenseMatrix>, DenseMatrix)> {
        if theta.len() != self.n_params() {
            return Err(SpecificationError::ThetaLength {
                expected: self.n_params(),
                got: theta.len(),
            }
            .into());
        }
        if theta.iter().any(|t| !t.is_finite()) {
            return Err(NumericalError::non_finite("theta").into());
        }
        let mut blocks = self
            .dims
            .theta_ranges()
            .into_iter()
            .map(|r| invech(&theta[r]))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let sigma_error = blocks.pop().ok_or(NumericalError::non_finite("theta"))?;
        Ok((blocks, sigma_error))
    }

    /// theta from block covariance matrices, the inverse of `unpack`.
    pub fn pack(sigmas: &[DenseMatrix], sigma_error: &DenseMatrix) -> Vec<f64> {
        sigmas
            .iter()
            .chain(std::iter::once(sigma_error))
            .flat_map(vech)
            .collect()
    }

    /// G = blockdiag(A_k ⊗ Sigma_k) and R = A_e ⊗ Sigma_error.
    pub fn covariance(&self, theta: &[f64]) -> Result<Covariance> {
        let (sigmas, sigma_error) = self.unpack(theta)?;
        let blocks: Vec<SparseMatrix> = self
            .random
            .iter()
            .zip(sigmas.iter())
            .map(|(a, s)| a.matrix().kron(&SparseMatrix::from_dense(s)))
            .collect();
        let g = SparseMatrix::block_diag(&blocks);
        let r = self.error.matrix().kron(&SparseMatrix::from_dense(&sigma_error));
        Ok(Covariance {
            g,
            r,
            sigmas,
            sigma_error,
        })
    }

    /// G^{-1}, R^{-1}, log|G| and log|R| via Cholesky factors of the
    /// small matrices: log|A ⊗ S| = dim(S) log|A| + dim(A) log|S|.
    pub fn inverse_covariance(&self, theta: &[f64]) -> Result<InverseCovariance> {
        let reduced = self.inverse_covariance_masked(theta, false)?;
        Ok(reduced.inverse)
    }

    /// Like `inverse_covariance`, but blocks with Sigma_k == 0 are dropped
    /// instead of failing; callers must drop the matching columns of Z.
    pub fn reduced_inverse_covariance(&self, theta: &[f64]) -> Result<ReducedInverse> {
        self.inverse_covariance_masked(theta, true)
    }

    fn inverse_covariance_masked(&self, theta: &[f64], skip_zero: bool) -> Result<ReducedInverse> {
        let (sigmas, sigma_error) = self.unpack(theta)?;
        let mut blocks = Vec::with_capacity(sigmas.len());
        let mut active = Vec::with_capacity(sigmas.len());
        let mut log_det_g = 0.0;

        for ((entry, a), sigma) in self
            .dims
            .random_effects()
            .iter()
            .zip(self.random.iter())
            .zip(sigmas.iter())
        {
            if skip_zero && sigma.is_zero() {
                active.push(false);
                continue;
            }
            let chol = CholeskyDecomp::new(sigma).map_err(|_| {
                NumericalError::not_pd(format!("covariance of random effect '{}'", entry.name))
            })?;
            log_det_g += entry.n_vars as f64 * a.log_det() + a.size() as f64 * chol.log_determinant();
            blocks.push(a.inverse().kron(&SparseMatrix::from_dense(&chol.inverse())));
            active.push(true);
        }

        let chol_e = CholeskyDecomp::new(&sigma_error)
            .map_err(|_| NumericalError::not_pd("error covariance"))?;
        let v = self.dims.error().n_vars as f64;
        let log_det_r = v * self.error.log_det() + self.error.size() as f64 * chol_e.log_determinant();
        let r_inv = self
            .error
            .inverse()
            .kron(&SparseMatrix::from_dense(&chol_e.inverse()));

        Ok(ReducedInverse {
            inverse: InverseCovariance {
                g_inv: SparseMatrix::block_diag(&blocks),
                r_inv,
                log_det_g,
                log_det_r,
            },
            active,
        })
    }

    /// Variances (vech diagonals) are at least `VARIANCE_FLOOR`, covariances free.
    pub fn bounds(&self) -> Vec<Bound> {
        let mut bounds = vec![Bound::UNBOUNDED; self.n_params()];
        for p in self.dims.variance_positions() {
            bounds[p] = Bound::at_least(VARIANCE_FLOOR);
        }
        bounds
    }

    /// vech(I) for every block.
    pub fn initial_theta(&self) -> Vec<f64> {
        self.dims
            .iter()
            .flat_map(|e| vech(&DenseMatrix::identity(e.n_vars)))
            .collect()
    }

    /// A theta whose every Sigma has all entries nonzero (1 on the diagonal,
    /// 1/2 off it), so G^{-1} and R^{-1} show their full sparsity pattern.
    pub fn structural_theta(&self) -> Vec<f64> {
        self.dims
            .iter()
            .flat_map(|e| {
                let sigma = DenseMatrix::from_fn(e.n_vars, e.n_vars, |i, j| if i == j { 1.0 } else { 0.5 });
                vech(&sigma)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::DimEntry;
    use remlmm_linalg::decomposition::inverse_spd;

    fn components(structure: Option<DenseMatrix>) -> VarianceComponents {
        let dims = Dims::new(vec![DimEntry::new("g", 3, 2, 1)], 6, 1);
        let structures = Structures {
            random: vec![structure],
            error: None,
        };
        VarianceComponents::new(&dims, &structures).unwrap()
    }

    #[test]
    fn test_initial_theta_and_bounds() {
        let c = components(None);
        assert_eq!(c.initial_theta(), vec![1.0, 0.0, 1.0, 1.0]);
        let b = c.bounds();
        assert_eq!(b[0], Bound::at_least(VARIANCE_FLOOR));
        assert_eq!(b[1], Bound::UNBOUNDED);
        assert_eq!(b[2], Bound::at_least(VARIANCE_FLOOR));
        assert_eq!(b[3], Bound::at_least(VARIANCE_FLOOR));
    }

    #[test]
    fn test_pack_unpack() {
        let c = components(None);
        let theta = vec![2.0, 0.3, 1.5, 0.7];
        let (sigmas, e) = c.unpack(&theta).unwrap();
        assert_eq!(sigmas[0].get(0, 1), 0.3);
        assert_eq!(e.get(0, 0), 0.7);
        assert_eq!(VarianceComponents::pack(&sigmas, &e), theta);
        assert!(matches!(
            c.unpack(&[1.0]),
            Err(crate::error::LmmError::Specification(SpecificationError::ThetaLength { .. }))
        ));
    }

    #[test]
    fn test_inverse_matches_dense() {
        let a = DenseMatrix::from_row_major(3, 3, &[1.0, 0.3, 0.1, 0.3, 1.0, 0.2, 0.1, 0.2, 1.0]);
        let c = components(Some(a));
        let theta = vec![2.0, 0.3, 1.5, 0.7];
        let cov = c.covariance(&theta).unwrap();
        let inv = c.inverse_covariance(&theta).unwrap();

        let g = cov.g.to_dense();
        let g_inv = inverse_spd(&g).unwrap();
        assert!(inv.g_inv.to_dense().max_abs_diff(&g_inv) < 1e-10);
        let log_det_g = CholeskyDecomp::new(&g).unwrap().log_determinant();
        assert!((inv.log_det_g - log_det_g).abs() < 1e-10);
        assert!((inv.log_det_r - 6.0 * 0.7f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_non_pd_sigma_is_numerical_error() {
        let c = components(None);
        let err = c.inverse_covariance(&[1.0, 2.0, 1.0, 1.0]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::LmmError::Numerical(NumericalError::NotPositiveDefinite { .. })
        ));
    }

    #[test]
    fn test_reduced_drops_zero_blocks() {
        let c = components(None);
        let reduced = c.reduced_inverse_covariance(&[0.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(reduced.active, vec![false]);
        assert_eq!(reduced.inverse.g_inv.nrows(), 0);
        assert!(c.inverse_covariance(&[0.0, 0.0, 0.0, 1.0]).is_err());
    }
}
