//! The linear mixed model: objective, derivatives and fitting.

use rayon::prelude::*;
use tracing::{info, warn};

use remlmm_linalg::{DenseMatrix, SparseMatrix};

use super::fitted::{FitParts, FittedModel};
use crate::data::Dataset;
use crate::design::{construct, DesignMatrices, Dims, ModelDesign, ModelOptions, ModelSpec, ParameterLabels};
use crate::error::{ConfigurationWarning, NumericalError, Result, SpecificationError};
use crate::optim::{BoundedNewton, Bound, MinimizeOutcome, Minimizer, NewtonConfig, Objective};
use crate::reml::score::{self, GlsSolution, Projection};
use crate::reml::{DerivativeMatrices, MixedModelEquations, RemlTerms, VarianceComponents};

/// Configuration for `LinearMixedModel::fit`.
#[derive(Debug, Clone, Default)]
pub struct FitConfig {
    /// Starting theta; `initial_theta()` when absent.
    pub theta0: Option<Vec<f64>>,
    pub newton: NewtonConfig,
    /// Return `NumericalError::NotConverged` instead of an unconverged fit.
    pub require_convergence: bool,
}

/// GLS estimate of the fixed effects at one theta.
#[derive(Debug, Clone)]
pub struct FixedEffects {
    pub coefficients: Vec<f64>,
    /// (X'V^{-1}X)^{-1}
    pub covariance: DenseMatrix,
    pub standard_errors: Vec<f64>,
}

/// A linear mixed model with its constant design-dependent structures.
#[derive(Debug, Clone)]
pub struct LinearMixedModel {
    design: ModelDesign,
    components: VarianceComponents,
    mme: MixedModelEquations,
    derivatives: DerivativeMatrices,
}

impl LinearMixedModel {
    /// Build the design from a specification and dataset.
    pub fn new(spec: &ModelSpec, data: &Dataset, options: &ModelOptions) -> Result<Self> {
        let design = construct(spec, data, options)?;
        Self::from_design(design)
    }

    /// Build from an already-constructed design.
    pub fn from_design(design: ModelDesign) -> Result<Self> {
        let components = VarianceComponents::new(&design.dims, &design.structures)?;
        let structural = components.inverse_covariance(&components.structural_theta())?;
        let mme = MixedModelEquations::new(&design.matrices, &structural)?;
        let derivatives = DerivativeMatrices::build(&design.matrices, &components);
        info!(
            "Linear mixed model ready: N={}, p={}, q={}, theta={}",
            design.matrices.n_rows(),
            design.matrices.n_fixed(),
            design.matrices.n_random(),
            design.dims.n_params()
        );
        Ok(Self {
            design,
            components,
            mme,
            derivatives,
        })
    }

    pub fn design(&self) -> &DesignMatrices {
        &self.design.matrices
    }

    pub fn dims(&self) -> &Dims {
        &self.design.dims
    }

    pub fn labels(&self) -> &ParameterLabels {
        &self.design.labels
    }

    pub fn warnings(&self) -> &[ConfigurationWarning] {
        &self.design.warnings
    }

    pub fn components(&self) -> &VarianceComponents {
        &self.components
    }

    pub fn derivatives(&self) -> &DerivativeMatrices {
        &self.derivatives
    }

    pub fn n_params(&self) -> usize {
        self.components.n_params()
    }

    pub fn initial_theta(&self) -> Vec<f64> {
        self.components.initial_theta()
    }

    pub fn bounds(&self) -> Vec<Bound> {
        self.components.bounds()
    }

    /// Objective split into its log-determinant and quadratic terms.
    pub fn reml_terms(&self, theta: &[f64]) -> Result<RemlTerms> {
        let inv = self.components.inverse_covariance(theta)?;
        Ok(self.mme.evaluate(&inv)?)
    }

    /// -2 times the restricted log-likelihood (constants dropped).
    pub fn loglike(&self, theta: &[f64]) -> Result<f64> {
        Ok(self.reml_terms(theta)?.value())
    }

    /// `loglike` for independent candidates, evaluated in parallel.
    pub fn loglike_many(&self, thetas: &[Vec<f64>]) -> Vec<Result<f64>> {
        thetas.par_iter().map(|theta| self.loglike(theta)).collect()
    }

    /// P and Py at theta, with V^{-1} from the Woodbury identity.
    pub fn projection(&self, theta: &[f64]) -> Result<Projection> {
        let inv = self.components.inverse_covariance(theta)?;
        let w = score::weight_matrix(&self.design.matrices.z, &inv)?;
        let m = &self.design.matrices;
        Ok(Projection::new(&m.x, &w, &m.y)?)
    }

    pub fn gradient(&self, theta: &[f64]) -> Result<Vec<f64>> {
        let projection = self.projection(theta)?;
        let g = score::gradient(&self.derivatives, &projection);
        if g.iter().any(|v| !v.is_finite()) {
            return Err(NumericalError::non_finite("gradient").into());
        }
        Ok(g)
    }

    pub fn hessian(&self, theta: &[f64]) -> Result<DenseMatrix> {
        let projection = self.projection(theta)?;
        Ok(score::hessian(&self.derivatives, &projection))
    }

    /// V^{-1} at theta. Random-effect blocks whose covariance is
    /// identically zero are dropped from V; if all are, V^{-1} = R^{-1}.
    pub fn weight_matrix(&self, theta: &[f64]) -> Result<DenseMatrix> {
        let reduced = self.components.reduced_inverse_covariance(theta)?;
        let z = &self.design.matrices.z;
        let ranges = self.design.dims.z_ranges();
        let active: Vec<SparseMatrix> = ranges
            .iter()
            .zip(reduced.active.iter())
            .filter(|(_, on)| **on)
            .map(|(r, _)| z.column_slice(r.start, r.end))
            .collect();
        let z_active = if active.is_empty() {
            SparseMatrix::zeros(z.nrows(), 0)
        } else {
            SparseMatrix::hstack(&active.iter().collect::<Vec<_>>())
        };
        Ok(score::weight_matrix(&z_active, &reduced.inverse)?)
    }

    fn gls_at(&self, theta: &[f64]) -> Result<(GlsSolution, DenseMatrix)> {
        let w = self.weight_matrix(theta)?;
        let m = &self.design.matrices;
        let solution = score::gls(&m.x, &w, &m.y)?;
        Ok((solution, w))
    }

    /// GLS fixed effects b = (X'WX)^{-1} X'Wy at theta.
    pub fn fixed_effects_at(&self, theta: &[f64]) -> Result<FixedEffects> {
        let (solution, _) = self.gls_at(theta)?;
        Ok(fixed_effects_from(solution))
    }

    /// Fit with the default bounded Newton minimizer.
    pub fn fit(&self, config: &FitConfig) -> Result<FittedModel> {
        self.fit_with(&BoundedNewton::new(config.newton.clone()), config)
    }

    /// Fit with any minimizer.
    pub fn fit_with<M: Minimizer + ?Sized>(&self, minimizer: &M, config: &FitConfig) -> Result<FittedModel> {
        let theta0 = config
            .theta0
            .clone()
            .unwrap_or_else(|| self.initial_theta());
        if theta0.len() != self.n_params() {
            return Err(SpecificationError::ThetaLength {
                expected: self.n_params(),
                got: theta0.len(),
            }
            .into());
        }
        info!("Starting REML fit with {} variance parameters", theta0.len());

        let outcome = minimizer.minimize(self, &theta0, &self.bounds())?;
        if !outcome.converged {
            warn!("REML fit did not converge after {} iterations", outcome.iterations);
            if config.require_convergence {
                return Err(NumericalError::NotConverged {
                    iterations: outcome.iterations,
                }
                .into());
            }
        }
        let fitted = self.assemble(outcome)?;
        info!(
            "REML fit finished: -2logL={:.6}, AIC={:.4}, |grad|={:.3e}",
            fitted.neg2_reml_loglike, fitted.criteria.aic, fitted.gradient_norm
        );
        Ok(fitted)
    }

    fn assemble(&self, outcome: MinimizeOutcome) -> Result<FittedModel> {
        let theta = outcome.x;
        let (solution, w) = self.gls_at(&theta)?;
        let fixed = fixed_effects_from(solution);
        let covariance = self.components.covariance(&theta)?;
        let hessian = self.hessian(&theta)?;
        let gradient = self.gradient(&theta)?;
        let neg2_reml_loglike = self.loglike(&theta)?;

        let m = &self.design.matrices;
        let xb = m.x.mat_vec(&fixed.coefficients);
        let resid_fixed: Vec<f64> = m.y.iter().zip(xb.iter()).map(|(y, f)| y - f).collect();
        // u = G Z' W (y - Xb)
        let u = covariance.g.mat_vec(&m.z.t_mat_vec(&w.mat_vec(&resid_fixed)));

        FittedModel::assemble(FitParts {
            theta,
            fixed,
            random_effects: u,
            covariance,
            hessian,
            gradient,
            bounds: self.bounds(),
            neg2_reml_loglike,
            iterations: outcome.iterations,
            converged: outcome.converged,
            design: m,
            dims: &self.design.dims,
            labels: &self.design.labels,
        })
    }
}

fn fixed_effects_from(solution: GlsSolution) -> FixedEffects {
    let standard_errors = solution
        .information_inverse
        .diag()
        .iter()
        .map(|v| if *v >= 0.0 { v.sqrt() } else { f64::NAN })
        .collect();
    FixedEffects {
        coefficients: solution.coefficients,
        covariance: solution.information_inverse,
        standard_errors,
    }
}

impl Objective for LinearMixedModel {
    fn value(&self, x: &[f64]) -> Result<f64> {
        self.loglike(x)
    }

    fn gradient(&self, x: &[f64]) -> Result<Vec<f64>> {
        LinearMixedModel::gradient(self, x)
    }

    fn hessian(&self, x: &[f64]) -> Result<DenseMatrix> {
        LinearMixedModel::hessian(self, x)
    }
}
