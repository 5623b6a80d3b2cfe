//! Results of a REML fit.

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

use remlmm_linalg::decomposition::pseudo_inverse;
use remlmm_linalg::{DenseMatrix, SparseMatrix};

use super::lmm::FixedEffects;
use crate::design::{DesignMatrices, Dims, ParameterLabels};
use crate::error::{Result, SpecificationError};
use crate::optim::{projected_gradient, Bound};
use crate::reml::Covariance;

/// Estimate, standard error, t statistic and two-sided p-value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterEstimate {
    pub label: String,
    pub estimate: f64,
    pub std_error: f64,
    pub t_value: f64,
    pub p_value: f64,
}

/// Estimated covariance Sigma of one block, row-major.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CovarianceEstimate {
    pub name: String,
    pub n_vars: usize,
    pub values: Vec<f64>,
}

impl CovarianceEstimate {
    fn new(name: &str, sigma: &DenseMatrix) -> Self {
        let n = sigma.nrows();
        let values = (0..n).flat_map(|i| (0..n).map(move |j| (i, j))).map(|(i, j)| sigma.get(i, j)).collect();
        Self {
            name: name.to_string(),
            n_vars: n,
            values,
        }
    }

    pub fn matrix(&self) -> DenseMatrix {
        DenseMatrix::from_row_major(self.n_vars, self.n_vars, &self.values)
    }
}

/// Information criteria from -2 l_R with N observations and k variance parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InformationCriteria {
    pub aic: f64,
    pub aicc: f64,
    pub bic: f64,
    pub caic: f64,
}

impl InformationCriteria {
    pub fn new(neg2_loglike: f64, n: usize, k: usize) -> Self {
        let (nf, kf) = (n as f64, k as f64);
        Self {
            aic: neg2_loglike + 2.0 * kf,
            aicc: neg2_loglike + 2.0 * kf * nf / (nf - kf - 1.0),
            bic: neg2_loglike + kf * nf.ln(),
            caic: neg2_loglike + kf * (nf + 1.0).ln(),
        }
    }
}

/// Proportion of var(y) explained by Xb, by Zu and by both.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RSquared {
    pub fixed: f64,
    pub random: f64,
    pub total: f64,
}

fn variance(v: &[f64]) -> f64 {
    let n = v.len() as f64;
    let mean = v.iter().sum::<f64>() / n;
    v.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n
}

fn difference(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b.iter()).map(|(x, y)| x - y).collect()
}

impl RSquared {
    pub fn new(y: &[f64], xb: &[f64], zu: &[f64]) -> Self {
        let var_y = variance(y);
        let resid_fixed = difference(y, xb);
        let resid_random = difference(y, zu);
        let resid_total = difference(&resid_fixed, zu);
        Self {
            fixed: 1.0 - variance(&resid_fixed) / var_y,
            random: 1.0 - variance(&resid_random) / var_y,
            total: 1.0 - variance(&resid_total) / var_y,
        }
    }
}

/// Two-sided p-value of `t` under Student t with `df` degrees of freedom.
pub fn two_sided_p_value(t: f64, df: f64) -> f64 {
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) if t.is_finite() => 2.0 * dist.sf(t.abs()),
        _ => f64::NAN,
    }
}

fn estimates(labels: &[String], values: &[f64], std_errors: &[f64], df: f64) -> Vec<ParameterEstimate> {
    labels
        .iter()
        .zip(values.iter())
        .zip(std_errors.iter())
        .map(|((label, &estimate), &std_error)| {
            let t_value = estimate / std_error;
            ParameterEstimate {
                label: label.clone(),
                estimate,
                std_error,
                t_value,
                p_value: two_sided_p_value(t_value, df),
            }
        })
        .collect()
}

/// Everything `LinearMixedModel` computes at theta* before summarizing.
pub(crate) struct FitParts<'a> {
    pub theta: Vec<f64>,
    pub fixed: FixedEffects,
    pub random_effects: Vec<f64>,
    pub covariance: Covariance,
    pub hessian: DenseMatrix,
    pub gradient: Vec<f64>,
    pub bounds: Vec<Bound>,
    pub neg2_reml_loglike: f64,
    pub iterations: usize,
    pub converged: bool,
    pub design: &'a DesignMatrices,
    pub dims: &'a Dims,
    pub labels: &'a ParameterLabels,
}

/// A fitted linear mixed model.
#[derive(Debug, Clone, Serialize)]
pub struct FittedModel {
    pub theta: Vec<f64>,
    pub fixed_effects: Vec<f64>,
    /// BLUP of the random effects, in Z column order.
    pub random_effects: Vec<f64>,
    pub covariances: Vec<CovarianceEstimate>,
    pub error_covariance: CovarianceEstimate,
    pub theta_estimates: Vec<ParameterEstimate>,
    pub fixed_estimates: Vec<ParameterEstimate>,
    pub neg2_reml_loglike: f64,
    pub criteria: InformationCriteria,
    pub r_squared: RSquared,
    /// Norm of the projected gradient at theta*.
    pub gradient_norm: f64,
    pub iterations: usize,
    pub converged: bool,
    pub fitted_values: Vec<f64>,
    pub residuals: Vec<f64>,
}

impl FittedModel {
    pub(crate) fn assemble(parts: FitParts<'_>) -> Result<Self> {
        let m = parts.design;
        let n = m.n_rows();
        let k = parts.theta.len();
        let df = n as f64 - k as f64;

        // Observed information of l_R is H/2, so Cov(theta) = pinv(H/2).
        let theta_cov = pseudo_inverse(&parts.hessian.scale(0.5))?;
        let theta_se: Vec<f64> = theta_cov.diag().iter().map(|v| v.max(0.0).sqrt()).collect();

        let xb = m.x.mat_vec(&parts.fixed.coefficients);
        let zu = m.z.mat_vec(&parts.random_effects);
        let fitted_values: Vec<f64> = xb.iter().zip(zu.iter()).map(|(a, b)| a + b).collect();
        let residuals = difference(&m.y, &fitted_values);

        let covariances = parts
            .dims
            .random_effects()
            .iter()
            .zip(parts.covariance.sigmas.iter())
            .map(|(entry, sigma)| CovarianceEstimate::new(&entry.name, sigma))
            .collect();
        let error_covariance = CovarianceEstimate::new(&parts.dims.error().name, &parts.covariance.sigma_error);

        let gradient_norm =
            DenseMatrix::norm(&projected_gradient(&parts.theta, &parts.gradient, &parts.bounds));

        Ok(Self {
            theta_estimates: estimates(&parts.labels.theta, &parts.theta, &theta_se, df),
            fixed_estimates: estimates(
                &parts.labels.fixed,
                &parts.fixed.coefficients,
                &parts.fixed.standard_errors,
                df,
            ),
            criteria: InformationCriteria::new(parts.neg2_reml_loglike, n, k),
            r_squared: RSquared::new(&m.y, &xb, &zu),
            theta: parts.theta,
            fixed_effects: parts.fixed.coefficients,
            random_effects: parts.random_effects,
            covariances,
            error_covariance,
            neg2_reml_loglike: parts.neg2_reml_loglike,
            gradient_norm,
            iterations: parts.iterations,
            converged: parts.converged,
            fitted_values,
            residuals,
        })
    }

    /// Xb + Zu on the training design.
    pub fn predict(&self) -> &[f64] {
        &self.fitted_values
    }

    /// Xb + Zu for new design matrices laid out like the training ones.
    pub fn predict_with(&self, x: &DenseMatrix, z: &SparseMatrix) -> Result<Vec<f64>> {
        if x.ncols() != self.fixed_effects.len() {
            return Err(SpecificationError::ShapeMismatch {
                column: "X".into(),
                expected: self.fixed_effects.len(),
                got: x.ncols(),
            }
            .into());
        }
        if z.ncols() != self.random_effects.len() || z.nrows() != x.nrows() {
            return Err(SpecificationError::ShapeMismatch {
                column: "Z".into(),
                expected: self.random_effects.len(),
                got: z.ncols(),
            }
            .into());
        }
        let xb = x.mat_vec(&self.fixed_effects);
        let zu = z.mat_vec(&self.random_effects);
        Ok(xb.iter().zip(zu.iter()).map(|(a, b)| a + b).collect())
    }

    /// Plain-text report of the fit.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "REML linear mixed model\n\
             -2 REML log-likelihood: {:.6}\n\
             AIC: {:.4}  AICc: {:.4}  BIC: {:.4}  CAIC: {:.4}\n\
             R2 fixed: {:.4}  random: {:.4}  total: {:.4}\n\
             Converged: {} ({} iterations, |grad| = {:.3e})\n",
            self.neg2_reml_loglike,
            self.criteria.aic,
            self.criteria.aicc,
            self.criteria.bic,
            self.criteria.caic,
            self.r_squared.fixed,
            self.r_squared.random,
            self.r_squared.total,
            self.converged,
            self.iterations,
            self.gradient_norm,
        );
        for (title, rows) in [("Variance components", &self.theta_estimates), ("Fixed effects", &self.fixed_estimates)] {
            out.push_str(&format!("\n{}:\n", title));
            for e in rows.iter() {
                out.push_str(&format!(
                    "  {:<32} {:>12.6} {:>12.6} {:>9.3} {:>10.3e}\n",
                    e.label, e.estimate, e.std_error, e.t_value, e.p_value
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_information_criteria() {
        let ic = InformationCriteria::new(100.0, 50, 2);
        assert!((ic.aic - 104.0).abs() < 1e-12);
        assert!((ic.aicc - (100.0 + 4.0 * 50.0 / 47.0)).abs() < 1e-12);
        assert!((ic.bic - (100.0 + 2.0 * 50f64.ln())).abs() < 1e-12);
        assert!((ic.caic - (100.0 + 2.0 * 51f64.ln())).abs() < 1e-12);
    }

    #[test]
    fn test_r_squared() {
        let y = [1.0, 2.0, 3.0, 4.0];
        let r2 = RSquared::new(&y, &y, &[0.0; 4]);
        assert!((r2.fixed - 1.0).abs() < 1e-12);
        assert!(r2.random.abs() < 1e-12);
        assert!((r2.total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_p_values() {
        assert!((two_sided_p_value(0.0, 10.0) - 1.0).abs() < 1e-12);
        // t_{0.975, 10} = 2.228139
        assert!((two_sided_p_value(2.228139, 10.0) - 0.05).abs() < 1e-5);
        assert!(two_sided_p_value(1.0, 0.0).is_nan());
        assert!(two_sided_p_value(f64::NAN, 5.0).is_nan());
    }

    #[test]
    fn test_covariance_estimate_matrix() {
        let s = DenseMatrix::from_row_major(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        let est = CovarianceEstimate::new("g", &s);
        assert_eq!(est.values, vec![2.0, 0.5, 0.5, 1.0]);
        assert_eq!(est.matrix().max_abs_diff(&s), 0.0);
    }
}
