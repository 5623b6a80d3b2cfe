//! Projected Newton with Levenberg damping and step halving.
//!
//! Each iteration:
//!   1. fix coordinates sitting on a bound whose gradient pushes outward
//!   2. solve (H_ff + lambda I) d = -g_f on the free set, raising lambda
//!      until the damped Hessian factorizes
//!   3. backtrack x + alpha d (projected) by halving alpha until the
//!      Armijo condition holds; infeasible trial points are rejected. A full
//!      step whose cost change is within `tol_cost` is also accepted.
//!
//! Converged only when the projected gradient norm reaches `tol_grad`. A
//! failed line search, `MAX_STALLS` negligible steps in a row, or
//! `max_iter` end the run unconverged.

use tracing::{debug, info, warn};

use remlmm_linalg::decomposition::CholeskyDecomp;
use remlmm_linalg::DenseMatrix;

use super::{project, projected_gradient, Bound, MinimizeOutcome, Minimizer, Objective};
use crate::error::{LmmError, NumericalError, Result, SpecificationError};

/// Configuration for the bounded Newton minimizer.
#[derive(Debug, Clone)]
pub struct NewtonConfig {
    /// Maximum Newton iterations.
    pub max_iter: usize,
    /// Convergence tolerance on the projected gradient norm.
    pub tol_grad: f64,
    /// Relative cost change treated as evaluation noise.
    pub tol_cost: f64,
    /// Maximum step halvings per line search.
    pub max_halvings: usize,
    /// First Levenberg damping tried when the Hessian is not positive
    /// definite, relative to its largest diagonal entry.
    pub initial_damping: f64,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol_grad: 1e-6,
            tol_cost: 1e-10,
            max_halvings: 40,
            initial_damping: 1e-8,
        }
    }
}

/// Armijo sufficient-decrease constant.
const ARMIJO: f64 = 1e-4;
const MAX_DAMPING_TRIES: usize = 60;
/// Consecutive negligible steps before giving up.
const MAX_STALLS: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct BoundedNewton {
    pub config: NewtonConfig,
}

impl BoundedNewton {
    pub fn new(config: NewtonConfig) -> Self {
        Self { config }
    }

    /// Damped Newton direction on the free coordinates.
    fn direction(&self, h: &DenseMatrix, g: &[f64], free: &[usize]) -> Vec<f64> {
        let m = free.len();
        let g_free: Vec<f64> = free.iter().map(|&i| g[i]).collect();
        let h_free = DenseMatrix::from_fn(m, m, |a, b| h.get(free[a], free[b]));
        let scale = h_free
            .diag()
            .iter()
            .fold(1.0f64, |acc, d| acc.max(d.abs()));

        let mut lambda = 0.0;
        for _ in 0..MAX_DAMPING_TRIES {
            let mut damped = h_free.clone();
            for i in 0..m {
                damped.add_at(i, i, lambda);
            }
            if let Ok(chol) = CholeskyDecomp::new(&damped) {
                let d: Vec<f64> = chol.solve(&g_free).iter().map(|v| -v).collect();
                if d.iter().all(|v| v.is_finite()) && DenseMatrix::dot(&d, &g_free) < 0.0 {
                    if lambda > 0.0 {
                        debug!("Newton step damped with lambda={:.3e}", lambda);
                    }
                    return d;
                }
            }
            lambda = if lambda == 0.0 {
                self.config.initial_damping * scale
            } else {
                lambda * 10.0
            };
        }
        warn!("Hessian could not be regularized, falling back to steepest descent");
        g_free.iter().map(|v| -v).collect()
    }
}

impl Minimizer for BoundedNewton {
    fn minimize(
        &self,
        objective: &dyn Objective,
        x0: &[f64],
        bounds: &[Bound],
    ) -> Result<MinimizeOutcome> {
        let cfg = &self.config;
        let n = x0.len();
        if bounds.len() != n {
            return Err(SpecificationError::ThetaLength {
                expected: bounds.len(),
                got: n,
            }
            .into());
        }

        let mut x = x0.to_vec();
        project(&mut x, bounds);
        let mut f = objective.value(&x)?;
        if !f.is_finite() {
            return Err(NumericalError::non_finite("objective at starting point").into());
        }
        info!("Bounded Newton: {} parameters, initial objective {:.6}", n, f);

        let mut converged = false;
        let mut iterations = 0;
        let mut stalls = 0;

        for iter in 0..cfg.max_iter {
            iterations = iter + 1;
            let g = objective.gradient(&x)?;
            let pg = projected_gradient(&x, &g, bounds);
            let pg_norm = DenseMatrix::norm(&pg);
            if pg_norm <= cfg.tol_grad {
                converged = true;
                debug!("Iteration {}: projected gradient {:.3e} below tolerance", iter, pg_norm);
                break;
            }

            let free: Vec<usize> = (0..n).filter(|&i| pg[i] != 0.0 || g[i] == 0.0).collect();
            let h = objective.hessian(&x)?;
            let d_free = self.direction(&h, &g, &free);
            let mut d = vec![0.0; n];
            for (k, &i) in free.iter().enumerate() {
                d[i] = d_free[k];
            }

            let noise = cfg.tol_cost * (1.0 + f.abs());
            let mut alpha = 1.0;
            let mut accepted: Option<(Vec<f64>, f64)> = None;
            for halving in 0..=cfg.max_halvings {
                let mut trial: Vec<f64> = x.iter().zip(d.iter()).map(|(xi, di)| xi + alpha * di).collect();
                project(&mut trial, bounds);
                let decrease: f64 = g
                    .iter()
                    .zip(trial.iter().zip(x.iter()))
                    .map(|(gi, (ti, xi))| gi * (ti - xi))
                    .sum();
                if decrease == 0.0 {
                    break;
                }
                match objective.value(&trial) {
                    Ok(ft) if ft.is_finite() && ft <= f + ARMIJO * decrease => {
                        accepted = Some((trial, ft));
                        break;
                    }
                    Ok(ft) if halving == 0 && ft.is_finite() && ft - f <= noise => {
                        accepted = Some((trial, ft));
                        break;
                    }
                    Ok(_) => {}
                    Err(LmmError::Numerical(err)) => {
                        warn!("Rejected infeasible iterate (alpha={:.3e}): {}", alpha, err);
                    }
                    Err(err) => return Err(err),
                }
                alpha *= 0.5;
            }

            let Some((trial, ft)) = accepted else {
                warn!(
                    "Line search failed at iteration {} (projected gradient {:.3e})",
                    iter, pg_norm
                );
                break;
            };

            let change = f - ft;
            x = trial;
            f = ft;
            debug!(
                "Iteration {}: objective={:.8}, |pg|={:.3e}, alpha={:.3e}",
                iter, f, pg_norm, alpha
            );
            if change.abs() <= noise {
                stalls += 1;
                if stalls >= MAX_STALLS {
                    warn!(
                        "No progress for {} iterations (projected gradient {:.3e})",
                        stalls, pg_norm
                    );
                    break;
                }
            } else {
                stalls = 0;
            }
        }

        if converged {
            info!("Bounded Newton converged after {} iterations, objective {:.6}", iterations, f);
        } else {
            warn!("Bounded Newton did not converge after {} iterations", iterations);
        }

        Ok(MinimizeOutcome {
            x,
            value: f,
            converged,
            iterations,
        })
    }
}
