//! Bound-constrained minimization of the REML objective.
//!
//! The model exposes the objective through the `Objective` trait; any
//! `Minimizer` can drive it. `BoundedNewton` is the default.

pub mod newton;

use serde::Serialize;

use remlmm_linalg::DenseMatrix;

use crate::error::Result;

pub use newton::{BoundedNewton, NewtonConfig};

/// Box constraint on a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bound {
    pub lower: f64,
    pub upper: f64,
}

impl Bound {
    pub const UNBOUNDED: Bound = Bound {
        lower: f64::NEG_INFINITY,
        upper: f64::INFINITY,
    };

    /// [lower, +inf)
    pub fn at_least(lower: f64) -> Self {
        Bound {
            lower,
            upper: f64::INFINITY,
        }
    }

    pub fn project(&self, x: f64) -> f64 {
        x.max(self.lower).min(self.upper)
    }

    /// Within `ACTIVE_TOL` (relative) of the lower bound.
    pub fn at_lower(&self, x: f64) -> bool {
        self.lower.is_finite() && x - self.lower <= ACTIVE_TOL * (1.0 + self.lower.abs())
    }

    pub fn at_upper(&self, x: f64) -> bool {
        self.upper.is_finite() && self.upper - x <= ACTIVE_TOL * (1.0 + self.upper.abs())
    }
}

/// Distance from a bound below which a coordinate counts as on it.
pub const ACTIVE_TOL: f64 = 1e-8;

/// Objective with first and second derivatives.
///
/// An `Err(LmmError::Numerical(_))` from `value` marks the point as
/// infeasible; minimizers reject such points and shorten the step.
pub trait Objective {
    fn value(&self, x: &[f64]) -> Result<f64>;
    fn gradient(&self, x: &[f64]) -> Result<Vec<f64>>;
    fn hessian(&self, x: &[f64]) -> Result<DenseMatrix>;
}

#[derive(Debug, Clone, Serialize)]
pub struct MinimizeOutcome {
    pub x: Vec<f64>,
    pub value: f64,
    pub converged: bool,
    pub iterations: usize,
}

pub trait Minimizer {
    fn minimize(
        &self,
        objective: &dyn Objective,
        x0: &[f64],
        bounds: &[Bound],
    ) -> Result<MinimizeOutcome>;
}

/// Clamp every coordinate into its bound.
pub fn project(x: &mut [f64], bounds: &[Bound]) {
    for (xi, b) in x.iter_mut().zip(bounds.iter()) {
        *xi = b.project(*xi);
    }
}

/// Gradient with components zeroed where a bound the coordinate sits on
/// (or within `ACTIVE_TOL` of) blocks descent.
pub fn projected_gradient(x: &[f64], g: &[f64], bounds: &[Bound]) -> Vec<f64> {
    x.iter()
        .zip(g.iter())
        .zip(bounds.iter())
        .map(|((&xi, &gi), b)| {
            if (b.at_lower(xi) && gi > 0.0) || (b.at_upper(xi) && gi < 0.0) {
                0.0
            } else {
                gi
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project() {
        let bounds = [Bound::at_least(0.0), Bound::UNBOUNDED];
        let mut x = [-1.0, -1.0];
        project(&mut x, &bounds);
        assert_eq!(x, [0.0, -1.0]);
    }

    #[test]
    fn test_projected_gradient() {
        let bounds = [Bound::at_least(0.0), Bound::at_least(0.0), Bound::UNBOUNDED];
        let pg = projected_gradient(&[0.0, 0.0, 0.0], &[2.0, -2.0, 2.0], &bounds);
        assert_eq!(pg, vec![0.0, -2.0, 2.0]);
    }

    #[test]
    fn test_near_bound_is_active() {
        let floor = Bound::at_least(1e-8);
        // Just above the floor with an outward gradient: held.
        let pg = projected_gradient(&[1.000_000_1e-8, 1e-3], &[5.0, 5.0], &[floor, floor]);
        assert_eq!(pg, vec![0.0, 5.0]);
        // Pointing inward it stays free.
        assert_eq!(projected_gradient(&[1e-8], &[-5.0], &[floor]), vec![-5.0]);
    }
}
