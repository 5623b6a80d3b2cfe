//! Model fitting and fitted-model summaries.

pub mod fitted;
pub mod lmm;

pub use fitted::{CovarianceEstimate, FittedModel, InformationCriteria, ParameterEstimate, RSquared};
pub use lmm::{FitConfig, FixedEffects, LinearMixedModel};
