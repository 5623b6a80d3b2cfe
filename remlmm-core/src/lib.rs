//! remlmm-core: REML estimation of linear mixed models.
//!
//! Builds design matrices from a model specification and an in-memory
//! dataset, parameterizes the variance components, evaluates the REML
//! objective through the mixed-model equations and fits it with a
//! bound-constrained Newton method using exact gradients and Hessians.

pub mod data;
pub mod design;
pub mod error;
pub mod model;
pub mod optim;
pub mod reml;

pub use data::Dataset;
pub use design::{GroupingFactorSpec, ModelDesign, ModelOptions, ModelSpec};
pub use error::{ConfigurationWarning, LmmError, NumericalError, Result, SpecificationError};
pub use model::{FitConfig, FittedModel, LinearMixedModel};
