//! REML evaluation: variance-component parameterization, the mixed-model
//! equations, constant derivative matrices and the gradient/Hessian.

pub mod covariance;
pub mod derivatives;
pub mod mme;
pub mod score;

pub use covariance::{Covariance, InverseCovariance, ReducedInverse, VarianceComponents, VARIANCE_FLOOR};
pub use derivatives::{DerivativeMatrices, Jacobian};
pub use mme::{MixedModelEquations, RemlTerms};
pub use score::{GlsSolution, Projection};
