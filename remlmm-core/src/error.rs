//! Error types for model specification and numerical evaluation.
//!
//! Specification errors are fatal and raised before any numeric work.
//! Numerical errors mark an infeasible parameter vector; the optimizer
//! treats them as a rejected iterate rather than a failure.

use remlmm_linalg::LinalgError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecificationError {
    #[error("column '{0}' not found in dataset")]
    MissingColumn(String),

    #[error("column '{0}' is not numeric")]
    NonNumericColumn(String),

    #[error("column '{0}' is already present in the dataset")]
    DuplicateColumn(String),

    #[error("column '{column}' has {got} rows, expected {expected}")]
    ShapeMismatch {
        column: String,
        expected: usize,
        got: usize,
    },

    #[error("dataset has no rows")]
    EmptyDataset,

    #[error("grouping column '{column}' has {levels} distinct level(s), at least two are required")]
    DegenerateGrouping { column: String, levels: usize },

    #[error("random effect '{term}' for grouping '{grouping}' is specified more than once")]
    DuplicateRandomEffect { grouping: String, term: String },

    #[error("random-effect name '{0}' is used more than once")]
    DuplicateName(String),

    #[error("empty term specification")]
    EmptyTerms,

    #[error("invalid term '{0}'")]
    InvalidTerm(String),

    #[error("no response columns given")]
    NoResponses,

    #[error("theta has length {got}, expected {expected}")]
    ThetaLength { expected: usize, got: usize },

    #[error("structure matrix for '{name}' is {rows}x{cols}, expected {expected}x{expected}")]
    StructureShape {
        name: String,
        rows: usize,
        cols: usize,
        expected: usize,
    },

    #[error("structure matrix for '{0}' is not positive definite")]
    StructureNotPositiveDefinite(String),

    #[error("structure matrix given for unknown random effect '{0}'")]
    UnknownStructure(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericalError {
    #[error("{stage} is not positive definite")]
    NotPositiveDefinite { stage: String },

    #[error("Woodbury inner system is singular")]
    SingularWoodbury,

    #[error("non-finite value in {stage}")]
    NonFinite { stage: String },

    #[error("optimizer did not converge after {iterations} iterations")]
    NotConverged { iterations: usize },

    #[error(transparent)]
    Linalg(#[from] LinalgError),
}

impl NumericalError {
    pub(crate) fn not_pd(stage: impl Into<String>) -> Self {
        NumericalError::NotPositiveDefinite {
            stage: stage.into(),
        }
    }

    pub(crate) fn non_finite(stage: impl Into<String>) -> Self {
        NumericalError::NonFinite {
            stage: stage.into(),
        }
    }
}

/// Non-fatal configuration issues reported by model construction.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum ConfigurationWarning {
    /// A multivariate layout was requested with a single response column;
    /// the model falls back to the univariate layout.
    SingleResponseMultivariate { response: String },
}

impl std::fmt::Display for ConfigurationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigurationWarning::SingleResponseMultivariate { response } => write!(
                f,
                "multivariate layout requested with a single response '{}', using univariate layout",
                response
            ),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LmmError {
    #[error("invalid model specification: {0}")]
    Specification(#[from] SpecificationError),

    #[error("numerical failure: {0}")]
    Numerical(#[from] NumericalError),
}

impl From<LinalgError> for LmmError {
    fn from(err: LinalgError) -> Self {
        LmmError::Numerical(NumericalError::Linalg(err))
    }
}

pub type Result<T> = std::result::Result<T, LmmError>;
