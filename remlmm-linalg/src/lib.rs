//! remlmm-linalg: Linear algebra primitives for REML mixed models
//!
//! Dense and sparse matrix wrappers, dense and sparse Cholesky, the
//! structured matrices (commutation, duplication, vech/invech, Khatri-Rao,
//! kronvec) used by the derivative calculus, and the Woodbury inverse.

pub mod decomposition;
pub mod dense;
pub mod sparse;
pub mod sparse_cholesky;
pub mod structured;
pub mod woodbury;

pub use decomposition::LinalgError;
pub use dense::DenseMatrix;
pub use sparse::SparseMatrix;
pub use sparse_cholesky::{SparseCholesky, SymbolicAnalysis};
