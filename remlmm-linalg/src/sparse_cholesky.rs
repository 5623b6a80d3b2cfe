//! Sparse Cholesky factorization backed by faer.
//!
//! The symbolic analysis (fill-reducing ordering and the structure of L) is
//! computed once for a sparsity pattern. Numeric factorizations of matrices
//! whose nonzeros lie inside that pattern reuse it.

use std::sync::Arc;

use faer::dyn_stack::{MemBuffer, MemStack};
use faer::perm::PermRef;
use faer::sparse::linalg::cholesky::supernodal::SupernodalLltRef;
use faer::sparse::linalg::cholesky::{
    factorize_symbolic_cholesky, CholeskySymbolicParams, LltRef, SymbolicCholesky, SymbolicCholeskyRaw,
    SymmetricOrdering,
};
use faer::sparse::{SparseColMatRef, SymbolicSparseColMatRef};
use faer::{Conj, Mat, Par, Side};

use crate::decomposition::LinalgError;
use crate::dense::DenseMatrix;
use crate::sparse::SparseMatrix;

/// Upper triangle of a symmetric pattern in CSC form, diagonal always present.
#[derive(Debug, Clone)]
struct UpperPattern {
    n: usize,
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
}

impl UpperPattern {
    fn new(a: &SparseMatrix) -> Self {
        let n = a.nrows();
        let mut cols: Vec<Vec<usize>> = (0..n).map(|j| vec![j]).collect();
        for (i, j, _) in a.entries() {
            if i < j {
                cols[j].push(i);
            } else if j < i {
                cols[i].push(j);
            }
        }
        let mut col_ptr = Vec::with_capacity(n + 1);
        let mut row_idx = Vec::new();
        col_ptr.push(0);
        for mut col in cols {
            col.sort_unstable();
            col.dedup();
            row_idx.extend(col);
            col_ptr.push(row_idx.len());
        }
        Self { n, col_ptr, row_idx }
    }

    fn symbolic(&self) -> SymbolicSparseColMatRef<'_, usize> {
        SymbolicSparseColMatRef::new_checked(self.n, self.n, &self.col_ptr, None, &self.row_idx)
    }

    /// Upper-triangle values of `a` laid out on this pattern.
    fn scatter(&self, a: &SparseMatrix) -> Result<Vec<f64>, LinalgError> {
        let mut values = vec![0.0; self.row_idx.len()];
        for (i, j, v) in a.entries() {
            if i > j {
                continue;
            }
            let start = self.col_ptr[j];
            match self.row_idx[start..self.col_ptr[j + 1]].binary_search(&i) {
                Ok(pos) => values[start + pos] += v,
                Err(_) if v == 0.0 => {}
                Err(_) => return Err(LinalgError::PatternMismatch { row: i, col: j }),
            }
        }
        Ok(values)
    }
}

/// Inverse of a permutation given as `perm[new] = old`.
fn invert_permutation(perm: &[usize]) -> Result<Vec<usize>, LinalgError> {
    let n = perm.len();
    let mut inv = vec![usize::MAX; n];
    for (new, &old) in perm.iter().enumerate() {
        if old >= n || inv[old] != usize::MAX {
            return Err(LinalgError::InvalidPermutation);
        }
        inv[old] = new;
    }
    Ok(inv)
}

/// Symbolic Cholesky analysis of a fixed symmetric sparsity pattern.
#[derive(Debug, Clone)]
pub struct SymbolicAnalysis {
    pattern: UpperPattern,
    symbolic: Arc<SymbolicCholesky<usize>>,
}

impl SymbolicAnalysis {
    /// Analyse with faer's approximate minimum degree ordering.
    pub fn new(pattern: &SparseMatrix) -> Result<Self, LinalgError> {
        Self::analyze(pattern, None)
    }

    /// Analyse with a caller ordering, `perm[new] = old`.
    pub fn with_ordering(pattern: &SparseMatrix, perm: &[usize]) -> Result<Self, LinalgError> {
        if perm.len() != pattern.nrows() {
            return Err(LinalgError::DimensionMismatch {
                expected: pattern.nrows(),
                got: perm.len(),
            });
        }
        let inv = invert_permutation(perm)?;
        Self::analyze(pattern, Some((perm, &inv)))
    }

    fn analyze(a: &SparseMatrix, perm: Option<(&[usize], &[usize])>) -> Result<Self, LinalgError> {
        if a.nrows() != a.ncols() {
            return Err(LinalgError::DimensionMismatch {
                expected: a.nrows(),
                got: a.ncols(),
            });
        }
        let pattern = UpperPattern::new(a);
        let ordering = match perm {
            Some((fwd, inv)) => SymmetricOrdering::Custom(PermRef::new_checked(fwd, inv, pattern.n)),
            None => SymmetricOrdering::Amd,
        };
        let symbolic = factorize_symbolic_cholesky(
            pattern.symbolic(),
            Side::Upper,
            ordering,
            CholeskySymbolicParams::default(),
        )
        .map_err(|e| LinalgError::SymbolicFailed(format!("{:?}", e)))?;
        Ok(Self {
            pattern,
            symbolic: Arc::new(symbolic),
        })
    }

    /// Dimension of the analysed matrix.
    pub fn dim(&self) -> usize {
        self.pattern.n
    }

    /// The elimination order, `perm[new] = old`.
    pub fn permutation(&self) -> Vec<usize> {
        match self.symbolic.perm() {
            Some(perm) => perm.arrays().0.to_vec(),
            None => (0..self.dim()).collect(),
        }
    }

    /// Number of stored values of L.
    pub fn factor_len(&self) -> usize {
        self.symbolic.len_val()
    }

    /// Numeric LL' factorization of `a`, whose nonzeros must lie in the
    /// analysed pattern.
    pub fn factorize(&self, a: &SparseMatrix) -> Result<SparseCholesky, LinalgError> {
        if a.nrows() != self.dim() || a.ncols() != self.dim() {
            return Err(LinalgError::DimensionMismatch {
                expected: self.dim(),
                got: a.nrows(),
            });
        }
        let a_values = self.pattern.scatter(a)?;
        let a_ref = SparseColMatRef::new(self.pattern.symbolic(), &a_values);

        let par = Par::Seq;
        let mut values = vec![0.0; self.symbolic.len_val()];
        let mut mem = MemBuffer::new(self.symbolic.factorize_numeric_llt_scratch::<f64>(par, Default::default()));
        self.symbolic
            .factorize_numeric_llt(
                values.as_mut_slice(),
                a_ref,
                Side::Upper,
                Default::default(),
                par,
                MemStack::new(&mut mem),
                Default::default(),
            )
            .map_err(|_| LinalgError::NotPositiveDefinite)?;

        Ok(SparseCholesky {
            symbolic: Arc::clone(&self.symbolic),
            values,
        })
    }
}

/// Numeric Cholesky factor of a sparse SPD matrix, A = P L L' P'.
#[derive(Debug, Clone)]
pub struct SparseCholesky {
    symbolic: Arc<SymbolicCholesky<usize>>,
    values: Vec<f64>,
}

impl SparseCholesky {
    /// Analyse and factor in one step.
    pub fn new(a: &SparseMatrix) -> Result<Self, LinalgError> {
        SymbolicAnalysis::new(a)?.factorize(a)
    }

    pub fn dim(&self) -> usize {
        self.symbolic.nrows()
    }

    /// Diagonal of L in pivot order.
    pub fn factor_diagonal(&self) -> Vec<f64> {
        match self.symbolic.raw() {
            SymbolicCholeskyRaw::Simplicial(s) => {
                // The diagonal leads each column of L.
                s.col_ptr()[..self.dim()].iter().map(|&p| self.values[p]).collect()
            }
            SymbolicCholeskyRaw::Supernodal(s) => {
                let factor = SupernodalLltRef::<'_, usize, f64>::new(s, &self.values);
                let mut diag = Vec::with_capacity(self.dim());
                for k in 0..s.n_supernodes() {
                    let block = factor.supernode(k).val();
                    for j in 0..block.ncols() {
                        diag.push(block[(j, j)]);
                    }
                }
                diag
            }
        }
    }

    /// log|A| = 2 * sum(log(diag(L))).
    pub fn log_determinant(&self) -> f64 {
        2.0 * self.factor_diagonal().iter().map(|d| d.ln()).sum::<f64>()
    }

    fn solve_in_place(&self, rhs: &mut Mat<f64>) {
        let par = Par::Seq;
        let mut mem = MemBuffer::new(self.symbolic.solve_in_place_scratch::<f64>(rhs.ncols(), par));
        LltRef::<'_, usize, f64>::new(&self.symbolic, &self.values).solve_in_place_with_conj(
            Conj::No,
            rhs.as_mut(),
            par,
            MemStack::new(&mut mem),
        );
    }

    /// Solve A X = B for every column of B.
    pub fn solve_mat(&self, b: &DenseMatrix) -> DenseMatrix {
        assert_eq!(b.nrows(), self.dim());
        let mut rhs = b.as_faer().clone();
        self.solve_in_place(&mut rhs);
        DenseMatrix::from_faer(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomposition::CholeskyDecomp;

    /// Arrow matrix: dense first row/column, diagonal elsewhere.
    fn arrow(n: usize) -> SparseMatrix {
        let mut entries = vec![(0, 0, n as f64 + 1.0)];
        for i in 1..n {
            entries.push((i, i, 2.0));
            entries.push((0, i, 0.5));
            entries.push((i, 0, 0.5));
        }
        SparseMatrix::from_entries(n, n, &entries)
    }

    #[test]
    fn test_amd_defers_hub() {
        let analysis = SymbolicAnalysis::new(&arrow(8)).unwrap();
        let perm = analysis.permutation();
        let mut sorted = perm.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..8).collect::<Vec<_>>());
        // No fill: L has the pattern of the lower arrow.
        assert_eq!(analysis.factor_len(), 8 + 7);
    }

    #[test]
    fn test_log_determinant_matches_dense() {
        let a = arrow(7);
        let sparse = SparseCholesky::new(&a).unwrap();
        let dense = CholeskyDecomp::new(&a.to_dense()).unwrap();
        assert!((sparse.log_determinant() - dense.log_determinant()).abs() < 1e-10);
    }

    #[test]
    fn test_solve_mat() {
        let dense = DenseMatrix::from_row_major(
            4,
            4,
            &[
                4.0, 1.0, 0.0, 0.5, //
                1.0, 3.0, 0.2, 0.0, //
                0.0, 0.2, 5.0, 1.0, //
                0.5, 0.0, 1.0, 2.0,
            ],
        );
        let a = SparseMatrix::from_dense(&dense);
        let chol = SparseCholesky::new(&a).unwrap();
        let rhs = DenseMatrix::from_fn(4, 2, |i, j| (i + j) as f64);
        let xs = chol.solve_mat(&rhs);
        assert!(dense.mat_mul(&xs).max_abs_diff(&rhs) < 1e-10);
    }

    #[test]
    fn test_caller_ordering_keeps_last_pivot() {
        let a = arrow(5);
        let perm = vec![4, 3, 2, 1, 0];
        let analysis = SymbolicAnalysis::with_ordering(&a, &perm).unwrap();
        assert_eq!(analysis.permutation(), perm);
        let chol = analysis.factorize(&a).unwrap();
        // Last pivot of L L' is the Schur complement of the hub.
        let schur = (5.0 + 1.0) - 4.0 * 0.25 / 2.0;
        let last = chol.factor_diagonal()[4];
        assert!((last * last - schur).abs() < 1e-12);
    }

    #[test]
    fn test_refactorize_on_sub_pattern() {
        let a = arrow(6);
        let analysis = SymbolicAnalysis::new(&a).unwrap();
        // Same pattern with the hub decoupled from two leaves.
        let b = SparseMatrix::from_entries(
            6,
            6,
            &a.entries()
                .into_iter()
                .filter(|&(i, j, _)| !matches!((i, j), (0, 2) | (2, 0) | (0, 5) | (5, 0)))
                .collect::<Vec<_>>(),
        );
        let chol = analysis.factorize(&b).unwrap();
        let dense = CholeskyDecomp::new(&b.to_dense()).unwrap();
        assert!((chol.log_determinant() - dense.log_determinant()).abs() < 1e-10);
    }

    #[test]
    fn test_entry_outside_pattern() {
        let analysis = SymbolicAnalysis::new(&SparseMatrix::identity(3)).unwrap();
        let a = SparseMatrix::from_entries(3, 3, &[(0, 0, 2.0), (1, 1, 2.0), (2, 2, 2.0), (0, 2, 0.1), (2, 0, 0.1)]);
        assert_eq!(
            analysis.factorize(&a).unwrap_err(),
            LinalgError::PatternMismatch { row: 0, col: 2 }
        );
    }

    #[test]
    fn test_not_positive_definite() {
        let a = SparseMatrix::from_entries(2, 2, &[(0, 0, 1.0), (0, 1, 3.0), (1, 0, 3.0), (1, 1, 1.0)]);
        assert_eq!(SparseCholesky::new(&a).unwrap_err(), LinalgError::NotPositiveDefinite);
    }

    #[test]
    fn test_invalid_permutation() {
        let a = arrow(3);
        assert_eq!(
            SymbolicAnalysis::with_ordering(&a, &[0, 0, 1]).unwrap_err(),
            LinalgError::InvalidPermutation
        );
    }
}
