//! Structured matrices for Kronecker derivative calculus.
//!
//! Every builder here is combinatorial: the nonzero pattern is written
//! down directly instead of being derived from products of identities.
//!
//! Conventions: `vec` stacks columns, `vech` stacks the lower triangle
//! column by column, and for a p x q matrix A
//!
//! - `commutation(p, q) * vec(A) = vec(A')`
//! - `duplication(n) * vech(S) = vec(S)` for symmetric n x n S
//! - `kronvec_mat((n, p), (q, r)) * (vec(A) ⊗ vec(B)) = vec(A ⊗ B)`
//!   for A n x p and B q x r.

use crate::decomposition::LinalgError;
use crate::dense::DenseMatrix;
use crate::sparse::SparseMatrix;

/// Commutation matrix K(p, q) of size pq x pq.
pub fn commutation(p: usize, q: usize) -> SparseMatrix {
    let n = p * q;
    let mut entries = Vec::with_capacity(n);
    for a in 0..p {
        for b in 0..q {
            // A[a, b] sits at a + p*b in vec(A) and at b + q*a in vec(A').
            entries.push((b + q * a, a + p * b, 1.0));
        }
    }
    SparseMatrix::from_entries(n, n, &entries)
}

/// Position of entry (r, c), r >= c, of an n x n matrix within `vech`.
pub fn vech_index(n: usize, r: usize, c: usize) -> usize {
    debug_assert!(r >= c && r < n);
    c * n - c * c.saturating_sub(1) / 2 + (r - c)
}

/// Duplication matrix D(n) of size n^2 x n(n+1)/2.
pub fn duplication(n: usize) -> SparseMatrix {
    let m = n * (n + 1) / 2;
    let mut entries = Vec::with_capacity(n * n);
    for j in 0..n {
        for i in 0..n {
            let (r, c) = if i >= j { (i, j) } else { (j, i) };
            entries.push((i + n * j, vech_index(n, r, c), 1.0));
        }
    }
    SparseMatrix::from_entries(n * n, m, &entries)
}

/// Number of free elements of an n x n symmetric matrix.
pub fn vech_len(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Side length n with n(n+1)/2 == len, if one exists.
pub fn triangular_root(len: usize) -> Option<usize> {
    let n = (((8 * len + 1) as f64).sqrt() as usize).saturating_sub(1) / 2;
    [n, n + 1].into_iter().find(|&k| vech_len(k) == len)
}

/// Lower triangle of a square matrix, stacked column by column.
pub fn vech(a: &DenseMatrix) -> Vec<f64> {
    let n = a.nrows();
    assert_eq!(n, a.ncols());
    let mut out = Vec::with_capacity(vech_len(n));
    for c in 0..n {
        for r in c..n {
            out.push(a.get(r, c));
        }
    }
    out
}

/// Symmetric matrix whose `vech` is `v`. Both triangles are written from
/// the same entry, so `vech(invech(v)) == v` exactly.
pub fn invech(v: &[f64]) -> Result<DenseMatrix, LinalgError> {
    let n = triangular_root(v.len()).ok_or(LinalgError::DimensionMismatch {
        expected: vech_len(((2 * v.len()) as f64).sqrt() as usize),
        got: v.len(),
    })?;
    let mut out = DenseMatrix::zeros(n, n);
    let mut k = 0;
    for c in 0..n {
        for r in c..n {
            out.set(r, c, v[k]);
            out.set(c, r, v[k]);
            k += 1;
        }
    }
    Ok(out)
}

/// Positions within `vech` of an n x n matrix that hold diagonal entries.
pub fn vech_diagonal_positions(n: usize) -> Vec<usize> {
    (0..n).map(|c| vech_index(n, c, c)).collect()
}

/// Column-wise Kronecker product of dense matrices with equal column counts.
pub fn khatri_rao(a: &DenseMatrix, b: &DenseMatrix) -> DenseMatrix {
    assert_eq!(a.ncols(), b.ncols());
    let p = b.nrows();
    DenseMatrix::from_fn(a.nrows() * p, a.ncols(), |r, c| {
        a.get(r / p, c) * b.get(r % p, c)
    })
}

/// Column-wise Kronecker product of sparse matrices with equal column counts.
pub fn khatri_rao_sparse(a: &SparseMatrix, b: &SparseMatrix) -> SparseMatrix {
    assert_eq!(a.ncols(), b.ncols());
    let p = b.nrows();
    let a_cols = a.column_entries();
    let b_cols = b.column_entries();
    let mut entries = Vec::new();
    for (c, (ac, bc)) in a_cols.iter().zip(b_cols.iter()).enumerate() {
        for &(i, av) in ac {
            for &(k, bv) in bc {
                entries.push((i * p + k, c, av * bv));
            }
        }
    }
    SparseMatrix::from_entries(a.nrows() * p, a.ncols(), &entries)
}

/// I_p ⊗ K(r, n) ⊗ I_q, mapping vec(A) ⊗ vec(B) to vec(A ⊗ B) for
/// A of shape (n, p) and B of shape (q, r).
pub fn kronvec_mat(a_shape: (usize, usize), b_shape: (usize, usize)) -> SparseMatrix {
    let (n, p) = a_shape;
    let (q, r) = b_shape;
    SparseMatrix::identity(p)
        .kron(&commutation(r, n))
        .kron(&SparseMatrix::identity(q))
}

/// vec(A) as an (nrows * ncols) x 1 sparse column.
pub fn vec_sparse(a: &SparseMatrix) -> SparseMatrix {
    let n = a.nrows();
    let entries: Vec<_> = a
        .entries()
        .into_iter()
        .map(|(i, j, v)| (i + n * j, 0, v))
        .collect();
    SparseMatrix::from_entries(n * a.ncols(), 1, &entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(p: usize, q: usize) -> DenseMatrix {
        DenseMatrix::from_fn(p, q, |i, j| (1 + i + 10 * j) as f64)
    }

    #[test]
    fn test_commutation_transposes() {
        let a = sample(3, 4);
        let k = commutation(3, 4);
        let kv = k.mat_vec(&a.to_col_major());
        assert_eq!(kv, a.transpose().to_col_major());
    }

    #[test]
    fn test_commutation_inverse() {
        let prod = commutation(2, 5).mat_mul(&commutation(5, 2)).to_dense();
        assert!(prod.is_identity());
    }

    #[test]
    fn test_vech_index() {
        // n = 3: (0,0) (1,0) (2,0) (1,1) (2,1) (2,2)
        assert_eq!(vech_index(3, 0, 0), 0);
        assert_eq!(vech_index(3, 2, 0), 2);
        assert_eq!(vech_index(3, 1, 1), 3);
        assert_eq!(vech_index(3, 2, 1), 4);
        assert_eq!(vech_index(3, 2, 2), 5);
        assert_eq!(vech_diagonal_positions(3), vec![0, 3, 5]);
    }

    #[test]
    fn test_duplication() {
        let s = DenseMatrix::from_row_major(3, 3, &[1.0, 2.0, 3.0, 2.0, 4.0, 5.0, 3.0, 5.0, 6.0]);
        let d = duplication(3);
        assert_eq!(d.nrows(), 9);
        assert_eq!(d.ncols(), 6);
        assert_eq!(d.nnz(), 9);
        assert_eq!(d.mat_vec(&vech(&s)), s.to_col_major());
    }

    #[test]
    fn test_vech_invech() {
        let v = vec![1.0, -0.5, 0.25, 2.0, 0.0, 3.0];
        let s = invech(&v).unwrap();
        assert_eq!(s.get(0, 2), 0.25);
        assert_eq!(s.get(2, 0), 0.25);
        assert_eq!(vech(&s), v);
        assert!(invech(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_triangular_root() {
        assert_eq!(triangular_root(0), Some(0));
        assert_eq!(triangular_root(1), Some(1));
        assert_eq!(triangular_root(10), Some(4));
        assert_eq!(triangular_root(7), None);
    }

    #[test]
    fn test_khatri_rao() {
        let a = DenseMatrix::from_row_major(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let b = DenseMatrix::from_row_major(2, 2, &[5.0, 6.0, 7.0, 8.0]);
        let kr = khatri_rao(&a, &b);
        assert_eq!(kr.nrows(), 4);
        // column 1 = (2, 4) ⊗ (6, 8)
        assert_eq!(kr.col(1), vec![12.0, 16.0, 24.0, 32.0]);
        let sparse = khatri_rao_sparse(&SparseMatrix::from_dense(&a), &SparseMatrix::from_dense(&b));
        assert!(sparse.to_dense().max_abs_diff(&kr) < 1e-12);
    }

    #[test]
    fn test_vec_sparse() {
        let a = sample(2, 3);
        let v = vec_sparse(&SparseMatrix::from_dense(&a));
        assert_eq!(v.to_dense().col(0), a.to_col_major());
    }

    #[test]
    fn test_kronvec_mat() {
        let a = sample(2, 3);
        let b = DenseMatrix::from_fn(3, 2, |i, j| 0.5 * i as f64 - j as f64 + 0.1);
        let va = a.to_col_major();
        let vb = b.to_col_major();
        let mut outer = Vec::with_capacity(va.len() * vb.len());
        for x in &va {
            for y in &vb {
                outer.push(x * y);
            }
        }
        let kv = kronvec_mat((2, 3), (3, 2));
        let lhs = kv.mat_vec(&outer);
        let rhs = a.kron(&b).to_col_major();
        for (l, r) in lhs.iter().zip(rhs.iter()) {
            assert!((l - r).abs() < 1e-12);
        }
    }
}
