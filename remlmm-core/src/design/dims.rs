//! Dimension bookkeeping for variance-component blocks.
//!
//! One entry per random-effect grouping factor, in specification order,
//! followed by the error entry. For every entry `n_groups` is the number
//! of units (levels) and `n_vars` is the side of its covariance matrix;
//! theta holds vech of each covariance matrix in this order.

use std::ops::Range;

use serde::Serialize;

use remlmm_linalg::structured::{vech_diagonal_positions, vech_len};

pub const ERROR_KEY: &str = "error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimEntry {
    pub name: String,
    /// Units sharing the covariance matrix (grouping levels, or observations
    /// for the error entry).
    pub n_groups: usize,
    /// Columns of the within-group covariate matrix (1 for the error entry).
    pub n_effects: usize,
    /// Side of the covariance matrix: n_effects * responses.
    pub n_vars: usize,
    /// n_vars * (n_vars + 1) / 2
    pub n_params: usize,
}

impl DimEntry {
    pub fn new(name: impl Into<String>, n_groups: usize, n_effects: usize, n_responses: usize) -> Self {
        let n_vars = n_effects * n_responses;
        Self {
            name: name.into(),
            n_groups,
            n_effects,
            n_vars,
            n_params: vech_len(n_vars),
        }
    }

    /// Columns of Z (or rows of R) covered by this block.
    pub fn n_columns(&self) -> usize {
        self.n_groups * self.n_vars
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dims {
    random: Vec<DimEntry>,
    error: DimEntry,
}

impl Dims {
    pub fn new(random: Vec<DimEntry>, n_obs: usize, n_responses: usize) -> Self {
        Self {
            random,
            error: DimEntry::new(ERROR_KEY, n_obs, 1, n_responses),
        }
    }

    pub fn random_effects(&self) -> &[DimEntry] {
        &self.random
    }

    pub fn error(&self) -> &DimEntry {
        &self.error
    }

    /// All entries, error last.
    pub fn iter(&self) -> impl Iterator<Item = &DimEntry> {
        self.random.iter().chain(std::iter::once(&self.error))
    }

    pub fn n_blocks(&self) -> usize {
        self.random.len() + 1
    }

    pub fn get(&self, name: &str) -> Option<&DimEntry> {
        self.iter().find(|e| e.name == name)
    }

    /// Total length of theta.
    pub fn n_params(&self) -> usize {
        self.iter().map(|e| e.n_params).sum()
    }

    /// Theta positions of each block, error last.
    pub fn theta_ranges(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.iter()
            .map(|e| {
                let r = start..start + e.n_params;
                start = r.end;
                r
            })
            .collect()
    }

    /// Columns of Z belonging to each random-effect block.
    pub fn z_ranges(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.random
            .iter()
            .map(|e| {
                let r = start..start + e.n_columns();
                start = r.end;
                r
            })
            .collect()
    }

    /// Total columns of Z.
    pub fn n_random_columns(&self) -> usize {
        self.random.iter().map(DimEntry::n_columns).sum()
    }

    /// Theta positions that hold variances (vech diagonals).
    pub fn variance_positions(&self) -> Vec<usize> {
        self.iter()
            .zip(self.theta_ranges())
            .flat_map(|(e, r)| vech_diagonal_positions(e.n_vars).into_iter().map(move |p| r.start + p))
            .collect()
    }
}

/// Names of theta entries and fixed-effect coefficients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterLabels {
    pub theta: Vec<String>,
    pub fixed: Vec<String>,
}

/// Names of the n_vars covariance indices of a block, index `effect * v + r`.
pub(crate) fn covariance_index_names(effects: &[String], responses: &[String]) -> Vec<String> {
    if responses.len() <= 1 {
        return effects.to_vec();
    }
    effects
        .iter()
        .flat_map(|e| responses.iter().map(move |r| format!("{}: {}", r, e)))
        .collect()
}

/// Labels `"{group}|{a} x {b}"` in vech order.
pub(crate) fn block_labels(group: &str, names: &[String]) -> Vec<String> {
    let n = names.len();
    let mut out = Vec::with_capacity(vech_len(n));
    for c in 0..n {
        for r in c..n {
            out.push(format!("{}|{} x {}", group, names[c], names[r]));
        }
    }
    out
}

/// Error labels: `"error_var"` or `"{r1}: {r2} error_var"` in vech order.
pub(crate) fn error_labels(responses: &[String]) -> Vec<String> {
    if responses.len() <= 1 {
        return vec!["error_var".to_string()];
    }
    let v = responses.len();
    let mut out = Vec::with_capacity(vech_len(v));
    for c in 0..v {
        for r in c..v {
            out.push(format!("{}: {} error_var", responses[c], responses[r]));
        }
    }
    out
}

/// Fixed-effect labels, `"{term}:{response}"` at index `term * v + r` when v > 1.
pub(crate) fn fixed_labels(terms: &[String], responses: &[String]) -> Vec<String> {
    if responses.len() <= 1 {
        return terms.to_vec();
    }
    terms
        .iter()
        .flat_map(|t| responses.iter().map(move |r| format!("{}:{}", t, r)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> Dims {
        Dims::new(
            vec![DimEntry::new("subject", 10, 2, 1), DimEntry::new("site", 3, 1, 1)],
            40,
            1,
        )
    }

    #[test]
    fn test_entry_counts() {
        let d = dims();
        assert_eq!(d.random_effects()[0].n_vars, 2);
        assert_eq!(d.random_effects()[0].n_params, 3);
        assert_eq!(d.error().n_groups, 40);
        assert_eq!(d.n_params(), 3 + 1 + 1);
        assert_eq!(d.n_blocks(), 3);
    }

    #[test]
    fn test_ranges() {
        let d = dims();
        assert_eq!(d.theta_ranges(), vec![0..3, 3..4, 4..5]);
        assert_eq!(d.z_ranges(), vec![0..20, 20..23]);
        assert_eq!(d.n_random_columns(), 23);
        assert_eq!(d.variance_positions(), vec![0, 2, 3, 4]);
    }

    #[test]
    fn test_multivariate_entry() {
        let e = DimEntry::new("g", 5, 2, 3);
        assert_eq!(e.n_vars, 6);
        assert_eq!(e.n_params, 21);
        assert_eq!(e.n_columns(), 30);
    }

    #[test]
    fn test_labels() {
        let names = vec!["Intercept".to_string(), "x".to_string()];
        assert_eq!(
            block_labels("g", &names),
            vec!["g|Intercept x Intercept", "g|Intercept x x", "g|x x x"]
        );
        let responses = vec!["y1".to_string(), "y2".to_string()];
        assert_eq!(
            covariance_index_names(&names[..1], &responses),
            vec!["y1: Intercept", "y2: Intercept"]
        );
        assert_eq!(
            error_labels(&responses),
            vec!["y1: y1 error_var", "y1: y2 error_var", "y2: y2 error_var"]
        );
        assert_eq!(error_labels(&responses[..1]), vec!["error_var"]);
        assert_eq!(
            fixed_labels(&names, &responses),
            vec!["Intercept:y1", "Intercept:y2", "x:y1", "x:y2"]
        );
    }
}
