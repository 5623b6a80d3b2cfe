//! Design-matrix construction.
//!
//! Builds X, Z and y from a fixed-effect term string, a list of grouping
//! factors and a dataset. Rows are observation-major: row `i * v + r` is
//! observation i, response r. For grouping factor k with g levels and q
//! within-group covariates, column `l * q * v + e * v + r` of Z_k carries
//! covariate e of level l for response r.

pub mod dims;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use remlmm_linalg::decomposition::CholeskyDecomp;
use remlmm_linalg::{DenseMatrix, SparseMatrix};

use crate::data::terms::{expand_terms, parse_terms};
use crate::data::Dataset;
use crate::error::{ConfigurationWarning, SpecificationError};

pub use dims::{DimEntry, Dims, ParameterLabels, ERROR_KEY};

/// One random-effect term: covariates `term` varying by `grouping`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingFactorSpec {
    /// Key of the block in Dims and in `ModelOptions::structures`.
    pub name: String,
    /// Random-slope term string, e.g. `"1 + x"`.
    pub term: String,
    /// Grouping column.
    pub grouping: String,
}

impl GroupingFactorSpec {
    /// Named after the grouping column.
    pub fn new(term: impl Into<String>, grouping: impl Into<String>) -> Self {
        let grouping = grouping.into();
        Self {
            name: grouping.clone(),
            term: term.into(),
            grouping,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Responses, fixed-effect terms and random-effect terms of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub responses: Vec<String>,
    pub fixed: String,
    pub random: Vec<GroupingFactorSpec>,
}

impl ModelSpec {
    pub fn new(response: impl Into<String>, fixed: impl Into<String>) -> Self {
        Self {
            responses: vec![response.into()],
            fixed: fixed.into(),
            random: Vec::new(),
        }
    }

    pub fn multivariate<S: Into<String>>(
        responses: impl IntoIterator<Item = S>,
        fixed: impl Into<String>,
    ) -> Self {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            fixed: fixed.into(),
            random: Vec::new(),
        }
    }

    pub fn random_effect(mut self, term: impl Into<String>, grouping: impl Into<String>) -> Self {
        self.random.push(GroupingFactorSpec::new(term, grouping));
        self
    }

    pub fn with_random(mut self, spec: GroupingFactorSpec) -> Self {
        self.random.push(spec);
        self
    }
}

/// Construction options.
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    /// Request the multivariate layout. More than one response always
    /// uses it; with a single response this only produces a warning.
    pub multivariate: bool,
    /// Between-unit structure matrices A_k keyed by random-effect name,
    /// rows ordered like the sorted grouping levels. Identity otherwise.
    pub structures: BTreeMap<String, DenseMatrix>,
    /// Between-observation error structure A_e (n x n). Identity otherwise.
    pub error_structure: Option<DenseMatrix>,
}

/// X, Z and y in observation-major layout.
#[derive(Debug, Clone)]
pub struct DesignMatrices {
    pub x: DenseMatrix,
    pub z: SparseMatrix,
    pub y: Vec<f64>,
    pub n_obs: usize,
    pub n_responses: usize,
    pub response_names: Vec<String>,
    /// Random-effect level names, per block.
    pub levels: Vec<Vec<String>>,
}

impl DesignMatrices {
    /// Rows of X, Z and y: n_obs * n_responses.
    pub fn n_rows(&self) -> usize {
        self.y.len()
    }

    pub fn n_fixed(&self) -> usize {
        self.x.ncols()
    }

    pub fn n_random(&self) -> usize {
        self.z.ncols()
    }
}

/// Structure matrices accepted for each block.
#[derive(Debug, Clone)]
pub struct Structures {
    /// One per random-effect block; `None` means identity.
    pub random: Vec<Option<DenseMatrix>>,
    pub error: Option<DenseMatrix>,
}

/// Everything `construct` produces.
#[derive(Debug, Clone)]
pub struct ModelDesign {
    pub matrices: DesignMatrices,
    pub dims: Dims,
    pub labels: ParameterLabels,
    pub structures: Structures,
    pub warnings: Vec<ConfigurationWarning>,
}

/// Build X, Z, y and Dims for a model.
pub fn construct(
    spec: &ModelSpec,
    data: &Dataset,
    options: &ModelOptions,
) -> Result<ModelDesign, SpecificationError> {
    let n = data.n_rows();
    if n == 0 {
        return Err(SpecificationError::EmptyDataset);
    }
    if spec.responses.is_empty() {
        return Err(SpecificationError::NoResponses);
    }
    let v = spec.responses.len();

    let mut warnings = Vec::new();
    if options.multivariate && v == 1 {
        let warning = ConfigurationWarning::SingleResponseMultivariate {
            response: spec.responses[0].clone(),
        };
        warn!("{}", warning);
        warnings.push(warning);
    }

    // y = vec(Y')
    let response_columns = spec
        .responses
        .iter()
        .map(|r| data.numeric(r))
        .collect::<Result<Vec<_>, _>>()?;
    let mut y = Vec::with_capacity(n * v);
    for i in 0..n {
        for col in &response_columns {
            y.push(col[i]);
        }
    }

    // X ⊗ I_v
    let fixed = expand_terms(&parse_terms(&spec.fixed)?, data)?;
    let x = if v > 1 {
        fixed.matrix.kron(&DenseMatrix::identity(v))
    } else {
        fixed.matrix
    };

    let mut seen_pairs = BTreeSet::new();
    let mut seen_names = BTreeSet::new();
    let mut entries = Vec::new();
    let mut z_blocks = Vec::new();
    let mut levels = Vec::new();
    let mut theta_labels = Vec::new();

    for factor in &spec.random {
        let term_key = factor.term.split_whitespace().collect::<String>();
        if !seen_pairs.insert((factor.grouping.clone(), term_key)) {
            return Err(SpecificationError::DuplicateRandomEffect {
                grouping: factor.grouping.clone(),
                term: factor.term.clone(),
            });
        }
        if factor.name == ERROR_KEY || !seen_names.insert(factor.name.clone()) {
            return Err(SpecificationError::DuplicateName(factor.name.clone()));
        }

        let grouping = data.grouping(&factor.grouping)?;
        if grouping.n_levels() < 2 {
            return Err(SpecificationError::DegenerateGrouping {
                column: factor.grouping.clone(),
                levels: grouping.n_levels(),
            });
        }
        let w = expand_terms(&parse_terms(&factor.term)?, data)?;
        let entry = DimEntry::new(&factor.name, grouping.n_levels(), w.matrix.ncols(), v);

        z_blocks.push(random_effect_block(&grouping.codes, &w.matrix, grouping.n_levels(), v));
        let names = dims::covariance_index_names(&w.names, &spec.responses);
        theta_labels.extend(dims::block_labels(&factor.name, &names));
        levels.push(grouping.levels);
        entries.push(entry);
    }
    theta_labels.extend(dims::error_labels(&spec.responses));

    let z = if z_blocks.is_empty() {
        SparseMatrix::zeros(n * v, 0)
    } else {
        SparseMatrix::hstack(&z_blocks.iter().collect::<Vec<_>>())
    };
    let dims = Dims::new(entries, n, v);
    let structures = validate_structures(&dims, options)?;

    info!(
        "Constructed design: n={}, responses={}, p={}, q={}, theta={}",
        n,
        v,
        x.ncols(),
        z.ncols(),
        dims.n_params()
    );
    for entry in dims.iter() {
        info!(
            "  block '{}': n_groups={}, n_vars={}, n_params={}",
            entry.name, entry.n_groups, entry.n_vars, entry.n_params
        );
    }

    Ok(ModelDesign {
        labels: ParameterLabels {
            theta: theta_labels,
            fixed: dims::fixed_labels(&fixed.names, &spec.responses),
        },
        matrices: DesignMatrices {
            x,
            z,
            y,
            n_obs: n,
            n_responses: v,
            response_names: spec.responses.clone(),
            levels,
        },
        dims,
        structures,
        warnings,
    })
}

/// Z_k with entries written directly in the observation-major layout.
///
/// Equals K(n, v) (I_v ⊗ Z0) K(v, g q) for the univariate block
/// Z0 = KhatriRao(J', W')'.
pub fn random_effect_block(
    codes: &[usize],
    w: &DenseMatrix,
    n_levels: usize,
    v: usize,
) -> SparseMatrix {
    let n = codes.len();
    let q = w.ncols();
    let mut entries = Vec::with_capacity(n * q * v);
    for (i, &level) in codes.iter().enumerate() {
        for e in 0..q {
            let val = w.get(i, e);
            if val == 0.0 {
                continue;
            }
            for r in 0..v {
                entries.push((i * v + r, level * q * v + e * v + r, val));
            }
        }
    }
    SparseMatrix::from_entries(n * v, n_levels * q * v, &entries)
}

fn validate_structures(dims: &Dims, options: &ModelOptions) -> Result<Structures, SpecificationError> {
    for name in options.structures.keys() {
        if !dims.random_effects().iter().any(|e| &e.name == name) {
            return Err(SpecificationError::UnknownStructure(name.clone()));
        }
    }

    let check = |name: &str, a: &DenseMatrix, expected: usize| -> Result<(), SpecificationError> {
        if a.nrows() != expected || a.ncols() != expected {
            return Err(SpecificationError::StructureShape {
                name: name.to_string(),
                rows: a.nrows(),
                cols: a.ncols(),
                expected,
            });
        }
        CholeskyDecomp::new(a)
            .map(|_| ())
            .map_err(|_| SpecificationError::StructureNotPositiveDefinite(name.to_string()))
    };

    let mut random = Vec::with_capacity(dims.random_effects().len());
    for entry in dims.random_effects() {
        match options.structures.get(&entry.name) {
            Some(a) if !a.is_identity() => {
                check(&entry.name, a, entry.n_groups)?;
                random.push(Some(a.clone()));
            }
            Some(a) => {
                check(&entry.name, a, entry.n_groups)?;
                random.push(None);
            }
            None => random.push(None),
        }
    }

    let error = match &options.error_structure {
        Some(a) => {
            check(ERROR_KEY, a, dims.error().n_groups)?;
            if a.is_identity() {
                None
            } else {
                Some(a.clone())
            }
        }
        None => None,
    };
    Ok(Structures { random, error })
}
