//! In-memory dataset of named columns and term expansion.
//!
//! Columns are either numeric or categorical. Grouping factors may use
//! either kind; their levels are always reported in sorted order.

pub mod terms;

use crate::error::SpecificationError;

/// A single named column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Levels of a grouping column and the level index of every row.
#[derive(Debug, Clone, PartialEq)]
pub struct Grouping {
    pub levels: Vec<String>,
    pub codes: Vec<usize>,
}

impl Grouping {
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }
}

/// Columns in insertion order, all of the same length.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    columns: Vec<(String, Column)>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column. Every column must have the same number of rows.
    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        column: Column,
    ) -> Result<(), SpecificationError> {
        let name = name.into();
        if self.columns.iter().any(|(n, _)| *n == name) {
            return Err(SpecificationError::DuplicateColumn(name));
        }
        if let Some((_, first)) = self.columns.first() {
            if first.len() != column.len() {
                return Err(SpecificationError::ShapeMismatch {
                    column: name,
                    expected: first.len(),
                    got: column.len(),
                });
            }
        }
        self.columns.push((name, column));
        Ok(())
    }

    /// Builder form of `add_column` for a numeric column.
    pub fn with_numeric(
        mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<Self, SpecificationError> {
        self.add_column(name, Column::Numeric(values))?;
        Ok(self)
    }

    /// Builder form of `add_column` for a categorical column.
    pub fn with_categorical<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Result<Self, SpecificationError> {
        let values = values.into_iter().map(Into::into).collect();
        self.add_column(name, Column::Categorical(values))?;
        Ok(self)
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|(_, c)| c.len()).unwrap_or(0)
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn column(&self, name: &str) -> Result<&Column, SpecificationError> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
            .ok_or_else(|| SpecificationError::MissingColumn(name.to_string()))
    }

    pub fn numeric(&self, name: &str) -> Result<&[f64], SpecificationError> {
        match self.column(name)? {
            Column::Numeric(v) => Ok(v),
            Column::Categorical(_) => Err(SpecificationError::NonNumericColumn(name.to_string())),
        }
    }

    /// Sorted distinct levels of a column and the level code of each row.
    /// Numeric levels sort numerically, categorical ones lexically.
    pub fn grouping(&self, name: &str) -> Result<Grouping, SpecificationError> {
        match self.column(name)? {
            Column::Categorical(values) => {
                let mut levels: Vec<String> = values.clone();
                levels.sort();
                levels.dedup();
                let codes = values
                    .iter()
                    .map(|v| levels.binary_search(v).unwrap_or(0))
                    .collect();
                Ok(Grouping { levels, codes })
            }
            Column::Numeric(values) => {
                let mut sorted: Vec<f64> = values.clone();
                sorted.sort_by(|a, b| a.total_cmp(b));
                sorted.dedup_by(|a, b| a.total_cmp(b).is_eq());
                let codes = values
                    .iter()
                    .map(|v| sorted.binary_search_by(|s| s.total_cmp(v)).unwrap_or(0))
                    .collect();
                let levels = sorted.iter().map(|v| format!("{}", v)).collect();
                Ok(Grouping { levels, codes })
            }
        }
    }
}
