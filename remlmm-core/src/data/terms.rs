//! Term strings and their expansion into design columns.
//!
//! A term string is an optional leading `~` followed by terms joined with
//! `+`. `1` adds the intercept (present by default), `0` or `-1` removes
//! it. A bare column name adds the column (treatment-coded if
//! categorical) and `a:b` adds the product of numeric columns.

use remlmm_linalg::DenseMatrix;

use super::{Column, Dataset};
use crate::error::SpecificationError;

pub const INTERCEPT: &str = "Intercept";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Column(String),
    Interaction(Vec<String>),
}

/// Parsed term string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermList {
    pub intercept: bool,
    pub terms: Vec<Term>,
}

fn is_valid_name(token: &str) -> bool {
    !token.is_empty()
        && !token
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '+' | '-' | '~' | ':' | '(' | ')' | '|'))
}

/// Parse a term string such as `"1 + x1 + x2"`, `"x1 - 1"` or `"x1:x2"`.
pub fn parse_terms(spec: &str) -> Result<TermList, SpecificationError> {
    let body = spec.trim();
    let body = body.strip_prefix('~').unwrap_or(body).trim();
    if body.is_empty() {
        return Err(SpecificationError::EmptyTerms);
    }

    // Split into signed tokens, keeping the operator that precedes each.
    let mut tokens: Vec<(bool, String)> = Vec::new();
    let mut negative = false;
    let mut current = String::new();
    for ch in body.chars() {
        match ch {
            '+' | '-' => {
                let token = current.trim().to_string();
                if token.is_empty() && !(tokens.is_empty() && ch == '-' && !negative) {
                    return Err(SpecificationError::InvalidTerm(body.to_string()));
                }
                if !token.is_empty() {
                    tokens.push((negative, token));
                }
                negative = ch == '-';
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    let last = current.trim().to_string();
    if last.is_empty() {
        return Err(SpecificationError::InvalidTerm(body.to_string()));
    }
    tokens.push((negative, last));

    let mut list = TermList {
        intercept: true,
        terms: Vec::new(),
    };
    for (negative, token) in tokens {
        match (negative, token.as_str()) {
            (false, "1") => list.intercept = true,
            (false, "0") | (true, "1") => list.intercept = false,
            (true, _) => return Err(SpecificationError::InvalidTerm(format!("-{}", token))),
            (false, t) if t.contains(':') => {
                let parts: Vec<String> = t.split(':').map(|p| p.trim().to_string()).collect();
                if parts.len() < 2 || parts.iter().any(|p| !is_valid_name(p)) {
                    return Err(SpecificationError::InvalidTerm(token));
                }
                list.terms.push(Term::Interaction(parts));
            }
            (false, t) => {
                if !is_valid_name(t) {
                    return Err(SpecificationError::InvalidTerm(token));
                }
                list.terms.push(Term::Column(token));
            }
        }
    }
    Ok(list)
}

/// Design columns produced by a term string.
#[derive(Debug, Clone)]
pub struct ExpandedTerms {
    pub matrix: DenseMatrix,
    pub names: Vec<String>,
}

/// Expand parsed terms against a dataset into an n x p matrix.
///
/// Categorical columns are treatment coded against their first (sorted)
/// level. When there is no intercept the first categorical term keeps
/// all of its levels.
pub fn expand_terms(
    terms: &TermList,
    data: &Dataset,
) -> Result<ExpandedTerms, SpecificationError> {
    let n = data.n_rows();
    let mut columns: Vec<Vec<f64>> = Vec::new();
    let mut names: Vec<String> = Vec::new();
    let mut full_rank_available = !terms.intercept;

    if terms.intercept {
        columns.push(vec![1.0; n]);
        names.push(INTERCEPT.to_string());
    }

    for term in &terms.terms {
        match term {
            Term::Column(name) => match data.column(name)? {
                Column::Numeric(values) => {
                    columns.push(values.clone());
                    names.push(name.clone());
                }
                Column::Categorical(_) => {
                    let grouping = data.grouping(name)?;
                    let skip = if full_rank_available { 0 } else { 1 };
                    for (level_idx, level) in grouping.levels.iter().enumerate().skip(skip) {
                        columns.push(
                            grouping
                                .codes
                                .iter()
                                .map(|&c| if c == level_idx { 1.0 } else { 0.0 })
                                .collect(),
                        );
                        names.push(if skip == 0 {
                            format!("{}[{}]", name, level)
                        } else {
                            format!("{}[T.{}]", name, level)
                        });
                    }
                    full_rank_available = false;
                }
            },
            Term::Interaction(parts) => {
                let mut product = vec![1.0; n];
                for part in parts {
                    let values = data.numeric(part)?;
                    for (p, v) in product.iter_mut().zip(values.iter()) {
                        *p *= v;
                    }
                }
                columns.push(product);
                names.push(parts.join(":"));
            }
        }
    }

    if columns.is_empty() {
        return Err(SpecificationError::EmptyTerms);
    }
    let p = columns.len();
    let matrix = DenseMatrix::from_fn(n, p, |i, j| columns[j][i]);
    Ok(ExpandedTerms { matrix, names })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> Dataset {
        Dataset::new()
            .with_numeric("x1", vec![1.0, 2.0, 3.0])
            .unwrap()
            .with_numeric("x2", vec![0.5, -1.0, 2.0])
            .unwrap()
            .with_categorical("g", ["b", "a", "c"])
            .unwrap()
    }

    #[test]
    fn test_parse_default_intercept() {
        let t = parse_terms("~ x1 + x2").unwrap();
        assert!(t.intercept);
        assert_eq!(
            t.terms,
            vec![Term::Column("x1".into()), Term::Column("x2".into())]
        );
    }

    #[test]
    fn test_parse_intercept_removal() {
        assert!(!parse_terms("x1 - 1").unwrap().intercept);
        assert!(!parse_terms("0 + x1").unwrap().intercept);
        assert!(!parse_terms("-1 + x1").unwrap().intercept);
        assert!(parse_terms("1").unwrap().intercept);
    }

    #[test]
    fn test_parse_interaction() {
        let t = parse_terms("x1:x2").unwrap();
        assert_eq!(
            t.terms,
            vec![Term::Interaction(vec!["x1".into(), "x2".into()])]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_terms("  ").unwrap_err(), SpecificationError::EmptyTerms);
        assert_eq!(parse_terms("~").unwrap_err(), SpecificationError::EmptyTerms);
        assert!(matches!(parse_terms("x1 + + x2"), Err(SpecificationError::InvalidTerm(_))));
        assert!(matches!(parse_terms("x1 +"), Err(SpecificationError::InvalidTerm(_))));
        assert!(matches!(parse_terms("x1 - x2"), Err(SpecificationError::InvalidTerm(_))));
        assert!(matches!(parse_terms("x1 x2"), Err(SpecificationError::InvalidTerm(_))));
        assert!(matches!(parse_terms("x1:"), Err(SpecificationError::InvalidTerm(_))));
    }

    #[test]
    fn test_expand_numeric_and_interaction() {
        let e = expand_terms(&parse_terms("x1 + x1:x2").unwrap(), &data()).unwrap();
        assert_eq!(e.names, vec!["Intercept", "x1", "x1:x2"]);
        assert_eq!(e.matrix.col(0), vec![1.0, 1.0, 1.0]);
        assert_eq!(e.matrix.col(2), vec![0.5, -2.0, 6.0]);
    }

    #[test]
    fn test_expand_categorical_treatment_coding() {
        let e = expand_terms(&parse_terms("g").unwrap(), &data()).unwrap();
        assert_eq!(e.names, vec!["Intercept", "g[T.b]", "g[T.c]"]);
        assert_eq!(e.matrix.col(1), vec![1.0, 0.0, 0.0]);

        let full = expand_terms(&parse_terms("0 + g").unwrap(), &data()).unwrap();
        assert_eq!(full.names, vec!["g[a]", "g[b]", "g[c]"]);
        assert_eq!(full.matrix.col(0), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_expand_errors() {
        assert_eq!(
            expand_terms(&parse_terms("x3").unwrap(), &data()).unwrap_err(),
            SpecificationError::MissingColumn("x3".into())
        );
        assert_eq!(
            expand_terms(&parse_terms("x1:g").unwrap(), &data()).unwrap_err(),
            SpecificationError::NonNumericColumn("g".into())
        );
        assert_eq!(
            expand_terms(&parse_terms("0").unwrap(), &data()).unwrap_err(),
            SpecificationError::EmptyTerms
        );
    }
}
