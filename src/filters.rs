//! Filter dimensions
//!
//! A filter dimension is a named categorical column (region, service, ...)
//! with the set of values we care about. The ordered list of dimensions
//! shapes both the existing-data query against the events store and the
//! `IN (...)` lists of the source query.

use serde::{Deserialize, Serialize};

/// One named dimension and the values we sync for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDimension {
    /// Column name, also used as the query placeholder name
    #[serde(rename = "Name", alias = "name")]
    pub name: String,

    /// Accepted values, in binding order
    #[serde(rename = "Values", alias = "values")]
    pub values: Vec<String>,
}

impl FilterDimension {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `value` is one of the declared values
    pub fn accepts(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    /// Bound parameter name for the value at `index`, e.g. `Region_1`
    pub fn parameter_name(&self, index: usize) -> String {
        format!("{}_{}", self.name, index)
    }
}

/// Ordered dimensions. Dimension `i` nests inside dimension `i - 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSpec(Vec<FilterDimension>);

impl FilterSpec {
    pub fn new(dimensions: Vec<FilterDimension>) -> Self {
        Self(dimensions)
    }

    /// Number of dimensions (the index depth)
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FilterDimension> {
        self.0.iter()
    }

    /// Dimension names in order
    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|d| d.name.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a FilterSpec {
    type Item = &'a FilterDimension;
    type IntoIter = std::slice::Iter<'a, FilterDimension>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
