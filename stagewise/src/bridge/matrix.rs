//! `parallel.matrix` expansion.
//!
//! A matrix is a list of entries. Each entry maps variable names to one or
//! more values; the cartesian product of an entry's values yields one
//! instance per combination, named `"{name}: [v1, v2, ...]"`.

use crate::core::MatrixBindings;
use serde::{Deserialize, Serialize};

/// Upper bound on the number of instances a single matrix may expand into.
pub const MAX_MATRIX_INSTANCES: usize = 200;

/// One matrix entry: ordered variables with their candidate values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixEntry {
    /// Variables in declaration order.
    pub variables: Vec<(String, Vec<String>)>,
}

impl MatrixEntry {
    /// Creates an empty entry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable with its values.
    #[must_use]
    pub fn var<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables
            .push((name.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    fn combinations(&self) -> Vec<MatrixBindings> {
        if self.variables.is_empty() {
            return Vec::new();
        }
        self.variables
            .iter()
            .fold(vec![MatrixBindings::new()], |acc, (name, values)| {
                acc.iter()
                    .flat_map(|prefix| {
                        values.iter().map(move |value| {
                            let mut bindings = prefix.clone();
                            bindings.push((name.clone(), value.clone()));
                            bindings
                        })
                    })
                    .collect()
            })
    }
}

/// A `parallel.matrix` configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matrix {
    /// Entries, expanded independently and concatenated.
    pub entries: Vec<MatrixEntry>,
}

impl Matrix {
    /// Creates an empty matrix.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry.
    #[must_use]
    pub fn entry(mut self, entry: MatrixEntry) -> Self {
        self.entries.push(entry);
        self
    }
}

/// One expanded sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixInstance {
    /// Instance name, e.g. `deploy: [ovh, app]`.
    pub name: String,
    /// Variable bindings of this instance.
    pub bindings: MatrixBindings,
}

/// Formats the name of one instance.
#[must_use]
pub fn instance_name(base: &str, bindings: &[(String, String)]) -> String {
    let values: Vec<&str> = bindings.iter().map(|(_, value)| value.as_str()).collect();
    format!("{base}: [{}]", values.join(", "))
}

/// Expands a matrix into its instances, in declaration order.
#[must_use]
pub fn expand(base: &str, matrix: &Matrix) -> Vec<MatrixInstance> {
    matrix
        .entries
        .iter()
        .flat_map(MatrixEntry::combinations)
        .map(|bindings| MatrixInstance {
            name: instance_name(base, &bindings),
            bindings,
        })
        .collect()
}
