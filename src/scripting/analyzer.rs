//! Input field usage analysis
//!
//! Decides which input columns get bound into the script scope. A column is
//! used when its exact, case-preserved name occurs anywhere in the transform
//! text. The scan is a plain substring match, so a field called `id` is bound
//! for a script that only mentions `valid`; it never misses a name that is
//! literally present.

use crate::types::RowSchema;

/// Positions of the input columns a transform needs, in schema order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsedFieldIndex {
    positions: Vec<usize>,
}

impl UsedFieldIndex {
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn contains(&self, position: usize) -> bool {
        self.positions.binary_search(&position).is_ok()
    }

    /// Add positions, keeping the index sorted and free of duplicates
    pub fn extend(&mut self, extra: impl IntoIterator<Item = usize>) {
        self.positions.extend(extra);
        self.positions.sort_unstable();
        self.positions.dedup();
    }

    /// Names of the used columns
    pub fn names<'a>(&'a self, schema: &'a RowSchema) -> impl Iterator<Item = &'a str> + 'a {
        self.positions
            .iter()
            .filter_map(move |&i| schema.field(i).map(|f| f.name.as_str()))
    }
}

/// Compute the used field index of `script` against `schema`
pub fn analyze(script: &str, schema: &RowSchema) -> UsedFieldIndex {
    let positions = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, field)| !field.name.is_empty() && script.contains(field.name.as_str()))
        .map(|(i, _)| i)
        .collect();
    UsedFieldIndex { positions }
}
