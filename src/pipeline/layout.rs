//! Output schema resolution
//!
//! The output of a script step is its input schema with the declared output
//! fields applied: a replacing field changes the type (and length/precision)
//! of an existing column in place, every other field is appended after the
//! input columns in declaration order.

use crate::config::OutputFieldSpec;
use crate::error::{Result, RowScriptError};
use crate::types::{FieldDescriptor, Row, RowSchema, Value};
use std::sync::Arc;

/// Where one declared output field lands in the output row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputTarget {
    /// Overwrites the input column at this position
    Replace(usize),
    /// Appended at this position
    Append(usize),
}

impl OutputTarget {
    pub fn position(&self) -> usize {
        match self {
            OutputTarget::Replace(p) | OutputTarget::Append(p) => *p,
        }
    }
}

/// Resolved output schema and field placement
#[derive(Debug, Clone)]
pub struct OutputLayout {
    schema: Arc<RowSchema>,
    input_len: usize,
    targets: Vec<OutputTarget>,
}

impl OutputLayout {
    /// Apply `specs` to `input`; `origin` is recorded on new/changed columns
    pub fn resolve(input: &RowSchema, specs: &[OutputFieldSpec], origin: &str) -> Result<Self> {
        let mut schema = input.clone();
        let mut targets = Vec::with_capacity(specs.len());

        for spec in specs {
            if spec.replace_existing {
                let index = input
                    .index_of(&spec.source_name)
                    .or_else(|| {
                        (!spec.target_name.trim().is_empty())
                            .then(|| input.index_of(&spec.target_name))
                            .flatten()
                    })
                    .ok_or_else(|| {
                        RowScriptError::Config(format!(
                            "Field to replace '{}' not found in the input",
                            spec.output_name()
                        ))
                    })?;

                if let Some(field) = schema.field_mut(index) {
                    field.semantic_type = spec.declared_type;
                    field.length = spec.length;
                    field.precision = spec.precision;
                    field.origin = Some(origin.to_string());
                }
                targets.push(OutputTarget::Replace(index));
            } else {
                let name = unique_name(&schema, spec.output_name());
                if name != spec.output_name() {
                    tracing::warn!(
                        "Output field '{}' duplicates an existing column, appended as '{}'",
                        spec.output_name(),
                        name
                    );
                }
                targets.push(OutputTarget::Append(schema.len()));
                schema.push(
                    FieldDescriptor::new(name, spec.declared_type)
                        .with_length(spec.length, spec.precision)
                        .with_origin(origin),
                );
            }
        }

        Ok(Self {
            schema: Arc::new(schema),
            input_len: input.len(),
            targets,
        })
    }

    pub fn schema(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    pub fn targets(&self) -> &[OutputTarget] {
        &self.targets
    }

    pub fn input_len(&self) -> usize {
        self.input_len
    }

    /// Build the output row from the input row and one value per spec
    pub fn materialize(&self, mut input: Row, values: Vec<Option<Value>>) -> Row {
        input.resize(self.input_len, None);
        input.resize(self.schema.len(), None);
        for (target, value) in self.targets.iter().zip(values) {
            if let Some(slot) = input.get_mut(target.position()) {
                *slot = value;
            }
        }
        input
    }
}

/// `name`, or the first free `name_1`, `name_2`, ... in `schema`
fn unique_name(schema: &RowSchema, name: &str) -> String {
    if schema.index_of(name).is_none() {
        return name.to_string();
    }
    (1..)
        .map(|n| format!("{}_{}", name, n))
        .find(|candidate| schema.index_of(candidate).is_none())
        .unwrap_or_else(|| name.to_string())
}
