//! Test data builders for creating test objects

use rowscript::config::{ErrorHandlingConfig, OutputFieldSpec, ScriptFragment, StageConfig};
use rowscript::types::{FieldDescriptor, Row, RowSchema, SemanticType, Value};
use std::sync::Arc;

/// Builder for test input schemas
#[derive(Default)]
pub struct SchemaBuilder {
    fields: Vec<FieldDescriptor>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, semantic_type: SemanticType) -> Self {
        self.fields.push(FieldDescriptor::new(name, semantic_type));
        self
    }

    pub fn build(self) -> Arc<RowSchema> {
        Arc::new(RowSchema::new(self.fields))
    }
}

/// Builder for step definitions
pub struct StageBuilder {
    config: StageConfig,
}

impl StageBuilder {
    pub fn new(transform: &str) -> Self {
        Self {
            config: StageConfig::with_transform("test step", transform),
        }
    }

    pub fn start(mut self, source: &str) -> Self {
        self.config.scripts.push(ScriptFragment::start("start", source));
        self
    }

    pub fn end(mut self, source: &str) -> Self {
        self.config.scripts.push(ScriptFragment::end("end", source));
        self
    }

    pub fn append(mut self, source: &str, target: &str, semantic_type: SemanticType) -> Self {
        self.config
            .fields
            .push(OutputFieldSpec::new(source, semantic_type).renamed(target));
        self
    }

    pub fn replace(mut self, name: &str, semantic_type: SemanticType) -> Self {
        self.config
            .fields
            .push(OutputFieldSpec::new(name, semantic_type).replacing());
        self
    }

    pub fn redirect_errors(mut self) -> Self {
        self.config.error_handling = ErrorHandlingConfig::redirect();
        self
    }

    pub fn input(mut self, name: &str, semantic_type: SemanticType) -> Self {
        self.config
            .input_fields
            .push(FieldDescriptor::new(name, semantic_type));
        self
    }

    pub fn build(self) -> StageConfig {
        self.config
    }
}

/// Single-column row holding a number
pub fn number_row(value: f64) -> Row {
    vec![Some(Value::Number(value))]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_builder() {
        let config = StageBuilder::new("out = 1;")
            .append("out", "result", SemanticType::Integer)
            .redirect_errors()
            .build();

        assert_eq!(config.fields.len(), 1);
        assert_eq!(config.fields[0].output_name(), "result");
        assert!(config.error_handling.enabled);
        assert!(config.validate().is_ok());
    }
}
