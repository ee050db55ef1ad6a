//! Design-time validation of a script step
//!
//! [`check_stage`] compiles every fragment and dry-runs the start and
//! transform scripts against one sample row, so a broken step is reported
//! before any real row flows through it. Failures become remarks, never
//! errors.

use crate::config::StageConfig;
use crate::pipeline::layout::OutputLayout;
use crate::pipeline::stage::binding_plan;
use crate::scripting::coercer::from_script;
use crate::scripting::{ScriptEngine, ScriptRuntime, ScriptValue, StepContext};
use crate::types::{Row, RowSchema, SemanticType, Value};
use bigdecimal::BigDecimal;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Severity of a check remark
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckSeverity {
    Ok,
    Warning,
    Error,
}

impl fmt::Display for CheckSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckSeverity::Ok => write!(f, "OK"),
            CheckSeverity::Warning => write!(f, "WARNING"),
            CheckSeverity::Error => write!(f, "ERROR"),
        }
    }
}

/// One finding of [`check_stage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRemark {
    pub severity: CheckSeverity,
    pub message: String,
}

impl CheckRemark {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            severity: CheckSeverity::Ok,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: CheckSeverity::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: CheckSeverity::Error,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == CheckSeverity::Error
    }
}

impl fmt::Display for CheckRemark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

/// Validate `config` against the schema of the rows it will receive
pub fn check_stage(config: &StageConfig, input: &RowSchema) -> Vec<CheckRemark> {
    let mut remarks = Vec::new();

    if input.is_empty() {
        remarks.push(CheckRemark::error("No input fields received"));
    } else {
        remarks.push(CheckRemark::ok(format!(
            "Step receives {} input fields",
            input.len()
        )));
    }

    if let Err(e) = config.validate() {
        remarks.push(CheckRemark::error(e.to_string()));
    }

    match config.scripts.transform() {
        Some(transform) => remarks.push(CheckRemark::ok(format!(
            "Transform script '{}' found",
            transform.name
        ))),
        None => {
            remarks.push(CheckRemark::error("No transform script defined"));
            return remarks;
        }
    }
    match config.scripts.start() {
        Some(start) => remarks.push(CheckRemark::ok(format!("Start script '{}' found", start.name))),
        None => remarks.push(CheckRemark::ok("No start script defined")),
    }
    match config.scripts.end() {
        Some(end) => remarks.push(CheckRemark::ok(format!("End script '{}' found", end.name))),
        None => remarks.push(CheckRemark::ok("No end script defined")),
    }

    if config.fields.is_empty() {
        remarks.push(CheckRemark::warning("No output fields declared"));
    }
    let layout = match OutputLayout::resolve(input, &config.fields, &config.step_name) {
        Ok(layout) => layout,
        Err(e) => {
            remarks.push(CheckRemark::error(e.to_string()));
            return remarks;
        }
    };

    let context = Arc::new(RwLock::new(StepContext::new(
        config.step_name.clone(),
        0,
        config.variables.clone(),
    )));
    let engine = ScriptEngine::new(&config.engine, context.clone());
    let mut compiled = true;
    for fragment in config.scripts.fragments() {
        match engine.compile(fragment) {
            Ok(_) => remarks.push(CheckRemark::ok(format!(
                "Script '{}' compiles",
                fragment.name
            ))),
            Err(e) => {
                compiled = false;
                remarks.push(CheckRemark::error(e.to_string()));
            }
        }
    }
    if !compiled {
        return remarks;
    }

    dry_run(config, input, &layout, context, &mut remarks);
    remarks
}

/// Run the step once against a sample row
fn dry_run(
    config: &StageConfig,
    input: &RowSchema,
    layout: &OutputLayout,
    context: Arc<RwLock<StepContext>>,
    remarks: &mut Vec<CheckRemark>,
) {
    let schema = Arc::new(input.clone());
    let row = sample_row(input);
    let mut runtime = ScriptRuntime::new(config, context);

    let (used, slots) = match binding_plan(config, input) {
        Ok(plan) => plan,
        Err(e) => {
            remarks.push(CheckRemark::error(e.to_string()));
            return;
        }
    };

    if let Err(e) = runtime.initialize(&config.scripts, schema, &used, &slots, &row) {
        remarks.push(CheckRemark::error(e.to_string()));
        return;
    }
    if let Err(e) = runtime.execute_row(&row) {
        remarks.push(CheckRemark::error(e.to_string()));
        return;
    }

    let mut values_ok = true;
    for (spec, target) in config.fields.iter().zip(layout.targets()) {
        let value = runtime
            .read_variable(&spec.source_name)
            .unwrap_or(ScriptValue::Undefined);
        match from_script(&value, spec.declared_type, spec.output_name()) {
            Ok(_) => {}
            Err(e) => {
                values_ok = false;
                remarks.push(CheckRemark::error(format!(
                    "{} (output column {})",
                    e,
                    target.position() + 1
                )));
            }
        }
    }
    if values_ok {
        remarks.push(CheckRemark::ok("Script executed on a sample row"));
    }

    if let Err(e) = runtime.finish() {
        remarks.push(CheckRemark::error(e.to_string()));
    }
}

/// One sample value per column, by semantic type
fn sample_row(schema: &RowSchema) -> Row {
    schema
        .fields()
        .iter()
        .map(|field| {
            Some(match field.semantic_type {
                SemanticType::String => Value::String("test value".to_string()),
                SemanticType::Integer => Value::Integer(0),
                SemanticType::Number => Value::Number(0.0),
                SemanticType::Date => Value::Date(0),
                SemanticType::Boolean => Value::Boolean(true),
                SemanticType::Binary => Value::Binary((0..10).collect()),
                SemanticType::BigNumber => Value::BigNumber(BigDecimal::from(0)),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputFieldSpec, ScriptFragment};
    use crate::types::FieldDescriptor;

    fn input() -> RowSchema {
        RowSchema::new(vec![
            FieldDescriptor::new("name", SemanticType::String),
            FieldDescriptor::new("amount", SemanticType::Number),
            FieldDescriptor::new("born", SemanticType::Date),
        ])
    }

    fn errors(remarks: &[CheckRemark]) -> Vec<&CheckRemark> {
        remarks.iter().filter(|r| r.is_error()).collect()
    }

    #[test]
    fn test_valid_step_has_no_errors() {
        let config = StageConfig::with_transform("calc", "out = upper(name); y = born.year;")
            .field(OutputFieldSpec::new("out", SemanticType::String))
            .field(OutputFieldSpec::new("y", SemanticType::Integer));
        let remarks = check_stage(&config, &input());
        assert!(errors(&remarks).is_empty(), "{:?}", remarks);
        assert!(remarks
            .iter()
            .any(|r| r.message.contains("sample row")));
    }

    #[test]
    fn test_empty_input() {
        let config = StageConfig::with_transform("calc", "1");
        let remarks = check_stage(&config, &RowSchema::default());
        assert!(remarks[0].is_error());
    }

    #[test]
    fn test_compile_error_reported() {
        let config = StageConfig::with_transform("calc", "out = ;");
        let remarks = check_stage(&config, &input());
        let errs = errors(&remarks);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("transform"));
    }

    #[test]
    fn test_unresolved_replace_reported() {
        let config = StageConfig::with_transform("calc", "1")
            .field(OutputFieldSpec::new("missing", SemanticType::String).replacing());
        let remarks = check_stage(&config, &input());
        assert!(errors(&remarks)
            .iter()
            .any(|r| r.message.contains("missing")));
    }

    #[test]
    fn test_conversion_error_reported() {
        let config = StageConfig::with_transform("calc", "flag = name;")
            .field(OutputFieldSpec::new("flag", SemanticType::Boolean));
        let remarks = check_stage(&config, &input());
        let errs = errors(&remarks);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("flag"));
    }

    #[test]
    fn test_start_and_end_scripts_run() {
        let config = StageConfig::with_transform("calc", "1")
            .script(ScriptFragment::start("init", "let x = 1;"))
            .script(ScriptFragment::end("done", "throw \"end failed\";"));
        let remarks = check_stage(&config, &input());
        let errs = errors(&remarks);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("end failed"));
    }
}
