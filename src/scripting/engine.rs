//! Rhai Script Engine Implementation
//!
//! This module builds the engine each step instance runs its scripts on.
//!
//! ## Step Callbacks
//!
//! These functions read from or write to the owning step:
//! - `get_step_name()` / `get_copy_nr()` - Identity of the step copy
//! - `write_to_log(msg)` / `write_to_log(level, msg)` - Log through the step
//! - `get_process_count(kind)` - Row counters (`"i"` read, `"o"` written,
//!   `"e"` errors, `"s"` skipped, `"j"` rejected)
//! - `get_variable(name, default)` / `set_variable(name, value)` - Step variables
//! - `put_row(array)` - Emit an extra output row ahead of the current one
//!
//! `print` and `debug` statements are routed to `tracing` as well.

use crate::config::{EngineSettings, ScriptFragment};
use crate::error::{Result, RowScriptError};
use crate::scripting::helpers::register_helpers;
use crate::scripting::CompiledScript;
use crate::types::{RowSchema, StepStats};
use rhai::{Array, Dynamic, Engine};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Log target used for messages written by scripts
pub const SCRIPT_LOG_TARGET: &str = "rowscript::script";

/// State of the owning step that scripts can reach through callbacks
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    step_name: String,
    copy_nr: usize,
    stats: StepStats,
    variables: BTreeMap<String, String>,
    /// Rows queued by `put_row`, drained by the step after each execution
    pending_rows: Vec<Array>,
}

impl StepContext {
    pub fn new(
        step_name: impl Into<String>,
        copy_nr: usize,
        variables: BTreeMap<String, String>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            copy_nr,
            variables,
            ..Default::default()
        }
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn copy_nr(&self) -> usize {
        self.copy_nr
    }

    pub fn stats(&self) -> StepStats {
        self.stats
    }

    pub fn update_stats(&mut self, stats: StepStats) {
        self.stats = stats;
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(|v| v.as_str())
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn queue_row(&mut self, row: Array) {
        self.pending_rows.push(row);
    }

    pub fn take_pending_rows(&mut self) -> Vec<Array> {
        std::mem::take(&mut self.pending_rows)
    }

    /// Counter lookup used by `get_process_count`
    pub fn process_count(&self, kind: &str) -> i64 {
        let count = match kind.to_ascii_lowercase().as_str() {
            "i" | "r" => self.stats.lines_read,
            "o" | "w" => self.stats.lines_written,
            "e" => self.stats.errors,
            "s" => self.stats.lines_skipped,
            "j" => self.stats.lines_rejected,
            _ => 0,
        };
        count as i64
    }
}

/// Thread-safe shared step context
pub type SharedStepContext = Arc<RwLock<StepContext>>;

/// The `_step_` object published into every scope
#[derive(Debug, Clone)]
pub struct StepHandle(SharedStepContext);

impl StepHandle {
    pub fn new(context: SharedStepContext) -> Self {
        Self(context)
    }

    fn name(&self) -> String {
        self.0
            .read()
            .map(|c| c.step_name.clone())
            .unwrap_or_default()
    }

    fn copy_nr(&self) -> i64 {
        self.0.read().map(|c| c.copy_nr as i64).unwrap_or(0)
    }
}

/// The `row_meta` object published into every scope
#[derive(Debug, Clone)]
pub struct RowMetaHandle(Arc<RowSchema>);

impl RowMetaHandle {
    pub fn new(schema: Arc<RowSchema>) -> Self {
        Self(schema)
    }

    pub fn schema(&self) -> &RowSchema {
        &self.0
    }
}

/// A script engine configured for one step instance
pub struct ScriptEngine {
    /// The Rhai engine instance
    engine: Engine,
    /// Shared context for step callbacks
    context: SharedStepContext,
}

impl ScriptEngine {
    /// Create an engine with the given limits, bound to a step context
    pub fn new(settings: &EngineSettings, context: SharedStepContext) -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine, settings, context.clone());
        Self { engine, context }
    }

    /// Configure the Rhai engine with limits, helper functions and callbacks
    fn configure_engine(engine: &mut Engine, settings: &EngineSettings, context: SharedStepContext) {
        engine.set_optimization_level(settings.optimization_level.into());
        engine.set_max_expr_depths(settings.max_expr_depth, settings.max_expr_depth);
        engine.set_max_call_levels(settings.max_call_levels);
        engine.set_max_operations(settings.max_operations);
        engine.set_max_string_size(settings.max_string_size);
        engine.set_max_array_size(settings.max_array_size);
        engine.set_max_map_size(settings.max_map_size);

        register_helpers(engine, settings.max_string_size);

        engine.on_print(|text| {
            tracing::info!(target: SCRIPT_LOG_TARGET, "{}", text);
        });
        engine.on_debug(|text, source, pos| {
            tracing::debug!(
                target: SCRIPT_LOG_TARGET,
                "{} ({} {})",
                text,
                source.unwrap_or("script"),
                pos
            );
        });

        // ===== Step handle =====

        engine.register_type_with_name::<StepHandle>("Step");
        engine.register_fn("name", |h: StepHandle| h.name());
        engine.register_fn("copy_nr", |h: StepHandle| h.copy_nr());
        engine.register_fn("log", |h: StepHandle, msg: &str| {
            tracing::info!(target: SCRIPT_LOG_TARGET, step = %h.name(), "{}", msg);
        });
        engine.register_fn("to_string", |h: StepHandle| format!("Step({})", h.name()));

        // ===== Row metadata =====

        engine.register_type_with_name::<RowMetaHandle>("RowMeta");
        engine.register_fn("size", |m: RowMetaHandle| m.0.len() as i64);
        engine.register_fn("index_of", |m: RowMetaHandle, name: &str| {
            m.0.index_of(name).map(|i| i as i64).unwrap_or(-1)
        });
        engine.register_fn("field_name", |m: RowMetaHandle, i: i64| -> Dynamic {
            usize::try_from(i)
                .ok()
                .and_then(|i| m.0.field(i))
                .map(|f| Dynamic::from(f.name.clone()))
                .unwrap_or(Dynamic::UNIT)
        });
        engine.register_fn("field_type", |m: RowMetaHandle, i: i64| -> Dynamic {
            usize::try_from(i)
                .ok()
                .and_then(|i| m.0.field(i))
                .map(|f| Dynamic::from(f.semantic_type.name().to_string()))
                .unwrap_or(Dynamic::UNIT)
        });
        engine.register_fn("field_names", |m: RowMetaHandle| -> Array {
            m.0.names().map(|n| Dynamic::from(n.to_string())).collect()
        });

        // ===== Step callbacks =====

        {
            let ctx = context.clone();
            engine.register_fn("get_step_name", move || -> String {
                ctx.read().map(|c| c.step_name.clone()).unwrap_or_default()
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn("get_copy_nr", move || -> i64 {
                ctx.read().map(|c| c.copy_nr as i64).unwrap_or(0)
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn("get_process_count", move |kind: &str| -> i64 {
                ctx.read().map(|c| c.process_count(kind)).unwrap_or(0)
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn("write_to_log", move |msg: &str| {
                let step = ctx.read().map(|c| c.step_name.clone()).unwrap_or_default();
                tracing::info!(target: SCRIPT_LOG_TARGET, step = %step, "{}", msg);
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn("write_to_log", move |level: &str, msg: &str| {
                let step = ctx.read().map(|c| c.step_name.clone()).unwrap_or_default();
                write_log(&step, level, msg);
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn("get_variable", move |name: &str, default: Dynamic| -> Dynamic {
                ctx.read()
                    .ok()
                    .and_then(|c| c.variable(name).map(|v| Dynamic::from(v.to_string())))
                    .unwrap_or(default)
            });
        }
        {
            let ctx = context.clone();
            engine.register_fn("set_variable", move |name: &str, value: Dynamic| {
                if let Ok(mut c) = ctx.write() {
                    c.set_variable(name, value.to_string());
                }
            });
        }
        {
            let ctx = context;
            engine.register_fn("put_row", move |row: Array| {
                if let Ok(mut c) = ctx.write() {
                    c.queue_row(row);
                }
            });
        }
    }

    /// Compile a fragment
    pub fn compile(&self, fragment: &ScriptFragment) -> Result<CompiledScript> {
        let ast = self
            .engine
            .compile(&fragment.source)
            .map_err(|e| RowScriptError::Compile {
                fragment: fragment.name.clone(),
                message: e.to_string(),
            })?;
        let compiled = CompiledScript::new(ast, fragment);
        tracing::debug!("Compiled {} script '{}'", compiled.role(), compiled.name());
        Ok(compiled)
    }

    /// Validate a script without executing it
    pub fn validate(&self, source: &str) -> Result<()> {
        self.engine
            .compile(source)
            .map(|_| ())
            .map_err(|e| RowScriptError::Compile {
                fragment: "validation".to_string(),
                message: e.to_string(),
            })
    }

    /// Get a reference to the underlying Rhai engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get a reference to the shared step context
    pub fn context(&self) -> &SharedStepContext {
        &self.context
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field(
                "step",
                &self.context.read().map(|c| c.step_name.clone()).ok(),
            )
            .finish()
    }
}

/// Route a `write_to_log(level, msg)` call to the matching tracing level
fn write_log(step: &str, level: &str, msg: &str) {
    match level.to_ascii_lowercase().as_str() {
        "e" | "error" => tracing::error!(target: SCRIPT_LOG_TARGET, step = %step, "{}", msg),
        "w" | "warn" => tracing::warn!(target: SCRIPT_LOG_TARGET, step = %step, "{}", msg),
        "d" | "detailed" | "debug" => {
            tracing::debug!(target: SCRIPT_LOG_TARGET, step = %step, "{}", msg)
        }
        "r" | "rowlevel" | "trace" => {
            tracing::trace!(target: SCRIPT_LOG_TARGET, step = %step, "{}", msg)
        }
        _ => tracing::info!(target: SCRIPT_LOG_TARGET, step = %step, "{}", msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldDescriptor, SemanticType};
    use rhai::Scope;

    fn make_engine() -> ScriptEngine {
        let mut variables = BTreeMap::new();
        variables.insert("REGION".to_string(), "EU".to_string());
        let context = Arc::new(RwLock::new(StepContext::new("calc", 2, variables)));
        ScriptEngine::new(&EngineSettings::default(), context)
    }

    #[test]
    fn test_step_callbacks() {
        let engine = make_engine();
        let e = engine.engine();
        assert_eq!(e.eval::<String>("get_step_name()").unwrap(), "calc");
        assert_eq!(e.eval::<i64>("get_copy_nr()").unwrap(), 2);
        assert_eq!(
            e.eval::<String>(r#"get_variable("REGION", "none")"#).unwrap(),
            "EU"
        );
        assert_eq!(
            e.eval::<String>(r#"get_variable("MISSING", "none")"#).unwrap(),
            "none"
        );
    }

    #[test]
    fn test_set_variable_is_visible_to_host() {
        let engine = make_engine();
        engine
            .engine()
            .run(r#"set_variable("LAST_ID", 42);"#)
            .unwrap();
        let ctx = engine.context().read().unwrap();
        assert_eq!(ctx.variable("LAST_ID"), Some("42"));
    }

    #[test]
    fn test_process_counts() {
        let engine = make_engine();
        engine.context().write().unwrap().update_stats(StepStats {
            lines_read: 5,
            lines_written: 3,
            lines_skipped: 2,
            ..Default::default()
        });
        let e = engine.engine();
        assert_eq!(e.eval::<i64>(r#"get_process_count("i")"#).unwrap(), 5);
        assert_eq!(e.eval::<i64>(r#"get_process_count("o")"#).unwrap(), 3);
        assert_eq!(e.eval::<i64>(r#"get_process_count("s")"#).unwrap(), 2);
        assert_eq!(e.eval::<i64>(r#"get_process_count("?")"#).unwrap(), 0);
    }

    #[test]
    fn test_put_row_queues() {
        let engine = make_engine();
        engine
            .engine()
            .run("put_row([1, \"a\"]); put_row([2, \"b\"]);")
            .unwrap();
        let rows = engine.context().write().unwrap().take_pending_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0].as_int().unwrap(), 2);
        assert!(engine
            .context()
            .write()
            .unwrap()
            .take_pending_rows()
            .is_empty());
    }

    #[test]
    fn test_step_and_row_meta_handles() {
        let engine = make_engine();
        let schema = Arc::new(RowSchema::new(vec![
            FieldDescriptor::new("id", SemanticType::Integer),
            FieldDescriptor::new("name", SemanticType::String),
        ]));
        let mut scope = Scope::new();
        scope.push_constant("_step_", StepHandle::new(engine.context().clone()));
        scope.push_constant("row_meta", RowMetaHandle::new(schema));

        let e = engine.engine();
        assert_eq!(
            e.eval_with_scope::<String>(&mut scope, "_step_.name()")
                .unwrap(),
            "calc"
        );
        assert_eq!(
            e.eval_with_scope::<i64>(&mut scope, r#"row_meta.index_of("name")"#)
                .unwrap(),
            1
        );
        assert_eq!(
            e.eval_with_scope::<String>(&mut scope, "row_meta.field_type(0)")
                .unwrap(),
            "Integer"
        );
        assert!(e
            .eval_with_scope::<Dynamic>(&mut scope, "row_meta.field_name(9)")
            .unwrap()
            .is_unit());
    }

    #[test]
    fn test_operation_limit() {
        let context = Arc::new(RwLock::new(StepContext::default()));
        let settings = EngineSettings {
            max_operations: 1_000,
            ..Default::default()
        };
        let engine = ScriptEngine::new(&settings, context);
        assert!(engine.engine().run("loop { }").is_err());
    }

    #[test]
    fn test_compile_error_names_fragment() {
        let engine = make_engine();
        let err = engine
            .compile(&ScriptFragment::transform("broken", "let x = ;"))
            .unwrap_err();
        match err {
            RowScriptError::Compile { fragment, .. } => assert_eq!(fragment, "broken"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(engine.validate("1 + 1").is_ok());
    }
}
