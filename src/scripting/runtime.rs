//! Per-instance script lifecycle
//!
//! A [`ScriptRuntime`] owns one engine and one persistent scope for the life
//! of a step instance:
//!
//! ```text
//! Uninitialized --initialize--> Compiled --execute_row--> Running --finish--> Finished
//! ```
//!
//! `initialize` publishes the step handles, control constants and fragment
//! texts, binds the first row, runs the start script and compiles the
//! transform. Everything in scope at that point survives across rows; any
//! variable a transform declares with `let` is dropped before the next row is
//! bound.
//!
//! Functions defined in the start script or in library fragments are
//! callable from the transform and end scripts.

use crate::config::{ScriptCatalog, ScriptRole, StageConfig};
use crate::error::{Result, RowScriptError};
use crate::scripting::analyzer::UsedFieldIndex;
use crate::scripting::coercer::to_script;
use crate::scripting::control::CONTROL_CONSTANTS;
use crate::scripting::engine::{RowMetaHandle, ScriptEngine, SharedStepContext, StepHandle};
use crate::scripting::value::{ScriptValue, Undefined};
use crate::scripting::CompiledScript;
use crate::types::{Row, RowSchema};
use rhai::{Array, Dynamic, Scope, AST};
use std::collections::HashSet;
use std::sync::Arc;

/// Name of the whole-row array in scope
pub const ROW_VARIABLE: &str = "row";
/// Name of the row metadata object in scope
pub const ROW_META_VARIABLE: &str = "row_meta";
/// Name of the step handle in scope
pub const STEP_VARIABLE: &str = "_step_";

/// Lifecycle state of a [`ScriptRuntime`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Uninitialized,
    Compiled,
    Running,
    Finished,
}

#[derive(Debug, Clone)]
struct FieldBinding {
    position: usize,
    name: String,
}

/// Engine, compiled scripts and persistent scope of one step instance
pub struct ScriptRuntime {
    engine: ScriptEngine,
    scope: Scope<'static>,
    state: RuntimeState,
    transform: Option<CompiledScript>,
    end: Option<CompiledScript>,
    bindings: Vec<FieldBinding>,
    output_slots: Vec<String>,
    /// Scope length after the start script
    base_len: usize,
    rows_executed: u64,
    /// Bindings shadowed by a constant, reported once
    shadowed: HashSet<String>,
}

impl ScriptRuntime {
    /// Create an uninitialized runtime for a step definition
    pub fn new(config: &StageConfig, context: SharedStepContext) -> Self {
        Self {
            engine: ScriptEngine::new(&config.engine, context),
            scope: Scope::new(),
            state: RuntimeState::Uninitialized,
            transform: None,
            end: None,
            bindings: Vec::new(),
            output_slots: Vec::new(),
            base_len: 0,
            rows_executed: 0,
            shadowed: HashSet::new(),
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Rows the transform was executed for
    pub fn rows_executed(&self) -> u64 {
        self.rows_executed
    }

    /// Names of the input columns bound into scope
    pub fn bound_fields(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|b| b.name.as_str())
    }

    /// Number of scope entries that persist across rows
    pub fn base_len(&self) -> usize {
        self.base_len
    }

    /// Current number of scope entries
    pub fn scope_len(&self) -> usize {
        self.scope.len()
    }

    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }

    /// Prepare the scope with the first row, run the start script and
    /// compile the transform
    ///
    /// `output_slots` are script variables read back as output columns;
    /// those not already bound start every row as `undefined`.
    pub fn initialize(
        &mut self,
        catalog: &ScriptCatalog,
        schema: Arc<RowSchema>,
        used: &UsedFieldIndex,
        output_slots: &[String],
        first_row: &Row,
    ) -> Result<()> {
        if self.state != RuntimeState::Uninitialized {
            return Err(RowScriptError::Config(format!(
                "Script runtime already initialized ({:?})",
                self.state
            )));
        }

        let transform_fragment = catalog
            .transform()
            .ok_or_else(|| RowScriptError::Config("No transform script defined".to_string()))?;

        self.scope.push_constant(
            STEP_VARIABLE,
            StepHandle::new(self.engine.context().clone()),
        );
        for (name, code) in CONTROL_CONSTANTS {
            self.scope.push_constant(name, code);
        }
        for fragment in catalog.fragments() {
            self.scope
                .push_constant(fragment.name.clone(), fragment.source.clone());
        }
        self.scope
            .push_constant(ROW_META_VARIABLE, RowMetaHandle::new(schema.clone()));
        self.scope.push(ROW_VARIABLE, row_array(first_row));

        // Published names win over input columns of the same name
        let published = &self.scope;
        self.bindings = used
            .positions()
            .iter()
            .filter_map(|&position| schema.field(position).map(|f| (position, f)))
            .filter(|(_, field)| {
                let taken = published.contains(&field.name);
                if taken {
                    tracing::warn!(
                        "Input field '{}' is hidden by a script variable of the same name",
                        field.name
                    );
                }
                !taken
            })
            .map(|(position, field)| FieldBinding {
                position,
                name: field.name.clone(),
            })
            .collect();
        for binding in &self.bindings {
            self.scope.push_dynamic(
                binding.name.clone(),
                to_script(first_row.get(binding.position).and_then(|v| v.as_ref())),
            );
        }

        for name in output_slots {
            if !self.scope.contains(name) {
                self.scope.push(name.clone(), Undefined);
                self.output_slots.push(name.clone());
            }
        }

        tracing::debug!(
            "Bound input fields: [{}]",
            self.bindings
                .iter()
                .map(|b| b.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        // Functions from start and library fragments are shared with the
        // transform and end scripts
        let mut shared_functions = AST::empty();
        for fragment in catalog.fragments() {
            if fragment.role == ScriptRole::Normal {
                let library = self.engine.compile(fragment)?;
                shared_functions = shared_functions.merge(&library.ast().clone_functions_only());
            }
        }

        if let Some(start) = catalog.start() {
            let compiled = self.engine.compile(start)?;
            let ast = shared_functions.merge(compiled.ast());
            self.engine
                .engine()
                .run_ast_with_scope(&mut self.scope, &ast)
                .map_err(|e| RowScriptError::StartScript(e.to_string()))?;
            shared_functions = shared_functions.merge(&compiled.ast().clone_functions_only());
            tracing::info!("Start script '{}' executed", start.name);
        }

        let transform = self.engine.compile(transform_fragment)?;
        self.transform = Some(with_functions(&shared_functions, transform));
        if let Some(end) = catalog.end() {
            let end = self.engine.compile(end)?;
            self.end = Some(with_functions(&shared_functions, end));
        }

        self.base_len = self.scope.len();
        self.state = RuntimeState::Compiled;
        Ok(())
    }

    /// Bind `row` and run the compiled transform against it
    pub fn execute_row(&mut self, row: &Row) -> Result<()> {
        if !matches!(self.state, RuntimeState::Compiled | RuntimeState::Running) {
            return Err(RowScriptError::Config(format!(
                "Cannot execute a row in state {:?}",
                self.state
            )));
        }

        self.scope.rewind(self.base_len);
        self.bind_row(row);
        self.state = RuntimeState::Running;
        self.rows_executed += 1;

        let transform = match &self.transform {
            Some(transform) => transform,
            None => {
                return Err(RowScriptError::Config(
                    "Transform script was not compiled".to_string(),
                ))
            }
        };

        tracing::trace!("Executing transform for row {}", self.rows_executed);
        self.engine
            .engine()
            .run_ast_with_scope(&mut self.scope, transform.ast())
            .map_err(|e| RowScriptError::from_rhai_error(self.rows_executed, e))
    }

    /// Read a script variable after the latest execution
    pub fn read_variable(&self, name: &str) -> Option<ScriptValue> {
        self.scope
            .get_value::<Dynamic>(name)
            .map(|value| ScriptValue::from_dynamic(&value))
    }

    /// Run the end script once; later calls are no-ops
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            RuntimeState::Finished => return Ok(()),
            RuntimeState::Uninitialized => {
                tracing::debug!("No rows processed, end script skipped");
                self.state = RuntimeState::Finished;
                return Ok(());
            }
            RuntimeState::Compiled | RuntimeState::Running => {}
        }

        self.state = RuntimeState::Finished;
        self.scope.rewind(self.base_len);

        if let Some(end) = &self.end {
            self.engine
                .engine()
                .run_ast_with_scope(&mut self.scope, end.ast())
                .map_err(|e| RowScriptError::EndScript(e.to_string()))?;
            tracing::info!("End script '{}' executed", end.name());
        }
        Ok(())
    }

    fn bind_row(&mut self, row: &Row) {
        self.assign(ROW_VARIABLE, Dynamic::from_array(row_array(row)));

        let bindings = std::mem::take(&mut self.bindings);
        for binding in &bindings {
            let value = to_script(row.get(binding.position).and_then(|v| v.as_ref()));
            self.assign(&binding.name, value);
        }
        self.bindings = bindings;

        let slots = std::mem::take(&mut self.output_slots);
        for name in &slots {
            self.assign(name, Dynamic::from(Undefined));
        }
        self.output_slots = slots;
    }

    fn assign(&mut self, name: &str, value: Dynamic) {
        match self.scope.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                if self.shadowed.insert(name.to_string()) {
                    tracing::warn!(
                        "Variable '{}' is a constant in the script scope and cannot be rebound",
                        name
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("state", &self.state)
            .field("transform", &self.transform)
            .field("bindings", &self.bindings)
            .field("base_len", &self.base_len)
            .field("rows_executed", &self.rows_executed)
            .finish()
    }
}

fn with_functions(shared: &AST, script: CompiledScript) -> CompiledScript {
    let ast = shared.merge(script.ast());
    CompiledScript {
        ast,
        ..script
    }
}

fn row_array(row: &Row) -> Array {
    row.iter().map(|v| to_script(v.as_ref())).collect()
}
