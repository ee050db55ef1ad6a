//! One instance of a script step
//!
//! [`RowStage`] drives every input row through the scripting layer:
//!
//! ```text
//! host.next_row -> analyze (first row) -> execute -> control signal -> coerce -> host.emit_row
//! ```
//!
//! The output layout, used-field index and compiled scripts are built lazily
//! from the first row's schema and reused for every later row.

use crate::config::StageConfig;
use crate::error::{Result, RowScriptError};
use crate::pipeline::host::StepHost;
use crate::pipeline::layout::OutputLayout;
use crate::scripting::coercer::from_script;
use crate::scripting::{
    analyze, ControlSignal, ControlSignalInterpreter, ScriptRuntime, ScriptValue,
    SharedStepContext, StepContext, UsedFieldIndex,
};
use crate::types::{Row, RowSchema, StepStats, Value};
use rhai::Array;
use std::sync::{Arc, RwLock};

/// How one step copy ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// End of stream reached
    Completed,
    /// Stopped by an ABORT signal or by another copy
    Aborted,
    /// Stopped by an ERROR signal or a fatal error
    Failed,
}

/// Final counters and outcome of one step copy
#[derive(Debug, Clone)]
pub struct StageReport {
    pub copy_nr: usize,
    pub outcome: StageOutcome,
    pub stats: StepStats,
    /// First fatal error, if any
    pub error: Option<String>,
}

impl StageReport {
    /// Report of a copy that could not start
    pub fn failed(copy_nr: usize, error: impl Into<String>) -> Self {
        Self {
            copy_nr,
            outcome: StageOutcome::Failed,
            stats: StepStats {
                errors: 1,
                ..Default::default()
            },
            error: Some(error.into()),
        }
    }
}

/// What happened to a single input row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Emitted,
    Skipped,
    /// Sent to the error channel
    Redirected,
    /// ABORT signal, the run stops gracefully
    Aborted,
    /// ERROR signal, the run stops as failed
    Failed,
}

/// A single copy of a script step
pub struct RowStage {
    config: Arc<StageConfig>,
    context: SharedStepContext,
    runtime: ScriptRuntime,
    control: ControlSignalInterpreter,
    layout: Option<OutputLayout>,
    stats: StepStats,
    copy_nr: usize,
}

impl RowStage {
    pub fn new(config: Arc<StageConfig>, copy_nr: usize) -> Result<Self> {
        config.validate()?;

        let context = Arc::new(RwLock::new(StepContext::new(
            config.step_name.clone(),
            copy_nr,
            config.variables.clone(),
        )));
        let runtime = ScriptRuntime::new(&config, context.clone());
        let control = ControlSignalInterpreter::new(config.status_variable.clone());

        Ok(Self {
            config,
            context,
            runtime,
            control,
            layout: None,
            stats: StepStats::default(),
            copy_nr,
        })
    }

    pub fn copy_nr(&self) -> usize {
        self.copy_nr
    }

    pub fn stats(&self) -> StepStats {
        self.stats
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn context(&self) -> &SharedStepContext {
        &self.context
    }

    pub fn runtime(&self) -> &ScriptRuntime {
        &self.runtime
    }

    /// Output schema, available once the first row was seen
    pub fn output_schema(&self) -> Option<&Arc<RowSchema>> {
        self.layout.as_ref().map(|l| l.schema())
    }

    /// Process one input row
    ///
    /// Row-level failures are redirected through the host when error handling
    /// is enabled; every returned `Err` is fatal for the step.
    pub fn process_row<H: StepHost + ?Sized>(
        &mut self,
        host: &mut H,
        row: Row,
        schema: &Arc<RowSchema>,
    ) -> Result<RowOutcome> {
        self.stats.lines_read += 1;
        if self.layout.is_none() {
            self.initialize(schema, &row)?;
        }
        self.sync_context();

        match self.transform(&row) {
            Ok((signal, extra, values)) => self.deliver(host, row, signal, extra, values),
            Err(e) if e.is_row_level() && self.config.error_handling.enabled => {
                self.redirect(host, row, schema, e)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the end script; only the first call has an effect
    pub fn finish(&mut self) -> Result<()> {
        self.sync_context();
        self.runtime.finish()
    }

    /// Pump rows until end of stream or a stop, then finish
    pub fn run<H: StepHost + ?Sized>(&mut self, host: &mut H) -> StageReport {
        let mut outcome = StageOutcome::Completed;
        let mut error = None;

        tracing::info!(
            "Step '{}' copy {} started",
            self.config.step_name,
            self.copy_nr
        );

        loop {
            if host.is_stopped() {
                tracing::debug!("Step copy {} stopping on request", self.copy_nr);
                outcome = StageOutcome::Aborted;
                break;
            }

            let next = match host.next_row() {
                Ok(Some(next)) => next,
                Ok(None) => {
                    // The host may end the stream early because of a stop
                    if host.is_stopped() {
                        outcome = StageOutcome::Aborted;
                    }
                    break;
                }
                Err(e) => {
                    self.fail(host, &e);
                    error = Some(e.to_string());
                    outcome = StageOutcome::Failed;
                    break;
                }
            };

            let (row, schema) = next;
            match self.process_row(host, row, &schema) {
                Ok(RowOutcome::Aborted) => {
                    outcome = StageOutcome::Aborted;
                    break;
                }
                Ok(RowOutcome::Failed) => {
                    outcome = StageOutcome::Failed;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    self.fail(host, &e);
                    error = Some(e.to_string());
                    outcome = StageOutcome::Failed;
                    break;
                }
            }
        }

        if let Err(e) = self.finish() {
            self.fail(host, &e);
            error.get_or_insert_with(|| e.to_string());
            outcome = StageOutcome::Failed;
        }

        tracing::info!(
            "Step '{}' copy {} {:?}: read={} written={} skipped={} rejected={} errors={}",
            self.config.step_name,
            self.copy_nr,
            outcome,
            self.stats.lines_read,
            self.stats.lines_written,
            self.stats.lines_skipped,
            self.stats.lines_rejected,
            self.stats.errors
        );

        StageReport {
            copy_nr: self.copy_nr,
            outcome,
            stats: self.stats,
            error,
        }
    }

    fn initialize(&mut self, schema: &Arc<RowSchema>, first_row: &Row) -> Result<()> {
        let layout = OutputLayout::resolve(schema, &self.config.fields, &self.config.step_name)?;
        let (used, slots) = binding_plan(&self.config, schema)?;

        self.runtime
            .initialize(&self.config.scripts, schema.clone(), &used, &slots, first_row)?;

        tracing::debug!(
            "Output schema: [{}]",
            layout.schema().names().collect::<Vec<_>>().join(", ")
        );
        self.layout = Some(layout);
        Ok(())
    }

    fn sync_context(&self) {
        if let Ok(mut context) = self.context.write() {
            context.update_stats(self.stats);
        }
    }

    fn take_pending_rows(&self) -> Vec<Array> {
        self.context
            .write()
            .map(|mut c| c.take_pending_rows())
            .unwrap_or_default()
    }

    /// Execute the transform and extract everything the row produced
    #[allow(clippy::type_complexity)]
    fn transform(
        &mut self,
        row: &Row,
    ) -> Result<(ControlSignal, Vec<Row>, Option<Vec<Option<Value>>>)> {
        let executed = self.runtime.execute_row(row);
        let pending = self.take_pending_rows();
        executed?;

        let runtime = &self.runtime;
        let signal = self.control.interpret(|name| runtime.read_variable(name));

        let extra = pending
            .iter()
            .map(|values| self.queued_row(values))
            .collect::<Result<Vec<_>>>()?;

        let values = match signal {
            ControlSignal::Continue => Some(self.output_values()?),
            _ => None,
        };
        Ok((signal, extra, values))
    }

    fn output_values(&self) -> Result<Vec<Option<Value>>> {
        self.config
            .fields
            .iter()
            .map(|spec| {
                let value = self
                    .runtime
                    .read_variable(&spec.source_name)
                    .unwrap_or(ScriptValue::Undefined);
                if value == ScriptValue::Undefined {
                    tracing::trace!("Output field '{}' was never assigned", spec.source_name);
                }
                from_script(&value, spec.declared_type, spec.output_name())
            })
            .collect()
    }

    /// Convert a row queued by `put_row` to the output schema
    fn queued_row(&self, values: &Array) -> Result<Row> {
        let schema = self.layout_ref()?.schema();
        if values.len() != schema.len() {
            return Err(RowScriptError::RowExecution {
                row_nr: self.runtime.rows_executed(),
                message: format!(
                    "put_row expects {} values, got {}",
                    schema.len(),
                    values.len()
                ),
            });
        }
        schema
            .fields()
            .iter()
            .zip(values)
            .map(|(field, value)| {
                from_script(
                    &ScriptValue::from_dynamic(value),
                    field.semantic_type,
                    &field.name,
                )
            })
            .collect()
    }

    fn layout_ref(&self) -> Result<&OutputLayout> {
        self.layout
            .as_ref()
            .ok_or_else(|| RowScriptError::Config("Output layout not resolved".to_string()))
    }

    fn deliver<H: StepHost + ?Sized>(
        &mut self,
        host: &mut H,
        row: Row,
        signal: ControlSignal,
        extra: Vec<Row>,
        values: Option<Vec<Option<Value>>>,
    ) -> Result<RowOutcome> {
        let layout = self.layout_ref()?.clone();
        for queued in extra {
            host.emit_row(queued, layout.schema())?;
            self.stats.lines_written += 1;
        }

        match signal {
            ControlSignal::Continue => {
                let output = layout.materialize(row, values.unwrap_or_default());
                host.emit_row(output, layout.schema())?;
                self.stats.lines_written += 1;
                Ok(RowOutcome::Emitted)
            }
            ControlSignal::Skip => {
                self.stats.lines_skipped += 1;
                Ok(RowOutcome::Skipped)
            }
            ControlSignal::Abort => {
                tracing::info!(
                    "Step '{}' aborted by script on row {}",
                    self.config.step_name,
                    self.stats.lines_read
                );
                host.request_stop(true);
                Ok(RowOutcome::Aborted)
            }
            ControlSignal::Error => {
                tracing::error!(
                    "Step '{}' stopped with an error signal on row {}",
                    self.config.step_name,
                    self.stats.lines_read
                );
                self.stats.errors += 1;
                host.increment_errors();
                host.request_stop(false);
                Ok(RowOutcome::Failed)
            }
        }
    }

    fn redirect<H: StepHost + ?Sized>(
        &mut self,
        host: &mut H,
        row: Row,
        schema: &Arc<RowSchema>,
        error: RowScriptError,
    ) -> Result<RowOutcome> {
        tracing::warn!("Redirecting row {}: {}", self.stats.lines_read, error);
        let code = self.config.error_handling.error_code(error.code());
        host.report_row_error(row, schema, &code, &error.to_string())?;
        self.stats.lines_rejected += 1;

        if self.config.error_handling.limit_exceeded(self.stats.lines_rejected) {
            return Err(error.with_context(format!(
                "More than {} rows redirected",
                self.config.error_handling.max_errors.unwrap_or_default()
            )));
        }
        Ok(RowOutcome::Redirected)
    }

    fn fail<H: StepHost + ?Sized>(&mut self, host: &mut H, error: &RowScriptError) {
        tracing::error!(
            "Step '{}' copy {} failed: {}",
            self.config.step_name,
            self.copy_nr,
            error
        );
        self.stats.errors += 1;
        host.increment_errors();
        host.request_stop(false);
    }
}

/// Input columns to bind and output variables to declare for `schema`
pub(crate) fn binding_plan(
    config: &StageConfig,
    schema: &RowSchema,
) -> Result<(UsedFieldIndex, Vec<String>)> {
    let transform = config
        .scripts
        .transform()
        .ok_or_else(|| RowScriptError::Config("No transform script defined".to_string()))?;

    let mut used = analyze(&transform.source, schema);
    // Outputs named after input columns keep their input value when the
    // script leaves them alone
    used.extend(
        config
            .fields
            .iter()
            .filter_map(|spec| schema.index_of(&spec.source_name)),
    );

    let slots = config
        .fields
        .iter()
        .map(|spec| spec.source_name.clone())
        .collect();
    Ok((used, slots))
}

impl std::fmt::Debug for RowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStage")
            .field("step_name", &self.config.step_name)
            .field("copy_nr", &self.copy_nr)
            .field("runtime", &self.runtime)
            .field("stats", &self.stats)
            .finish()
    }
}
