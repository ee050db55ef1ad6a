//! The row protocol between a script step and the pipeline around it
//!
//! A [`RowStage`](crate::pipeline::RowStage) pulls rows from a [`StepHost`]
//! and pushes results back to it. [`ChannelHost`] is the shipped
//! implementation: every step copy runs on its own thread and talks to the
//! driver over crossbeam channels, with one [`RunControl`] shared by all
//! copies of a run.

use crate::config::StageConfig;
use crate::error::{Result, RowScriptError};
use crate::pipeline::stage::{RowStage, StageReport};
use crate::types::{Row, RowSchema};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Channel capacity for rows handed to one step copy
const INPUT_CHANNEL_CAPACITY: usize = 1_000;
/// Channel capacity for results of all copies
pub const OUTPUT_CHANNEL_CAPACITY: usize = 10_000;
/// How often a blocked copy re-checks the stop flag
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Callbacks a script step needs from the surrounding pipeline
#[cfg_attr(test, mockall::automock)]
pub trait StepHost {
    /// Next input row with its schema, `None` at end of stream
    fn next_row(&mut self) -> Result<Option<(Row, Arc<RowSchema>)>>;

    /// Pass a row downstream
    fn emit_row(&mut self, row: Row, schema: &Arc<RowSchema>) -> Result<()>;

    /// Send a failed input row to the error channel
    fn report_row_error(
        &mut self,
        row: Row,
        schema: &Arc<RowSchema>,
        code: &str,
        message: &str,
    ) -> Result<()>;

    /// Stop the whole run; `graceful` distinguishes an abort from a failure
    fn request_stop(&mut self, graceful: bool);

    /// Count an error against the run
    fn increment_errors(&mut self);

    fn is_stopped(&self) -> bool;
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Termination {
    Completed = 0,
    Aborted = 1,
    Failed = 2,
}

impl Termination {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Termination::Completed,
            1 => Termination::Aborted,
            _ => Termination::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Termination::Completed
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Completed => write!(f, "completed"),
            Termination::Aborted => write!(f, "aborted"),
            Termination::Failed => write!(f, "failed"),
        }
    }
}

/// Run-wide stop flag, termination kind and error counter
#[derive(Debug, Default)]
pub struct RunControl {
    stopped: AtomicBool,
    termination: AtomicU8,
    errors: AtomicU64,
}

impl RunControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stop the run. A failure overrides an earlier graceful stop, never the
    /// other way around.
    pub fn request_stop(&self, graceful: bool) {
        let kind = if graceful {
            Termination::Aborted
        } else {
            Termination::Failed
        };
        self.termination.fetch_max(kind as u8, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn termination(&self) -> Termination {
        Termination::from_u8(self.termination.load(Ordering::SeqCst))
    }

    pub fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// An input row on its way to a step copy
pub type InputRow = (Row, Arc<RowSchema>);

/// Messages sent from step copies to the driver
#[derive(Debug, Clone)]
pub enum StageMessage {
    /// A row passed downstream
    Row {
        copy_nr: usize,
        row: Row,
        schema: Arc<RowSchema>,
    },

    /// A row redirected to the error channel
    RowError {
        copy_nr: usize,
        row: Row,
        schema: Arc<RowSchema>,
        code: String,
        message: String,
    },

    /// A copy has stopped; no further messages follow from it
    Finished(StageReport),
}

/// [`StepHost`] over crossbeam channels
pub struct ChannelHost {
    copy_nr: usize,
    input: Receiver<InputRow>,
    output: Sender<StageMessage>,
    control: Arc<RunControl>,
}

impl ChannelHost {
    pub fn new(
        copy_nr: usize,
        input: Receiver<InputRow>,
        output: Sender<StageMessage>,
        control: Arc<RunControl>,
    ) -> Self {
        Self {
            copy_nr,
            input,
            output,
            control,
        }
    }

    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    fn send(&self, message: StageMessage) -> Result<()> {
        self.output
            .send(message)
            .map_err(|_| RowScriptError::Host("Output channel closed".to_string()))
    }
}

impl StepHost for ChannelHost {
    fn next_row(&mut self) -> Result<Option<(Row, Arc<RowSchema>)>> {
        loop {
            match self.input.recv_timeout(STOP_POLL_INTERVAL) {
                Ok(input) => return Ok(Some(input)),
                Err(RecvTimeoutError::Timeout) => {
                    if self.control.is_stopped() {
                        return Ok(None);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }

    fn emit_row(&mut self, row: Row, schema: &Arc<RowSchema>) -> Result<()> {
        self.send(StageMessage::Row {
            copy_nr: self.copy_nr,
            row,
            schema: schema.clone(),
        })
    }

    fn report_row_error(
        &mut self,
        row: Row,
        schema: &Arc<RowSchema>,
        code: &str,
        message: &str,
    ) -> Result<()> {
        self.send(StageMessage::RowError {
            copy_nr: self.copy_nr,
            row,
            schema: schema.clone(),
            code: code.to_string(),
            message: message.to_string(),
        })
    }

    fn request_stop(&mut self, graceful: bool) {
        self.control.request_stop(graceful);
    }

    fn increment_errors(&mut self) {
        self.control.increment_errors();
    }

    fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }
}

/// Running copies of one script step
pub struct StageCopies {
    inputs: Vec<Sender<InputRow>>,
    handles: Vec<JoinHandle<()>>,
    control: Arc<RunControl>,
    next: usize,
}

impl StageCopies {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    /// Hand a row to the next copy in round-robin order
    ///
    /// Returns `false` once the run was stopped and no more rows are accepted.
    pub fn dispatch(&mut self, row: Row, schema: Arc<RowSchema>) -> bool {
        if self.control.is_stopped() || self.inputs.is_empty() {
            return false;
        }
        let index = self.next % self.inputs.len();
        self.next = self.next.wrapping_add(1);

        let mut pending = (row, schema);
        loop {
            match self.inputs[index].send_timeout(pending, STOP_POLL_INTERVAL) {
                Ok(()) => return true,
                Err(crossbeam_channel::SendTimeoutError::Timeout(back)) => {
                    if self.control.is_stopped() {
                        return false;
                    }
                    pending = back;
                }
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    /// Signal end of stream and wait for every copy to finish
    pub fn join(self) -> Result<Termination> {
        drop(self.inputs);
        for handle in self.handles {
            handle
                .join()
                .map_err(|_| RowScriptError::Host("Step copy thread panicked".to_string()))?;
        }
        Ok(self.control.termination())
    }
}

/// Start `copies` instances of a step, each on its own thread
///
/// Every copy sends its rows and finally a [`StageMessage::Finished`] report
/// to `output`.
pub fn spawn_stage_copies(
    config: Arc<StageConfig>,
    copies: usize,
    control: Arc<RunControl>,
    output: Sender<StageMessage>,
) -> Result<StageCopies> {
    config.validate()?;

    let copies = copies.max(1);
    let mut inputs = Vec::with_capacity(copies);
    let mut handles = Vec::with_capacity(copies);

    for copy_nr in 0..copies {
        let (tx, rx) = bounded(INPUT_CHANNEL_CAPACITY);
        let mut host = ChannelHost::new(copy_nr, rx, output.clone(), control.clone());
        let config = config.clone();

        let handle = std::thread::Builder::new()
            .name(format!("{}.{}", config.step_name, copy_nr))
            .spawn(move || {
                let report = match RowStage::new(config, copy_nr) {
                    Ok(mut stage) => stage.run(&mut host),
                    Err(e) => {
                        tracing::error!("Step copy {} failed to start: {}", copy_nr, e);
                        host.increment_errors();
                        host.request_stop(false);
                        StageReport::failed(copy_nr, e.to_string())
                    }
                };
                if host.send(StageMessage::Finished(report)).is_err() {
                    tracing::warn!("Step copy {} finished after the driver went away", copy_nr);
                }
            })?;

        inputs.push(tx);
        handles.push(handle);
    }

    tracing::info!("Started {} copies of step '{}'", copies, config.step_name);

    Ok(StageCopies {
        inputs,
        handles,
        control,
        next: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldDescriptor, SemanticType, Value};

    fn schema() -> Arc<RowSchema> {
        Arc::new(RowSchema::new(vec![FieldDescriptor::new(
            "n",
            SemanticType::Integer,
        )]))
    }

    #[test]
    fn test_failure_overrides_abort() {
        let control = RunControl::new();
        assert!(!control.is_stopped());
        assert_eq!(control.termination(), Termination::Completed);

        control.request_stop(true);
        assert!(control.is_stopped());
        assert_eq!(control.termination(), Termination::Aborted);

        control.request_stop(false);
        assert_eq!(control.termination(), Termination::Failed);

        control.request_stop(true);
        assert_eq!(control.termination(), Termination::Failed);
    }

    #[test]
    fn test_channel_host_end_of_stream() {
        let (tx, rx) = bounded(4);
        let (out_tx, out_rx) = bounded(4);
        let mut host = ChannelHost::new(0, rx, out_tx, RunControl::new());

        tx.send((vec![Some(Value::Integer(1))], schema())).unwrap();
        drop(tx);

        let (row, row_schema) = host.next_row().unwrap().unwrap();
        host.emit_row(row, &row_schema).unwrap();
        assert!(host.next_row().unwrap().is_none());

        match out_rx.try_recv().unwrap() {
            StageMessage::Row { copy_nr, row, .. } => {
                assert_eq!(copy_nr, 0);
                assert_eq!(row, vec![Some(Value::Integer(1))]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_channel_host_stops_while_waiting() {
        let (_tx, rx) = bounded::<InputRow>(4);
        let (out_tx, _out_rx) = bounded(4);
        let control = RunControl::new();
        let mut host = ChannelHost::new(0, rx, out_tx, control.clone());

        control.request_stop(true);
        assert!(host.is_stopped());
        assert!(host.next_row().unwrap().is_none());
    }

    #[test]
    fn test_emit_after_driver_dropped() {
        let (_tx, rx) = bounded::<InputRow>(1);
        let (out_tx, out_rx) = bounded(1);
        drop(out_rx);
        let mut host = ChannelHost::new(0, rx, out_tx, RunControl::new());
        let err = host.emit_row(Vec::new(), &schema()).unwrap_err();
        assert!(matches!(err, RowScriptError::Host(_)));
    }
}
