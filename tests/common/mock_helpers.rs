//! In-memory host and channel helpers

use rowscript::error::Result;
use rowscript::pipeline::StepHost;
use rowscript::types::{Row, RowSchema};
use std::collections::VecDeque;
use std::sync::Arc;

/// A redirected row as seen by [`MemoryHost`]
#[derive(Debug, Clone)]
pub struct RejectedRow {
    pub row: Row,
    pub code: String,
    pub message: String,
}

/// [`StepHost`] backed by vectors
#[derive(Debug, Default)]
pub struct MemoryHost {
    input: VecDeque<(Row, Arc<RowSchema>)>,
    pub emitted: Vec<Row>,
    pub output_schema: Option<Arc<RowSchema>>,
    pub rejected: Vec<RejectedRow>,
    pub stop: Option<bool>,
    pub errors: u64,
}

impl MemoryHost {
    pub fn new(schema: Arc<RowSchema>, rows: impl IntoIterator<Item = Row>) -> Self {
        Self {
            input: rows.into_iter().map(|r| (r, schema.clone())).collect(),
            ..Default::default()
        }
    }

    /// Rows not pulled by the step
    pub fn remaining(&self) -> usize {
        self.input.len()
    }
}

impl StepHost for MemoryHost {
    fn next_row(&mut self) -> Result<Option<(Row, Arc<RowSchema>)>> {
        Ok(self.input.pop_front())
    }

    fn emit_row(&mut self, row: Row, schema: &Arc<RowSchema>) -> Result<()> {
        self.output_schema = Some(schema.clone());
        self.emitted.push(row);
        Ok(())
    }

    fn report_row_error(
        &mut self,
        row: Row,
        _schema: &Arc<RowSchema>,
        code: &str,
        message: &str,
    ) -> Result<()> {
        self.rejected.push(RejectedRow {
            row,
            code: code.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    fn request_stop(&mut self, graceful: bool) {
        // A failure is never downgraded to a graceful stop
        self.stop = Some(self.stop.map_or(graceful, |g| g && graceful));
    }

    fn increment_errors(&mut self) {
        self.errors += 1;
    }

    fn is_stopped(&self) -> bool {
        self.stop.is_some()
    }
}
