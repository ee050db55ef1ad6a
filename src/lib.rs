//! # rowscript: scripted row transforms
//!
//! A transform step for row-oriented pipelines. Every input row is bound into
//! a persistent [Rhai](https://rhai.rs) scope, a user script runs against it
//! and the values it assigns are written back as typed output columns.
//!
//! ## Architecture
//!
//! - **Config**: step definitions (script fragments, output fields, limits)
//!   loaded from TOML or JSON
//! - **Scripting**: field usage analysis, the per-instance script runtime,
//!   value coercion and control signals
//! - **Pipeline**: the row stage, its host protocol and a crossbeam-channel
//!   host running several copies on threads
//! - **Jsonl**: the row codec used by the command line runner
//!
//! ## Example
//!
//! ```ignore
//! use rowscript::{
//!     config::{OutputFieldSpec, StageConfig},
//!     pipeline::{spawn_stage_copies, RunControl, StageMessage},
//!     types::SemanticType,
//! };
//! use std::sync::Arc;
//!
//! let config = StageConfig::with_transform("double", "out = amount * 2.0;")
//!     .field(OutputFieldSpec::new("out", SemanticType::Number).renamed("doubled"));
//!
//! let (tx, rx) = crossbeam_channel::bounded(1024);
//! let mut copies = spawn_stage_copies(Arc::new(config), 2, RunControl::new(), tx)?;
//! copies.dispatch(row, schema);
//! let termination = copies.join()?;
//! ```

pub mod config;
pub mod error;
pub mod jsonl;
pub mod pipeline;
pub mod scripting;
pub mod types;

pub use config::{OutputFieldSpec, ScriptCatalog, ScriptFragment, ScriptRole, StageConfig};
pub use error::{Result, RowScriptError};
pub use pipeline::{check_stage, RowStage, StageOutcome, StageReport, StepHost, Termination};
pub use types::{FieldDescriptor, Row, RowSchema, SemanticType, StepStats, Value};
