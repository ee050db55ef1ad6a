//! Row pipeline around the scripting layer
//!
//! A script step sits between an upstream producer and a downstream consumer
//! and only ever sees them through the [`StepHost`] trait.
//!
//! # Architecture
//!
//! ```text
//! [driver] ──rows──► [ChannelHost] ◄──► [RowStage] ──► [ScriptRuntime]
//!    ▲                                      │
//!    └────────── StageMessage ◄─────────────┘
//! ```
//!
//! # Design
//!
//! - **One thread per copy**: every step copy owns its engine and scope.
//! - **Shared run control**: copies only share the stop flag, termination
//!   kind and error counter in [`RunControl`].
//! - **Lazy layout**: the output schema is resolved from the first row.

pub mod check;
pub mod host;
pub mod layout;
pub mod stage;

pub use check::{check_stage, CheckRemark, CheckSeverity};
pub use host::{
    spawn_stage_copies, ChannelHost, InputRow, RunControl, StageCopies, StageMessage, StepHost,
    Termination, OUTPUT_CHANNEL_CAPACITY,
};
pub use layout::{OutputLayout, OutputTarget};
pub use stage::{RowOutcome, RowStage, StageOutcome, StageReport};
