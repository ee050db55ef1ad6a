//! Error handling for rowscript
//!
//! This module defines the error taxonomy of a script step and a Result alias
//! for use throughout the crate.

use thiserror::Error;

/// Main error type for rowscript operations
#[derive(Error, Debug)]
pub enum RowScriptError {
    /// Invalid step definition (bad output field spec, missing transform, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A script fragment failed to compile
    #[error("Compile error in script '{fragment}': {message}")]
    Compile { fragment: String, message: String },

    /// The start script raised while running
    #[error("Start script error: {0}")]
    StartScript(String),

    /// The transform script raised on a specific row
    #[error("Script error on row {row_nr}: {message}")]
    RowExecution { row_nr: u64, message: String },

    /// A script result could not be converted to the declared output type
    #[error("Type conversion error for field '{field}': {message}")]
    TypeConversion { field: String, message: String },

    /// The end script raised while running
    #[error("End script error: {0}")]
    EndScript(String),

    /// Errors reported by the surrounding pipeline (closed channels, ...)
    #[error("Host error: {0}")]
    Host(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RowScriptError>,
    },
}

impl RowScriptError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        RowScriptError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a row execution error from a Rhai error
    pub fn from_rhai_error(row_nr: u64, err: Box<rhai::EvalAltResult>) -> Self {
        RowScriptError::RowExecution {
            row_nr,
            message: err.to_string(),
        }
    }

    /// Whether the error may be redirected to the row-error channel instead of
    /// stopping the step.
    pub fn is_row_level(&self) -> bool {
        match self {
            RowScriptError::RowExecution { .. } | RowScriptError::TypeConversion { .. } => true,
            RowScriptError::WithContext { source, .. } => source.is_row_level(),
            _ => false,
        }
    }

    /// Short error code reported alongside redirected rows
    pub fn code(&self) -> &'static str {
        match self {
            RowScriptError::Config(_) => "CONFIG",
            RowScriptError::Compile { .. } => "COMPILE",
            RowScriptError::StartScript(_) => "START",
            RowScriptError::RowExecution { .. } => "SCRIPT",
            RowScriptError::TypeConversion { .. } => "CONVERSION",
            RowScriptError::EndScript(_) => "END",
            RowScriptError::Host(_) => "HOST",
            RowScriptError::Io(_) => "IO",
            RowScriptError::Serialization(_) => "SERIALIZATION",
            RowScriptError::WithContext { source, .. } => source.code(),
        }
    }
}

/// Result type alias for rowscript operations
pub type Result<T> = std::result::Result<T, RowScriptError>;
