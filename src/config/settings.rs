//! Engine and error-handling settings of a script step
//!
//! # Main Types
//!
//! - [`EngineSettings`] - Rhai optimization level and resource limits
//! - [`ErrorHandlingConfig`] - Row-level error redirection
//!
//! A limit of `0` means unlimited, matching Rhai's own convention.

use serde::{Deserialize, Serialize};

/// Script optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OptimizationSetting {
    /// No optimization
    #[serde(alias = "none")]
    None,
    /// Constant folding and dead code removal
    #[default]
    #[serde(alias = "simple")]
    Simple,
    /// Also evaluates pure function calls on constants at compile time
    #[serde(alias = "full")]
    Full,
}

impl From<OptimizationSetting> for rhai::OptimizationLevel {
    fn from(setting: OptimizationSetting) -> Self {
        match setting {
            OptimizationSetting::None => rhai::OptimizationLevel::None,
            OptimizationSetting::Simple => rhai::OptimizationLevel::Simple,
            OptimizationSetting::Full => rhai::OptimizationLevel::Full,
        }
    }
}

/// Rhai engine settings applied to every step instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub optimization_level: OptimizationSetting,

    /// Maximum operations per script execution (0 = unlimited)
    #[serde(default)]
    pub max_operations: u64,

    /// Maximum function call nesting
    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    /// Maximum expression nesting depth
    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,

    /// Maximum string length (0 = unlimited)
    #[serde(default)]
    pub max_string_size: usize,

    /// Maximum array length (0 = unlimited)
    #[serde(default)]
    pub max_array_size: usize,

    /// Maximum object map size (0 = unlimited)
    #[serde(default)]
    pub max_map_size: usize,
}

fn default_max_call_levels() -> usize {
    64
}

fn default_max_expr_depth() -> usize {
    128
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            optimization_level: OptimizationSetting::default(),
            max_operations: 0,
            max_call_levels: default_max_call_levels(),
            max_expr_depth: default_max_expr_depth(),
            max_string_size: 0,
            max_array_size: 0,
            max_map_size: 0,
        }
    }
}

/// Row-level error handling of a step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    /// Send failing rows to the error channel instead of stopping the step
    #[serde(default)]
    pub enabled: bool,

    /// Stop the step once more than this many rows were redirected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_errors: Option<u64>,

    /// Prepended to the error code of every redirected row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code_prefix: Option<String>,
}

impl ErrorHandlingConfig {
    /// Redirect rows with no upper bound
    pub fn redirect() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    /// Error code reported with a redirected row
    pub fn error_code(&self, code: &str) -> String {
        match &self.error_code_prefix {
            Some(prefix) => format!("{}{}", prefix, code),
            None => code.to_string(),
        }
    }

    /// Whether `rejected` redirected rows exceed the configured maximum
    pub fn limit_exceeded(&self, rejected: u64) -> bool {
        self.max_errors.is_some_and(|max| rejected > max)
    }
}
