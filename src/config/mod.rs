//! Step configuration for rowscript
//!
//! A [`StageConfig`] is the materialized definition of one script step: its
//! script fragments, the output columns the script produces, error handling
//! and engine limits. It is created once, validated, and shared read-only
//! between step copies as `Arc<StageConfig>`.
//!
//! Definitions are stored as TOML or JSON, chosen by file extension:
//!
//! ```toml
//! step_name = "double amount"
//!
//! [[scripts]]
//! name = "main"
//! role = "Transform"
//! source = "out = amount * 2;"
//!
//! [[fields]]
//! source_name = "out"
//! target_name = "doubled"
//! type = "Number"
//! ```

mod catalog;
mod settings;

pub use catalog::{OutputFieldSpec, ScriptCatalog, ScriptFragment, ScriptRole};
pub use settings::{EngineSettings, ErrorHandlingConfig, OptimizationSetting};

use crate::error::{Result, RowScriptError};
use crate::types::{FieldDescriptor, RowSchema};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Default name of the script variable carrying the control signal
pub const DEFAULT_STATUS_VARIABLE: &str = "trans_Status";

// ==================== Stage Config ====================

/// Definition of one script step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Step name, reported in logs and through `get_step_name()`
    #[serde(default = "default_step_name")]
    pub step_name: String,

    /// Script variable probed for a control signal after the first row
    #[serde(default = "default_status_variable")]
    pub status_variable: String,

    /// Script fragments
    #[serde(default)]
    pub scripts: ScriptCatalog,

    /// Output columns produced by the transform
    #[serde(default)]
    pub fields: Vec<OutputFieldSpec>,

    /// Declared input columns, used when the step reads rows itself
    #[serde(default)]
    pub input_fields: Vec<FieldDescriptor>,

    /// Initial values of the step variable space
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,

    #[serde(default)]
    pub engine: EngineSettings,
}

fn default_step_name() -> String {
    "script".to_string()
}

fn default_status_variable() -> String {
    DEFAULT_STATUS_VARIABLE.to_string()
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            step_name: default_step_name(),
            status_variable: default_status_variable(),
            scripts: ScriptCatalog::default(),
            fields: Vec::new(),
            input_fields: Vec::new(),
            variables: BTreeMap::new(),
            error_handling: ErrorHandlingConfig::default(),
            engine: EngineSettings::default(),
        }
    }
}

impl StageConfig {
    /// Create a step with a single transform fragment
    pub fn with_transform(step_name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            scripts: ScriptCatalog::new(vec![ScriptFragment::transform("transform", source)]),
            ..Default::default()
        }
    }

    /// Builder-style output field adder
    pub fn field(mut self, spec: OutputFieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Builder-style fragment adder
    pub fn script(mut self, fragment: ScriptFragment) -> Self {
        self.scripts.push(fragment);
        self
    }

    /// Declared input schema
    pub fn input_schema(&self) -> RowSchema {
        self.input_fields.iter().cloned().collect()
    }

    /// Validate the definition before any row is processed
    pub fn validate(&self) -> Result<()> {
        self.scripts.validate()?;

        if self.status_variable.trim().is_empty() {
            return Err(RowScriptError::Config(
                "Status variable name must not be empty".to_string(),
            ));
        }

        let mut appended = HashSet::new();
        for (i, spec) in self.fields.iter().enumerate() {
            if spec.source_name.trim().is_empty() {
                return Err(RowScriptError::Config(format!(
                    "Output field #{} has an empty source name",
                    i + 1
                )));
            }
            if !spec.replace_existing && !appended.insert(spec.output_name()) {
                return Err(RowScriptError::Config(format!(
                    "Output field '{}' is declared more than once",
                    spec.output_name()
                )));
            }
        }

        let mut inputs = HashSet::new();
        for field in &self.input_fields {
            if !inputs.insert(field.name.as_str()) {
                return Err(RowScriptError::Config(format!(
                    "Input field '{}' is declared more than once",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Load a definition from a `.toml` or `.json` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RowScriptError::Config(format!("Failed to read step file {:?}: {}", path, e))
        })?;

        if is_toml(path) {
            toml::from_str(&content).map_err(|e| {
                RowScriptError::Config(format!("Failed to parse step file {:?}: {}", path, e))
            })
        } else {
            serde_json::from_str(&content).map_err(|e| {
                RowScriptError::Config(format!("Failed to parse step file {:?}: {}", path, e))
            })
        }
    }

    /// Save the definition, format chosen by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RowScriptError::Config(format!("Failed to create step directory: {}", e))
                })?;
            }
        }

        let content = if is_toml(path) {
            toml::to_string_pretty(self)
                .map_err(|e| RowScriptError::Serialization(format!("{}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| RowScriptError::Serialization(format!("{}", e)))?
        };

        std::fs::write(path, content).map_err(|e| {
            RowScriptError::Config(format!("Failed to write step file {:?}: {}", path, e))
        })
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"))
}
