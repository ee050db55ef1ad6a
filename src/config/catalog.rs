//! Script fragments and output field declarations of a script step
//!
//! A step carries an ordered list of named fragments. Exactly one fragment is
//! the per-row transform; optional start and end fragments run once before the
//! first row and after the last one.

use crate::error::{Result, RowScriptError};
use crate::types::SemanticType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Role of a script fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ScriptRole {
    /// Executed once per row
    #[default]
    #[serde(alias = "transform")]
    Transform,
    /// Executed once before the first row
    #[serde(alias = "start")]
    Start,
    /// Executed once after the last row
    #[serde(alias = "end")]
    End,
    /// Library code: its functions are merged into the start, transform and
    /// end scripts, and its source is published by name
    #[serde(alias = "normal", alias = "library")]
    Normal,
}

impl std::fmt::Display for ScriptRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptRole::Transform => write!(f, "transform"),
            ScriptRole::Start => write!(f, "start"),
            ScriptRole::End => write!(f, "end"),
            ScriptRole::Normal => write!(f, "normal"),
        }
    }
}

/// A named piece of script text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptFragment {
    pub name: String,
    #[serde(default)]
    pub role: ScriptRole,
    pub source: String,
}

impl ScriptFragment {
    pub fn new(name: impl Into<String>, role: ScriptRole, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            source: source.into(),
        }
    }

    pub fn transform(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(name, ScriptRole::Transform, source)
    }

    pub fn start(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(name, ScriptRole::Start, source)
    }

    pub fn end(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(name, ScriptRole::End, source)
    }
}

/// Ordered collection of script fragments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptCatalog {
    fragments: Vec<ScriptFragment>,
}

impl ScriptCatalog {
    pub fn new(fragments: Vec<ScriptFragment>) -> Self {
        Self { fragments }
    }

    pub fn push(&mut self, fragment: ScriptFragment) {
        self.fragments.push(fragment);
    }

    pub fn fragments(&self) -> &[ScriptFragment] {
        &self.fragments
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Look up a fragment by name
    pub fn get(&self, name: &str) -> Option<&ScriptFragment> {
        self.fragments.iter().find(|f| f.name == name)
    }

    /// First fragment with the given role
    pub fn by_role(&self, role: ScriptRole) -> Option<&ScriptFragment> {
        self.fragments.iter().find(|f| f.role == role)
    }

    pub fn transform(&self) -> Option<&ScriptFragment> {
        self.by_role(ScriptRole::Transform)
    }

    pub fn start(&self) -> Option<&ScriptFragment> {
        self.by_role(ScriptRole::Start)
    }

    pub fn end(&self) -> Option<&ScriptFragment> {
        self.by_role(ScriptRole::End)
    }

    /// Check fragment names are unique and each lifecycle role appears at most
    /// once, with exactly one transform.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for fragment in &self.fragments {
            if fragment.name.trim().is_empty() {
                return Err(RowScriptError::Config(
                    "Script fragment with an empty name".to_string(),
                ));
            }
            if !names.insert(fragment.name.as_str()) {
                return Err(RowScriptError::Config(format!(
                    "Duplicate script fragment name '{}'",
                    fragment.name
                )));
            }
        }

        for role in [ScriptRole::Transform, ScriptRole::Start, ScriptRole::End] {
            let count = self.fragments.iter().filter(|f| f.role == role).count();
            if count > 1 {
                return Err(RowScriptError::Config(format!(
                    "Only one {} script is allowed, found {}",
                    role, count
                )));
            }
        }

        if self.transform().is_none() {
            return Err(RowScriptError::Config(
                "No transform script defined".to_string(),
            ));
        }
        Ok(())
    }
}

/// Declaration of one output column produced by the script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFieldSpec {
    /// Script variable holding the value
    pub source_name: String,
    /// Column name when different from `source_name`
    #[serde(default)]
    pub target_name: String,
    /// Type the value is coerced to
    #[serde(rename = "type")]
    pub declared_type: SemanticType,
    #[serde(default = "default_unspecified")]
    pub length: i32,
    #[serde(default = "default_unspecified")]
    pub precision: i32,
    /// Overwrite an existing input column instead of appending
    #[serde(default)]
    pub replace_existing: bool,
}

fn default_unspecified() -> i32 {
    -1
}

impl OutputFieldSpec {
    /// Append a new column named after the script variable
    pub fn new(source_name: impl Into<String>, declared_type: SemanticType) -> Self {
        Self {
            source_name: source_name.into(),
            target_name: String::new(),
            declared_type,
            length: -1,
            precision: -1,
            replace_existing: false,
        }
    }

    pub fn renamed(mut self, target_name: impl Into<String>) -> Self {
        self.target_name = target_name.into();
        self
    }

    pub fn replacing(mut self) -> Self {
        self.replace_existing = true;
        self
    }

    pub fn with_length(mut self, length: i32, precision: i32) -> Self {
        self.length = length;
        self.precision = precision;
        self
    }

    /// Name of the produced column: the rename when given, else the source
    pub fn output_name(&self) -> &str {
        if self.target_name.trim().is_empty() {
            &self.source_name
        } else {
            &self.target_name
        }
    }
}
