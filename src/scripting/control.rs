//! Control signals set by the transform script
//!
//! A script steers the pipeline by assigning one of the published constants
//! to the status variable (`trans_Status` unless configured otherwise):
//!
//! ```rhai
//! let trans_Status = CONTINUE_TRANSFORMATION;
//! if amount < 0 { trans_Status = SKIP_TRANSFORMATION; }
//! ```
//!
//! Whether the variable exists is decided once, after the first row. Scripts
//! that never declare it always continue.

use crate::scripting::value::ScriptValue;
use std::collections::HashSet;

pub const CONTINUE_TRANSFORMATION: i64 = 0;
pub const SKIP_TRANSFORMATION: i64 = 1;
pub const ABORT_TRANSFORMATION: i64 = -1;
pub const ERROR_TRANSFORMATION: i64 = -2;

/// Names and values of the constants published into every scope
pub const CONTROL_CONSTANTS: [(&str, i64); 4] = [
    ("CONTINUE_TRANSFORMATION", CONTINUE_TRANSFORMATION),
    ("SKIP_TRANSFORMATION", SKIP_TRANSFORMATION),
    ("ABORT_TRANSFORMATION", ABORT_TRANSFORMATION),
    ("ERROR_TRANSFORMATION", ERROR_TRANSFORMATION),
];

/// What happens to the current row and the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlSignal {
    /// Emit the row
    #[default]
    Continue,
    /// Drop the row
    Skip,
    /// Stop the run gracefully
    Abort,
    /// Stop the run as failed
    Error,
}

impl ControlSignal {
    /// Map a status code, `None` for unknown codes
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            CONTINUE_TRANSFORMATION => Some(ControlSignal::Continue),
            SKIP_TRANSFORMATION => Some(ControlSignal::Skip),
            ABORT_TRANSFORMATION => Some(ControlSignal::Abort),
            ERROR_TRANSFORMATION => Some(ControlSignal::Error),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            ControlSignal::Continue => CONTINUE_TRANSFORMATION,
            ControlSignal::Skip => SKIP_TRANSFORMATION,
            ControlSignal::Abort => ABORT_TRANSFORMATION,
            ControlSignal::Error => ERROR_TRANSFORMATION,
        }
    }

    /// Whether the run stops after this row
    pub fn stops_run(&self) -> bool {
        matches!(self, ControlSignal::Abort | ControlSignal::Error)
    }
}

/// Reads the status variable after each transform execution
#[derive(Debug, Clone)]
pub struct ControlSignalInterpreter {
    variable: String,
    /// `None` until the first row was interpreted
    present: Option<bool>,
    warned: HashSet<String>,
}

impl ControlSignalInterpreter {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            present: None,
            warned: HashSet::new(),
        }
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Result of the first-row probe, `None` before the first row
    pub fn status_present(&self) -> Option<bool> {
        self.present
    }

    /// Decide the signal for the row that just executed
    ///
    /// `read` looks the status variable up in the script scope. It is called
    /// on the first row, and afterwards only if that first lookup found it.
    pub fn interpret<F>(&mut self, read: F) -> ControlSignal
    where
        F: FnOnce(&str) -> Option<ScriptValue>,
    {
        match self.present {
            Some(false) => ControlSignal::Continue,
            Some(true) => match read(&self.variable) {
                Some(value) => self.map_value(&value),
                None => ControlSignal::Continue,
            },
            None => {
                let value = read(&self.variable);
                self.present = Some(value.is_some());
                tracing::debug!(
                    "Status variable '{}' {}",
                    self.variable,
                    if value.is_some() { "found" } else { "not used" }
                );
                value.map_or(ControlSignal::Continue, |v| self.map_value(&v))
            }
        }
    }

    fn map_value(&mut self, value: &ScriptValue) -> ControlSignal {
        let code = match value {
            ScriptValue::Null | ScriptValue::Undefined => return ControlSignal::Continue,
            ScriptValue::Int(i) => Some(*i),
            ScriptValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        };

        match code.and_then(ControlSignal::from_code) {
            Some(signal) => signal,
            None => {
                let key = match code {
                    Some(c) => format!("code {}", c),
                    None => value.kind().to_string(),
                };
                if self.warned.insert(key.clone()) {
                    tracing::warn!(
                        "Unknown value ({}) in status variable '{}', continuing",
                        key,
                        self.variable
                    );
                }
                ControlSignal::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        for (_, code) in CONTROL_CONSTANTS {
            assert_eq!(ControlSignal::from_code(code).unwrap().code(), code);
        }
        assert!(ControlSignal::from_code(7).is_none());
        assert!(ControlSignal::Abort.stops_run());
        assert!(!ControlSignal::Skip.stops_run());
    }

    #[test]
    fn test_absent_variable_always_continues() {
        let mut interpreter = ControlSignalInterpreter::new("trans_Status");
        assert_eq!(interpreter.interpret(|_| None), ControlSignal::Continue);
        assert_eq!(interpreter.status_present(), Some(false));

        // A later appearance is ignored once the probe said absent
        let signal = interpreter.interpret(|_| Some(ScriptValue::Int(SKIP_TRANSFORMATION)));
        assert_eq!(signal, ControlSignal::Continue);
    }

    #[test]
    fn test_probe_reads_only_once_when_absent() {
        let mut interpreter = ControlSignalInterpreter::new("trans_Status");
        let mut calls = 0;
        for _ in 0..5 {
            interpreter.interpret(|_| {
                calls += 1;
                None
            });
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_present_variable_is_read_each_row() {
        let mut interpreter = ControlSignalInterpreter::new("status");
        let rows = [
            ScriptValue::Int(0),
            ScriptValue::Int(1),
            ScriptValue::Float(-1.0),
            ScriptValue::Int(-2),
            ScriptValue::Null,
        ];
        let signals: Vec<_> = rows
            .into_iter()
            .map(|v| {
                interpreter.interpret(|name| {
                    assert_eq!(name, "status");
                    Some(v)
                })
            })
            .collect();
        assert_eq!(
            signals,
            vec![
                ControlSignal::Continue,
                ControlSignal::Skip,
                ControlSignal::Abort,
                ControlSignal::Error,
                ControlSignal::Continue
            ]
        );
    }

    #[test]
    fn test_unknown_values_continue() {
        let mut interpreter = ControlSignalInterpreter::new("trans_Status");
        assert_eq!(
            interpreter.interpret(|_| Some(ScriptValue::Int(42))),
            ControlSignal::Continue
        );
        assert_eq!(
            interpreter.interpret(|_| Some(ScriptValue::Str("skip".into()))),
            ControlSignal::Continue
        );
        assert_eq!(
            interpreter.interpret(|_| Some(ScriptValue::Float(1.5))),
            ControlSignal::Continue
        );
        assert_eq!(interpreter.warned.len(), 3);
    }
}
