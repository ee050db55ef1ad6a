//! Rhai scripting for row transforms
//!
//! Each step instance owns one engine and one persistent scope. Scripts see
//! the input row through plain variables named after the columns they
//! mention, and hand values back by assigning the variables declared as
//! output fields.
//!
//! ## Scope Contents
//!
//! - one variable per used input column, rebound every row
//! - `row` - the whole input row as an array
//! - `row_meta` - column metadata (`size()`, `index_of(name)`,
//!   `field_name(i)`, `field_type(i)`, `field_names()`)
//! - `_step_` - the owning step (`name()`, `copy_nr()`, `log(msg)`)
//! - `CONTINUE_TRANSFORMATION`, `SKIP_TRANSFORMATION`,
//!   `ABORT_TRANSFORMATION`, `ERROR_TRANSFORMATION`
//! - every script fragment's source text under the fragment name
//!
//! Output variables that do not name an input column start each row as
//! `undefined`; a column left undefined is written as null.
//!
//! ## Value Types
//!
//! Strings, integers, floats, booleans and blobs map to the native Rhai
//! types. Dates are `Date` objects (`d.year`, `d.month`, `d.day`,
//! `d.millis`, `date_add`, `date_diff`, `date2str`), big numbers are
//! `BigNumber` objects supporting arithmetic and comparison.
//!
//! ## Example Scripts
//!
//! Doubling a column into a new output field:
//! ```rhai
//! out = amount * 2.0;
//! ```
//!
//! Dropping rows and keeping a running total across rows (start script
//! declares `let total = 0.0;`):
//! ```rhai
//! let trans_Status = CONTINUE_TRANSFORMATION;
//! if amount == () { trans_Status = SKIP_TRANSFORMATION; }
//! else { total += amount; running = total; }
//! ```

pub mod analyzer;
pub mod coercer;
pub mod control;
mod engine;
mod helpers;
pub mod runtime;
pub mod value;

pub use analyzer::{analyze, UsedFieldIndex};
pub use control::{ControlSignal, ControlSignalInterpreter};
pub use engine::{
    RowMetaHandle, ScriptEngine, SharedStepContext, StepContext, StepHandle, SCRIPT_LOG_TARGET,
};
pub use runtime::{RuntimeState, ScriptRuntime};
pub use value::{BigNumber, ScriptDate, ScriptValue, Undefined};

use crate::config::{ScriptFragment, ScriptRole};
use rhai::AST;

/// A compiled script fragment
#[derive(Clone)]
pub struct CompiledScript {
    /// The compiled AST
    ast: AST,
    /// Fragment name
    name: String,
    /// Fragment role
    role: ScriptRole,
}

impl CompiledScript {
    pub(crate) fn new(ast: AST, fragment: &ScriptFragment) -> Self {
        Self {
            ast,
            name: fragment.name.clone(),
            role: fragment.role,
        }
    }

    pub fn ast(&self) -> &AST {
        &self.ast
    }

    /// Get the name of this script
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> ScriptRole {
        self.role
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("name", &self.name)
            .field("role", &self.role)
            .finish()
    }
}
