//! Core data types for rowscript
//!
//! This module contains the fundamental data structures shared by the
//! scripting runtime and the pipeline glue.
//!
//! # Main Types
//!
//! - [`SemanticType`] - The strict column types a row may carry
//! - [`FieldDescriptor`] / [`RowSchema`] - Ordered column metadata
//! - [`Value`] / [`Row`] - Positional row values, `None` meaning null
//! - [`StepStats`] - Per-instance row counters
//!
//! # Dates
//!
//! Dates are stored as milliseconds since the Unix epoch and interpreted as
//! naive UTC timestamps. Formatting and parsing helpers live on [`Value`].

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default textual format used when a date is rendered as a string
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Semantic type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SemanticType {
    /// UTF-8 text
    #[default]
    String,
    /// 64-bit signed integer
    Integer,
    /// 64-bit floating point
    Number,
    /// Timestamp in epoch milliseconds
    Date,
    /// Boolean value
    Boolean,
    /// Raw bytes
    Binary,
    /// Arbitrary precision decimal
    BigNumber,
}

impl SemanticType {
    /// All supported semantic types
    pub const ALL: [SemanticType; 7] = [
        SemanticType::String,
        SemanticType::Integer,
        SemanticType::Number,
        SemanticType::Date,
        SemanticType::Boolean,
        SemanticType::Binary,
        SemanticType::BigNumber,
    ];

    /// Human readable name, also used for `row_meta.field_type(i)` in scripts
    pub fn name(&self) -> &'static str {
        match self {
            SemanticType::String => "String",
            SemanticType::Integer => "Integer",
            SemanticType::Number => "Number",
            SemanticType::Date => "Date",
            SemanticType::Boolean => "Boolean",
            SemanticType::Binary => "Binary",
            SemanticType::BigNumber => "BigNumber",
        }
    }

    /// Parse a type name, case-insensitively
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Whether the type is numeric
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SemanticType::Integer | SemanticType::Number | SemanticType::BigNumber
        )
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Metadata of a single column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Column name, unique within a schema
    pub name: String,
    /// Column type
    #[serde(rename = "type", default)]
    pub semantic_type: SemanticType,
    /// Display length, -1 when unspecified
    #[serde(default = "default_unspecified")]
    pub length: i32,
    /// Display precision, -1 when unspecified
    #[serde(default = "default_unspecified")]
    pub precision: i32,
    /// Name of the step that produced this column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

fn default_unspecified() -> i32 {
    -1
}

impl FieldDescriptor {
    /// Create a descriptor with unspecified length and precision
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            length: -1,
            precision: -1,
            origin: None,
        }
    }

    /// Builder-style length/precision setter
    pub fn with_length(mut self, length: i32, precision: i32) -> Self {
        self.length = length;
        self.precision = precision;
        self
    }

    /// Builder-style origin setter
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// Ordered column metadata of a row stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowSchema {
    fields: Vec<FieldDescriptor>,
}

impl RowSchema {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    /// Position of a column by exact name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn push(&mut self, field: FieldDescriptor) {
        self.fields.push(field);
    }

    pub(crate) fn field_mut(&mut self, index: usize) -> Option<&mut FieldDescriptor> {
        self.fields.get_mut(index)
    }

    /// Column names in schema order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

impl FromIterator<FieldDescriptor> for RowSchema {
    fn from_iter<I: IntoIterator<Item = FieldDescriptor>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// A strictly typed, non-null host value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Integer(i64),
    Number(f64),
    /// Epoch milliseconds, naive UTC
    Date(i64),
    Boolean(bool),
    Binary(Vec<u8>),
    BigNumber(BigDecimal),
}

impl Value {
    /// The semantic type this value naturally belongs to
    pub fn semantic_type(&self) -> SemanticType {
        match self {
            Value::String(_) => SemanticType::String,
            Value::Integer(_) => SemanticType::Integer,
            Value::Number(_) => SemanticType::Number,
            Value::Date(_) => SemanticType::Date,
            Value::Boolean(_) => SemanticType::Boolean,
            Value::Binary(_) => SemanticType::Binary,
            Value::BigNumber(_) => SemanticType::BigNumber,
        }
    }

    /// Build a date value from a naive timestamp
    pub fn date_from_naive(ts: NaiveDateTime) -> Self {
        Value::Date(ts.and_utc().timestamp_millis())
    }

    /// Parse a date using [`DATE_FORMAT`], a plain `YYYY-MM-DD`, or RFC 3339
    pub fn parse_date(text: &str) -> Option<i64> {
        let text = text.trim();
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, DATE_FORMAT) {
            return Some(ts.and_utc().timestamp_millis());
        }
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
            return Some(ts.and_utc().timestamp_millis());
        }
        if let Ok(day) = chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return day
                .and_hms_opt(0, 0, 0)
                .map(|ts| ts.and_utc().timestamp_millis());
        }
        DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|ts| ts.timestamp_millis())
    }

    /// Render epoch millis with [`DATE_FORMAT`]
    pub fn format_date(millis: i64) -> String {
        match DateTime::from_timestamp_millis(millis) {
            Some(ts) => ts.naive_utc().format(DATE_FORMAT).to_string(),
            None => millis.to_string(),
        }
    }

    /// Parse a decimal from text
    pub fn parse_big_number(text: &str) -> Option<BigDecimal> {
        BigDecimal::from_str(text.trim()).ok()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", n),
            Value::Date(ms) => f.write_str(&Value::format_date(*ms)),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::BigNumber(d) => write!(f, "{}", d),
        }
    }
}

/// A positional row; `None` is null regardless of the column type
pub type Row = Vec<Option<Value>>;

/// Row counters kept by one step instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStats {
    /// Rows pulled from the host
    pub lines_read: u64,
    /// Rows emitted downstream (including rows queued by `put_row`)
    pub lines_written: u64,
    /// Rows dropped by a SKIP signal
    pub lines_skipped: u64,
    /// Rows sent to the error channel
    pub lines_rejected: u64,
    /// Errors counted against the step
    pub errors: u64,
}

impl StepStats {
    /// Merge counters of several step copies
    pub fn merge(&mut self, other: &StepStats) {
        self.lines_read += other.lines_read;
        self.lines_written += other.lines_written;
        self.lines_skipped += other.lines_skipped;
        self.lines_rejected += other.lines_rejected;
        self.errors += other.errors;
    }
}
