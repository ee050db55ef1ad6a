//! Script-side value representation
//!
//! [`ScriptValue`] is the single place where a Rhai [`Dynamic`] is unwrapped
//! into something the rest of the crate can reason about. The custom script
//! types ([`ScriptDate`], [`BigNumber`], [`Undefined`]) are registered with
//! the engine in `engine.rs`.

use crate::types::Value;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};
use rhai::{Blob, Dynamic};
use std::fmt;

/// Marker for a variable that exists but was never assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Undefined;

impl fmt::Display for Undefined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("undefined")
    }
}

/// A date inside scripts, stored as epoch milliseconds (naive UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScriptDate {
    millis: i64,
}

impl ScriptDate {
    pub fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    /// Naive UTC timestamp, `None` when out of chrono's range
    pub fn naive(&self) -> Option<NaiveDateTime> {
        DateTime::from_timestamp_millis(self.millis).map(|ts| ts.naive_utc())
    }

    pub fn from_naive(ts: NaiveDateTime) -> Self {
        Self::from_millis(ts.and_utc().timestamp_millis())
    }

    pub fn year(&self) -> i64 {
        self.naive().map(|ts| ts.year() as i64).unwrap_or(0)
    }

    pub fn month(&self) -> i64 {
        self.naive().map(|ts| ts.month() as i64).unwrap_or(0)
    }

    pub fn day(&self) -> i64 {
        self.naive().map(|ts| ts.day() as i64).unwrap_or(0)
    }

    pub fn hour(&self) -> i64 {
        self.naive().map(|ts| ts.hour() as i64).unwrap_or(0)
    }

    pub fn minute(&self) -> i64 {
        self.naive().map(|ts| ts.minute() as i64).unwrap_or(0)
    }

    pub fn second(&self) -> i64 {
        self.naive().map(|ts| ts.second() as i64).unwrap_or(0)
    }
}

impl fmt::Display for ScriptDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Value::format_date(self.millis))
    }
}

/// Arbitrary precision decimal inside scripts
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BigNumber(pub BigDecimal);

impl fmt::Display for BigNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A script result, classified
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    /// `()`
    Null,
    /// A declared slot the script never assigned
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    DateMillis(i64),
    Decimal(BigDecimal),
    /// Anything else (arrays, maps, user objects), kept as text
    Opaque { type_name: String, text: String },
}

impl ScriptValue {
    /// Classify a Rhai value
    pub fn from_dynamic(value: &Dynamic) -> Self {
        if value.is_unit() {
            return ScriptValue::Null;
        }
        if value.is::<Undefined>() {
            return ScriptValue::Undefined;
        }
        if let Ok(b) = value.as_bool() {
            return ScriptValue::Bool(b);
        }
        if let Ok(i) = value.as_int() {
            return ScriptValue::Int(i);
        }
        if let Ok(f) = value.as_float() {
            return ScriptValue::Float(f);
        }
        if let Ok(c) = value.as_char() {
            return ScriptValue::Str(c.to_string());
        }
        if let Ok(s) = value.clone().into_string() {
            return ScriptValue::Str(s);
        }
        if let Some(bytes) = value.clone().try_cast::<Blob>() {
            return ScriptValue::Bytes(bytes);
        }
        if let Some(date) = value.clone().try_cast::<ScriptDate>() {
            return ScriptValue::DateMillis(date.millis());
        }
        if let Some(number) = value.clone().try_cast::<BigNumber>() {
            return ScriptValue::Decimal(number.0);
        }
        ScriptValue::Opaque {
            type_name: value.type_name().to_string(),
            text: value.to_string(),
        }
    }

    /// Short description used in conversion error messages
    pub fn kind(&self) -> &str {
        match self {
            ScriptValue::Null => "null",
            ScriptValue::Undefined => "undefined",
            ScriptValue::Bool(_) => "bool",
            ScriptValue::Int(_) => "int",
            ScriptValue::Float(_) => "float",
            ScriptValue::Str(_) => "string",
            ScriptValue::Bytes(_) => "blob",
            ScriptValue::DateMillis(_) => "date",
            ScriptValue::Decimal(_) => "big number",
            ScriptValue::Opaque { type_name, .. } => type_name,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, ScriptValue::Null | ScriptValue::Undefined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_classify_primitives() {
        assert_eq!(ScriptValue::from_dynamic(&Dynamic::UNIT), ScriptValue::Null);
        assert_eq!(
            ScriptValue::from_dynamic(&Dynamic::from(Undefined)),
            ScriptValue::Undefined
        );
        assert_eq!(
            ScriptValue::from_dynamic(&Dynamic::from(true)),
            ScriptValue::Bool(true)
        );
        assert_eq!(
            ScriptValue::from_dynamic(&Dynamic::from(7_i64)),
            ScriptValue::Int(7)
        );
        assert_eq!(
            ScriptValue::from_dynamic(&Dynamic::from(1.5_f64)),
            ScriptValue::Float(1.5)
        );
        assert_eq!(
            ScriptValue::from_dynamic(&Dynamic::from("abc")),
            ScriptValue::Str("abc".to_string())
        );
        assert_eq!(
            ScriptValue::from_dynamic(&Dynamic::from('x')),
            ScriptValue::Str("x".to_string())
        );
    }

    #[test]
    fn test_classify_custom_types() {
        let blob = Dynamic::from_blob(vec![1, 2, 3]);
        assert_eq!(
            ScriptValue::from_dynamic(&blob),
            ScriptValue::Bytes(vec![1, 2, 3])
        );

        let date = Dynamic::from(ScriptDate::from_millis(86_400_000));
        assert_eq!(
            ScriptValue::from_dynamic(&date),
            ScriptValue::DateMillis(86_400_000)
        );

        let decimal = BigDecimal::from_str("1.25").unwrap();
        let number = Dynamic::from(BigNumber(decimal.clone()));
        assert_eq!(
            ScriptValue::from_dynamic(&number),
            ScriptValue::Decimal(decimal)
        );
    }

    #[test]
    fn test_classify_array_as_opaque() {
        let array: rhai::Array = vec![Dynamic::from(1_i64), Dynamic::from(2_i64)];
        match ScriptValue::from_dynamic(&Dynamic::from_array(array)) {
            ScriptValue::Opaque { type_name, text } => {
                assert_eq!(type_name, "array");
                assert!(text.contains('1'));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_script_date_parts() {
        let millis = Value::parse_date("2023-07-14 08:30:05.000").unwrap();
        let date = ScriptDate::from_millis(millis);
        assert_eq!(date.year(), 2023);
        assert_eq!(date.month(), 7);
        assert_eq!(date.day(), 14);
        assert_eq!(date.hour(), 8);
        assert_eq!(date.minute(), 30);
        assert_eq!(date.second(), 5);
        assert_eq!(date.to_string(), "2023-07-14 08:30:05.000");
    }
}
