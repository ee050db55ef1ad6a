//! Conversion between host row values and script values
//!
//! Input values are bound with [`to_script`]; script results are read back
//! into strictly typed columns with [`from_script`]. Integer targets round
//! half-up (`floor(x + 0.5)`), so `2.5 -> 3` and `-2.5 -> -2`.

use crate::error::{Result, RowScriptError};
use crate::scripting::value::{BigNumber, ScriptDate, ScriptValue};
use crate::types::{SemanticType, Value};
use bigdecimal::{BigDecimal, RoundingMode};
use num_traits::{FromPrimitive, ToPrimitive};
use rhai::Dynamic;

/// Bind a host value as a script value
pub fn to_script(value: Option<&Value>) -> Dynamic {
    match value {
        None => Dynamic::UNIT,
        Some(Value::String(s)) => Dynamic::from(s.clone()),
        Some(Value::Integer(i)) => Dynamic::from(*i),
        Some(Value::Number(n)) => Dynamic::from(*n),
        Some(Value::Date(ms)) => Dynamic::from(ScriptDate::from_millis(*ms)),
        Some(Value::Boolean(b)) => Dynamic::from(*b),
        Some(Value::Binary(bytes)) => Dynamic::from_blob(bytes.clone()),
        Some(Value::BigNumber(d)) => Dynamic::from(BigNumber(d.clone())),
    }
}

/// Convert a script result into a value of the declared column type
///
/// `Null` and `Undefined` become a null column. Anything that cannot be
/// represented fails with [`RowScriptError::TypeConversion`].
pub fn from_script(
    value: &ScriptValue,
    declared: SemanticType,
    field: &str,
) -> Result<Option<Value>> {
    if value.is_nullish() {
        return Ok(None);
    }

    let converted = match declared {
        SemanticType::Number => to_number(value).map(Value::Number),
        SemanticType::Integer => to_integer(value).map(Value::Integer),
        SemanticType::String => Some(Value::String(to_text(value))),
        SemanticType::Date => to_date(value).map(Value::Date),
        SemanticType::Boolean => match value {
            ScriptValue::Bool(b) => Some(Value::Boolean(*b)),
            _ => None,
        },
        SemanticType::BigNumber => to_decimal(value).map(Value::BigNumber),
        SemanticType::Binary => match value {
            ScriptValue::Bytes(bytes) => Some(Value::Binary(bytes.clone())),
            ScriptValue::Str(s) => Some(Value::Binary(s.clone().into_bytes())),
            _ => None,
        },
    };

    converted.map(Some).ok_or_else(|| RowScriptError::TypeConversion {
        field: field.to_string(),
        message: format!(
            "cannot convert {} value {} to {}",
            value.kind(),
            preview(value),
            declared
        ),
    })
}

fn to_number(value: &ScriptValue) -> Option<f64> {
    match value {
        ScriptValue::Float(f) => Some(*f),
        ScriptValue::Int(i) => Some(*i as f64),
        ScriptValue::Decimal(d) => d.to_f64(),
        ScriptValue::Opaque { text, .. } => text.trim().parse().ok(),
        _ => None,
    }
}

fn to_integer(value: &ScriptValue) -> Option<i64> {
    match value {
        ScriptValue::Int(i) => Some(*i),
        ScriptValue::Float(f) => round_half_up(*f),
        ScriptValue::Decimal(d) => {
            let half = BigDecimal::new(5.into(), 1);
            (d + half).with_scale_round(0, RoundingMode::Floor).to_i64()
        }
        ScriptValue::Opaque { text, .. } => text.trim().parse::<f64>().ok().and_then(round_half_up),
        _ => None,
    }
}

/// `floor(x + 0.5)`, rejecting NaN, infinities and out-of-range values
pub fn round_half_up(x: f64) -> Option<i64> {
    if !x.is_finite() {
        return None;
    }
    let rounded = (x + 0.5).floor();
    if rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        return None;
    }
    Some(rounded as i64)
}

fn to_text(value: &ScriptValue) -> String {
    match value {
        ScriptValue::Str(s) => s.clone(),
        ScriptValue::Bool(b) => b.to_string(),
        ScriptValue::Int(i) => i.to_string(),
        ScriptValue::Float(f) => f.to_string(),
        ScriptValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ScriptValue::DateMillis(ms) => Value::format_date(*ms),
        ScriptValue::Decimal(d) => d.to_string(),
        ScriptValue::Opaque { text, .. } => text.clone(),
        ScriptValue::Null | ScriptValue::Undefined => String::new(),
    }
}

fn to_date(value: &ScriptValue) -> Option<i64> {
    match value {
        ScriptValue::DateMillis(ms) => Some(*ms),
        ScriptValue::Int(ms) => Some(*ms),
        ScriptValue::Float(ms) => round_half_up(*ms),
        _ => None,
    }
}

fn to_decimal(value: &ScriptValue) -> Option<BigDecimal> {
    match value {
        ScriptValue::Decimal(d) => Some(d.clone()),
        ScriptValue::Int(i) => Some(BigDecimal::from(*i)),
        ScriptValue::Float(f) => BigDecimal::from_f64(*f),
        ScriptValue::Str(s) => Value::parse_big_number(s),
        ScriptValue::Opaque { text, .. } => Value::parse_big_number(text),
        _ => None,
    }
}

fn preview(value: &ScriptValue) -> String {
    let text = match value {
        ScriptValue::Str(s) => format!("\"{}\"", s),
        ScriptValue::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        other => to_text(other),
    };
    if text.chars().count() > 40 {
        let cut: String = text.chars().take(40).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn convert(value: ScriptValue, declared: SemanticType) -> Result<Option<Value>> {
        from_script(&value, declared, "f")
    }

    #[test]
    fn test_integer_rounds_half_up() {
        assert_eq!(
            convert(ScriptValue::Float(3.7), SemanticType::Integer).unwrap(),
            Some(Value::Integer(4))
        );
        assert_eq!(
            convert(ScriptValue::Float(2.5), SemanticType::Integer).unwrap(),
            Some(Value::Integer(3))
        );
        assert_eq!(
            convert(ScriptValue::Float(-2.5), SemanticType::Integer).unwrap(),
            Some(Value::Integer(-2))
        );
        assert_eq!(
            convert(ScriptValue::Int(12), SemanticType::Integer).unwrap(),
            Some(Value::Integer(12))
        );
        assert!(convert(ScriptValue::Float(f64::NAN), SemanticType::Integer).is_err());
    }

    #[test]
    fn test_decimal_to_integer() {
        let d = BigDecimal::from_str("7.5").unwrap();
        assert_eq!(
            convert(ScriptValue::Decimal(d), SemanticType::Integer).unwrap(),
            Some(Value::Integer(8))
        );
    }

    #[test]
    fn test_string_into_number_fails() {
        let err = convert(ScriptValue::Str("abc".to_string()), SemanticType::Number).unwrap_err();
        match err {
            RowScriptError::TypeConversion { field, message } => {
                assert_eq!(field, "f");
                assert!(message.contains("\"abc\""));
                assert!(message.contains("Number"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_null_and_undefined_are_null() {
        for t in SemanticType::ALL {
            assert_eq!(convert(ScriptValue::Null, t).unwrap(), None);
            assert_eq!(convert(ScriptValue::Undefined, t).unwrap(), None);
        }
    }

    #[test]
    fn test_boolean_only_from_bool() {
        assert_eq!(
            convert(ScriptValue::Bool(false), SemanticType::Boolean).unwrap(),
            Some(Value::Boolean(false))
        );
        assert!(convert(ScriptValue::Int(1), SemanticType::Boolean).is_err());
        assert!(convert(ScriptValue::Str("true".into()), SemanticType::Boolean).is_err());
    }

    #[test]
    fn test_date_sources() {
        assert_eq!(
            convert(ScriptValue::DateMillis(1000), SemanticType::Date).unwrap(),
            Some(Value::Date(1000))
        );
        assert_eq!(
            convert(ScriptValue::Float(999.6), SemanticType::Date).unwrap(),
            Some(Value::Date(1000))
        );
        assert!(convert(ScriptValue::Str("2020-01-01".into()), SemanticType::Date).is_err());
    }

    #[test]
    fn test_string_unwraps_everything() {
        assert_eq!(
            convert(ScriptValue::Int(5), SemanticType::String).unwrap(),
            Some(Value::String("5".into()))
        );
        assert_eq!(
            convert(
                ScriptValue::Opaque {
                    type_name: "array".into(),
                    text: "[1, 2]".into()
                },
                SemanticType::String
            )
            .unwrap(),
            Some(Value::String("[1, 2]".into()))
        );
    }

    #[test]
    fn test_big_number_sources() {
        assert_eq!(
            convert(ScriptValue::Str("10.25".into()), SemanticType::BigNumber).unwrap(),
            Some(Value::BigNumber(BigDecimal::from_str("10.25").unwrap()))
        );
        assert_eq!(
            convert(ScriptValue::Int(3), SemanticType::BigNumber).unwrap(),
            Some(Value::BigNumber(BigDecimal::from(3)))
        );
        assert!(convert(ScriptValue::Bool(true), SemanticType::BigNumber).is_err());
    }

    #[test]
    fn test_identity_round_trip() {
        let values = vec![
            Value::String("hello".into()),
            Value::Integer(-42),
            Value::Number(3.25),
            Value::Date(1_700_000_000_123),
            Value::Boolean(true),
            Value::Binary(vec![0, 255, 7]),
            Value::BigNumber(BigDecimal::from_str("12345678901234567890.000001").unwrap()),
        ];
        for value in values {
            let declared = value.semantic_type();
            let script = ScriptValue::from_dynamic(&to_script(Some(&value)));
            assert_eq!(
                from_script(&script, declared, "f").unwrap(),
                Some(value.clone()),
                "round trip of {:?}",
                declared
            );
        }
        assert!(to_script(None).is_unit());
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_integer_round_trip_any(i in any::<i64>()) {
            let script = ScriptValue::from_dynamic(&to_script(Some(&Value::Integer(i))));
            prop_assert_eq!(
                from_script(&script, SemanticType::Integer, "f").unwrap(),
                Some(Value::Integer(i))
            );
        }

        #[test]
        fn test_rounding_matches_floor(x in -1.0e12f64..1.0e12) {
            let rounded = round_half_up(x).unwrap();
            prop_assert_eq!(rounded, (x + 0.5).floor() as i64);
            prop_assert!((rounded as f64 - x).abs() <= 0.5 + 1e-3);
        }
    }
}
