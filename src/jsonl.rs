//! JSON Lines codec for rows
//!
//! Every line is one JSON object keyed by column name. Values are converted
//! by the column's semantic type: dates are `YYYY-MM-DD HH:MM:SS.mmm`
//! strings (epoch milliseconds are accepted on input), binary columns are
//! arrays of bytes and big numbers are strings so no precision is lost.

use crate::error::{Result, RowScriptError};
use crate::types::{Row, RowSchema, SemanticType, Value};
use serde_json::{Map, Value as Json};
use std::io::{BufRead, Write};

/// Convert one JSON value to a column value
pub fn json_to_value(
    json: &Json,
    semantic_type: SemanticType,
    field: &str,
) -> Result<Option<Value>> {
    if json.is_null() {
        return Ok(None);
    }

    let value = match semantic_type {
        SemanticType::String => Some(Value::String(match json {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        })),
        SemanticType::Integer => match json {
            Json::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| fits_integer(*f)).map(|f| f as i64)),
            Json::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .map(Value::Integer),
        SemanticType::Number => match json {
            Json::Number(n) => n.as_f64(),
            Json::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .map(Value::Number),
        SemanticType::Date => match json {
            Json::Number(n) => n.as_i64(),
            Json::String(s) => Value::parse_date(s),
            _ => None,
        }
        .map(Value::Date),
        SemanticType::Boolean => match json {
            Json::Bool(b) => Some(*b),
            Json::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "y" | "yes" => Some(true),
                "false" | "n" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
        .map(Value::Boolean),
        SemanticType::Binary => match json {
            Json::Array(items) => items
                .iter()
                .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>(),
            Json::String(s) => Some(s.as_bytes().to_vec()),
            _ => None,
        }
        .map(Value::Binary),
        SemanticType::BigNumber => match json {
            Json::Number(n) => Value::parse_big_number(&n.to_string()),
            Json::String(s) => Value::parse_big_number(s),
            _ => None,
        }
        .map(Value::BigNumber),
    };

    value.map(Some).ok_or_else(|| {
        RowScriptError::Serialization(format!(
            "Field '{}': {} is not a valid {}",
            field, json, semantic_type
        ))
    })
}

/// Whole floats in `i64` range (2^63 itself is out of range)
fn fits_integer(f: f64) -> bool {
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    f.fract() == 0.0 && (-BOUND..BOUND).contains(&f)
}

/// Convert one column value to JSON
pub fn value_to_json(value: Option<&Value>) -> Json {
    match value {
        None => Json::Null,
        Some(Value::String(s)) => Json::String(s.clone()),
        Some(Value::Integer(i)) => Json::from(*i),
        Some(Value::Number(n)) => serde_json::Number::from_f64(*n)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Some(Value::Date(ms)) => Json::String(Value::format_date(*ms)),
        Some(Value::Boolean(b)) => Json::Bool(*b),
        Some(Value::Binary(bytes)) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
        Some(Value::BigNumber(d)) => Json::String(d.to_string()),
    }
}

/// Parse one JSON object into a row; absent keys become null columns
pub fn row_from_json(line: &str, schema: &RowSchema) -> Result<Row> {
    let json: Json =
        serde_json::from_str(line).map_err(|e| RowScriptError::Serialization(e.to_string()))?;
    let object = json.as_object().ok_or_else(|| {
        RowScriptError::Serialization("Expected a JSON object per line".to_string())
    })?;

    schema
        .fields()
        .iter()
        .map(|field| match object.get(&field.name) {
            Some(value) => json_to_value(value, field.semantic_type, &field.name),
            None => Ok(None),
        })
        .collect()
}

/// Render a row as one JSON object, columns in schema order
pub fn row_to_json(row: &Row, schema: &RowSchema) -> Json {
    let mut object = Map::new();
    for (index, field) in schema.fields().iter().enumerate() {
        object.insert(
            field.name.clone(),
            value_to_json(row.get(index).and_then(|v| v.as_ref())),
        );
    }
    Json::Object(object)
}

/// Read every non-blank line of `reader` as a row
pub fn read_rows<'a, R: BufRead + 'a>(
    reader: R,
    schema: &'a RowSchema,
) -> impl Iterator<Item = Result<Row>> + 'a {
    reader
        .lines()
        .enumerate()
        .filter_map(move |(index, line)| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(
                row_from_json(&line, schema)
                    .map_err(|e| e.with_context(format!("Line {}", index + 1))),
            ),
            Err(e) => Some(Err(e.into())),
        })
}

/// Writes rows as JSON Lines
pub struct JsonlWriter<W: Write> {
    writer: W,
    rows_written: u64,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            rows_written: 0,
        }
    }

    pub fn write_row(&mut self, row: &Row, schema: &RowSchema) -> Result<()> {
        let line = serde_json::to_string(&row_to_json(row, schema))
            .map_err(|e| RowScriptError::Serialization(e.to_string()))?;
        writeln!(self.writer, "{}", line)?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
