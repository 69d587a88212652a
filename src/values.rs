//! Typed values for dynamic form submissions.
//!
//! Raw submissions arrive as JSON objects keyed by [`SchemaField::key`].
//! [`validate_submission`] coerces each entry into a [`FieldValue`]
//! according to the field's declared type and rules, collecting every
//! violation instead of stopping at the first one.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::models::{FieldType, SchemaField};

/// A single coerced field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    Date(NaiveDate),
    Choice(String),
    /// Reference to an uploaded file (URL or storage key).
    File(String),
}

/// Values keyed by field key.
pub type Record = BTreeMap<String, FieldValue>;

impl FieldValue {
    /// Render the value as a spreadsheet cell.
    pub fn to_cell(&self) -> String {
        match self {
            FieldValue::Text(s) | FieldValue::Choice(s) | FieldValue::File(s) => s.clone(),
            FieldValue::Number(n) => format_number(*n),
            FieldValue::Boolean(true) => "TRUE".to_string(),
            FieldValue::Boolean(false) => "FALSE".to_string(),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Convert an arbitrary JSON value into text without schema knowledge.
    pub fn from_json_lossy(value: &Value) -> Option<FieldValue> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            Value::Bool(b) => Some(FieldValue::Boolean(*b)),
            Value::Number(n) => n.as_f64().map(FieldValue::Number),
            other => Some(FieldValue::Text(other.to_string())),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// One rule violation for one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub key: String,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// All violations found in a submission.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid submission: {}", summarize(.0))]
pub struct ValidationErrors(pub Vec<FieldError>);

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate a raw submission against a field list.
///
/// Unknown keys are rejected. Absent or blank optional fields are omitted
/// from the returned record.
pub fn validate_submission(
    fields: &[SchemaField],
    payload: &Map<String, Value>,
) -> Result<Record, ValidationErrors> {
    let mut record = Record::new();
    let mut errors = Vec::new();

    for key in payload.keys() {
        if !fields.iter().any(|f| &f.key == key) {
            errors.push(FieldError {
                key: key.clone(),
                message: "unknown field".to_string(),
            });
        }
    }

    for field in fields {
        let raw = payload.get(&field.key).filter(|v| !is_blank(v));
        let Some(raw) = raw else {
            if field.required {
                errors.push(FieldError {
                    key: field.key.clone(),
                    message: format!("{} is required", field.label),
                });
            }
            continue;
        };

        match coerce(field, raw) {
            Ok(value) => {
                if let Err(message) = check_rules(field, &value) {
                    errors.push(FieldError {
                        key: field.key.clone(),
                        message,
                    });
                } else {
                    record.insert(field.key.clone(), value);
                }
            }
            Err(message) => errors.push(FieldError {
                key: field.key.clone(),
                message,
            }),
        }
    }

    if errors.is_empty() {
        Ok(record)
    } else {
        Err(ValidationErrors(errors))
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn coerce(field: &SchemaField, raw: &Value) -> Result<FieldValue, String> {
    match field.field_type {
        FieldType::String => match raw {
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
            _ => Err("expected text".to_string()),
        },
        FieldType::Number => match raw {
            Value::Number(n) => n
                .as_f64()
                .map(FieldValue::Number)
                .ok_or_else(|| "expected a number".to_string()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(FieldValue::Number)
                .ok_or_else(|| format!("'{}' is not a number", s)),
            _ => Err("expected a number".to_string()),
        },
        FieldType::Boolean => match raw {
            Value::Bool(b) => Ok(FieldValue::Boolean(*b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(FieldValue::Boolean(true)),
                "false" | "no" | "0" => Ok(FieldValue::Boolean(false)),
                _ => Err(format!("'{}' is not a boolean", s)),
            },
            Value::Number(n) if n.as_i64() == Some(1) => Ok(FieldValue::Boolean(true)),
            Value::Number(n) if n.as_i64() == Some(0) => Ok(FieldValue::Boolean(false)),
            _ => Err("expected a boolean".to_string()),
        },
        FieldType::Date => match raw {
            Value::String(s) => parse_date(s.trim())
                .map(FieldValue::Date)
                .ok_or_else(|| format!("'{}' is not a date (YYYY-MM-DD)", s)),
            _ => Err("expected a date string".to_string()),
        },
        FieldType::Enum => {
            let choice = match raw {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Err("expected one of the listed options".to_string()),
            };
            match &field.enum_options {
                Some(options) if !options.is_empty() && !options.contains(&choice) => Err(
                    format!("'{}' is not one of: {}", choice, options.join(", ")),
                ),
                _ => Ok(FieldValue::Choice(choice)),
            }
        }
        FieldType::File => match raw {
            Value::String(s) => Ok(FieldValue::File(s.clone())),
            Value::Object(obj) => obj
                .get("url")
                .or_else(|| obj.get("name"))
                .and_then(Value::as_str)
                .map(|s| FieldValue::File(s.to_string()))
                .ok_or_else(|| "file reference needs a url or name".to_string()),
            _ => Err("expected a file reference".to_string()),
        },
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().or_else(|| {
        chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.date_naive())
    })
}

/// Apply `min`/`max` (numbers) and `minLength`/`maxLength` (text) rules.
fn check_rules(field: &SchemaField, value: &FieldValue) -> Result<(), String> {
    let rules = &field.validation_rules;
    let rule = |name: &str| rules.get(name).and_then(Value::as_f64);

    match value {
        FieldValue::Number(n) => {
            if let Some(min) = rule("min") {
                if *n < min {
                    return Err(format!("must be at least {}", format_number(min)));
                }
            }
            if let Some(max) = rule("max") {
                if *n > max {
                    return Err(format!("must be at most {}", format_number(max)));
                }
            }
        }
        FieldValue::Text(s) => {
            let len = s.chars().count() as f64;
            if let Some(min) = rule("minLength") {
                if len < min {
                    return Err(format!("must be at least {} characters", min as usize));
                }
            }
            if let Some(max) = rule("maxLength") {
                if len > max {
                    return Err(format!("must be at most {} characters", max as usize));
                }
            }
        }
        _ => {}
    }
    Ok(())
}
