//! XLSX export of a form's responses.
//!
//! One worksheet named `Responses`: the fixed columns `Response ID`,
//! `User ID`, `Submitted At`, then every response key in first-seen order.
//! Array answers are joined with `", "`; nested objects are written as JSON.

use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use serde_json::Value;

use crate::models::Response;

const FIXED_COLUMNS: [&str; 3] = ["Response ID", "User ID", "Submitted At"];

/// Flattened responses, one row per response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

pub fn response_table(responses: &[Response]) -> ResponseTable {
    let mut keys: Vec<&str> = Vec::new();
    for r in responses {
        for key in r.response.keys() {
            if !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }
    }

    let rows = responses
        .iter()
        .map(|r| {
            let mut row = vec![
                Value::String(r.id.clone()),
                Value::String(r.user_id.clone()),
                Value::String(r.submitted_at.clone()),
            ];
            row.extend(
                keys.iter()
                    .map(|k| r.response.get(*k).map(flatten).unwrap_or(Value::Null)),
            );
            row
        })
        .collect();

    let headers = FIXED_COLUMNS
        .iter()
        .copied()
        .chain(keys)
        .map(str::to_string)
        .collect();

    ResponseTable { headers, rows }
}

fn flatten(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::String(
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Value::Object(_) => Value::String(value.to_string()),
        other => other.clone(),
    }
}

/// Render responses as an XLSX workbook.
pub fn responses_to_xlsx(responses: &[Response]) -> Result<Vec<u8>, XlsxError> {
    let table = response_table(responses);

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name("Responses")?;

    let bold = Format::new().set_bold();
    for (col, header) in table.headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, header, &bold)?;
    }
    for (col, width) in [20.0, 15.0, 20.0].into_iter().enumerate() {
        worksheet.set_column_width(col as u16, width)?;
    }

    for (i, row) in table.rows.iter().enumerate() {
        let r = (i + 1) as u32;
        for (col, value) in row.iter().enumerate() {
            let c = col as u16;
            match value {
                Value::Null => {}
                Value::Bool(b) => {
                    worksheet.write_boolean(r, c, *b)?;
                }
                Value::Number(n) => match n.as_f64() {
                    Some(f) => {
                        worksheet.write_number(r, c, f)?;
                    }
                    None => {
                        worksheet.write_string(r, c, n.to_string())?;
                    }
                },
                Value::String(s) => {
                    worksheet.write_string(r, c, s)?;
                }
                other => {
                    worksheet.write_string(r, c, other.to_string())?;
                }
            }
        }
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer()
}

/// `{title}_responses.xlsx`, with characters that would break a
/// `Content-Disposition` header removed.
pub fn export_filename(title: &str) -> String {
    let clean: String = title
        .chars()
        .filter(|c| !matches!(c, '"' | '\\' | '\r' | '\n'))
        .collect();
    let clean = clean.trim();
    let stem = if clean.is_empty() { "form" } else { clean };
    format!("{}_responses.xlsx", stem)
}
