//! Row-oriented access to an external spreadsheet service.
//!
//! The [`SheetsApi`] trait is the narrow interface the spreadsheet
//! connector needs: read rows, append a row, overwrite or clear one row,
//! and enumerate tabs and spreadsheets. Row numbers are 1-based, matching
//! A1 notation, so row 1 is the header row.
//!
//! Two implementations are provided:
//!
//! - [`GoogleSheetsClient`] talks to the Google Sheets v4 and Drive v3 REST
//!   APIs, authenticating with a service account via the OAuth2 JWT-bearer
//!   grant.
//! - [`MemorySheets`] keeps everything in process and backs tests and
//!   local development.
//!
//! # Environment Variables
//!
//! - `GOOGLE_SERVICE_ACCOUNT_EMAIL`
//! - `GOOGLE_PRIVATE_KEY` (PEM; literal `\n` sequences are accepted)

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{ServiceAccount, SheetsConfig};
use crate::traits::ConnectorError;

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Which rows of a sheet to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSpan {
    /// Row 1 only.
    Header,
    /// Every populated row, starting at row 1.
    All,
}

/// One tab inside a spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetInfo {
    pub name: String,
    pub sheet_id: Option<i64>,
    pub index: Option<i64>,
}

/// A spreadsheet file visible to the service account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadsheetInfo {
    pub id: String,
    pub name: String,
    pub created_time: Option<String>,
    pub modified_time: Option<String>,
    pub owner: String,
}

#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// Read cell values. Trailing empty cells and rows may be omitted by
    /// the service; callers must treat short rows as padded with `""`.
    async fn read_rows(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        span: RowSpan,
    ) -> Result<Vec<Vec<String>>, ConnectorError>;

    /// Append a row after the last populated row. Returns the physical row
    /// number when the service reports it.
    async fn append_row(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        values: Vec<String>,
    ) -> Result<Option<u32>, ConnectorError>;

    /// Overwrite row `row` starting at column A.
    async fn write_row(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        row: u32,
        values: Vec<String>,
    ) -> Result<(), ConnectorError>;

    /// Blank every cell of row `row`.
    async fn clear_row(&self, spreadsheet_id: &str, sheet: &str, row: u32)
        -> Result<(), ConnectorError>;

    async fn sheet_names(&self, spreadsheet_id: &str) -> Result<Vec<SheetInfo>, ConnectorError>;

    async fn list_spreadsheets(&self) -> Result<Vec<SpreadsheetInfo>, ConnectorError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Google Sheets REST client
// ═══════════════════════════════════════════════════════════════════════

/// Claims for the OAuth2 JWT-bearer assertion.
#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: i64,
}

/// Google Sheets v4 / Drive v3 client authenticated as a service account.
pub struct GoogleSheetsClient {
    http: reqwest::Client,
    settings: SheetsConfig,
    account: Option<ServiceAccount>,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleSheetsClient {
    pub fn new(settings: SheetsConfig, account: Option<ServiceAccount>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            settings,
            account,
            token: Mutex::new(None),
        })
    }

    /// Return a cached access token, minting a new one within a minute of expiry.
    async fn access_token(&self) -> Result<String, ConnectorError> {
        let account = self.account.as_ref().ok_or_else(|| {
            ConnectorError::MissingCredentials(
                "Missing Google service account credentials (GOOGLE_SERVICE_ACCOUNT_EMAIL, GOOGLE_PRIVATE_KEY)"
                    .to_string(),
            )
        })?;

        let mut guard = self.token.lock().await;
        let now = Utc::now().timestamp();
        if let Some(ref cached) = *guard {
            if cached.expires_at - 60 > now {
                return Ok(cached.value.clone());
            }
        }

        let claims = AssertionClaims {
            iss: &account.client_email,
            scope: format!("{} {}", SHEETS_SCOPE, DRIVE_SCOPE),
            aud: &self.settings.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .map_err(|e| ConnectorError::Credentials(format!("invalid GOOGLE_PRIVATE_KEY: {}", e)))?;
        let assertion = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256),
            &claims,
            &key,
        )
        .map_err(|e| ConnectorError::Credentials(format!("failed to sign assertion: {}", e)))?;

        let resp = self
            .http
            .post(&self.settings.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ConnectorError::Credentials(format!(
                "token exchange failed (HTTP {}): {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }
        let token: TokenResponse = resp.json().await?;

        *guard = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: now + token.expires_in,
        });
        Ok(token.access_token)
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str, suffix: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}{}",
            self.settings.api_base.trim_end_matches('/'),
            uri_encode(spreadsheet_id),
            uri_encode(range),
            suffix
        )
    }

    async fn send_json(
        &self,
        operation: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<Value, ConnectorError> {
        let token = self.access_token().await?;
        let resp = builder.bearer_auth(token).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ConnectorError::Api {
                operation: operation.to_string(),
                status: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }
        Ok(resp.json::<Value>().await.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl SheetsApi for GoogleSheetsClient {
    async fn read_rows(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        span: RowSpan,
    ) -> Result<Vec<Vec<String>>, ConnectorError> {
        let range = match span {
            RowSpan::Header => a1_range(sheet, Some("1:1")),
            RowSpan::All => a1_range(sheet, None),
        };
        let url = self.values_url(spreadsheet_id, &range, "");
        let body = self.send_json("values.get", self.http.get(&url)).await?;
        let rows = parse_values(&body);
        debug!(spreadsheet_id, sheet, rows = rows.len(), "read sheet values");
        Ok(rows)
    }

    async fn append_row(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        values: Vec<String>,
    ) -> Result<Option<u32>, ConnectorError> {
        let range = a1_range(sheet, Some("A1"));
        let url = self.values_url(spreadsheet_id, &range, ":append");
        let body = self
            .send_json(
                "values.append",
                self.http
                    .post(&url)
                    .query(&[
                        ("valueInputOption", "RAW"),
                        ("insertDataOption", "INSERT_ROWS"),
                    ])
                    .json(&json!({ "values": [values] })),
            )
            .await?;
        let row = body
            .pointer("/updates/updatedRange")
            .and_then(Value::as_str)
            .and_then(row_from_range);
        debug!(spreadsheet_id, sheet, ?row, "appended row");
        Ok(row)
    }

    async fn write_row(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        row: u32,
        values: Vec<String>,
    ) -> Result<(), ConnectorError> {
        let range = a1_range(sheet, Some(&format!("A{}", row)));
        let url = self.values_url(spreadsheet_id, &range, "");
        self.send_json(
            "values.update",
            self.http
                .put(&url)
                .query(&[("valueInputOption", "RAW")])
                .json(&json!({ "range": range, "values": [values] })),
        )
        .await?;
        Ok(())
    }

    async fn clear_row(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        row: u32,
    ) -> Result<(), ConnectorError> {
        let range = a1_range(sheet, Some(&format!("{}:{}", row, row)));
        let url = self.values_url(spreadsheet_id, &range, ":clear");
        self.send_json("values.clear", self.http.post(&url).json(&json!({})))
            .await?;
        Ok(())
    }

    async fn sheet_names(&self, spreadsheet_id: &str) -> Result<Vec<SheetInfo>, ConnectorError> {
        let url = format!(
            "{}/spreadsheets/{}",
            self.settings.api_base.trim_end_matches('/'),
            uri_encode(spreadsheet_id)
        );
        let body = self
            .send_json(
                "spreadsheets.get",
                self.http.get(&url).query(&[("fields", "sheets.properties")]),
            )
            .await?;

        let sheets = body
            .get("sheets")
            .and_then(Value::as_array)
            .map(|sheets| {
                sheets
                    .iter()
                    .map(|s| {
                        let props = &s["properties"];
                        SheetInfo {
                            name: props["title"].as_str().unwrap_or("Untitled").to_string(),
                            sheet_id: props["sheetId"].as_i64(),
                            index: props["index"].as_i64(),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(sheets)
    }

    async fn list_spreadsheets(&self) -> Result<Vec<SpreadsheetInfo>, ConnectorError> {
        let url = format!("{}/files", self.settings.drive_base.trim_end_matches('/'));
        let body = self
            .send_json(
                "files.list",
                self.http.get(&url).query(&[
                    ("q", "mimeType='application/vnd.google-apps.spreadsheet'"),
                    ("fields", "files(id,name,createdTime,modifiedTime,owners)"),
                    ("orderBy", "modifiedTime desc"),
                    ("pageSize", "100"),
                ]),
            )
            .await?;

        let files = body
            .get("files")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .map(|f| SpreadsheetInfo {
                        id: f["id"].as_str().unwrap_or_default().to_string(),
                        name: f["name"].as_str().unwrap_or_default().to_string(),
                        created_time: f["createdTime"].as_str().map(str::to_string),
                        modified_time: f["modifiedTime"].as_str().map(str::to_string),
                        owner: f
                            .pointer("/owners/0/displayName")
                            .and_then(Value::as_str)
                            .unwrap_or("Unknown")
                            .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(files)
    }
}

/// Build an A1 range, quoting the sheet name.
///
/// ```text
/// a1_range("Sheet1", Some("1:1"))   → 'Sheet1'!1:1
/// a1_range("Bob's", None)           → 'Bob''s'
/// ```
pub fn a1_range(sheet: &str, cells: Option<&str>) -> String {
    let quoted = format!("'{}'", sheet.replace('\'', "''"));
    match cells {
        Some(cells) => format!("{}!{}", quoted, cells),
        None => quoted,
    }
}

/// Extract the first row number from a range such as `'Sheet1'!A5:C5`.
fn row_from_range(range: &str) -> Option<u32> {
    let cells = range.rsplit('!').next()?;
    let first = cells.split(':').next()?;
    let digits: String = first.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Turn a `ValueRange` body into rows of strings.
fn parse_values(body: &Value) -> Vec<Vec<String>> {
    body.get("values")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| cells.iter().map(cell_to_string).collect())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

fn cell_to_string(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// URI-encode a path segment per RFC 3986.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ═══════════════════════════════════════════════════════════════════════
// In-process spreadsheet
// ═══════════════════════════════════════════════════════════════════════

/// In-memory spreadsheet service for tests and offline development.
///
/// Spreadsheets are created implicitly on first write. Reads of unknown
/// spreadsheets fail with a 404-style [`ConnectorError::Api`], mirroring
/// the real service.
#[derive(Default)]
pub struct MemorySheets {
    books: RwLock<HashMap<String, Vec<(String, Vec<Vec<String>>)>>>,
}

impl MemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a sheet's contents wholesale.
    pub fn put_sheet(&self, spreadsheet_id: &str, sheet: &str, rows: Vec<Vec<String>>) {
        let mut books = self.books.write().unwrap();
        let tabs = books.entry(spreadsheet_id.to_string()).or_default();
        match tabs.iter_mut().find(|(name, _)| name == sheet) {
            Some((_, existing)) => *existing = rows,
            None => tabs.push((sheet.to_string(), rows)),
        }
    }

    /// Snapshot of a sheet's rows.
    pub fn rows(&self, spreadsheet_id: &str, sheet: &str) -> Vec<Vec<String>> {
        let books = self.books.read().unwrap();
        books
            .get(spreadsheet_id)
            .and_then(|tabs| tabs.iter().find(|(name, _)| name == sheet))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default()
    }

    fn with_sheet<T>(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        f: impl FnOnce(&mut Vec<Vec<String>>) -> T,
    ) -> Result<T, ConnectorError> {
        let mut books = self.books.write().unwrap();
        let tabs = books
            .get_mut(spreadsheet_id)
            .ok_or_else(|| not_found(spreadsheet_id))?;
        let (_, rows) = tabs
            .iter_mut()
            .find(|(name, _)| name == sheet)
            .ok_or_else(|| ConnectorError::Api {
                operation: "values".to_string(),
                status: 400,
                message: format!("Unable to parse range: {}", a1_range(sheet, None)),
            })?;
        Ok(f(rows))
    }
}

fn not_found(spreadsheet_id: &str) -> ConnectorError {
    ConnectorError::Api {
        operation: "spreadsheets".to_string(),
        status: 404,
        message: format!("Requested entity was not found: {}", spreadsheet_id),
    }
}

/// Drop trailing empty cells, as the real service does.
fn trim_row(mut row: Vec<String>) -> Vec<String> {
    while row.last().is_some_and(|c| c.is_empty()) {
        row.pop();
    }
    row
}

#[async_trait]
impl SheetsApi for MemorySheets {
    async fn read_rows(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        span: RowSpan,
    ) -> Result<Vec<Vec<String>>, ConnectorError> {
        self.with_sheet(spreadsheet_id, sheet, |rows| {
            let mut out: Vec<Vec<String>> = match span {
                RowSpan::Header => rows.iter().take(1).cloned().map(trim_row).collect(),
                RowSpan::All => rows.iter().cloned().map(trim_row).collect(),
            };
            while out.last().is_some_and(|r| r.is_empty()) {
                out.pop();
            }
            out
        })
    }

    async fn append_row(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        values: Vec<String>,
    ) -> Result<Option<u32>, ConnectorError> {
        self.with_sheet(spreadsheet_id, sheet, |rows| {
            while rows.last().is_some_and(|r| r.iter().all(String::is_empty)) {
                rows.pop();
            }
            rows.push(values);
            Some(rows.len() as u32)
        })
    }

    async fn write_row(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        row: u32,
        values: Vec<String>,
    ) -> Result<(), ConnectorError> {
        if row == 0 {
            return Err(ConnectorError::Api {
                operation: "values.update".to_string(),
                status: 400,
                message: "row numbers start at 1".to_string(),
            });
        }
        self.with_sheet(spreadsheet_id, sheet, |rows| {
            let idx = (row - 1) as usize;
            if rows.len() <= idx {
                rows.resize(idx + 1, Vec::new());
            }
            let target = &mut rows[idx];
            if target.len() < values.len() {
                target.resize(values.len(), String::new());
            }
            for (i, v) in values.into_iter().enumerate() {
                target[i] = v;
            }
        })
    }

    async fn clear_row(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        row: u32,
    ) -> Result<(), ConnectorError> {
        self.with_sheet(spreadsheet_id, sheet, |rows| {
            if let Some(target) = rows.get_mut((row as usize).wrapping_sub(1)) {
                target.iter_mut().for_each(String::clear);
            }
        })
    }

    async fn sheet_names(&self, spreadsheet_id: &str) -> Result<Vec<SheetInfo>, ConnectorError> {
        let books = self.books.read().unwrap();
        let tabs = books
            .get(spreadsheet_id)
            .ok_or_else(|| not_found(spreadsheet_id))?;
        Ok(tabs
            .iter()
            .enumerate()
            .map(|(i, (name, _))| SheetInfo {
                name: name.clone(),
                sheet_id: Some(i as i64),
                index: Some(i as i64),
            })
            .collect())
    }

    async fn list_spreadsheets(&self) -> Result<Vec<SpreadsheetInfo>, ConnectorError> {
        let books = self.books.read().unwrap();
        let mut ids: Vec<&String> = books.keys().collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .map(|id| SpreadsheetInfo {
                id: id.clone(),
                name: id.clone(),
                created_time: None,
                modified_time: None,
                owner: "memory".to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a1_range_quotes_sheet_names() {
        assert_eq!(a1_range("Sheet1", Some("1:1")), "'Sheet1'!1:1");
        assert_eq!(a1_range("Intake Form", Some("A5")), "'Intake Form'!A5");
        assert_eq!(a1_range("Bob's", None), "'Bob''s'");
    }

    #[test]
    fn test_row_from_range() {
        assert_eq!(row_from_range("Sheet1!A5:C5"), Some(5));
        assert_eq!(row_from_range("'My Sheet'!A12:Z12"), Some(12));
        assert_eq!(row_from_range("Sheet1"), None);
    }

    #[test]
    fn test_parse_values_handles_missing_and_non_string_cells() {
        let body = serde_json::json!({
            "range": "Sheet1!A1:C2",
            "values": [["Name", "Age"], ["Ada", 36, null]]
        });
        let rows = parse_values(&body);
        assert_eq!(rows[1], vec!["Ada", "36", ""]);
        assert!(parse_values(&serde_json::json!({ "range": "Sheet1" })).is_empty());
    }

    #[tokio::test]
    async fn test_memory_sheets_append_and_clear() {
        let sheets = MemorySheets::new();
        sheets.put_sheet("book", "Sheet1", vec![vec!["A".into(), "B".into()]]);

        let row = sheets
            .append_row("book", "Sheet1", vec!["1".into(), "2".into()])
            .await
            .unwrap();
        assert_eq!(row, Some(2));

        sheets.clear_row("book", "Sheet1", 2).await.unwrap();
        let rows = sheets.read_rows("book", "Sheet1", RowSpan::All).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_sheets_unknown_spreadsheet() {
        let sheets = MemorySheets::new();
        let err = sheets
            .read_rows("missing", "Sheet1", RowSpan::Header)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Api { status: 404, .. }));
    }
}
