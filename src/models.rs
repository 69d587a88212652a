//! Core data models shared by the connectors, stores, and HTTP layer.
//!
//! JSON field names follow the camelCase wire format used by the web
//! client (`columnRef`, `enumOptions`, `connectedSourceId`, ...).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declared type of a form field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Number,
    Date,
    Boolean,
    Enum,
    File,
}

/// One attribute of a dynamic form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    pub key: String,
    pub label: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub validation_rules: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_options: Option<Vec<String>>,
}

/// Field list read fresh from an external source. Always version 1;
/// persisted versions are assigned by the schema repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSchemaDefinition {
    pub version: i64,
    pub fields: Vec<SchemaField>,
}

/// Kind of external row source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "google-sheets")]
    GoogleSheets,
    #[serde(rename = "database")]
    Database,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::GoogleSheets => "google-sheets",
            SourceType::Database => "database",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request description of which external source and sheet to use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedSourceConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
}

impl ConnectedSourceConfig {
    /// A Google Sheets source whose config id is the spreadsheet id.
    pub fn google_sheets(spreadsheet_id: &str, sheet_name: Option<&str>) -> Self {
        Self {
            id: spreadsheet_id.to_string(),
            source_type: SourceType::GoogleSheets,
            source_id: spreadsheet_id.to_string(),
            sheet_name: sheet_name.map(str::to_string),
        }
    }

    /// Sheet name, defaulting to `"Sheet1"` when absent or blank.
    pub fn sheet(&self) -> &str {
        match self.sheet_name.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => "Sheet1",
        }
    }
}

/// A persisted, immutable schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinitionDoc {
    pub id: String,
    pub connected_source_id: String,
    pub version: i64,
    pub fields: Vec<SchemaField>,
    pub created_by: String,
    pub created_at: String,
}

/// A schema version before the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSchemaDefinition {
    pub connected_source_id: String,
    pub version: i64,
    pub fields: Vec<SchemaField>,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Opaque form-definition document rendered by the client.
    pub schema: Value,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
    pub is_active: bool,
}

/// Payload for creating a form.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub schema: Value,
}

/// Full replacement of a form's mutable fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormUpdate {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub schema: Value,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: String,
    pub form_id: String,
    pub user_id: String,
    pub response: Map<String, Value>,
    pub submitted_at: String,
}

/// Payload for submitting a response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewResponse {
    #[serde(default)]
    pub form_id: String,
    #[serde(default)]
    pub response: Option<Map<String, Value>>,
}

/// Current UTC time as an RFC 3339 string.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
