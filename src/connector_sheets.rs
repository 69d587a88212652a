//! Spreadsheet connector.
//!
//! Maps a spreadsheet tab onto the [`Connector`] contract:
//!
//! - the header row (row 1) becomes the field list, one string-typed,
//!   optional [`SchemaField`] per column, keyed by [`normalize_key`];
//! - every later row becomes a record keyed by those field keys;
//! - submissions are projected back into column order and appended.
//!
//! # Row identity
//!
//! Spreadsheet rows have no stable identity of their own, so the connector
//! reserves a trailing header column named [`ROW_ID_HEADER`]. `append_row`
//! writes a fresh UUID into it (adding the column to the header on first
//! use) and returns that UUID as the external row id. `update_row` and
//! `delete_row` scan the column to find the physical row, so they only ever
//! touch the targeted row. The column is invisible to `read_schema` and
//! `read_rows`.
//!
//! The service drops trailing empty header cells, so the first append
//! measures the widest row of the tab and places the identity column past
//! it. Data under an unlabeled column is never overwritten by row ids.
//!
//! # Empty headers
//!
//! An empty header cell gets the label `"Column N"` (1-based). A header
//! with no key characters (empty or whitespace-only) gets the key
//! `column_n`, so no field has an empty key; a whitespace-only header keeps
//! its own text as the label. [`normalize_key`] itself maps the empty
//! string to the empty string.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{
    ConnectedSourceConfig, ExternalSchemaDefinition, FieldType, SchemaField, SourceType,
};
use crate::sheets_api::{RowSpan, SheetsApi};
use crate::traits::{AppendedRow, Connector, ConnectorError};
use crate::values::{FieldValue, Record};

/// Header text of the hidden row-identity column.
pub const ROW_ID_HEADER: &str = "__row_id";

/// Normalize header text into a field key.
///
/// Lowercases, replaces every maximal run of characters outside `[a-z0-9]`
/// with a single `_`, and strips leading and trailing `_`.
///
/// ```
/// use form_harness::connector_sheets::normalize_key;
///
/// assert_eq!(normalize_key("Full Name"), "full_name");
/// assert_eq!(normalize_key("Age (yrs)"), "age_yrs");
/// assert_eq!(normalize_key(""), "");
/// ```
pub fn normalize_key(header: &str) -> String {
    let mut key = String::with_capacity(header.len());
    let mut pending_sep = false;
    for ch in header.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_sep && !key.is_empty() {
                key.push('_');
            }
            pending_sep = false;
            key.push(ch);
        } else {
            pending_sep = true;
        }
    }
    key
}

/// One visible column of the header row.
#[derive(Debug, Clone)]
struct Column {
    index: usize,
    key: String,
    header: String,
}

/// Parsed header row.
#[derive(Debug, Clone)]
struct HeaderLayout {
    columns: Vec<Column>,
    row_id_col: Option<usize>,
    width: usize,
}

impl HeaderLayout {
    fn parse(header: &[String]) -> Self {
        let mut columns = Vec::new();
        let mut row_id_col = None;
        for (index, cell) in header.iter().enumerate() {
            if cell == ROW_ID_HEADER {
                row_id_col.get_or_insert(index);
                continue;
            }
            let key = match normalize_key(cell) {
                k if k.is_empty() => format!("column_{}", index + 1),
                k => k,
            };
            columns.push(Column {
                index,
                key,
                header: cell.clone(),
            });
        }
        Self {
            columns,
            row_id_col,
            width: header.len(),
        }
    }

    fn fields(&self) -> Vec<SchemaField> {
        self.columns
            .iter()
            .map(|c| SchemaField {
                key: c.key.clone(),
                label: if c.header.is_empty() {
                    format!("Column {}", c.index + 1)
                } else {
                    c.header.clone()
                },
                field_type: FieldType::String,
                required: false,
                validation_rules: Default::default(),
                column_ref: Some(c.header.clone()),
                enum_options: None,
            })
            .collect()
    }

    /// Project a record into a positional row, writing `row_id` into the
    /// identity column.
    fn project(&self, row: &Record, row_id_col: usize, row_id: &str) -> Vec<String> {
        let mut values = vec![String::new(); self.width.max(row_id_col + 1)];
        for c in &self.columns {
            values[c.index] = row.get(&c.key).map(FieldValue::to_cell).unwrap_or_default();
        }
        values[row_id_col] = row_id.to_string();
        values
    }

    fn record(&self, row: &[String]) -> Record {
        let mut record = Record::new();
        for c in &self.columns {
            let cell = row.get(c.index).cloned().unwrap_or_default();
            record.insert(c.key.clone(), FieldValue::Text(cell));
        }
        record
    }
}

/// [`Connector`] over a spreadsheet service.
pub struct SpreadsheetConnector {
    sheets: Arc<dyn SheetsApi>,
}

impl SpreadsheetConnector {
    pub fn new(sheets: Arc<dyn SheetsApi>) -> Self {
        Self { sheets }
    }

    async fn header(&self, config: &ConnectedSourceConfig) -> Result<Vec<String>, ConnectorError> {
        let rows = self
            .sheets
            .read_rows(&config.source_id, config.sheet(), RowSpan::Header)
            .await?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    /// Find the physical (1-based) row holding `external_row_id`.
    async fn locate(
        &self,
        config: &ConnectedSourceConfig,
        external_row_id: &str,
    ) -> Result<(HeaderLayout, usize, u32), ConnectorError> {
        let rows = self
            .sheets
            .read_rows(&config.source_id, config.sheet(), RowSpan::All)
            .await?;
        let layout = HeaderLayout::parse(rows.first().map(Vec::as_slice).unwrap_or(&[]));
        let not_found = || ConnectorError::RowNotFound(external_row_id.to_string());
        let id_col = layout.row_id_col.ok_or_else(not_found)?;

        let position = rows
            .iter()
            .skip(1)
            .position(|r| r.get(id_col).map(String::as_str) == Some(external_row_id))
            .ok_or_else(not_found)?;

        // +1 for the header row, +1 for 1-based numbering.
        Ok((layout, id_col, position as u32 + 2))
    }
}

#[async_trait]
impl Connector for SpreadsheetConnector {
    fn source_type(&self) -> SourceType {
        SourceType::GoogleSheets
    }

    fn description(&self) -> &str {
        "Read header rows and append submissions to a spreadsheet tab"
    }

    async fn read_schema(
        &self,
        config: &ConnectedSourceConfig,
    ) -> Result<ExternalSchemaDefinition, ConnectorError> {
        let header = self.header(config).await?;
        let fields = HeaderLayout::parse(&header).fields();
        debug!(
            spreadsheet_id = %config.source_id,
            sheet = config.sheet(),
            fields = fields.len(),
            "read schema"
        );
        Ok(ExternalSchemaDefinition { version: 1, fields })
    }

    async fn read_rows(
        &self,
        config: &ConnectedSourceConfig,
    ) -> Result<Vec<Record>, ConnectorError> {
        let rows = self
            .sheets
            .read_rows(&config.source_id, config.sheet(), RowSpan::All)
            .await?;
        if rows.len() < 2 {
            return Ok(Vec::new());
        }

        let layout = HeaderLayout::parse(&rows[0]);
        Ok(rows[1..]
            .iter()
            .filter(|r| r.iter().any(|c| !c.is_empty()))
            .map(|r| layout.record(r))
            .collect())
    }

    async fn append_row(
        &self,
        config: &ConnectedSourceConfig,
        row: &Record,
    ) -> Result<AppendedRow, ConnectorError> {
        let mut header = self.header(config).await?;
        let layout = HeaderLayout::parse(&header);
        if layout.columns.is_empty() {
            return Err(ConnectorError::MissingHeader);
        }

        let id_col = match layout.row_id_col {
            Some(col) => col,
            None => {
                let width = self
                    .sheets
                    .read_rows(&config.source_id, config.sheet(), RowSpan::All)
                    .await?
                    .iter()
                    .map(Vec::len)
                    .max()
                    .unwrap_or(0)
                    .max(header.len());
                header.resize(width, String::new());
                let col = header.len();
                header.push(ROW_ID_HEADER.to_string());
                self.sheets
                    .write_row(&config.source_id, config.sheet(), 1, header)
                    .await?;
                info!(
                    spreadsheet_id = %config.source_id,
                    sheet = config.sheet(),
                    "added row id column"
                );
                col
            }
        };

        let external_row_id = uuid::Uuid::new_v4().to_string();
        let values = layout.project(row, id_col, &external_row_id);
        let physical = self
            .sheets
            .append_row(&config.source_id, config.sheet(), values)
            .await?;
        debug!(
            spreadsheet_id = %config.source_id,
            sheet = config.sheet(),
            row = ?physical,
            external_row_id = %external_row_id,
            "appended row"
        );

        Ok(AppendedRow { external_row_id })
    }

    async fn update_row(
        &self,
        config: &ConnectedSourceConfig,
        external_row_id: &str,
        row: &Record,
    ) -> Result<(), ConnectorError> {
        let (layout, id_col, physical) = self.locate(config, external_row_id).await?;
        let values = layout.project(row, id_col, external_row_id);
        self.sheets
            .write_row(&config.source_id, config.sheet(), physical, values)
            .await
    }

    async fn delete_row(
        &self,
        config: &ConnectedSourceConfig,
        external_row_id: &str,
    ) -> Result<(), ConnectorError> {
        let (_, _, physical) = self.locate(config, external_row_id).await?;
        self.sheets
            .clear_row(&config.source_id, config.sheet(), physical)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets_api::MemorySheets;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn setup(rows: Vec<Vec<String>>) -> (Arc<MemorySheets>, SpreadsheetConnector) {
        let sheets = Arc::new(MemorySheets::new());
        sheets.put_sheet("book", "Sheet1", rows);
        let connector = SpreadsheetConnector::new(sheets.clone());
        (sheets, connector)
    }

    fn cfg() -> ConnectedSourceConfig {
        ConnectedSourceConfig::google_sheets("book", None)
    }

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::Text(v.to_string())))
            .collect()
    }

    #[test]
    fn test_normalize_examples() {
        let keys: Vec<String> = ["Full Name", "Age (yrs)", ""]
            .iter()
            .map(|h| normalize_key(h))
            .collect();
        assert_eq!(keys, vec!["full_name", "age_yrs", ""]);
        assert_eq!(normalize_key("  --Daily  Calories!! "), "daily_calories");
        assert_eq!(normalize_key("Café Visits"), "caf_visits");
    }

    #[test]
    fn test_normalize_idempotent() {
        for s in [
            "Full Name",
            "Age (yrs)",
            "",
            "___",
            "a__b",
            "Ünïcode Héader",
            "x1-y2_z3",
            "__row_id",
        ] {
            let once = normalize_key(s);
            assert_eq!(normalize_key(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[tokio::test]
    async fn test_read_schema_maps_header() {
        let (_, connector) = setup(vec![row(&["Full Name", "", "Age (yrs)"])]);
        let schema = connector.read_schema(&cfg()).await.unwrap();

        assert_eq!(schema.version, 1);
        let keys: Vec<&str> = schema.fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["full_name", "column_2", "age_yrs"]);
        assert_eq!(schema.fields[1].label, "Column 2");
        assert_eq!(schema.fields[1].column_ref.as_deref(), Some(""));
        assert!(schema
            .fields
            .iter()
            .all(|f| f.field_type == FieldType::String && !f.required));
    }

    #[tokio::test]
    async fn test_whitespace_header_keeps_label() {
        let (_, connector) = setup(vec![row(&[" ", "Name"])]);
        let schema = connector.read_schema(&cfg()).await.unwrap();

        assert_eq!(schema.fields[0].key, "column_1");
        assert_eq!(schema.fields[0].label, " ");
        assert_eq!(schema.fields[0].column_ref.as_deref(), Some(" "));
        assert_eq!(schema.fields[1].label, "Name");
    }

    #[tokio::test]
    async fn test_read_schema_empty_sheet() {
        let (_, connector) = setup(vec![]);
        let schema = connector.read_schema(&cfg()).await.unwrap();
        assert!(schema.fields.is_empty());
    }

    #[tokio::test]
    async fn test_read_rows_header_only_is_empty() {
        let (_, connector) = setup(vec![row(&["Name", "Age"])]);
        assert!(connector.read_rows(&cfg()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_rows_pads_short_rows() {
        let (_, connector) = setup(vec![
            row(&["Name", "Age", "Goal"]),
            row(&["Ada", "36"]),
            row(&["Grace", "", "Energy"]),
        ]);
        let rows = connector.read_rows(&cfg()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["goal"], FieldValue::Text(String::new()));
        assert_eq!(rows[1]["goal"], FieldValue::Text("Energy".into()));
    }

    #[tokio::test]
    async fn test_append_projects_into_column_order() {
        let (sheets, connector) = setup(vec![row(&["Full Name", "Age (yrs)", "Notes"])]);
        let appended = connector
            .append_row(&cfg(), &record(&[("age_yrs", "36"), ("full_name", "Ada")]))
            .await
            .unwrap();

        let rows = sheets.rows("book", "Sheet1");
        assert_eq!(rows[0].last().map(String::as_str), Some(ROW_ID_HEADER));
        assert_eq!(rows[1][..3], row(&["Ada", "36", ""])[..]);
        assert_eq!(rows[1][3], appended.external_row_id);

        // The identity column stays out of the schema.
        let schema = connector.read_schema(&cfg()).await.unwrap();
        assert_eq!(schema.fields.len(), 3);
    }

    #[tokio::test]
    async fn test_row_id_column_skips_unlabeled_data_columns() {
        let (sheets, connector) = setup(vec![
            row(&["Name"]),
            row(&["Ada", "stray", "note"]),
        ]);
        let appended = connector
            .append_row(&cfg(), &record(&[("name", "Grace")]))
            .await
            .unwrap();

        let rows = sheets.rows("book", "Sheet1");
        assert_eq!(rows[0][3], ROW_ID_HEADER);
        assert_eq!(rows[1][..3], row(&["Ada", "stray", "note"])[..]);
        assert_eq!(rows[2][0], "Grace");
        assert_eq!(rows[2][3], appended.external_row_id);

        connector
            .update_row(&cfg(), &appended.external_row_id, &record(&[("name", "Grace H.")]))
            .await
            .unwrap();
        let rows = sheets.rows("book", "Sheet1");
        assert_eq!(rows[1][..3], row(&["Ada", "stray", "note"])[..]);
        assert_eq!(rows[2][0], "Grace H.");
    }

    #[tokio::test]
    async fn test_append_twice_appends_twice() {
        let (sheets, connector) = setup(vec![row(&["Name"])]);
        let a = connector.append_row(&cfg(), &record(&[("name", "x")])).await.unwrap();
        let b = connector.append_row(&cfg(), &record(&[("name", "x")])).await.unwrap();
        assert_ne!(a.external_row_id, b.external_row_id);
        assert_eq!(sheets.rows("book", "Sheet1").len(), 3);
    }

    #[tokio::test]
    async fn test_append_without_header_fails() {
        let (_, connector) = setup(vec![]);
        let err = connector
            .append_row(&cfg(), &record(&[("name", "x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::MissingHeader));
    }

    #[tokio::test]
    async fn test_update_targets_only_identified_row() {
        let (sheets, connector) = setup(vec![row(&["Name", "Goal"])]);
        let first = connector
            .append_row(&cfg(), &record(&[("name", "Ada"), ("goal", "Strength")]))
            .await
            .unwrap();
        let second = connector
            .append_row(&cfg(), &record(&[("name", "Grace"), ("goal", "Energy")]))
            .await
            .unwrap();

        connector
            .update_row(
                &cfg(),
                &first.external_row_id,
                &record(&[("name", "Ada L."), ("goal", "Endurance")]),
            )
            .await
            .unwrap();

        let rows = sheets.rows("book", "Sheet1");
        assert_eq!(rows[1][..2], row(&["Ada L.", "Endurance"])[..]);
        assert_eq!(rows[1][2], first.external_row_id);
        assert_eq!(rows[2][..2], row(&["Grace", "Energy"])[..]);
        assert_eq!(rows[2][2], second.external_row_id);
    }

    #[tokio::test]
    async fn test_delete_blanks_only_identified_row() {
        let (_, connector) = setup(vec![row(&["Name"])]);
        let first = connector.append_row(&cfg(), &record(&[("name", "Ada")])).await.unwrap();
        connector.append_row(&cfg(), &record(&[("name", "Grace")])).await.unwrap();

        connector.delete_row(&cfg(), &first.external_row_id).await.unwrap();

        let rows = connector.read_rows(&cfg()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], FieldValue::Text("Grace".into()));
    }

    #[tokio::test]
    async fn test_unknown_row_id() {
        let (_, connector) = setup(vec![row(&["Name"])]);
        let err = connector.delete_row(&cfg(), "nope").await.unwrap_err();
        assert!(matches!(err, ConnectorError::RowNotFound(_)));

        connector.append_row(&cfg(), &record(&[("name", "Ada")])).await.unwrap();
        let err = connector
            .update_row(&cfg(), "nope", &record(&[("name", "x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::RowNotFound(_)));
    }

    #[tokio::test]
    async fn test_colliding_keys_last_column_wins_on_read() {
        let (_, connector) = setup(vec![row(&["E-mail", "E mail"]), row(&["a@x", "b@x"])]);
        let schema = connector.read_schema(&cfg()).await.unwrap();
        assert_eq!(schema.fields[0].key, schema.fields[1].key);

        let rows = connector.read_rows(&cfg()).await.unwrap();
        assert_eq!(rows[0]["e_mail"], FieldValue::Text("b@x".into()));
    }
}
