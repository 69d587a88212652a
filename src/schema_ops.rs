//! Schema import, save, and spreadsheet submission.
//!
//! These are the operations behind `fh schema ...` and the `/api/schema*`
//! and `/api/forms/submit` routes. Import reads a header row through the
//! connector and persists nothing; save appends a new version to the
//! schema repository.

use anyhow::Context;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{Config, ServiceAccount};
use crate::connector_sheets::normalize_key;
use crate::models::{ConnectedSourceConfig, SchemaDefinitionDoc, SchemaField};
use crate::sheets_api::GoogleSheetsClient;
use crate::store::sqlite::SqliteStore;
use crate::store::{SchemaRepository, StoreError};
use crate::traits::{AppendedRow, ConnectorError, ConnectorRegistry};
use crate::values::{validate_submission, Record, ValidationErrors};
use crate::{db, migrate};

#[derive(Debug, thiserror::Error)]
pub enum SchemaOpError {
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read the header row of a spreadsheet tab as a field list.
pub async fn import_schema(
    connectors: &ConnectorRegistry,
    source: &ConnectedSourceConfig,
) -> Result<Vec<SchemaField>, SchemaOpError> {
    if source.source_id.trim().is_empty() {
        return Err(SchemaOpError::Invalid("spreadsheetId required".to_string()));
    }
    let connector = connectors.for_source(source)?;
    let schema = connector.read_schema(source).await?;
    info!(
        source = %source.source_id,
        sheet = source.sheet(),
        fields = schema.fields.len(),
        "schema imported"
    );
    Ok(schema.fields)
}

/// Persist `fields` as the next schema version for `source_id`.
pub async fn save_schema(
    repo: &dyn SchemaRepository,
    source_id: &str,
    fields: Vec<SchemaField>,
    created_by: &str,
) -> Result<SchemaDefinitionDoc, SchemaOpError> {
    if source_id.trim().is_empty() {
        return Err(SchemaOpError::Invalid("spreadsheetId required".to_string()));
    }
    if let Some(pos) = fields.iter().position(|f| f.key.trim().is_empty()) {
        return Err(SchemaOpError::Invalid(format!(
            "field {} has an empty key",
            pos + 1
        )));
    }
    let doc = repo
        .create_next_version(source_id, fields, created_by)
        .await?;
    info!(
        source = %source_id,
        version = doc.version,
        created_by,
        "schema version saved"
    );
    Ok(doc)
}

/// Latest persisted fields for a source and their version, or an empty
/// list when nothing has been saved.
pub async fn latest_fields(
    repo: &dyn SchemaRepository,
    source_id: &str,
) -> Result<(Vec<SchemaField>, Option<i64>), SchemaOpError> {
    Ok(match repo.get_latest_by_source(source_id).await? {
        Some(doc) => (doc.fields, Some(doc.version)),
        None => (Vec::new(), None),
    })
}

/// Re-key a validated record from field keys to the keys the connector
/// derives from header cells (via `columnRef`).
fn record_for_columns(fields: &[SchemaField], record: Record) -> Record {
    let mut out = Record::new();
    for (key, value) in record {
        let column_key = fields
            .iter()
            .find(|f| f.key == key)
            .and_then(|f| f.column_ref.as_deref())
            .map(normalize_key)
            .filter(|k| !k.is_empty())
            .unwrap_or(key);
        out.insert(column_key, value);
    }
    out
}

/// Validate a submission and append it as a spreadsheet row.
///
/// Validation uses the latest persisted schema for the source; when none
/// exists the header-derived fields are used instead.
pub async fn submit_row(
    connectors: &ConnectorRegistry,
    repo: &dyn SchemaRepository,
    source: &ConnectedSourceConfig,
    payload: &Map<String, Value>,
) -> Result<AppendedRow, SchemaOpError> {
    let connector = connectors.for_source(source)?;
    let fields = match repo.get_latest_by_source(&source.source_id).await? {
        Some(doc) => {
            debug!(version = doc.version, "validating against saved schema");
            doc.fields
        }
        None => connector.read_schema(source).await?.fields,
    };

    let record = validate_submission(&fields, payload)?;
    let appended = connector
        .append_row(source, &record_for_columns(&fields, record))
        .await?;
    info!(
        source = %source.source_id,
        row = %appended.external_row_id,
        "row appended"
    );
    Ok(appended)
}

// ═══════════════════════════════════════════════════════════════════════
// CLI entry points
// ═══════════════════════════════════════════════════════════════════════

/// `fh schema import`: print the header-derived fields and optionally
/// save them as a new version.
pub async fn run_import(
    config: &Config,
    spreadsheet_id: &str,
    sheet: Option<&str>,
    save_as: Option<&str>,
) -> anyhow::Result<()> {
    let sheets = Arc::new(GoogleSheetsClient::new(
        config.sheets.clone(),
        ServiceAccount::from_env(),
    )?);
    let connectors = ConnectorRegistry::with_sheets(sheets);
    let source = ConnectedSourceConfig::google_sheets(
        spreadsheet_id,
        Some(config.sheets.sheet_or_default(sheet)),
    );

    let fields = import_schema(&connectors, &source)
        .await
        .with_context(|| format!("failed to import schema from {}", spreadsheet_id))?;
    println!("{}", serde_json::to_string_pretty(&fields)?);

    if let Some(created_by) = save_as {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        let store = SqliteStore::new(pool);
        let doc = save_schema(&store, spreadsheet_id, fields, created_by).await?;
        println!("saved version {} ({})", doc.version, doc.id);
    }
    Ok(())
}

/// `fh schema show`: print the latest saved version, or every version.
pub async fn run_show(config: &Config, spreadsheet_id: &str, all: bool) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let store = SqliteStore::new(pool);

    if all {
        let versions = store.list_versions(spreadsheet_id).await?;
        if versions.is_empty() {
            println!("no schema saved for {}", spreadsheet_id);
        }
        for doc in versions {
            println!(
                "v{}  {} fields  by {}  at {}",
                doc.version,
                doc.fields.len(),
                doc.created_by,
                doc.created_at
            );
        }
        return Ok(());
    }

    match store.get_latest_by_source(spreadsheet_id).await? {
        Some(doc) => {
            println!("version: {}", doc.version);
            println!("{}", serde_json::to_string_pretty(&doc.fields)?);
        }
        None => println!("no schema saved for {}", spreadsheet_id),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets_api::MemorySheets;
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    fn sheet_with(header: &[&str]) -> (Arc<MemorySheets>, ConnectorRegistry) {
        let sheets = Arc::new(MemorySheets::new());
        sheets.put_sheet(
            "sheet-1",
            "Sheet1",
            vec![header.iter().map(|s| s.to_string()).collect()],
        );
        let registry = ConnectorRegistry::with_sheets(sheets.clone());
        (sheets, registry)
    }

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_import_then_save_increments_version() {
        let (_, registry) = sheet_with(&["Full Name", "Age (yrs)"]);
        let store = InMemoryStore::new();
        let source = ConnectedSourceConfig::google_sheets("sheet-1", None);

        let fields = import_schema(&registry, &source).await.unwrap();
        let keys: Vec<&str> = fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["full_name", "age_yrs"]);

        let v1 = save_schema(&store, "sheet-1", fields.clone(), "admin")
            .await
            .unwrap();
        let v2 = save_schema(&store, "sheet-1", fields, "admin").await.unwrap();
        assert_eq!((v1.version, v2.version), (1, 2));

        let (latest, version) = latest_fields(&store, "sheet-1").await.unwrap();
        assert_eq!(version, Some(2));
        assert_eq!(latest.len(), 2);
    }

    #[tokio::test]
    async fn test_save_rejects_blank_source() {
        let store = InMemoryStore::new();
        let err = save_schema(&store, " ", vec![], "admin").await.unwrap_err();
        assert!(matches!(err, SchemaOpError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_submit_uses_saved_schema_types() {
        let (sheets, registry) = sheet_with(&["Full Name", "Age (yrs)"]);
        let store = InMemoryStore::new();
        let source = ConnectedSourceConfig::google_sheets("sheet-1", None);

        let mut fields = import_schema(&registry, &source).await.unwrap();
        fields[0].required = true;
        fields[1].field_type = crate::models::FieldType::Number;
        // Renamed key still lands in the "Age (yrs)" column.
        fields[1].key = "age".into();
        save_schema(&store, "sheet-1", fields, "admin").await.unwrap();

        let err = submit_row(&registry, &store, &source, &payload(json!({ "age": "x" })))
            .await
            .unwrap_err();
        match err {
            SchemaOpError::Validation(errors) => assert_eq!(errors.0.len(), 2),
            other => panic!("unexpected: {:?}", other),
        }

        submit_row(
            &registry,
            &store,
            &source,
            &payload(json!({ "full_name": "Ada", "age": 36 })),
        )
        .await
        .unwrap();
        let rows = sheets.rows("sheet-1", "Sheet1");
        assert_eq!(rows[1][0], "Ada");
        assert_eq!(rows[1][1], "36");
    }

    #[tokio::test]
    async fn test_submit_without_saved_schema_uses_header() {
        let (sheets, registry) = sheet_with(&["Name", "Notes"]);
        let store = InMemoryStore::new();
        let source = ConnectedSourceConfig::google_sheets("sheet-1", None);

        let appended = submit_row(
            &registry,
            &store,
            &source,
            &payload(json!({ "name": "Grace" })),
        )
        .await
        .unwrap();
        assert!(!appended.external_row_id.is_empty());
        assert_eq!(sheets.rows("sheet-1", "Sheet1")[1][0], "Grace");

        let err = submit_row(&registry, &store, &source, &payload(json!({ "other": 1 })))
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaOpError::Validation(_)));
    }
}
