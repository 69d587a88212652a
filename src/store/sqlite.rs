//! SQLite-backed [`SchemaRepository`] and [`FormStore`].
//!
//! Structured fields (`fields`, `schema`, `response`) are stored as JSON
//! text columns and decoded on read.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{
    now_rfc3339, Form, FormUpdate, NewForm, NewSchemaDefinition, Response, SchemaDefinitionDoc,
    SchemaField,
};

use super::{FormStore, SchemaRepository, StoreError};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Translate a UNIQUE violation on `(connected_source_id, version)`.
fn version_conflict(err: sqlx::Error, source_id: &str, version: i64) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::VersionConflict {
            source_id: source_id.to_string(),
            version,
        },
        _ => StoreError::Database(err),
    }
}

fn schema_from_row(row: &SqliteRow) -> Result<SchemaDefinitionDoc, StoreError> {
    let fields_json: String = row.try_get("fields_json")?;
    Ok(SchemaDefinitionDoc {
        id: row.try_get("id")?,
        connected_source_id: row.try_get("connected_source_id")?,
        version: row.try_get("version")?,
        fields: serde_json::from_str(&fields_json)?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn form_from_row(row: &SqliteRow) -> Result<Form, StoreError> {
    let schema_json: String = row.try_get("schema_json")?;
    Ok(Form {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        schema: serde_json::from_str(&schema_json)?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        is_active: row.try_get("is_active")?,
    })
}

fn response_from_row(row: &SqliteRow) -> Result<Response, StoreError> {
    let response_json: String = row.try_get("response_json")?;
    Ok(Response {
        id: row.try_get("id")?,
        form_id: row.try_get("form_id")?,
        user_id: row.try_get("user_id")?,
        response: serde_json::from_str(&response_json)?,
        submitted_at: row.try_get("submitted_at")?,
    })
}

const SCHEMA_COLUMNS: &str = "id, connected_source_id, version, fields_json, created_by, created_at";
const FORM_COLUMNS: &str =
    "id, title, description, schema_json, created_by, created_at, updated_at, is_active";

#[async_trait]
impl SchemaRepository for SqliteStore {
    async fn get_latest_by_source(
        &self,
        connected_source_id: &str,
    ) -> Result<Option<SchemaDefinitionDoc>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SCHEMA_COLUMNS} FROM schema_definitions
             WHERE connected_source_id = ? ORDER BY version DESC LIMIT 1"
        ))
        .bind(connected_source_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(schema_from_row).transpose()
    }

    async fn create(&self, def: NewSchemaDefinition) -> Result<SchemaDefinitionDoc, StoreError> {
        let id = new_id();
        let fields_json = serde_json::to_string(&def.fields)?;

        sqlx::query(
            "INSERT INTO schema_definitions
                 (id, connected_source_id, version, fields_json, created_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&def.connected_source_id)
        .bind(def.version)
        .bind(&fields_json)
        .bind(&def.created_by)
        .bind(&def.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| version_conflict(e, &def.connected_source_id, def.version))?;

        Ok(SchemaDefinitionDoc {
            id,
            connected_source_id: def.connected_source_id,
            version: def.version,
            fields: def.fields,
            created_by: def.created_by,
            created_at: def.created_at,
        })
    }

    async fn create_next_version(
        &self,
        connected_source_id: &str,
        fields: Vec<SchemaField>,
        created_by: &str,
    ) -> Result<SchemaDefinitionDoc, StoreError> {
        let id = new_id();
        let created_at = now_rfc3339();
        let fields_json = serde_json::to_string(&fields)?;

        // One statement: SQLite serializes writers, so the MAX it reads is
        // the MAX it inserts against.
        let version: i64 = sqlx::query_scalar(
            "INSERT INTO schema_definitions
                 (id, connected_source_id, version, fields_json, created_by, created_at)
             SELECT ?, ?, COALESCE(MAX(version), 0) + 1, ?, ?, ?
               FROM schema_definitions WHERE connected_source_id = ?
             RETURNING version",
        )
        .bind(&id)
        .bind(connected_source_id)
        .bind(&fields_json)
        .bind(created_by)
        .bind(&created_at)
        .bind(connected_source_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| version_conflict(e, connected_source_id, 0))?;

        Ok(SchemaDefinitionDoc {
            id,
            connected_source_id: connected_source_id.to_string(),
            version,
            fields,
            created_by: created_by.to_string(),
            created_at,
        })
    }

    async fn list_versions(
        &self,
        connected_source_id: &str,
    ) -> Result<Vec<SchemaDefinitionDoc>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SCHEMA_COLUMNS} FROM schema_definitions
             WHERE connected_source_id = ? ORDER BY version ASC"
        ))
        .bind(connected_source_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(schema_from_row).collect()
    }
}

#[async_trait]
impl FormStore for SqliteStore {
    async fn list_forms(&self, active_only: bool) -> Result<Vec<Form>, StoreError> {
        let sql = if active_only {
            format!("SELECT {FORM_COLUMNS} FROM forms WHERE is_active = 1 ORDER BY created_at, rowid")
        } else {
            format!("SELECT {FORM_COLUMNS} FROM forms ORDER BY created_at, rowid")
        };
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(form_from_row).collect()
    }

    async fn get_form(&self, id: &str) -> Result<Option<Form>, StoreError> {
        let row = sqlx::query(&format!("SELECT {FORM_COLUMNS} FROM forms WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(form_from_row).transpose()
    }

    async fn create_form(&self, form: NewForm, created_by: &str) -> Result<Form, StoreError> {
        let id = new_id();
        let now = now_rfc3339();
        let schema_json = serde_json::to_string(&form.schema)?;

        sqlx::query(
            "INSERT INTO forms
                 (id, title, description, schema_json, created_by, created_at, updated_at, is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(&id)
        .bind(&form.title)
        .bind(&form.description)
        .bind(&schema_json)
        .bind(created_by)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(Form {
            id,
            title: form.title,
            description: form.description,
            schema: form.schema,
            created_by: created_by.to_string(),
            created_at: now.clone(),
            updated_at: now,
            is_active: true,
        })
    }

    async fn update_form(&self, id: &str, update: FormUpdate) -> Result<Option<Form>, StoreError> {
        let schema_json = serde_json::to_string(&update.schema)?;

        let result = sqlx::query(
            "UPDATE forms SET
                 title = ?,
                 description = ?,
                 schema_json = ?,
                 is_active = COALESCE(?, is_active),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(&update.title)
        .bind(&update.description)
        .bind(&schema_json)
        .bind(update.is_active)
        .bind(now_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_form(id).await
    }

    async fn delete_form(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM forms WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_response(
        &self,
        form_id: &str,
        user_id: &str,
        response: Map<String, Value>,
    ) -> Result<Response, StoreError> {
        let id = new_id();
        let submitted_at = now_rfc3339();
        let response_json = serde_json::to_string(&response)?;

        sqlx::query(
            "INSERT INTO responses (id, form_id, user_id, response_json, submitted_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(form_id)
        .bind(user_id)
        .bind(&response_json)
        .bind(&submitted_at)
        .execute(&self.pool)
        .await?;

        Ok(Response {
            id,
            form_id: form_id.to_string(),
            user_id: user_id.to_string(),
            response,
            submitted_at,
        })
    }

    async fn list_responses(&self, form_id: &str) -> Result<Vec<Response>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, form_id, user_id, response_json, submitted_at
             FROM responses WHERE form_id = ? ORDER BY submitted_at, rowid",
        )
        .bind(form_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(response_from_row).collect()
    }

    async fn count_responses(&self, form_id: &str) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM responses WHERE form_id = ?")
            .bind(form_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations;
    use serde_json::json;
    use sqlx::sqlite::SqliteConnectOptions;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn test_store(tmp: &TempDir) -> SqliteStore {
        let options = SqliteConnectOptions::new()
            .filename(tmp.path().join("forms.sqlite"))
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn field(key: &str) -> SchemaField {
        serde_json::from_value(json!({ "key": key, "label": key })).unwrap()
    }

    #[tokio::test]
    async fn test_versions_increment_from_one() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp).await;

        let v1 = store
            .create_next_version("sheet", vec![field("name")], "admin")
            .await
            .unwrap();
        let v2 = store
            .create_next_version("sheet", vec![field("name"), field("age")], "admin")
            .await
            .unwrap();
        assert_eq!((v1.version, v2.version), (1, 2));

        let latest = store.get_latest_by_source("sheet").await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.fields.len(), 2);

        let versions: Vec<i64> = store
            .list_versions("sheet")
            .await
            .unwrap()
            .iter()
            .map(|d| d.version)
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_version_is_conflict() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp).await;
        let def = NewSchemaDefinition {
            connected_source_id: "sheet".into(),
            version: 1,
            fields: vec![field("name")],
            created_by: "admin".into(),
            created_at: now_rfc3339(),
        };
        store.create(def.clone()).await.unwrap();
        let err = store.create(def).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { version: 1, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_saves_get_distinct_versions() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(test_store(&tmp).await);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_next_version("sheet", vec![], "admin")
                    .await
                    .unwrap()
                    .version
            }));
        }
        let mut versions = Vec::new();
        for h in handles {
            versions.push(h.await.unwrap());
        }
        versions.sort();
        assert_eq!(versions, (1..=8).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_form_roundtrip_and_active_filter() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp).await;

        let a = store
            .create_form(
                NewForm {
                    title: "A".into(),
                    description: "first".into(),
                    schema: json!({ "elements": [{ "name": "q1" }] }),
                },
                "admin-1",
            )
            .await
            .unwrap();
        let b = store
            .create_form(
                NewForm {
                    title: "B".into(),
                    description: String::new(),
                    schema: json!({}),
                },
                "admin-1",
            )
            .await
            .unwrap();

        let fetched = store.get_form(&a.id).await.unwrap().unwrap();
        assert_eq!(fetched.schema["elements"][0]["name"], "q1");
        assert!(fetched.is_active);

        store
            .update_form(
                &b.id,
                FormUpdate {
                    title: "B".into(),
                    description: String::new(),
                    schema: json!({}),
                    is_active: Some(false),
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.list_forms(false).await.unwrap().len(), 2);
        let active = store.list_forms(true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);

        assert!(store
            .update_form(
                "missing",
                FormUpdate {
                    title: "x".into(),
                    description: String::new(),
                    schema: json!({}),
                    is_active: None,
                },
            )
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_responses_listed_in_order_and_counted() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp).await;

        for i in 0..3 {
            let mut body = Map::new();
            body.insert("q1".into(), json!(i));
            store.create_response("form-1", "user-1", body).await.unwrap();
        }
        store
            .create_response("form-2", "user-1", Map::new())
            .await
            .unwrap();

        let responses = store.list_responses("form-1").await.unwrap();
        let order: Vec<i64> = responses
            .iter()
            .map(|r| r.response["q1"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(store.count_responses("form-1").await.unwrap(), 3);
        assert_eq!(store.count_responses("nope").await.unwrap(), 0);
    }
}
