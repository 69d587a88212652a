//! Idempotent schema creation for the document store.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Connect and migrate; used by `fh init`.
pub async fn init_database(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS forms (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            schema_json TEXT NOT NULL DEFAULT 'null',
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS responses (
            id TEXT PRIMARY KEY,
            form_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            response_json TEXT NOT NULL DEFAULT '{}',
            submitted_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Versions are unique per source; concurrent writers that compute the
    // same version lose at this constraint.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_definitions (
            id TEXT PRIMARY KEY,
            connected_source_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            fields_json TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(connected_source_id, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_responses_form_id ON responses(form_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_forms_active ON forms(is_active)")
        .execute(pool)
        .await?;

    tracing::debug!("migrations applied");
    Ok(())
}
