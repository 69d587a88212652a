//! Storage abstraction for forms, responses, and schema versions.
//!
//! Two traits split the document store by concern:
//!
//! | Trait | Collection(s) |
//! |-------|---------------|
//! | [`SchemaRepository`] | append-only schema versions per connected source |
//! | [`FormStore`] | form definitions and submitted responses |
//!
//! [`sqlite::SqliteStore`] backs the server; [`memory::InMemoryStore`]
//! implements the same traits for tests.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::models::{
    Form, FormUpdate, NewForm, NewSchemaDefinition, Response, SchemaDefinitionDoc, SchemaField,
};
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer already stored this version for the source.
    #[error("schema version {version} already exists for source '{source_id}'")]
    VersionConflict { source_id: String, version: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored document is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Append-only log of schema versions keyed by connected source id.
#[async_trait]
pub trait SchemaRepository: Send + Sync {
    /// The highest version stored for `connected_source_id`, if any.
    async fn get_latest_by_source(
        &self,
        connected_source_id: &str,
    ) -> Result<Option<SchemaDefinitionDoc>, StoreError>;

    /// Insert a definition whose version the caller computed.
    ///
    /// Fails with [`StoreError::VersionConflict`] when that version already
    /// exists, so a lost read-then-write race never produces a duplicate.
    async fn create(&self, def: NewSchemaDefinition) -> Result<SchemaDefinitionDoc, StoreError>;

    /// Insert the next version (`max + 1`, starting at 1) atomically.
    async fn create_next_version(
        &self,
        connected_source_id: &str,
        fields: Vec<SchemaField>,
        created_by: &str,
    ) -> Result<SchemaDefinitionDoc, StoreError>;

    /// All versions for a source in ascending order.
    async fn list_versions(
        &self,
        connected_source_id: &str,
    ) -> Result<Vec<SchemaDefinitionDoc>, StoreError>;
}

/// Form definitions and their responses.
#[async_trait]
pub trait FormStore: Send + Sync {
    /// All forms, oldest first; only active ones when `active_only`.
    async fn list_forms(&self, active_only: bool) -> Result<Vec<Form>, StoreError>;

    async fn get_form(&self, id: &str) -> Result<Option<Form>, StoreError>;

    async fn create_form(&self, form: NewForm, created_by: &str) -> Result<Form, StoreError>;

    /// Replace title, description, and schema (and `isActive` when given).
    /// Returns `None` when the form does not exist.
    async fn update_form(&self, id: &str, update: FormUpdate) -> Result<Option<Form>, StoreError>;

    /// Remove a form. Returns `false` when it did not exist.
    async fn delete_form(&self, id: &str) -> Result<bool, StoreError>;

    async fn create_response(
        &self,
        form_id: &str,
        user_id: &str,
        response: Map<String, Value>,
    ) -> Result<Response, StoreError>;

    /// Responses for a form in submission order.
    async fn list_responses(&self, form_id: &str) -> Result<Vec<Response>, StoreError>;

    async fn count_responses(&self, form_id: &str) -> Result<i64, StoreError>;
}
