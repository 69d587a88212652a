//! In-memory [`SchemaRepository`] and [`FormStore`] for tests.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. `create_next_version` computes
//! and inserts under one write lock, so it is atomic like the SQLite
//! statement it stands in for.

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::models::{
    now_rfc3339, Form, FormUpdate, NewForm, NewSchemaDefinition, Response, SchemaDefinitionDoc,
    SchemaField,
};

use super::{FormStore, SchemaRepository, StoreError};

#[derive(Default)]
pub struct InMemoryStore {
    schemas: RwLock<Vec<SchemaDefinitionDoc>>,
    forms: RwLock<Vec<Form>>,
    responses: RwLock<Vec<Response>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl SchemaRepository for InMemoryStore {
    async fn get_latest_by_source(
        &self,
        connected_source_id: &str,
    ) -> Result<Option<SchemaDefinitionDoc>, StoreError> {
        let schemas = self.schemas.read().unwrap();
        Ok(schemas
            .iter()
            .filter(|d| d.connected_source_id == connected_source_id)
            .max_by_key(|d| d.version)
            .cloned())
    }

    async fn create(&self, def: NewSchemaDefinition) -> Result<SchemaDefinitionDoc, StoreError> {
        let mut schemas = self.schemas.write().unwrap();
        if schemas
            .iter()
            .any(|d| d.connected_source_id == def.connected_source_id && d.version == def.version)
        {
            return Err(StoreError::VersionConflict {
                source_id: def.connected_source_id,
                version: def.version,
            });
        }
        let doc = SchemaDefinitionDoc {
            id: new_id(),
            connected_source_id: def.connected_source_id,
            version: def.version,
            fields: def.fields,
            created_by: def.created_by,
            created_at: def.created_at,
        };
        schemas.push(doc.clone());
        Ok(doc)
    }

    async fn create_next_version(
        &self,
        connected_source_id: &str,
        fields: Vec<SchemaField>,
        created_by: &str,
    ) -> Result<SchemaDefinitionDoc, StoreError> {
        let mut schemas = self.schemas.write().unwrap();
        let version = schemas
            .iter()
            .filter(|d| d.connected_source_id == connected_source_id)
            .map(|d| d.version)
            .max()
            .unwrap_or(0)
            + 1;
        let doc = SchemaDefinitionDoc {
            id: new_id(),
            connected_source_id: connected_source_id.to_string(),
            version,
            fields,
            created_by: created_by.to_string(),
            created_at: now_rfc3339(),
        };
        schemas.push(doc.clone());
        Ok(doc)
    }

    async fn list_versions(
        &self,
        connected_source_id: &str,
    ) -> Result<Vec<SchemaDefinitionDoc>, StoreError> {
        let schemas = self.schemas.read().unwrap();
        let mut docs: Vec<SchemaDefinitionDoc> = schemas
            .iter()
            .filter(|d| d.connected_source_id == connected_source_id)
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.version);
        Ok(docs)
    }
}

#[async_trait]
impl FormStore for InMemoryStore {
    async fn list_forms(&self, active_only: bool) -> Result<Vec<Form>, StoreError> {
        let forms = self.forms.read().unwrap();
        Ok(forms
            .iter()
            .filter(|f| !active_only || f.is_active)
            .cloned()
            .collect())
    }

    async fn get_form(&self, id: &str) -> Result<Option<Form>, StoreError> {
        let forms = self.forms.read().unwrap();
        Ok(forms.iter().find(|f| f.id == id).cloned())
    }

    async fn create_form(&self, form: NewForm, created_by: &str) -> Result<Form, StoreError> {
        let now = now_rfc3339();
        let form = Form {
            id: new_id(),
            title: form.title,
            description: form.description,
            schema: form.schema,
            created_by: created_by.to_string(),
            created_at: now.clone(),
            updated_at: now,
            is_active: true,
        };
        self.forms.write().unwrap().push(form.clone());
        Ok(form)
    }

    async fn update_form(&self, id: &str, update: FormUpdate) -> Result<Option<Form>, StoreError> {
        let mut forms = self.forms.write().unwrap();
        let Some(form) = forms.iter_mut().find(|f| f.id == id) else {
            return Ok(None);
        };
        form.title = update.title;
        form.description = update.description;
        form.schema = update.schema;
        if let Some(active) = update.is_active {
            form.is_active = active;
        }
        form.updated_at = now_rfc3339();
        Ok(Some(form.clone()))
    }

    async fn delete_form(&self, id: &str) -> Result<bool, StoreError> {
        let mut forms = self.forms.write().unwrap();
        let before = forms.len();
        forms.retain(|f| f.id != id);
        Ok(forms.len() != before)
    }

    async fn create_response(
        &self,
        form_id: &str,
        user_id: &str,
        response: Map<String, Value>,
    ) -> Result<Response, StoreError> {
        let response = Response {
            id: new_id(),
            form_id: form_id.to_string(),
            user_id: user_id.to_string(),
            response,
            submitted_at: now_rfc3339(),
        };
        self.responses.write().unwrap().push(response.clone());
        Ok(response)
    }

    async fn list_responses(&self, form_id: &str) -> Result<Vec<Response>, StoreError> {
        let responses = self.responses.read().unwrap();
        Ok(responses
            .iter()
            .filter(|r| r.form_id == form_id)
            .cloned()
            .collect())
    }

    async fn count_responses(&self, form_id: &str) -> Result<i64, StoreError> {
        let responses = self.responses.read().unwrap();
        Ok(responses.iter().filter(|r| r.form_id == form_id).count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sequential_versions_have_no_gaps() {
        let store = InMemoryStore::new();
        for expected in 1..=4 {
            let doc = store
                .create_next_version("sheet-a", vec![], "admin")
                .await
                .unwrap();
            assert_eq!(doc.version, expected);
        }
        // Versions are per source.
        let other = store
            .create_next_version("sheet-b", vec![], "admin")
            .await
            .unwrap();
        assert_eq!(other.version, 1);

        let latest = store.get_latest_by_source("sheet-a").await.unwrap().unwrap();
        assert_eq!(latest.version, 4);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_version() {
        let store = InMemoryStore::new();
        let def = NewSchemaDefinition {
            connected_source_id: "sheet".into(),
            version: 1,
            fields: vec![],
            created_by: "admin".into(),
            created_at: now_rfc3339(),
        };
        store.create(def.clone()).await.unwrap();
        let err = store.create(def).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { version: 1, .. }));
    }

    #[tokio::test]
    async fn test_latest_of_unknown_source_is_none() {
        let store = InMemoryStore::new();
        assert!(store.get_latest_by_source("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_form_update_and_delete() {
        let store = InMemoryStore::new();
        let form = store
            .create_form(
                NewForm {
                    title: "Intake".into(),
                    description: "Weekly".into(),
                    schema: json!({ "pages": [] }),
                },
                "admin",
            )
            .await
            .unwrap();
        assert!(form.is_active);

        let updated = store
            .update_form(
                &form.id,
                FormUpdate {
                    title: "Intake v2".into(),
                    description: "Weekly".into(),
                    schema: json!({ "pages": [1] }),
                    is_active: Some(false),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "Intake v2");
        assert!(!updated.is_active);
        assert!(store.list_forms(true).await.unwrap().is_empty());

        assert!(store.delete_form(&form.id).await.unwrap());
        assert!(!store.delete_form(&form.id).await.unwrap());
    }
}
