//! Form and response rules shared by the CLI and the HTTP server.
//!
//! The store itself is permissive; the checks that make a submission or an
//! export legal live here so every entry point applies them the same way.

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::models::{Form, FormUpdate, NewForm, NewResponse, Response};
use crate::store::{FormStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("{0}")]
    Invalid(String),
    #[error("form not found")]
    NotFound,
    #[error("form not found or inactive")]
    Inactive,
    #[error("no responses found for this form")]
    NoResponses,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A form with the number of responses it has received.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSummary {
    #[serde(flatten)]
    pub form: Form,
    pub response_count: i64,
}

fn check_form_fields(title: &str, description: &str, schema: &Value) -> Result<(), FormError> {
    let mut missing = Vec::new();
    if title.trim().is_empty() {
        missing.push("title");
    }
    if description.trim().is_empty() {
        missing.push("description");
    }
    if schema.is_null() {
        missing.push("schema");
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(FormError::Invalid(format!(
            "missing required fields: {}",
            missing.join(", ")
        )))
    }
}

pub async fn create_form(
    store: &dyn FormStore,
    form: NewForm,
    created_by: &str,
) -> Result<Form, FormError> {
    check_form_fields(&form.title, &form.description, &form.schema)?;
    let form = store.create_form(form, created_by).await?;
    info!(form_id = %form.id, created_by, "form created");
    Ok(form)
}

/// Replace a form's title, description, and schema.
pub async fn update_form(
    store: &dyn FormStore,
    id: &str,
    update: FormUpdate,
) -> Result<Form, FormError> {
    check_form_fields(&update.title, &update.description, &update.schema)?;
    store
        .update_form(id, update)
        .await?
        .ok_or(FormError::NotFound)
}

pub async fn delete_form(store: &dyn FormStore, id: &str) -> Result<(), FormError> {
    if store.delete_form(id).await? {
        info!(form_id = %id, "form deleted");
        Ok(())
    } else {
        Err(FormError::NotFound)
    }
}

/// Store a response after checking that its form exists and is active.
///
/// Inactive and missing forms are indistinguishable to the caller, and in
/// both cases no response is written.
pub async fn submit_response(
    store: &dyn FormStore,
    user_id: &str,
    submission: NewResponse,
) -> Result<Response, FormError> {
    let form_id = submission.form_id.trim();
    let (false, Some(response)) = (form_id.is_empty(), submission.response) else {
        return Err(FormError::Invalid(
            "formId and response are required".to_string(),
        ));
    };

    match store.get_form(form_id).await? {
        Some(form) if form.is_active => {}
        _ => return Err(FormError::Inactive),
    }

    let stored = store.create_response(form_id, user_id, response).await?;
    info!(form_id, response_id = %stored.id, "response submitted");
    Ok(stored)
}

/// The form and its responses, for export. Fails when the form is missing
/// or has no responses yet.
pub async fn export_source(
    store: &dyn FormStore,
    form_id: &str,
) -> Result<(Form, Vec<Response>), FormError> {
    let form = store.get_form(form_id).await?.ok_or(FormError::NotFound)?;
    let responses = store.list_responses(form_id).await?;
    if responses.is_empty() {
        return Err(FormError::NoResponses);
    }
    Ok((form, responses))
}

/// Every form with its response count.
pub async fn response_summary(store: &dyn FormStore) -> Result<Vec<FormSummary>, FormError> {
    let forms = store.list_forms(false).await?;
    let mut summary = Vec::with_capacity(forms.len());
    for form in forms {
        let response_count = store.count_responses(&form.id).await?;
        summary.push(FormSummary {
            form,
            response_count,
        });
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use serde_json::{json, Map};

    fn new_form(title: &str) -> NewForm {
        NewForm {
            title: title.into(),
            description: "desc".into(),
            schema: json!({ "elements": [] }),
        }
    }

    fn answer() -> Option<Map<String, Value>> {
        let mut m = Map::new();
        m.insert("q1".into(), json!("yes"));
        Some(m)
    }

    #[tokio::test]
    async fn test_create_requires_all_fields() {
        let store = InMemoryStore::new();
        let mut form = new_form("");
        form.schema = Value::Null;
        match create_form(&store, form, "admin").await {
            Err(FormError::Invalid(msg)) => {
                assert!(msg.contains("title"));
                assert!(msg.contains("schema"));
                assert!(!msg.contains("description"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inactive_form_rejects_submission() {
        let store = InMemoryStore::new();
        let form = create_form(&store, new_form("Intake"), "admin").await.unwrap();
        update_form(
            &store,
            &form.id,
            FormUpdate {
                title: "Intake".into(),
                description: "desc".into(),
                schema: json!({}),
                is_active: Some(false),
            },
        )
        .await
        .unwrap();

        let err = submit_response(
            &store,
            "user-1",
            NewResponse {
                form_id: form.id.clone(),
                response: answer(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FormError::Inactive));
        assert_eq!(store.count_responses(&form.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_form_rejects_submission() {
        let store = InMemoryStore::new();
        let err = submit_response(
            &store,
            "user-1",
            NewResponse {
                form_id: "nope".into(),
                response: answer(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FormError::Inactive));
    }

    #[tokio::test]
    async fn test_submission_requires_body() {
        let store = InMemoryStore::new();
        let form = create_form(&store, new_form("Intake"), "admin").await.unwrap();
        let err = submit_response(
            &store,
            "user-1",
            NewResponse {
                form_id: form.id,
                response: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FormError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_export_gating() {
        let store = InMemoryStore::new();
        assert!(matches!(
            export_source(&store, "missing").await.unwrap_err(),
            FormError::NotFound
        ));

        let form = create_form(&store, new_form("Intake"), "admin").await.unwrap();
        assert!(matches!(
            export_source(&store, &form.id).await.unwrap_err(),
            FormError::NoResponses
        ));

        submit_response(
            &store,
            "user-1",
            NewResponse {
                form_id: form.id.clone(),
                response: answer(),
            },
        )
        .await
        .unwrap();
        let (exported, responses) = export_source(&store, &form.id).await.unwrap();
        assert_eq!(exported.id, form.id);
        assert_eq!(responses.len(), 1);
    }

    #[tokio::test]
    async fn test_summary_counts_per_form() {
        let store = InMemoryStore::new();
        let a = create_form(&store, new_form("A"), "admin").await.unwrap();
        let b = create_form(&store, new_form("B"), "admin").await.unwrap();
        for _ in 0..2 {
            submit_response(
                &store,
                "u",
                NewResponse {
                    form_id: a.id.clone(),
                    response: answer(),
                },
            )
            .await
            .unwrap();
        }

        let summary = response_summary(&store).await.unwrap();
        let count = |id: &str| {
            summary
                .iter()
                .find(|s| s.form.id == id)
                .map(|s| s.response_count)
        };
        assert_eq!(count(&a.id), Some(2));
        assert_eq!(count(&b.id), Some(0));
    }
}
