//! HTTP error taxonomy.
//!
//! Every handler returns `Result<_, AppError>`; [`AppError`] renders as
//!
//! ```json
//! { "error": { "code": "not_found", "message": "form not found or inactive" } }
//! ```
//!
//! | Variant | Status | Code |
//! |---------|--------|------|
//! | `Unauthenticated` | 401 | `unauthenticated` |
//! | `Forbidden` | 403 | `forbidden` |
//! | `BadRequest`, `Validation` | 400 | `bad_request` |
//! | `NotFound` | 404 | `not_found` |
//! | `Conflict` | 409 | `conflict` |
//! | `Config` | 500 | `config_error` |
//! | `Connector` | 500 | `connector_error` |
//! | `Internal` | 500 | `internal` |
//!
//! 5xx responses carry a generic message; the cause is logged with
//! `tracing::error!`. `Config` messages are descriptive since they name a
//! missing setting rather than leak internals. Rejected or malformed
//! credentials are `Connector` errors, so upstream detail stays in the log.
//!
//! A spreadsheet or tab that does not exist maps to 404 `not_found`;
//! every other connector failure is a 500.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::auth::AuthError;
use crate::forms::FormError;
use crate::schema_ops::SchemaOpError;
use crate::store::StoreError;
use crate::traits::ConnectorError;
use crate::values::{FieldError, ValidationErrors};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Validation(ValidationErrors),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Config(String),
    #[error("external source error: {0}")]
    Connector(ConnectorError),
    #[error(transparent)]
    Internal(anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<FieldError>>,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn forbidden() -> Self {
        AppError::Forbidden("admin role required".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Config(_) | AppError::Connector(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthenticated(_) => "unauthenticated",
            AppError::Forbidden(_) => "forbidden",
            AppError::BadRequest(_) | AppError::Validation(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Config(_) => "config_error",
            AppError::Connector(_) => "connector_error",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let (message, fields) = match self {
            AppError::Connector(err) => {
                tracing::error!(error = %err, "connector call failed");
                ("failed to reach the external data source".to_string(), None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = ?err, "request failed");
                ("internal server error".to_string(), None)
            }
            AppError::Config(message) => {
                tracing::error!(%message, "configuration error");
                (message, None)
            }
            AppError::Validation(errors) => (errors.to_string(), Some(errors.0)),
            other => (other.to_string(), None),
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code,
                message,
                fields,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<ConnectorError> for AppError {
    fn from(err: ConnectorError) -> Self {
        if err.is_missing_source() {
            tracing::warn!(error = %err, "external source not found");
            return AppError::NotFound("spreadsheet or sheet not found".to_string());
        }
        match err {
            ConnectorError::RowNotFound(id) => AppError::NotFound(format!("row '{}' not found", id)),
            ConnectorError::MissingHeader => {
                AppError::BadRequest("the sheet has no header row".to_string())
            }
            ConnectorError::Unsupported(kind) => {
                AppError::BadRequest(format!("source type '{}' is not supported", kind))
            }
            ConnectorError::MissingCredentials(message) => AppError::Config(message),
            other => AppError::Connector(other),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } => AppError::Conflict(err.to_string()),
            other => AppError::Internal(other.into()),
        }
    }
}

impl From<FormError> for AppError {
    fn from(err: FormError) -> Self {
        match err {
            FormError::Invalid(message) => AppError::BadRequest(message),
            FormError::NotFound | FormError::Inactive | FormError::NoResponses => {
                AppError::NotFound(err.to_string())
            }
            FormError::Store(err) => err.into(),
        }
    }
}

impl From<SchemaOpError> for AppError {
    fn from(err: SchemaOpError) -> Self {
        match err {
            SchemaOpError::Invalid(message) => AppError::BadRequest(message),
            SchemaOpError::Validation(errors) => AppError::Validation(errors),
            SchemaOpError::Connector(err) => err.into(),
            SchemaOpError::Store(err) => err.into(),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::Validation(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Unauthenticated(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}
