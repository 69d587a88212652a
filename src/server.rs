//! HTTP API server.
//!
//! Serves forms, responses, schema versions, and spreadsheet rows as JSON.
//! Every route except `/health` requires `Authorization: Bearer <token>`
//! (see [`crate::auth`]); routes marked admin also require the `admin` role.
//!
//! # Endpoints
//!
//! | Method | Path | Role | Description |
//! |--------|------|------|-------------|
//! | `GET`  | `/health` | none | Health check (returns version) |
//! | `GET`  | `/api/me` | user | Caller id, email, and resolved role |
//! | `GET`  | `/api/forms` | user | List forms (`?active=true`; non-admins only see active forms) |
//! | `POST` | `/api/forms` | admin | Create a form |
//! | `GET`/`PUT`/`DELETE` | `/api/forms/{id}` | admin | Read, replace, delete a form |
//! | `GET`  | `/api/forms/{id}/responses` | admin | Responses for a form |
//! | `GET`  | `/api/forms/{id}/export` | admin | XLSX export of responses |
//! | `POST` | `/api/forms/submit` | user | Append a validated row to the default spreadsheet |
//! | `POST` | `/api/responses` | user | Submit a response to an active form |
//! | `GET`  | `/api/responses/summary` | admin | Forms with response counts |
//! | `GET`  | `/api/schema` | user | Latest saved fields for the default spreadsheet |
//! | `GET`  | `/api/schema/versions` | admin | Version history for a spreadsheet |
//! | `POST` | `/api/schema/import` | admin | Read fields from a header row (not persisted) |
//! | `POST` | `/api/schema/save` | admin | Persist fields as the next version |
//! | `GET`  | `/api/sheets/rows` | admin | Rows of a spreadsheet tab as records |
//! | `PUT`/`DELETE` | `/api/sheets/rows/{externalRowId}` | admin | Update or blank one row |
//! | `GET`  | `/api/sheets/list` | admin | Spreadsheets visible to the service account |
//! | `GET`  | `/api/sheets/{id}/sheets` | admin | Tabs of a spreadsheet |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "spreadsheetId required" } }
//! ```
//!
//! See [`crate::error::AppError`] for the code/status table.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser clients.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequestParts, Path, Query, State,
    },
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::auth::{Authenticator, Principal};
use crate::config::{Config, ServiceAccount};
use crate::error::AppError;
use crate::export::{export_filename, responses_to_xlsx};
use crate::forms;
use crate::models::{ConnectedSourceConfig, FormUpdate, NewForm, NewResponse, SchemaField};
use crate::schema_ops;
use crate::sheets_api::{GoogleSheetsClient, SheetsApi};
use crate::store::sqlite::SqliteStore;
use crate::store::{FormStore, SchemaRepository};
use crate::traits::ConnectorRegistry;
use crate::values::{FieldValue, Record};

/// Backing services the router is built over.
pub struct Services {
    pub forms: Arc<dyn FormStore>,
    pub schemas: Arc<dyn SchemaRepository>,
    pub sheets: Arc<dyn SheetsApi>,
}

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    forms: Arc<dyn FormStore>,
    schemas: Arc<dyn SchemaRepository>,
    sheets: Arc<dyn SheetsApi>,
    connectors: Arc<ConnectorRegistry>,
    auth: Arc<Authenticator>,
}

impl AppState {
    pub fn new(config: Arc<Config>, services: Services) -> Self {
        let connectors = ConnectorRegistry::with_sheets(services.sheets.clone());
        let auth = Authenticator::from_config(&config.auth);
        Self {
            config,
            forms: services.forms,
            schemas: services.schemas,
            sheets: services.sheets,
            connectors: Arc::new(connectors),
            auth: Arc::new(auth),
        }
    }

    /// The configured default spreadsheet on its default tab.
    fn default_source(&self) -> Result<ConnectedSourceConfig, AppError> {
        let id = self.config.sheets.default_source().ok_or_else(|| {
            AppError::Config(
                "missing spreadsheet configuration: set sheets.default_spreadsheet_id or DEFAULT_SPREADSHEET_ID"
                    .to_string(),
            )
        })?;
        Ok(ConnectedSourceConfig::google_sheets(
            id,
            Some(self.config.sheets.sheet_or_default(None)),
        ))
    }

    /// A requested spreadsheet, falling back to the configured default.
    fn source(
        &self,
        spreadsheet_id: Option<&str>,
        sheet_name: Option<&str>,
    ) -> Result<ConnectedSourceConfig, AppError> {
        let id = spreadsheet_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| self.config.sheets.default_source())
            .ok_or_else(|| AppError::bad_request("spreadsheetId required"))?;
        Ok(ConnectedSourceConfig::google_sheets(
            id,
            Some(self.config.sheets.sheet_or_default(sheet_name)),
        ))
    }
}

/// Starts the HTTP server.
///
/// Opens and migrates the SQLite store, builds the Google Sheets client
/// from `GOOGLE_SERVICE_ACCOUNT_EMAIL` / `GOOGLE_PRIVATE_KEY`, and binds to
/// `[server].bind`. Missing credentials do not prevent startup; spreadsheet
/// routes then fail with `config_error`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    crate::migrate::run_migrations(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));

    let account = ServiceAccount::from_env();
    if account.is_none() {
        tracing::warn!("Google service account not configured; spreadsheet routes will fail");
    }
    let sheets = Arc::new(GoogleSheetsClient::new(config.sheets.clone(), account)?);

    run_server_with(
        config,
        Services {
            forms: store.clone(),
            schemas: store,
            sheets,
        },
    )
    .await
}

/// Starts the server over caller-provided services.
///
/// ```rust,no_run
/// use form_harness::server::{run_server_with, Services};
/// use form_harness::sheets_api::MemorySheets;
/// use form_harness::store::memory::InMemoryStore;
/// use std::sync::Arc;
///
/// # async fn example(config: &form_harness::config::Config) -> anyhow::Result<()> {
/// let store = Arc::new(InMemoryStore::new());
/// let services = Services {
///     forms: store.clone(),
///     schemas: store,
///     sheets: Arc::new(MemorySheets::new()),
/// };
/// run_server_with(config, services).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server_with(config: &Config, services: Services) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(AppState::new(Arc::new(config.clone()), services));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "forms server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/me", get(handle_me))
        .route("/api/forms", get(handle_list_forms).post(handle_create_form))
        .route("/api/forms/submit", post(handle_submit_row))
        .route(
            "/api/forms/{id}",
            get(handle_get_form)
                .put(handle_update_form)
                .delete(handle_delete_form),
        )
        .route("/api/forms/{id}/responses", get(handle_form_responses))
        .route("/api/forms/{id}/export", get(handle_export))
        .route("/api/responses", post(handle_create_response))
        .route("/api/responses/summary", get(handle_response_summary))
        .route("/api/schema", get(handle_get_schema))
        .route("/api/schema/versions", get(handle_schema_versions))
        .route("/api/schema/import", post(handle_import_schema))
        .route("/api/schema/save", post(handle_save_schema))
        .route("/api/sheets/rows", get(handle_list_rows))
        .route(
            "/api/sheets/rows/{external_row_id}",
            put(handle_update_row).delete(handle_delete_row),
        )
        .route("/api/sheets/list", get(handle_list_spreadsheets))
        .route("/api/sheets/{id}/sheets", get(handle_list_tabs))
        .layer(cors)
        .with_state(state)
}

// ============ Authentication extractors ============

impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        Ok(state.auth.authenticate(header)?)
    }
}

/// A caller holding the `admin` role.
pub struct Admin(pub Principal);

impl FromRequestParts<AppState> for Admin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let principal = Principal::from_request_parts(parts, state).await?;
        if !principal.is_admin() {
            return Err(AppError::forbidden());
        }
        Ok(Admin(principal))
    }
}

#[derive(Serialize)]
struct OkBody {
    ok: bool,
}

const OK: OkBody = OkBody { ok: true };

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_me(principal: Principal) -> Json<Principal> {
    Json(principal)
}

// ============ Forms ============

#[derive(Deserialize)]
struct ListFormsQuery {
    active: Option<bool>,
}

async fn handle_list_forms(
    State(state): State<AppState>,
    principal: Principal,
    query: Result<Query<ListFormsQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(query) = query?;
    let active_only = query.active.unwrap_or(false) || !principal.is_admin();
    let forms = state.forms.list_forms(active_only).await?;
    Ok(Json(json!(forms)))
}

async fn handle_create_form(
    State(state): State<AppState>,
    Admin(admin): Admin,
    body: Result<Json<NewForm>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(form) = body?;
    let form = forms::create_form(state.forms.as_ref(), form, &admin.user_id).await?;
    Ok((StatusCode::CREATED, Json(form)).into_response())
}

async fn handle_get_form(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let form = state
        .forms
        .get_form(&id)
        .await?
        .ok_or_else(|| AppError::not_found("form not found"))?;
    Ok(Json(json!(form)))
}

async fn handle_update_form(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<String>,
    body: Result<Json<FormUpdate>, JsonRejection>,
) -> Result<Json<OkBody>, AppError> {
    let Json(update) = body?;
    forms::update_form(state.forms.as_ref(), &id, update).await?;
    Ok(Json(OK))
}

async fn handle_delete_form(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<String>,
) -> Result<Json<OkBody>, AppError> {
    forms::delete_form(state.forms.as_ref(), &id).await?;
    Ok(Json(OK))
}

async fn handle_form_responses(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    if state.forms.get_form(&id).await?.is_none() {
        return Err(AppError::not_found("form not found"));
    }
    let responses = state.forms.list_responses(&id).await?;
    Ok(Json(json!({ "count": responses.len(), "responses": responses })))
}

async fn handle_export(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (form, responses) = forms::export_source(state.forms.as_ref(), &id).await?;
    let bytes = responses_to_xlsx(&responses).map_err(|e| AppError::Internal(e.into()))?;
    info!(form_id = %id, responses = responses.len(), "responses exported");

    let disposition = format!("attachment; filename=\"{}\"", export_filename(&form.title));
    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string(),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

// ============ Responses ============

async fn handle_create_response(
    State(state): State<AppState>,
    principal: Principal,
    body: Result<Json<NewResponse>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(submission) = body?;
    let response =
        forms::submit_response(state.forms.as_ref(), &principal.user_id, submission).await?;
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

async fn handle_response_summary(
    State(state): State<AppState>,
    _admin: Admin,
) -> Result<Json<Value>, AppError> {
    let summary = forms::response_summary(state.forms.as_ref()).await?;
    Ok(Json(json!(summary)))
}

// ============ Schema ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceQuery {
    spreadsheet_id: Option<String>,
    sheet_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportRequest {
    #[serde(default)]
    spreadsheet_id: Option<String>,
    #[serde(default)]
    sheet_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveRequest {
    #[serde(default)]
    spreadsheet_id: Option<String>,
    #[serde(default)]
    fields: Option<Vec<SchemaField>>,
}

async fn handle_get_schema(
    State(state): State<AppState>,
    _principal: Principal,
) -> Result<Json<Value>, AppError> {
    let source = state.default_source()?;
    let (fields, version) =
        schema_ops::latest_fields(state.schemas.as_ref(), &source.source_id).await?;
    Ok(Json(json!({ "fields": fields, "version": version })))
}

async fn handle_schema_versions(
    State(state): State<AppState>,
    _admin: Admin,
    query: Result<Query<SourceQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(query) = query?;
    let source = state.source(query.spreadsheet_id.as_deref(), None)?;
    let versions = state.schemas.list_versions(&source.source_id).await?;
    Ok(Json(json!({ "versions": versions })))
}

async fn handle_import_schema(
    State(state): State<AppState>,
    _admin: Admin,
    body: Result<Json<ImportRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = body?;
    let id = req
        .spreadsheet_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("spreadsheetId required"))?;
    let source = state.source(Some(id.as_str()), req.sheet_name.as_deref())?;
    let fields = schema_ops::import_schema(&state.connectors, &source).await?;
    Ok(Json(json!({ "fields": fields })))
}

async fn handle_save_schema(
    State(state): State<AppState>,
    Admin(admin): Admin,
    body: Result<Json<SaveRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = body?;
    let (Some(id), Some(fields)) = (req.spreadsheet_id, req.fields) else {
        return Err(AppError::bad_request("invalid payload"));
    };
    let doc = schema_ops::save_schema(state.schemas.as_ref(), &id, fields, &admin.user_id).await?;
    Ok(Json(json!({ "id": doc.id, "version": doc.version })))
}

async fn handle_submit_row(
    State(state): State<AppState>,
    _principal: Principal,
    body: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(payload) = body?;
    let source = state.default_source()?;
    let appended =
        schema_ops::submit_row(&state.connectors, state.schemas.as_ref(), &source, &payload)
            .await?;
    Ok(Json(json!(appended)))
}

// ============ Spreadsheet rows ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RowUpdateRequest {
    #[serde(default)]
    spreadsheet_id: Option<String>,
    #[serde(default)]
    sheet_name: Option<String>,
    #[serde(default)]
    row: Map<String, Value>,
}

async fn handle_list_rows(
    State(state): State<AppState>,
    _admin: Admin,
    query: Result<Query<SourceQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(query) = query?;
    let source = state.source(query.spreadsheet_id.as_deref(), query.sheet_name.as_deref())?;
    let rows = state.connectors.for_source(&source)?.read_rows(&source).await?;
    Ok(Json(json!({ "rows": rows })))
}

async fn handle_update_row(
    State(state): State<AppState>,
    _admin: Admin,
    Path(external_row_id): Path<String>,
    body: Result<Json<RowUpdateRequest>, JsonRejection>,
) -> Result<Json<OkBody>, AppError> {
    let Json(req) = body?;
    let source = state.source(req.spreadsheet_id.as_deref(), req.sheet_name.as_deref())?;
    let record: Record = req
        .row
        .iter()
        .filter_map(|(k, v)| FieldValue::from_json_lossy(v).map(|v| (k.clone(), v)))
        .collect();
    state
        .connectors
        .for_source(&source)?
        .update_row(&source, &external_row_id, &record)
        .await?;
    info!(row = %external_row_id, "row updated");
    Ok(Json(OK))
}

async fn handle_delete_row(
    State(state): State<AppState>,
    _admin: Admin,
    Path(external_row_id): Path<String>,
    query: Result<Query<SourceQuery>, QueryRejection>,
) -> Result<Json<OkBody>, AppError> {
    let Query(query) = query?;
    let source = state.source(query.spreadsheet_id.as_deref(), query.sheet_name.as_deref())?;
    state
        .connectors
        .for_source(&source)?
        .delete_row(&source, &external_row_id)
        .await?;
    info!(row = %external_row_id, "row deleted");
    Ok(Json(OK))
}

async fn handle_list_spreadsheets(
    State(state): State<AppState>,
    _admin: Admin,
) -> Result<Json<Value>, AppError> {
    let files = state.sheets.list_spreadsheets().await?;
    Ok(Json(json!({ "spreadsheets": files })))
}

async fn handle_list_tabs(
    State(state): State<AppState>,
    _admin: Admin,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let sheets = state.sheets.sheet_names(&id).await?;
    Ok(Json(json!({ "sheets": sheets })))
}
