//! Connector abstraction over external row-oriented data sources.
//!
//! A [`Connector`] exposes a schema read plus row CRUD against one kind of
//! source (see [`SourceType`]). Connectors are stateless with respect to
//! the source: every call receives the [`ConnectedSourceConfig`] naming the
//! spreadsheet (or table) and sheet to use.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            ConnectorRegistry             │
//! │  ┌───────────────┐   ┌────────────────┐  │
//! │  │ google-sheets │   │   database     │  │
//! │  │ Spreadsheet   │   │ (unsupported)  │  │
//! │  └───────────────┘   └────────────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!     schema import / form submit / row admin
//! ```
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use form_harness::sheets_api::MemorySheets;
//! use form_harness::traits::ConnectorRegistry;
//!
//! let registry = ConnectorRegistry::with_sheets(Arc::new(MemorySheets::new()));
//! assert_eq!(registry.len(), 2);
//! ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{ConnectedSourceConfig, ExternalSchemaDefinition, SourceType};
use crate::sheets_api::SheetsApi;
use crate::values::Record;

/// Failures raised by connectors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// No credentials are configured.
    #[error("{0}")]
    MissingCredentials(String),

    /// Credentials are present but unusable or were rejected upstream.
    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("connector for source type '{0}' is not implemented")]
    Unsupported(SourceType),

    #[error("source has no header row")]
    MissingHeader,

    #[error("no row with external id '{0}'")]
    RowNotFound(String),

    /// The external service answered with an error status.
    #[error("{operation} failed (HTTP {status}): {message}")]
    Api {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ConnectorError {
    /// The spreadsheet or the named tab does not exist.
    ///
    /// The Sheets API answers an unknown spreadsheet with 404 but an unknown
    /// tab with 400 `Unable to parse range`.
    pub fn is_missing_source(&self) -> bool {
        match self {
            ConnectorError::Api { status: 404, .. } => true,
            ConnectorError::Api {
                status: 400,
                message,
                ..
            } => message.contains("Unable to parse range"),
            _ => false,
        }
    }
}

/// Identifier returned by [`Connector::append_row`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendedRow {
    pub external_row_id: String,
}

/// An external row source.
///
/// All operations are network calls; none are idempotent
/// (`append_row` twice appends twice).
#[async_trait]
pub trait Connector: Send + Sync {
    /// The source type this connector serves.
    fn source_type(&self) -> SourceType;

    /// One-line description for listings and logs.
    fn description(&self) -> &str;

    /// Read the header row and return one string-typed, optional field per
    /// column, in column order.
    async fn read_schema(
        &self,
        config: &ConnectedSourceConfig,
    ) -> Result<ExternalSchemaDefinition, ConnectorError>;

    /// Read all rows after the header, keyed by normalized header names.
    /// Header-only or empty sources yield an empty list.
    async fn read_rows(&self, config: &ConnectedSourceConfig)
        -> Result<Vec<Record>, ConnectorError>;

    /// Project `row` (keyed by field key) into column order and append it.
    async fn append_row(
        &self,
        config: &ConnectedSourceConfig,
        row: &Record,
    ) -> Result<AppendedRow, ConnectorError>;

    /// Overwrite exactly the row identified by `external_row_id`.
    async fn update_row(
        &self,
        config: &ConnectedSourceConfig,
        external_row_id: &str,
        row: &Record,
    ) -> Result<(), ConnectorError>;

    /// Blank exactly the row identified by `external_row_id`.
    async fn delete_row(
        &self,
        config: &ConnectedSourceConfig,
        external_row_id: &str,
    ) -> Result<(), ConnectorError>;
}

/// Placeholder for database-backed sources. Every operation fails with
/// [`ConnectorError::Unsupported`].
pub struct DatabaseConnector;

#[async_trait]
impl Connector for DatabaseConnector {
    fn source_type(&self) -> SourceType {
        SourceType::Database
    }

    fn description(&self) -> &str {
        "Database tables (not implemented)"
    }

    async fn read_schema(
        &self,
        _config: &ConnectedSourceConfig,
    ) -> Result<ExternalSchemaDefinition, ConnectorError> {
        Err(ConnectorError::Unsupported(SourceType::Database))
    }

    async fn read_rows(
        &self,
        _config: &ConnectedSourceConfig,
    ) -> Result<Vec<Record>, ConnectorError> {
        Err(ConnectorError::Unsupported(SourceType::Database))
    }

    async fn append_row(
        &self,
        _config: &ConnectedSourceConfig,
        _row: &Record,
    ) -> Result<AppendedRow, ConnectorError> {
        Err(ConnectorError::Unsupported(SourceType::Database))
    }

    async fn update_row(
        &self,
        _config: &ConnectedSourceConfig,
        _external_row_id: &str,
        _row: &Record,
    ) -> Result<(), ConnectorError> {
        Err(ConnectorError::Unsupported(SourceType::Database))
    }

    async fn delete_row(
        &self,
        _config: &ConnectedSourceConfig,
        _external_row_id: &str,
    ) -> Result<(), ConnectorError> {
        Err(ConnectorError::Unsupported(SourceType::Database))
    }
}

/// Registry of connectors keyed by [`SourceType`].
pub struct ConnectorRegistry {
    connectors: Vec<Box<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Create an empty connector registry.
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
        }
    }

    /// Registry with the spreadsheet connector over `sheets` and the
    /// database placeholder.
    pub fn with_sheets(sheets: Arc<dyn SheetsApi>) -> Self {
        use crate::connector_sheets::SpreadsheetConnector;

        let mut registry = Self::new();
        registry.register(Box::new(SpreadsheetConnector::new(sheets)));
        registry.register(Box::new(DatabaseConnector));
        registry
    }

    /// Register a connector. A later registration for the same source type
    /// shadows earlier ones.
    pub fn register(&mut self, connector: Box<dyn Connector>) {
        self.connectors.insert(0, connector);
    }

    /// Resolve the connector for a source config.
    pub fn for_source(
        &self,
        config: &ConnectedSourceConfig,
    ) -> Result<&dyn Connector, ConnectorError> {
        self.connectors
            .iter()
            .find(|c| c.source_type() == config.source_type)
            .map(|c| c.as_ref())
            .ok_or(ConnectorError::Unsupported(config.source_type))
    }

    pub fn connectors(&self) -> &[Box<dyn Connector>] {
        &self.connectors
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
