//! # Form Harness
//!
//! A small forms service: administrators define forms and import field
//! schemas from spreadsheet header rows; end users submit responses, either
//! into the document store or as rows appended to a spreadsheet.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Spreadsheet  │◀─▶│  Connector   │──▶│ Schema repo  │
//! │ (Sheets API) │   │  registry    │   │ (versions)   │
//! └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!                           │                  │
//!                ┌──────────┴──────────────────┤
//!                ▼                             ▼
//!           ┌──────────┐                 ┌──────────┐
//!           │   CLI    │                 │   HTTP   │
//!           │   (fh)   │                 │  (axum)  │
//!           └──────────┘                 └────┬─────┘
//!                                             ▼
//!                                     ┌──────────────┐
//!                                     │ Forms store  │
//!                                     │   (SQLite)   │
//!                                     └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! fh init                                   # create database
//! fh schema import 1AbC... --sheet Intake   # preview header-derived fields
//! fh token --user admin_1 --role admin      # mint a local session token
//! fh serve                                  # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment credentials |
//! | [`models`] | Fields, schema versions, forms, responses |
//! | [`values`] | Typed field values and submission validation |
//! | [`traits`] | `Connector` trait and registry |
//! | [`connector_sheets`] | Spreadsheet connector |
//! | [`sheets_api`] | Sheets service client and in-memory double |
//! | [`store`] | Schema repository and form store |
//! | [`forms`] | Form and response rules |
//! | [`schema_ops`] | Schema import/save and row submission |
//! | [`auth`] | Session tokens and role resolution |
//! | [`export`] | XLSX export |
//! | [`error`] | HTTP error mapping |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod auth;
pub mod config;
pub mod connector_sheets;
pub mod db;
pub mod error;
pub mod export;
pub mod forms;
pub mod migrate;
pub mod models;
pub mod schema_ops;
pub mod server;
pub mod sheets_api;
pub mod store;
pub mod traits;
pub mod values;
