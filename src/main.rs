//! # Form Harness CLI (`fh`)
//!
//! ## Usage
//!
//! ```bash
//! fh --config ./config/forms.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fh init` | Create the SQLite database and run migrations |
//! | `fh serve` | Start the HTTP server |
//! | `fh schema import <SPREADSHEET>` | Print fields read from a header row |
//! | `fh schema show <SPREADSHEET>` | Print the latest saved schema version |
//! | `fh token --user <ID>` | Mint a session token |
//!
//! ## Examples
//!
//! ```bash
//! # Import and save a new schema version
//! fh schema import 1AbC... --sheet Intake --save --created-by admin_1
//!
//! # Token for an admin, valid for one hour
//! fh token --user admin_1 --role admin --ttl-secs 3600
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use form_harness::auth::{Authenticator, Role};
use form_harness::{config, migrate, schema_ops, server};

/// Form Harness: forms, responses, and spreadsheet-backed schemas.
#[derive(Parser)]
#[command(
    name = "fh",
    about = "Form Harness: forms, responses, and spreadsheet-backed schemas",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/forms.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Import or inspect field schemas.
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Mint a signed session token for local use.
    Token {
        /// User id (`sub` claim).
        #[arg(long)]
        user: String,

        #[arg(long)]
        email: Option<String>,

        /// Role claim: `admin`, `nutritionist`, or `end-user`.
        #[arg(long, value_parser = parse_role)]
        role: Option<Role>,

        /// Lifetime in seconds; defaults to `auth.session_ttl_secs`.
        #[arg(long)]
        ttl_secs: Option<i64>,
    },
}

#[derive(Subcommand)]
enum SchemaAction {
    /// Read fields from a spreadsheet's header row.
    ///
    /// Requires `GOOGLE_SERVICE_ACCOUNT_EMAIL` and `GOOGLE_PRIVATE_KEY`.
    Import {
        /// Spreadsheet id.
        spreadsheet: String,

        /// Tab name; defaults to `sheets.default_sheet_name`.
        #[arg(long)]
        sheet: Option<String>,

        /// Persist the fields as the next schema version.
        #[arg(long, requires = "created_by")]
        save: bool,

        /// Recorded as `createdBy` on the saved version.
        #[arg(long)]
        created_by: Option<String>,
    },

    /// Show saved schema versions for a spreadsheet.
    Show {
        spreadsheet: String,

        /// List every version instead of the latest fields.
        #[arg(long)]
        all: bool,
    },
}

fn parse_role(s: &str) -> Result<Role, String> {
    Role::parse(s).ok_or_else(|| format!("unknown role '{}'", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::init_database(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Schema { action } => match action {
            SchemaAction::Import {
                spreadsheet,
                sheet,
                save,
                created_by,
            } => {
                let save_as = if save { created_by.as_deref() } else { None };
                schema_ops::run_import(&cfg, &spreadsheet, sheet.as_deref(), save_as).await?;
            }
            SchemaAction::Show { spreadsheet, all } => {
                schema_ops::run_show(&cfg, &spreadsheet, all).await?;
            }
        },
        Commands::Token {
            user,
            email,
            role,
            ttl_secs,
        } => {
            if let Some(ttl) = ttl_secs {
                anyhow::ensure!(ttl > 0, "--ttl-secs must be > 0");
            }
            let auth = Authenticator::from_config(&cfg.auth);
            println!("{}", auth.issue(&user, email.as_deref(), role, ttl_secs));
        }
    }

    Ok(())
}
