use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::auth::Role;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub sheets: SheetsConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SheetsConfig {
    #[serde(default)]
    pub default_spreadsheet_id: Option<String>,
    #[serde(default = "default_sheet_name")]
    pub default_sheet_name: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_drive_base")]
    pub drive_base: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            default_spreadsheet_id: None,
            default_sheet_name: default_sheet_name(),
            api_base: default_api_base(),
            drive_base: default_drive_base(),
            token_uri: default_token_uri(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_sheet_name() -> String {
    "Sheet1".to_string()
}
fn default_api_base() -> String {
    "https://sheets.googleapis.com/v4".to_string()
}
fn default_drive_base() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}
fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub session_secret: String,
    #[serde(default)]
    pub admin_emails: Vec<String>,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: i64,
    /// Role metadata keyed by user id, consulted after the token claim and
    /// the admin allowlist.
    #[serde(default)]
    pub roles: BTreeMap<String, String>,
}

fn default_session_ttl() -> i64 {
    86_400
}

impl SheetsConfig {
    /// The spreadsheet used by `/api/schema` and `/api/forms/submit`.
    pub fn default_source(&self) -> Option<&str> {
        self.default_spreadsheet_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn sheet_or_default<'a>(&'a self, sheet: Option<&'a str>) -> &'a str {
        match sheet.map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => &self.default_sheet_name,
        }
    }
}

/// Google service-account credentials, read from the environment only.
#[derive(Debug, Clone)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
}

impl ServiceAccount {
    /// Load `GOOGLE_SERVICE_ACCOUNT_EMAIL` and `GOOGLE_PRIVATE_KEY`.
    ///
    /// Keys pasted into env files usually carry literal `\n` sequences; those
    /// are expanded back into newlines so the PEM parses.
    pub fn from_env() -> Option<Self> {
        let client_email = std::env::var("GOOGLE_SERVICE_ACCOUNT_EMAIL").ok()?;
        let private_key = std::env::var("GOOGLE_PRIVATE_KEY").ok()?;
        if client_email.trim().is_empty() || private_key.trim().is_empty() {
            return None;
        }
        Some(Self {
            client_email,
            private_key: private_key.replace("\\n", "\n"),
        })
    }
}

impl Config {
    /// Apply `DEFAULT_SPREADSHEET_ID` and `FORMS_SESSION_SECRET` overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("DEFAULT_SPREADSHEET_ID") {
            if !id.trim().is_empty() {
                self.sheets.default_spreadsheet_id = Some(id);
            }
        }
        if let Ok(secret) = std::env::var("FORMS_SESSION_SECRET") {
            if !secret.is_empty() {
                self.auth.session_secret = secret;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.server.bind.trim().is_empty() {
            anyhow::bail!("server.bind must not be empty");
        }
        if self.auth.session_secret.is_empty() {
            anyhow::bail!("auth.session_secret must not be empty");
        }
        if self.auth.session_ttl_secs <= 0 {
            anyhow::bail!("auth.session_ttl_secs must be > 0");
        }
        if self.sheets.default_sheet_name.trim().is_empty() {
            anyhow::bail!("sheets.default_sheet_name must not be empty");
        }
        for (user, role) in &self.auth.roles {
            if Role::parse(role).is_none() {
                anyhow::bail!(
                    "Unknown role '{}' for user '{}' in auth.roles. Must be admin, nutritionist, or end-user.",
                    role,
                    user
                );
            }
        }
        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/forms.sqlite"

[server]
bind = "127.0.0.1:8080"

[auth]
session_secret = "s3cret"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.sheets.default_sheet_name, "Sheet1");
        assert_eq!(cfg.auth.session_ttl_secs, 86_400);
        assert!(cfg.auth.admin_emails.is_empty());
    }

    #[test]
    fn test_sheet_or_default() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.sheets.sheet_or_default(None), "Sheet1");
        assert_eq!(cfg.sheets.sheet_or_default(Some("  ")), "Sheet1");
        assert_eq!(cfg.sheets.sheet_or_default(Some("Intake")), "Intake");
    }

    #[test]
    fn test_unknown_role_rejected() {
        let content = format!("{}\n[auth.roles]\nuser_1 = \"superuser\"\n", MINIMAL);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("superuser"));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let content = MINIMAL.replace("s3cret", "");
        if std::env::var("FORMS_SESSION_SECRET").is_err() {
            assert!(parse_config(&content).is_err());
        }
    }
}
