use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use form_harness::auth::verify_token;

fn fh_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("fh");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/forms.sqlite"

[server]
bind = "127.0.0.1:7341"

[auth]
session_secret = "cli-secret"
admin_emails = ["admin@example.org"]
"#,
        root.display()
    );

    let config_path = config_dir.join("forms.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_fh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = fh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("FORMS_SESSION_SECRET")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run fh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_fh(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/forms.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_fh(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_fh(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_token_is_verifiable() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_fh(
        &config_path,
        &["token", "--user", "user_9", "--role", "nutritionist"],
    );
    assert!(success, "token failed: {}", stderr);

    let claims = verify_token("cli-secret", stdout.trim(), chrono::Utc::now().timestamp()).unwrap();
    assert_eq!(claims.sub, "user_9");
    assert_eq!(claims.role.as_deref(), Some("nutritionist"));
}

#[test]
fn test_token_rejects_unknown_role() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_fh(
        &config_path,
        &["token", "--user", "user_9", "--role", "superuser"],
    );
    assert!(!success);
    assert!(stderr.contains("unknown role"));
}

#[test]
fn test_schema_show_without_versions() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_fh(&config_path, &["schema", "show", "sheet-1"]);
    assert!(success, "schema show failed: {}", stderr);
    assert!(stdout.contains("no schema saved for sheet-1"));

    let (stdout, _, success) = run_fh(&config_path, &["schema", "show", "sheet-1", "--all"]);
    assert!(success);
    assert!(stdout.contains("no schema saved"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_fh(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
