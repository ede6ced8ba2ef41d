use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn artstore_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_artstore"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let articles = [
        r#"{"external_id": 42, "cooked_doc": "oslo police report issued today", "title": "T42", "tags": ["news", "oslo"]}"#,
        r#"{"external_id": 43, "cooked_doc": "bergen harbour reopens after storm", "title": "T43"}"#,
        r#"{"external_id": 44, "cooked_doc": "", "title": "empty body"}"#,
    ];
    fs::write(root.join("articles.jsonl"), articles.join("\n")).unwrap();

    let config_content = format!(
        r#"[store]
root = "{}/data/store"

[search]
default_limit = 5
"#,
        root.display()
    );

    let config_path = config_dir.join("artstore.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_artstore(config_path: &Path, args: &[&str]) -> (String, String, Option<i32>) {
    let binary = artstore_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run artstore binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code())
}

fn import_fixture(config_path: &Path) -> String {
    let articles = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("articles.jsonl");
    let (stdout, stderr, code) = run_artstore(config_path, &["import", articles.to_str().unwrap()]);
    assert_eq!(code, Some(0), "import failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

#[test]
fn test_init_creates_store_layout() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, code) = run_artstore(&config_path, &["init"]);
    assert_eq!(code, Some(0), "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let store_root = tmp.path().join("data/store");
    assert!(store_root.join("store.db").exists());
    assert!(store_root.join("term_index").is_dir());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_artstore(&config_path, &["init"]);
    assert_eq!(first, Some(0), "First init failed");

    let (_, _, second) = run_artstore(&config_path, &["init"]);
    assert_eq!(second, Some(0), "Second init failed (not idempotent)");
}

#[test]
fn test_import_and_reimport_no_duplicates() {
    let (_tmp, config_path) = setup_test_env();

    let first = import_fixture(&config_path);
    assert!(first.contains("inserted: 3"));
    assert!(first.contains("index failures: 0"));

    let second = import_fixture(&config_path);
    assert!(second.contains("inserted: 0"));
    assert!(second.contains("already stored: 3"));

    let (stats, _, _) = run_artstore(&config_path, &["stats"]);
    assert!(stats.contains("Content rows: 3"));
    assert!(stats.contains("Indexed docs: 3"));
}

#[test]
fn test_search_finds_imported_article() {
    let (_tmp, config_path) = setup_test_env();
    import_fixture(&config_path);

    let (stdout, stderr, code) = run_artstore(&config_path, &["search", "police"]);
    assert_eq!(code, Some(0), "search failed: {}", stderr);
    assert!(stdout.contains("article 42"));
    assert!(stdout.contains("oslo police report issued today"));
    assert!(!stdout.contains("article 43"));

    let (none, _, _) = run_artstore(&config_path, &["search", "volcano"]);
    assert!(none.contains("No results."));
}

#[test]
fn test_get_and_has() {
    let (_tmp, config_path) = setup_test_env();
    import_fixture(&config_path);

    let (stdout, _, code) = run_artstore(&config_path, &["get", "42"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("T42"));
    assert!(stdout.contains("news, oslo"));

    let (json, _, _) = run_artstore(&config_path, &["get", "43", "--json"]);
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["title"], "T43");
    assert_eq!(parsed["external_id"], 43);

    let (_, stderr, code) = run_artstore(&config_path, &["get", "999"]);
    assert_eq!(code, Some(1));
    assert!(stderr.contains("not found"));

    let (_, _, has_code) = run_artstore(&config_path, &["has", "42"]);
    assert_eq!(has_code, Some(0));
    let (_, _, missing_code) = run_artstore(&config_path, &["has", "999"]);
    assert_eq!(missing_code, Some(1));
}

#[test]
fn test_ids_filters_empty_content() {
    let (_tmp, config_path) = setup_test_env();
    import_fixture(&config_path);

    let (filtered, _, _) = run_artstore(&config_path, &["ids"]);
    let filtered: Vec<&str> = filtered.lines().collect();
    assert_eq!(filtered, vec!["42", "43"]);

    let (all, _, _) = run_artstore(&config_path, &["ids", "--all"]);
    let all: Vec<&str> = all.lines().collect();
    assert_eq!(all, vec!["42", "43", "44"]);
}

#[test]
fn test_reconcile_on_healthy_store_is_noop() {
    let (_tmp, config_path) = setup_test_env();
    import_fixture(&config_path);

    let (stdout, stderr, code) = run_artstore(&config_path, &["reconcile"]);
    assert_eq!(code, Some(0), "reconcile failed: {}", stderr);
    assert!(stdout.contains("scanned: 3"));
    assert!(stdout.contains("healed: 0"));
}

#[test]
fn test_root_flag_without_config_file() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("adhoc");

    let output = Command::new(artstore_binary())
        .arg("--root")
        .arg(&root)
        .arg("stats")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Content rows: 0"));
    assert!(root.join("store.db").exists());
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(
        &config_path,
        format!(
            "[store]\nroot = \"{}/store\"\n[index]\ntoken_limit = 0\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, code) = run_artstore(&config_path, &["stats"]);
    assert_ne!(code, Some(0));
    assert!(stderr.contains("token_limit"));
}

#[test]
fn test_command_error_is_reported() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("no-such-file.jsonl");

    let (_, stderr, code) = run_artstore(&config_path, &["import", missing.to_str().unwrap()]);
    assert_ne!(code, Some(0));
    assert!(
        stderr.contains("Failed to open import file"),
        "stderr: {}",
        stderr
    );
    assert!(!stderr.contains("failed to close store"));
}
