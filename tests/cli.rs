use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_path = config_dir.join("nbrag.toml");
    fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{}"

[chunking]
chunk_size = 50

[logging]
filter = "warn"
"#,
            root.join("data").join("nbrag.sqlite").display()
        ),
    )
    .unwrap();

    (tmp, config_path)
}

fn run_nbrag(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_nbrag"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run nbrag")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "nbrag failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup_test_env();
    for _ in 0..2 {
        let output = run_nbrag(&config, &["init"]);
        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains("initialized"));
    }
}

#[test]
fn test_notebook_source_and_context() {
    let (_tmp, config) = setup_test_env();
    run_nbrag(&config, &["init"]);

    let notebook = stdout_json(&run_nbrag(&config, &["notebook", "create", "Thesis"]));
    let notebook_id = notebook["id"].as_str().unwrap().to_string();
    assert!(notebook_id.starts_with("notebook:"));

    let created = stdout_json(&run_nbrag(
        &config,
        &[
            "source",
            "add",
            "--title",
            "Chunking",
            "--text",
            "Chunks overlap so that sentences on a boundary stay retrievable.",
            "--notebook",
            &notebook_id,
        ],
    ));
    let source_id = created["source"]["id"].as_str().unwrap().to_string();
    assert!(created["command_id"].is_null());

    stdout_json(&run_nbrag(
        &config,
        &["note", "add", "check overlap size", "--notebook", &notebook_id],
    ));

    let context = stdout_json(&run_nbrag(&config, &["context", "--notebook", &notebook_id]));
    assert_eq!(context["sources"].as_array().unwrap().len(), 1);
    assert_eq!(context["notes"].as_array().unwrap().len(), 1);
    assert_eq!(context["sources"][0]["id"], source_id.as_str());
    assert!(context["sources"][0].get("full_text").is_none());

    let shown = stdout_json(&run_nbrag(&config, &["source", "show", &source_id]));
    assert_eq!(shown["status"]["embedded_chunks"], 0);
}

#[test]
fn test_vectorize_without_provider_fails() {
    let (_tmp, config) = setup_test_env();
    run_nbrag(&config, &["init"]);
    let created = stdout_json(&run_nbrag(
        &config,
        &["source", "add", "--text", "some text"],
    ));
    let source_id = created["source"]["id"].as_str().unwrap();

    let output = run_nbrag(&config, &["vectorize", source_id]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No embedding model configured"));
}

#[test]
fn test_missing_config_is_reported() {
    let tmp = TempDir::new().unwrap();
    let output = run_nbrag(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read config file"));
}

#[test]
fn test_completions_need_no_config() {
    let tmp = TempDir::new().unwrap();
    let output = run_nbrag(&tmp.path().join("nope.toml"), &["completions", "bash"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("nbrag"));
}

#[test]
fn test_rebuild_rejects_unknown_mode() {
    let (_tmp, config) = setup_test_env();
    let output = run_nbrag(&config, &["rebuild", "--mode", "everything"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid mode: everything"));
}
