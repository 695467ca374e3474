use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragcoder_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ragcoder");
    path
}

/// Writes a codebook, responses, and a config pointing at an Ollama URL
/// nothing listens on, so `run` exercises the failure path offline.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    fs::write(
        data_dir.join("codebook.csv"),
        "code_id;label;description\n\
         BUG-UI;Interface bug;Buttons, screens, or layout that do not work\n\
         PRICE;Pricing;Complaints or praise about cost\n\
         SUPPORT;Customer support;Experiences with the help desk\n",
    )
    .unwrap();
    fs::write(
        data_dir.join("responses.csv"),
        "response_id;response_text;wave\n\
         r1;The save button does nothing on the settings screen;1\n\
         r2;Way too expensive for what it does;1\n\
         r3;   ;2\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[codebook]
path = "{root}/data/codebook.csv"

[responses]
path = "{root}/data/responses.csv"

[output]
path = "{root}/out/coded.csv"

[audit]
log_path = "{root}/out/audit.sqlite"

[gateway]
provider = "ollama"
model = "llama3"
url = "http://127.0.0.1:9"
max_retries = 2
backoff_base_ms = 1
backoff_max_ms = 5
timeout_secs = 5
jitter = false

[batch]
concurrency_limit = 2
"#,
        root = root.display()
    );

    let config_path = config_dir.join("ragcoder.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ragcoder(config_path: &Path, args: &[&str]) -> (String, String, Option<i32>) {
    let binary = ragcoder_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragcoder binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, code) = run_ragcoder(&config_path, &["init"]);
    assert_eq!(code, Some(0), "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("out/audit.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_ragcoder(&config_path, &["init"]);
    assert_eq!(first, Some(0), "First init failed");

    let (_, _, second) = run_ragcoder(&config_path, &["init"]);
    assert_eq!(second, Some(0), "Second init failed (not idempotent)");
}

#[test]
fn test_validate_reports_counts() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, code) = run_ragcoder(&config_path, &["validate"]);
    assert_eq!(code, Some(0), "validate failed: {}", stderr);
    assert!(stdout.contains("3 entries"));
    assert!(stdout.contains("3 (1 blank"));
    assert!(stdout.contains("full codebook"));
}

#[test]
fn test_validate_rejects_duplicate_response_ids() {
    let (tmp, config_path) = setup_test_env();
    fs::write(
        tmp.path().join("data/responses.csv"),
        "response_id;response_text\nr1;a\nr1;b\n",
    )
    .unwrap();

    let (_, stderr, code) = run_ragcoder(&config_path, &["validate"]);
    assert_ne!(code, Some(0));
    assert!(stderr.contains("duplicate response_id 'r1'"), "stderr: {}", stderr);
}

#[test]
fn test_preview_prints_prompt() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, code) = run_ragcoder(&config_path, &["preview", "r1"]);
    assert_eq!(code, Some(0), "preview failed: {}", stderr);
    assert!(stdout.contains("- id: BUG-UI"));
    assert!(stdout.contains("The save button does nothing on the settings screen"));
    assert!(stderr.contains("prompt sha256"));
}

#[test]
fn test_preview_unknown_response() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, code) = run_ragcoder(&config_path, &["preview", "nope"]);
    assert_ne!(code, Some(0));
    assert!(stderr.contains("No response with id 'nope'"));
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let text = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, text.replace("concurrency_limit = 2", "concurrency_limit = 0")).unwrap();

    let (_, stderr, code) = run_ragcoder(&config_path, &["validate"]);
    assert_ne!(code, Some(0));
    assert!(stderr.contains("concurrency_limit"));
}

#[test]
fn test_missing_api_key_fails_before_run() {
    let (_tmp, config_path) = setup_test_env();
    let text = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, text.replace("\"ollama\"", "\"openai\"")).unwrap();

    let output = Command::new(ragcoder_binary())
        .arg("--config")
        .arg(&config_path)
        .args(["run", "--progress", "off"])
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("OPENAI_API_KEY"));
}

#[test]
fn test_run_with_unreachable_model_isolates_failures() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, code) = run_ragcoder(&config_path, &["run", "--progress", "off"]);
    assert_eq!(code, Some(0), "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("failed:   2"));
    assert!(stdout.contains("empty:    1"));

    let coded = fs::read_to_string(tmp.path().join("out/coded.csv")).unwrap();
    let lines: Vec<&str> = coded.lines().collect();
    assert_eq!(lines[0], "response_id;outcome;code_ids;rationale;evidence;ambiguous;parse_status;warnings");
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("r1;failed;"));
    assert!(lines[2].starts_with("r2;failed;"));
    assert!(lines[3].starts_with("r3;empty;"));

    let errors = fs::read_to_string(tmp.path().join("out/coded.errors.csv")).unwrap();
    assert!(errors.contains("r1;Network;"));
    assert!(errors.contains("r2;Network;"));
    assert!(!errors.contains("r3;"));
}

#[test]
fn test_audit_export_after_run() {
    let (tmp, config_path) = setup_test_env();
    run_ragcoder(&config_path, &["run", "--progress", "off"]);

    let export_path = tmp.path().join("out/audit.jsonl");
    let (_, stderr, code) = run_ragcoder(
        &config_path,
        &["audit", "export", "--output", export_path.to_str().unwrap()],
    );
    assert_eq!(code, Some(0), "export failed: {}", stderr);

    let text = fs::read_to_string(&export_path).unwrap();
    let records: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    // Two attempts each for r1 and r2, one record for the blank r3.
    assert_eq!(records.len(), 5);
    let r1: Vec<&serde_json::Value> = records
        .iter()
        .filter(|r| r["response_id"] == "r1")
        .collect();
    assert_eq!(r1.len(), 2);
    assert_eq!(r1[0]["attempt_number"], 1);
    assert_eq!(r1[1]["attempt_number"], 2);
    assert_eq!(r1[1]["terminal"], true);
    assert_eq!(r1[0]["prompt_hash"], r1[1]["prompt_hash"]);

    let r3 = records.iter().find(|r| r["response_id"] == "r3").unwrap();
    assert!(r3["model_outcome"].is_null());
}

#[test]
fn test_stats_lists_batches() {
    let (_tmp, config_path) = setup_test_env();
    run_ragcoder(&config_path, &["run", "--progress", "off"]);

    let (stdout, stderr, code) = run_ragcoder(&config_path, &["stats"]);
    assert_eq!(code, Some(0), "stats failed: {}", stderr);
    assert!(stdout.contains("Batches:     1"));
    assert!(stdout.contains("Records:     5"));
    assert!(stdout.contains("complete"));
}

#[test]
fn test_completions_need_no_config() {
    let output = Command::new(ragcoder_binary())
        .args(["--config", "/nonexistent/ragcoder.toml", "completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("ragcoder"));
}
