//! Configuration system tests
//!
//! Tests configuration loading, validation, and environment overrides
//! through the `config` subcommands

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Test fixture for configuration testing
struct ConfigFixture {
    temp_dir: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("imitator.toml");
        Self { temp_dir, config_path }
    }

    fn write_config(&self, content: &str) {
        fs::write(&self.config_path, content).unwrap();
    }

    fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    /// `imitator config <action> --config <fixture>`
    fn config_cmd(&self, action: &str) -> Command {
        let mut cmd = Command::cargo_bin("imitator").unwrap();
        cmd.current_dir(self.temp_dir.path())
            .env_remove("IMITATOR_LLM_MODEL")
            .env_remove("IMITATOR_RESULT_DIR")
            .args(["config", action, "--config", self.path()]);
        cmd
    }
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_empty_config_uses_defaults() {
    let fixture = ConfigFixture::new();
    fixture.write_config("");

    fixture
        .config_cmd("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("model = \"qwen-plus-latest\""))
        .stdout(predicate::str::contains("max_concurrent_personas = 8"))
        .stdout(predicate::str::contains("max_concurrent_sources = 5"));
}

#[test]
fn test_full_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[llm]
base_url = "http://localhost:11434/v1"
api_key = ""
model = "qwen2.5:14b"
temperature = 0.8
timeout_secs = 120
max_retries = 3

[auxiliary_llm]
base_url = "https://openrouter.ai/api/v1"
model = "google/gemini-2.5-flash-lite"
temperature = 0.5

[scheduler]
max_concurrent_personas = 4
max_concurrent_sources = 2

[transcription]
api_key = "sk-test"
poll_interval_ms = 1000

[publish]
enabled = true
app_id = "cli_a1b2"
app_secret = "secret"
folder_token = "fldcnABC"
batch_pause_ms = 0

[output]
result_dir = "/tmp/imitator-results"

[logging]
level = "debug"
json_format = true
"#,
    );

    fixture.config_cmd("validate").assert().success();
    fixture
        .config_cmd("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("qwen2.5:14b"))
        .stdout(predicate::str::contains("max_concurrent_personas = 4"))
        .stdout(predicate::str::contains("fldcnABC"));
}

#[test]
fn test_generated_config_is_valid() {
    let fixture = ConfigFixture::new();

    Command::cargo_bin("imitator")
        .unwrap()
        .args(["config", "init", "--path", fixture.path()])
        .assert()
        .success();

    fixture.config_cmd("validate").assert().success();
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_llm_url() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[llm]
base_url = "ftp://models.example.com"
"#,
    );

    fixture
        .config_cmd("validate")
        .assert()
        .code(10)
        .stderr(predicate::str::contains("E102"));
}

#[test]
fn test_zero_persona_capacity() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[scheduler]
max_concurrent_personas = 0
"#,
    );

    fixture
        .config_cmd("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_concurrent_personas"));
}

#[test]
fn test_temperature_out_of_range() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[auxiliary_llm]
temperature = 3.5
"#,
    );

    fixture
        .config_cmd("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("temperature"));
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[logging]
level = "invalid_level"
"#,
    );

    fixture.config_cmd("validate").assert().failure();
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[llm
model = "x"
"#,
    );

    fixture
        .config_cmd("validate")
        .assert()
        .code(10)
        .stderr(predicate::str::contains("E101"));
}

// ─────────────────────────────────────────────────────────────────
// Config Init Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_init_force_overwrite() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[llm]\nmodel = \"old-model\"\n");

    Command::cargo_bin("imitator")
        .unwrap()
        .args(["config", "init", "--force", "--path", fixture.path()])
        .assert()
        .success();

    let content = fs::read_to_string(fixture.path()).unwrap();
    assert!(!content.contains("old-model"));
    assert!(content.contains("[publish]"));
}

// ─────────────────────────────────────────────────────────────────
// Environment Variable Override Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_overrides_file() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[llm]
model = "file-model"
"#,
    );

    fixture
        .config_cmd("show")
        .env("IMITATOR_LLM_MODEL", "env-model")
        .env("IMITATOR_MAX_CONCURRENT_SOURCES", "3")
        .assert()
        .success()
        .stdout(predicate::str::contains("model = \"env-model\""))
        .stdout(predicate::str::contains("max_concurrent_sources = 3"))
        .stdout(predicate::str::contains("file-model").not());
}

#[test]
fn test_env_override_is_validated() {
    let fixture = ConfigFixture::new();
    fixture.write_config("");

    fixture
        .config_cmd("validate")
        .env("IMITATOR_LOG_LEVEL", "chatty")
        .assert()
        .failure()
        .stderr(predicate::str::contains("chatty"));
}

// ─────────────────────────────────────────────────────────────────
// Path Expansion Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_tilde_expansion() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[output]
result_dir = "~/imitator/result"
"#,
    );

    let output = fixture.config_cmd("show").assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();

    assert!(stdout.contains("imitator/result"));
    assert!(!stdout.contains("result_dir = \"~"));
}
