//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd. Runs use `--dry-run`, so
//! no network access is needed.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the imitator binary
fn imitator_cmd() -> Command {
    let mut cmd = Command::cargo_bin("imitator").unwrap();
    cmd.env_remove("IMITATOR_CONFIG")
        .env_remove("IMITATOR_RESULT_DIR")
        .env_remove("IMITATOR_PERSONA_CATALOG");
    cmd
}

/// Dry run inside `dir`, so result files land in `dir/result`
fn dry_run_in(dir: &Path) -> Command {
    let mut cmd = imitator_cmd();
    cmd.current_dir(dir).args(["--quiet", "run", "--dry-run"]);
    cmd
}

fn result_files(dir: &Path, extension: &str) -> Vec<String> {
    let imitate = dir.join("result").join("imitate_result");
    fs::read_dir(imitate)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().map_or(false, |x| x == extension))
                .map(|p| fs::read_to_string(p).unwrap())
                .collect()
        })
        .unwrap_or_default()
}

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    imitator_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("personas"))
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("version"));
}

#[test]
fn test_version_command() {
    imitator_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("imitator"))
        .stdout(predicate::str::contains("Build Information"))
        .stdout(predicate::str::contains("Git Hash"))
        .stdout(predicate::str::contains("Branch"));
}

#[test]
fn test_short_version_flag() {
    imitator_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("imitator"));
}

#[test]
fn test_invalid_command() {
    imitator_cmd()
        .arg("rewrite-everything")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

// ─────────────────────────────────────────────────────────────────
// Persona Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_personas_list_bundled_catalog() {
    imitator_cmd()
        .args(["personas", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains(" 1. 小A"))
        .stdout(predicate::str::contains("polish"))
        .stdout(predicate::str::contains(" 2. 小B"));
}

#[test]
fn test_personas_list_custom_catalog() {
    let dir = TempDir::new().unwrap();
    let catalog = dir.path().join("personas.toml");
    fs::write(
        &catalog,
        r#"
[[persona]]
name = "测评号"
templates = ["T1", "T2", "T3"]
"#,
    )
    .unwrap();

    imitator_cmd()
        .env("IMITATOR_PERSONA_CATALOG", catalog.to_str().unwrap())
        .args(["personas", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1. 测评号  templates: 3"));
}

// ─────────────────────────────────────────────────────────────────
// Run Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_dry_run_from_input_file() {
    let dir = TempDir::new().unwrap();
    let article = dir.path().join("article.txt");
    fs::write(&article, "今天聊聊如何在一周内养成早起的习惯。\n第二段内容。\n").unwrap();

    dry_run_in(dir.path())
        .args(["--personas", "1", "--no-publish", "--input"])
        .arg(&article)
        .assert()
        .success()
        .stdout(predicate::str::contains("已选择*小A*模板"))
        .stdout(predicate::str::contains("保存到本地:\t今天聊聊如何在一周内"))
        .stdout(predicate::str::contains("完成: 1 个模板成功, 0 个失败"));

    let txt = result_files(dir.path(), "txt");
    assert_eq!(txt.len(), 1);
    assert!(txt[0].starts_with("原文章:\n今天聊聊如何在一周内养成早起的习惯。"));
    assert!(txt[0].contains("小A仿写文案:"));

    let md = result_files(dir.path(), "md");
    assert!(md[0].contains("# token使用量:"));
}

#[test]
fn test_dry_run_interactive_prompts() {
    let dir = TempDir::new().unwrap();

    dry_run_in(dir.path())
        .write_stdin("2,3\n  第一行\n第二行\n/end\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("请选择模板(1:小A)"))
        .stdout(predicate::str::contains("已选择*小B*模板"))
        .stdout(predicate::str::contains("已选择*小C*模板"))
        .stdout(predicate::str::contains("完成: 2 个模板成功"));

    let txt = result_files(dir.path(), "txt");
    let b = txt[0].find("小B仿写文案").unwrap();
    let c = txt[0].find("小C仿写文案").unwrap();
    assert!(b < c);
}

#[test]
fn test_quit_at_prompt_exits_cleanly() {
    let dir = TempDir::new().unwrap();

    dry_run_in(dir.path())
        .write_stdin("\nquit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("已退出"));

    assert!(result_files(dir.path(), "txt").is_empty());
}

#[test]
fn test_unknown_persona_number_is_rejected() {
    let dir = TempDir::new().unwrap();
    let article = dir.path().join("article.txt");
    fs::write(&article, "正文").unwrap();

    dry_run_in(dir.path())
        .args(["--personas", "9", "--input"])
        .arg(&article)
        .assert()
        .code(60)
        .stderr(predicate::str::contains("E601"));
}

#[test]
fn test_link_without_transcript_fails() {
    let dir = TempDir::new().unwrap();
    let article = dir.path().join("link.txt");
    fs::write(&article, "【看看这个】 https://b23.tv/AbCdEf 复制此链接").unwrap();

    dry_run_in(dir.path())
        .args(["--personas", "1", "--input"])
        .arg(&article)
        .assert()
        .code(40)
        .stderr(predicate::str::contains("E400"))
        .stderr(predicate::str::contains("https://b23.tv/AbCdEf"));
}

#[test]
fn test_missing_input_file() {
    let dir = TempDir::new().unwrap();

    dry_run_in(dir.path())
        .args(["--personas", "1", "--input", "no-such-article.txt"])
        .assert()
        .code(20)
        .stderr(predicate::str::contains("E200"));
}

// ─────────────────────────────────────────────────────────────────
// Config Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_default() {
    let dir = TempDir::new().unwrap();

    imitator_cmd()
        .current_dir(dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[llm]"))
        .stdout(predicate::str::contains("[auxiliary_llm]"))
        .stdout(predicate::str::contains("[scheduler]"))
        .stdout(predicate::str::contains("[publish]"))
        .stdout(predicate::str::contains("[logging]"));
}

#[test]
fn test_config_validate_default() {
    let dir = TempDir::new().unwrap();

    imitator_cmd()
        .current_dir(dir.path())
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_config_init_creates_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("imitator.toml");

    imitator_cmd()
        .args(["config", "init", "--path"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration written to"));

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("max_concurrent_personas = 8"));
}

#[test]
fn test_config_init_refuses_overwrite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("imitator.toml");
    fs::write(&path, "# mine").unwrap();

    imitator_cmd()
        .args(["config", "init", "--path"])
        .arg(&path)
        .assert()
        .code(10)
        .stderr(predicate::str::contains("--force"));

    assert_eq!(fs::read_to_string(&path).unwrap(), "# mine");
}

#[test]
fn test_config_missing_file() {
    imitator_cmd()
        .args(["config", "validate", "--config", "/nonexistent/imitator.toml"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("E100"))
        .stderr(predicate::str::contains("imitator config init"));
}
