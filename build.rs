//! Build script for imitator
//!
//! Stamps the binary with the git revision and branch, build time, target and profile so
//! `imitator version` and the startup log line can report exactly what ran.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = git(&["rev-parse", "--short=8", "HEAD"]).unwrap_or_else(|| "unknown".into());
    let git_branch =
        git(&["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_else(|| "unknown".into());
    let git_dirty = match git(&["status", "--porcelain"]) {
        Some(out) if !out.is_empty() => "true",
        Some(_) => "false",
        None => "unknown",
    };
    let built_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    let stamps = [
        ("IMITATOR_GIT_HASH", git_hash),
        ("IMITATOR_GIT_BRANCH", git_branch),
        ("IMITATOR_GIT_DIRTY", git_dirty.to_string()),
        ("IMITATOR_BUILD_TIMESTAMP", built_at),
        ("IMITATOR_TARGET", env::var("TARGET").unwrap_or_else(|_| "unknown".into())),
        ("IMITATOR_PROFILE", env::var("PROFILE").unwrap_or_else(|_| "unknown".into())),
        ("IMITATOR_RUSTC_VERSION", rustc_version()),
    ];

    for (key, value) in stamps {
        println!("cargo:rustc-env={}={}", key, value);
    }
}

/// Run a git command and return its trimmed stdout on success.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
}

fn rustc_version() -> String {
    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".into());
    Command::new(rustc)
        .arg("--version")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
