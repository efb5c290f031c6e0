//! Local result files
//!
//! Every run appends a `.txt` and a `.md` file under
//! `<result_dir>/imitate_result`, named after the start of the article and the
//! minute the run finished.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use crate::error::{Error, Result};
use crate::scheduler::PersonaResults;
use crate::types::TokenUsage;

/// Characters of the article used in the file name
const STEM_CHARS: usize = 10;

/// Paths written by [`save_to_local`]
#[derive(Debug, Clone)]
pub struct SavedFiles {
    pub stem: String,
    pub txt: PathBuf,
    pub md: PathBuf,
}

/// `<first 10 chars>_<YYYY-MM-DD HH:MM>`, with characters unsafe in file names replaced
pub fn file_stem(article: &str, at: DateTime<Local>) -> String {
    let title: String = article
        .chars()
        .take(STEM_CHARS)
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("{}_{}", title, at.format("%Y-%m-%d %H:%M"))
}

/// Write the article, every persona's text and the token totals
pub fn save_to_local(
    dir: &Path,
    article: &str,
    results: &PersonaResults,
    usage: &BTreeMap<String, TokenUsage>,
) -> Result<SavedFiles> {
    fs::create_dir_all(dir).map_err(|e| Error::IoWrite {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let stem = file_stem(article, Local::now());
    let txt = dir.join(format!("{}.txt", stem));
    let md = dir.join(format!("{}.md", stem));

    append(&txt, &render_txt(article, results))?;
    append(&md, &render_md(article, results, usage))?;

    info!(stem = %stem, personas = results.len(), "Results saved locally");
    Ok(SavedFiles { stem, txt, md })
}

fn render_txt(article: &str, results: &PersonaResults) -> String {
    let mut out = format!("原文章:\n{}\n", article);
    for (persona, outcome) in results.iter() {
        out.push_str(&format!("\n{}仿写文案:\n{}\n", persona, outcome.display_text()));
    }
    out
}

fn render_md(article: &str, results: &PersonaResults, usage: &BTreeMap<String, TokenUsage>) -> String {
    let mut out = format!("# 原文章:\n{}\n\n", article);
    for (persona, outcome) in results.iter() {
        out.push_str(&format!(
            "\n# {}仿写文案:\n{}\n",
            persona,
            strip_markdown_fences(&outcome.display_text())
        ));
    }
    if !usage.is_empty() {
        out.push_str("\n# token使用量:\n");
        for (model, totals) in usage {
            out.push_str(&format!("{}:  \n{}\n", model, totals));
        }
        out.push('\n');
    }
    out
}

fn append(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::IoWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
    file.write_all(content.as_bytes()).map_err(|e| Error::IoWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

// ─────────────────────────────────────────────────────────────────
// Fence stripping
// ─────────────────────────────────────────────────────────────────

/// Remove ```` ```markdown ```` wrappers, keeping what they enclose
///
/// Other fenced blocks are left alone. An unclosed wrapper runs to the end.
pub fn strip_markdown_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut fence: Option<String> = None;

    for line in text.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\n', '\r']);
        match &fence {
            None => match markdown_fence_open(bare) {
                Some(ticks) => fence = Some(ticks),
                None => out.push_str(line),
            },
            Some(ticks) => {
                if is_fence_close(bare, ticks) {
                    fence = None;
                } else {
                    out.push_str(line);
                }
            }
        }
    }
    out
}

/// Up to three spaces of indent
fn strip_indent(line: &str) -> Option<&str> {
    let indent = line.len() - line.trim_start_matches([' ', '\t']).len();
    (indent <= 3).then(|| &line[indent..])
}

/// Backtick run of a ```` ```markdown ```` opening line
fn markdown_fence_open(line: &str) -> Option<String> {
    let rest = strip_indent(line)?;
    let ticks = rest.len() - rest.trim_start_matches('`').len();
    if ticks < 3 {
        return None;
    }
    let info = rest[ticks..].trim_matches([' ', '\t']);
    info.eq_ignore_ascii_case("markdown")
        .then(|| rest[..ticks].to_string())
}

fn is_fence_close(line: &str, ticks: &str) -> bool {
    strip_indent(line)
        .and_then(|rest| rest.strip_prefix(ticks))
        .map(|tail| tail.trim_matches([' ', '\t']).is_empty())
        .unwrap_or(false)
}
