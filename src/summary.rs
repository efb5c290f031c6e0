//! Article summarisation
//!
//! Runs beside the persona batch: asks the auxiliary model for a theme, a one
//! line summary and an outline, and saves what comes back as JSON. Nothing
//! here can fail the request.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::SharedModel;
use crate::error::{Error, Result};
use crate::types::{Message, UsageLedger};

const SUMMARY_SYSTEM_PROMPT: &str = r#"你是一名资深信息架构师与领域分析员。请从输入文本中，产出一份结构化大纲，要求深度理解、客观克制、证据配对、可追踪。
只输出主题、摘要、大纲，不展示推理过程。
输出格式（严格遵循）
一句话摘要：（≤30字，呈现出本文的属性、核心观点及结论）
大纲核心结论（3–6条）：（面向决策/复用，避免空话）
大纲核心结论需要在文中有充足的证据支撑,不允许编造数据，须与原文一致
大纲中只允许包含大纲标题与内容本身,禁止直接输出“标题”“内容”等指明结构的部分，大纲标题和大纲标题对应的内容呈现格式以在json中示例为标准
只输出大纲，不输出提示词、过程或与大纲无关内容。
最终输出格式为JSON格式：
{
    "theme": "",
    "summary": "",
    "outline": [{"大纲标题1": "大纲内容1"}, {"大纲标题2": "大纲内容2"}, {"大纲标题3": "大纲内容3"}]
}"#;

// ─────────────────────────────────────────────────────────────────
// Summary types
// ─────────────────────────────────────────────────────────────────

/// Structured summary of one article
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleSummary {
    pub theme: String,
    pub summary: String,
    pub outline: Vec<OutlineEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlineEntry {
    pub heading: String,
    pub content: OutlineContent,
}

/// Outline body: a paragraph, or nested sub-points
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutlineContent {
    Text(String),
    Points(Vec<OutlinePoint>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlinePoint {
    pub title: String,
    pub text: String,
}

impl fmt::Display for ArticleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "主题:{}\n", self.theme)?;
        writeln!(f, "摘要:{}\n", self.summary)?;
        writeln!(f, "大纲:")?;
        for entry in &self.outline {
            match &entry.content {
                OutlineContent::Text(text) => writeln!(f, "{}\n{}\n", entry.heading, text)?,
                OutlineContent::Points(points) => {
                    writeln!(f, "{}", entry.heading)?;
                    for point in points {
                        writeln!(f, "\t{}\n\t{}\n", point.title, point.text)?;
                    }
                }
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────

/// Parse a model reply into a summary
///
/// Accepts fenced JSON, prose around the object, an outline sent as a JSON
/// string, and outline values that are either text or `{title: text}` maps.
pub fn parse_summary(reply: &str) -> Result<ArticleSummary> {
    let body = json_object_span(reply).ok_or_else(|| Error::Summary {
        message: "reply contains no JSON object".to_string(),
    })?;
    let value: Value = serde_json::from_str(body).map_err(|e| Error::Summary {
        message: format!("reply is not valid JSON: {}", e),
    })?;

    let theme = string_field(&value, "theme");
    let summary = string_field(&value, "summary");
    let outline = match value.get("outline") {
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed) => outline_entries(&parsed),
            Err(_) => vec![OutlineEntry {
                heading: String::new(),
                content: OutlineContent::Text(raw.clone()),
            }],
        },
        Some(other) => outline_entries(other),
        None => Vec::new(),
    };

    if theme.is_empty() && summary.is_empty() && outline.is_empty() {
        return Err(Error::Summary {
            message: "reply has no theme, summary or outline".to_string(),
        });
    }

    Ok(ArticleSummary {
        theme,
        summary,
        outline,
    })
}

/// Slice from the first `{` to the last `}`, which also drops code fences
fn json_object_span(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

fn string_field(value: &Value, key: &str) -> String {
    value.get(key).map(value_text).unwrap_or_default()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn outline_entries(value: &Value) -> Vec<OutlineEntry> {
    let items = match value {
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        Value::Object(_) => vec![value],
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .filter_map(Value::as_object)
        .flat_map(|map| map.iter())
        .map(|(heading, content)| OutlineEntry {
            heading: heading.clone(),
            content: match content {
                Value::Object(points) => OutlineContent::Points(
                    points
                        .iter()
                        .map(|(title, text)| OutlinePoint {
                            title: title.clone(),
                            text: value_text(text),
                        })
                        .collect(),
                ),
                other => OutlineContent::Text(value_text(other)),
            },
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────
// Summarizer
// ─────────────────────────────────────────────────────────────────

/// Summarises articles with the auxiliary model
pub struct Summarizer {
    model: SharedModel,
    ledger: Arc<UsageLedger>,
}

impl Summarizer {
    pub fn new(model: SharedModel, ledger: Arc<UsageLedger>) -> Self {
        Self { model, ledger }
    }

    pub async fn summarize(&self, text: &str) -> Result<ArticleSummary> {
        info!(chars = text.chars().count(), "Summarising article");
        let messages = vec![
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(format!("需要总结的文本如下:\n{}", text)),
        ];

        let completion = self.model.complete(&messages).await?;
        self.ledger.record(self.model.name(), completion.usage);
        debug!(chars = completion.text.chars().count(), "Summary reply received");

        parse_summary(&completion.text)
    }
}

/// Append the summary to `<dir>/<timestamp>_summarize_result.json`
pub fn save_summary(dir: &Path, article: &str, summary: &ArticleSummary) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| Error::IoWrite {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let stamp = chrono::Local::now().format("%Y-%m-%d %H-%M-%S");
    let path = dir.join(format!("{}_summarize_result.json", stamp));

    let record = serde_json::json!({
        "origin_article": article.chars().take(20).collect::<String>(),
        "summarize_result": summary,
    });

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| Error::IoWrite {
            path: path.clone(),
            source: e,
        })?;
    serde_json::to_writer(&mut file, &record)?;
    file.write_all(b"\n").map_err(|e| Error::IoWrite {
        path: path.clone(),
        source: e,
    })?;

    info!(path = %path.display(), "Summary saved");
    Ok(path)
}
