//! Speech-to-text and transcript correction
//!
//! Direct media URLs are transcribed by DashScope's asynchronous file
//! transcription API, then each transcript is cleaned up by the auxiliary
//! model. Sources that fail anywhere along the way are dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::backend::ChatModel;
use crate::config::TranscriptionSettings;
use crate::error::{Error, Result};
use crate::types::{Message, UsageLedger};

const CORRECTION_SYSTEM_PROMPT: &str = "The following is a speech to text transcription of a video. \
The text is primarily in Chinese, although it may also contain English. \
Correct the transcription of any errors. Make sure to output the FULL transcript. \
Output just the corrected transcript in your response and nothing else.";

const CORRECTION_RULE: &str =
    "-------------------------------------------------------------------";

/// One transcribed source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    pub source_url: String,
    pub text: String,
}

/// Speech-to-text service
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the media behind one direct URL
    async fn transcribe(&self, direct_url: &str) -> Result<Transcript>;
}

// ─────────────────────────────────────────────────────────────────
// DashScope API types
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    model: &'a str,
    input: SubmitInput<'a>,
    parameters: SubmitParameters,
}

#[derive(Debug, Serialize)]
struct SubmitInput<'a> {
    file_urls: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct SubmitParameters {
    language_hints: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    output: TaskOutput,
}

#[derive(Debug, Deserialize)]
struct TaskOutput {
    task_id: String,
    task_status: String,
    #[serde(default)]
    results: Vec<SubtaskResult>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubtaskResult {
    #[serde(default)]
    file_url: String,
    #[serde(default)]
    transcription_url: String,
    #[serde(default)]
    subtask_status: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionFile {
    file_url: String,
    transcripts: Vec<TranscriptionChannel>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionChannel {
    text: String,
}

// ─────────────────────────────────────────────────────────────────
// DashScope Transcriber
// ─────────────────────────────────────────────────────────────────

/// Client for DashScope file transcription (`paraformer-v2`)
pub struct DashScopeTranscriber {
    settings: TranscriptionSettings,
    client: Client,
}

impl DashScopeTranscriber {
    pub fn new(settings: TranscriptionSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { settings, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    async fn submit(&self, direct_url: &str) -> Result<TaskOutput> {
        let url = self.endpoint("services/audio/asr/transcription");
        let body = SubmitRequest {
            model: &self.settings.model,
            input: SubmitInput {
                file_urls: vec![direct_url],
            },
            parameters: SubmitParameters {
                language_hints: vec!["zh", "en"],
            },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .header("X-DashScope-Async", "enable")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&url, e, 60))?;

        read_task(response).await
    }

    async fn fetch(&self, task_id: &str) -> Result<TaskOutput> {
        let url = self.endpoint(&format!("tasks/{}", task_id));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.settings.api_key)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&url, e, 60))?;

        read_task(response).await
    }

    /// Poll until the task settles or the deadline passes
    async fn wait(&self, mut task: TaskOutput) -> Result<TaskOutput> {
        let deadline = Instant::now() + Duration::from_secs(self.settings.max_poll_secs);
        let interval = Duration::from_millis(self.settings.poll_interval_ms);

        while !matches!(task.task_status.as_str(), "SUCCEEDED" | "FAILED") {
            if Instant::now() >= deadline {
                return Err(Error::Transcription {
                    message: format!(
                        "task {} still {} after {}s",
                        task.task_id, task.task_status, self.settings.max_poll_secs
                    ),
                });
            }
            tokio::time::sleep(interval).await;
            task = self.fetch(&task.task_id).await?;
            debug!(task_id = %task.task_id, status = %task.task_status, "Transcription task polled");
        }

        Ok(task)
    }

    async fn download(&self, transcription_url: &str) -> Result<TranscriptionFile> {
        let response = self
            .client
            .get(transcription_url)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(transcription_url, e, 60))?;

        if !response.status().is_success() {
            return Err(Error::Transcription {
                message: format!("transcript download returned {}", response.status()),
            });
        }

        response.json().await.map_err(|e| Error::Transcription {
            message: format!("transcript file unreadable: {}", e),
        })
    }
}

#[async_trait]
impl Transcriber for DashScopeTranscriber {
    async fn transcribe(&self, direct_url: &str) -> Result<Transcript> {
        let start = Instant::now();
        let submitted = self.submit(direct_url).await?;
        info!(task_id = %submitted.task_id, "Transcription task submitted");

        let task = self.wait(submitted).await?;
        if task.task_status == "FAILED" {
            return Err(Error::Transcription {
                message: task
                    .message
                    .unwrap_or_else(|| format!("task {} failed", task.task_id)),
            });
        }

        let subtask = task
            .results
            .into_iter()
            .find(|r| r.subtask_status == "SUCCEEDED" && !r.transcription_url.is_empty())
            .ok_or_else(|| Error::Transcription {
                message: "no succeeded subtask".to_string(),
            })?;

        let file = self.download(&subtask.transcription_url).await?;
        let text = file
            .transcripts
            .into_iter()
            .next()
            .map(|t| t.text)
            .ok_or_else(|| Error::Transcription {
                message: "transcript file has no channels".to_string(),
            })?;

        info!(
            source = %subtask.file_url,
            chars = text.chars().count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Transcription finished"
        );

        Ok(Transcript {
            source_url: file.file_url,
            text,
        })
    }
}

async fn read_task(response: reqwest::Response) -> Result<TaskOutput> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(Error::Transcription {
            message: format!("API error {}: {}", status, text),
        });
    }

    let body: TaskResponse = response.json().await.map_err(|e| Error::Transcription {
        message: format!("unexpected task response: {}", e),
    })?;
    Ok(body.output)
}

// ─────────────────────────────────────────────────────────────────
// Correction
// ─────────────────────────────────────────────────────────────────

/// Messages asking the model to fix a raw transcript
pub fn correction_messages(raw: &str) -> Vec<Message> {
    vec![
        Message::system(CORRECTION_SYSTEM_PROMPT),
        Message::user(format!(
            "the following is the transcription of a video:\n{rule}\n{raw}\n{rule}",
            rule = CORRECTION_RULE,
            raw = raw
        )),
    ]
}

/// Correct a transcript; on any failure the raw text is kept
pub async fn correct_transcript(model: &dyn ChatModel, ledger: &UsageLedger, raw: &str) -> String {
    match model.complete(&correction_messages(raw)).await {
        Ok(completion) if !completion.text.trim().is_empty() => {
            ledger.record(model.name(), completion.usage);
            debug!(
                raw_chars = raw.chars().count(),
                corrected_chars = completion.text.chars().count(),
                "Transcript corrected"
            );
            completion.text
        }
        Ok(_) => {
            warn!("Correction returned nothing, keeping raw transcript");
            raw.to_string()
        }
        Err(e) => {
            warn!(error = %e.format_for_log(), "Correction failed, keeping raw transcript");
            raw.to_string()
        }
    }
}

/// Transcribe and correct every URL concurrently behind `gate`
///
/// Failed sources are logged and omitted; the output follows input order.
pub async fn transcribe_and_correct(
    transcriber: Arc<dyn Transcriber>,
    corrector: Arc<dyn ChatModel>,
    ledger: Arc<UsageLedger>,
    direct_urls: &[String],
    gate: Arc<Semaphore>,
) -> Vec<Transcript> {
    let mut tasks = FuturesUnordered::new();
    for (idx, url) in direct_urls.iter().enumerate() {
        let transcriber = transcriber.clone();
        let corrector = corrector.clone();
        let ledger = ledger.clone();
        let gate = gate.clone();
        tasks.push(async move {
            let _permit = match gate.acquire().await {
                Ok(permit) => permit,
                Err(_) => return (idx, None),
            };
            let transcript = match transcriber.transcribe(url).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(url = %url, error = %e.format_for_log(), "Transcription failed, skipping source");
                    return (idx, None);
                }
            };
            let text = correct_transcript(corrector.as_ref(), &ledger, &transcript.text).await;
            (
                idx,
                Some(Transcript {
                    source_url: transcript.source_url,
                    text,
                }),
            )
        });
    }

    let mut finished: Vec<Option<Transcript>> = vec![None; direct_urls.len()];
    while let Some((idx, transcript)) = tasks.next().await {
        finished[idx] = transcript;
    }

    let transcripts: Vec<Transcript> = finished.into_iter().flatten().collect();
    info!(
        sources = direct_urls.len(),
        transcribed = transcripts.len(),
        "Transcription batch finished"
    );
    transcripts
}
