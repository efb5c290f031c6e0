//! OpenAI-compatible chat backend
//!
//! Talks to any `/chat/completions` endpoint (DashScope compatible mode,
//! OpenRouter, vLLM, Ollama). Streaming replies are read as server-sent events.

use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::LlmSettings;
use crate::error::{Error, Result};
use crate::types::{Message, TokenUsage};

use super::{ChatModel, Completion, FragmentSender};

/// Longest pause between two retries
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(20);

// ─────────────────────────────────────────────────────────────────
// OpenAI API types (request/response)
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<ApiUsage> for TokenUsage {
    fn from(u: ApiUsage) -> Self {
        TokenUsage::new(u.prompt_tokens, u.completion_tokens)
    }
}

// ─────────────────────────────────────────────────────────────────
// Server-sent events
// ─────────────────────────────────────────────────────────────────

/// What one `data:` line carried
#[derive(Debug, PartialEq)]
enum SseEvent {
    Fragment(String),
    Usage(TokenUsage),
    Done,
    Skip,
}

/// Parse one line of an SSE body
fn parse_sse_line(line: &str) -> Vec<SseEvent> {
    let line = line.trim();
    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim_start(),
        None => return vec![SseEvent::Skip],
    };

    if payload == "[DONE]" {
        return vec![SseEvent::Done];
    }

    let chunk: ChatCompletionChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!(error = %e, "Skipping unparseable stream chunk");
            return vec![SseEvent::Skip];
        }
    };

    let mut events: Vec<SseEvent> = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .filter(|s| !s.is_empty())
        .map(SseEvent::Fragment)
        .collect();

    if let Some(usage) = chunk.usage {
        events.push(SseEvent::Usage(usage.into()));
    }
    events
}

/// Remove and decode the first complete line of `buffer`
///
/// Bytes after the last newline stay buffered, so a character split across
/// two network chunks is decoded only once both halves have arrived.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let line_end = buffer.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=line_end).collect();
    match String::from_utf8(line) {
        Ok(line) => Some(line),
        Err(e) => {
            debug!(error = %e, "Stream line is not valid UTF-8");
            Some(String::from_utf8_lossy(e.as_bytes()).into_owned())
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// OpenAI Chat Model
// ─────────────────────────────────────────────────────────────────

/// OpenAI-compatible chat client
pub struct OpenAiChatModel {
    settings: LlmSettings,
    client: Client,
}

impl OpenAiChatModel {
    /// Create a client for the given settings
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            base_url = %settings.base_url,
            model = %settings.model,
            "OpenAI-compatible model client created"
        );

        Ok(Self { settings, client })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }

    /// Build the authorization header value (if API key is set)
    fn auth_header(&self) -> Option<String> {
        if self.settings.api_key.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", self.settings.api_key))
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs)
    }

    fn call_error(&self, attempts: u32, message: impl Into<String>) -> Error {
        Error::ModelCall {
            model: self.settings.model.clone(),
            attempts,
            message: message.into(),
        }
    }

    /// Send the request until it yields a success status or retries run out
    async fn send_with_retry(
        &self,
        body: &ChatCompletionRequest<'_>,
    ) -> Result<(reqwest::Response, u32)> {
        let url = self.url();
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: MAX_RETRY_INTERVAL,
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let mut req = self.client.post(&url).json(body);
            if let Some(ref auth) = self.auth_header() {
                req = req.header("Authorization", auth);
            }

            let (retryable, message) =
                match tokio::time::timeout(self.timeout(), req.send()).await {
                    Err(_) => (true, format!("no response within {}s", self.settings.timeout_secs)),
                    Ok(Ok(response)) if response.status().is_success() => {
                        return Ok((response, attempt));
                    }
                    Ok(Ok(response)) => {
                        let status = response.status();
                        let text = response.text().await.unwrap_or_default();
                        (
                            status.as_u16() == 429 || status.is_server_error(),
                            format!("API error {}: {}", status, text),
                        )
                    }
                    Ok(Err(e)) => {
                        let err = Error::from_reqwest(&url, e, self.settings.timeout_secs);
                        (err.is_retryable(), err.to_string())
                    }
                };

            if !retryable || attempt > self.settings.max_retries {
                return Err(self.call_error(attempt, message));
            }

            let delay = backoff.next_backoff().unwrap_or(MAX_RETRY_INTERVAL);
            warn!(
                model = %self.settings.model,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retryable model error: {}",
                message
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.settings.model
    }

    async fn stream_chat(
        &self,
        messages: &[Message],
        fragments: FragmentSender,
    ) -> Result<Completion> {
        let body = ChatCompletionRequest {
            model: &self.settings.model,
            messages,
            temperature: self.settings.temperature,
            stream: true,
            stream_options: Some(StreamOptions { include_usage: true }),
        };

        let (response, attempts) = self.send_with_retry(&body).await?;

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut text = String::new();
        let mut usage = TokenUsage::default();

        'read: loop {
            let chunk = match tokio::time::timeout(self.timeout(), stream.next()).await {
                Err(_) => {
                    return Err(self.call_error(
                        attempts,
                        format!("stream stalled for {}s", self.settings.timeout_secs),
                    ))
                }
                Ok(None) => break,
                Ok(Some(chunk)) => chunk
                    .map_err(|e| self.call_error(attempts, format!("stream interrupted: {}", e)))?,
            };

            buffer.extend_from_slice(&chunk);

            while let Some(line) = take_line(&mut buffer) {
                if line.trim().is_empty() {
                    continue;
                }

                for event in parse_sse_line(&line) {
                    match event {
                        SseEvent::Fragment(piece) => {
                            text.push_str(&piece);
                            let _ = fragments.send(piece);
                        }
                        SseEvent::Usage(u) => usage = u,
                        SseEvent::Done => break 'read,
                        SseEvent::Skip => {}
                    }
                }
            }
        }

        debug!(
            model = %self.settings.model,
            chars = text.chars().count(),
            total_tokens = usage.total_tokens,
            "Streamed completion finished"
        );

        Ok(Completion {
            text,
            usage,
            attempts,
        })
    }

    async fn complete(&self, messages: &[Message]) -> Result<Completion> {
        let body = ChatCompletionRequest {
            model: &self.settings.model,
            messages,
            temperature: self.settings.temperature,
            stream: false,
            stream_options: None,
        };

        let (response, attempts) = self.send_with_retry(&body).await?;

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            Error::ModelResponse {
                message: format!("Failed to parse API response: {}", e),
            }
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| Error::ModelResponse {
            message: "No choices in API response".to_string(),
        })?;

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            usage: parsed.usage.map(TokenUsage::from).unwrap_or_default(),
            attempts,
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one HTTP request (headers plus a Content-Length body)
    async fn read_request(socket: &mut TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);
            if let Some(head_end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&data[..head_end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if data.len() >= head_end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Serve one scripted response per connection, each sent as the given writes
    async fn serve(responses: Vec<Vec<Vec<u8>>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for writes in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                for part in writes {
                    socket.write_all(&part).await.unwrap();
                    socket.flush().await.unwrap();
                    tokio::time::sleep(Duration::from_millis(30)).await;
                }
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}", addr)
    }

    fn local_model(base_url: String, max_retries: u32) -> OpenAiChatModel {
        OpenAiChatModel::new(LlmSettings {
            base_url,
            timeout_secs: 5,
            max_retries,
            ..Default::default()
        })
        .unwrap()
    }

    const SSE_HEAD: &[u8] =
        b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";

    fn json_response(status: &str, body: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
        .into_bytes()
    }

    #[test]
    fn test_take_line_waits_for_split_character() {
        let line = "data: 你好\n".as_bytes();
        let mut buffer = line[..7].to_vec();
        assert_eq!(take_line(&mut buffer), None);

        buffer.extend_from_slice(&line[7..]);
        assert_eq!(take_line(&mut buffer), Some("data: 你好\n".to_string()));
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_stream_keeps_character_split_across_chunks() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n\ndata: [DONE]\n\n"
            .as_bytes();
        let split = body.iter().position(|&b| b == 0xE4).unwrap() + 1;

        let base_url = serve(vec![vec![
            SSE_HEAD.to_vec(),
            body[..split].to_vec(),
            body[split..].to_vec(),
        ]])
        .await;
        let model = local_model(base_url, 0);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let completion = model.stream_chat(&[Message::user("hi")], tx).await.unwrap();

        assert_eq!(completion.text, "你好");
        assert_eq!(rx.recv().await, Some("你好".to_string()));
    }

    #[tokio::test]
    async fn test_transient_status_is_retried_until_success() {
        let reply = r#"{"choices":[{"message":{"content":"改写完成"}}],"usage":{"prompt_tokens":3,"completion_tokens":4}}"#;
        let base_url = serve(vec![
            vec![json_response("503 Service Unavailable", r#"{"error":"busy"}"#)],
            vec![json_response("429 Too Many Requests", r#"{"error":"slow down"}"#)],
            vec![json_response("200 OK", reply)],
        ])
        .await;
        let model = local_model(base_url, 3);

        let completion = model.complete(&[Message::user("hi")]).await.unwrap();
        assert_eq!(completion.text, "改写完成");
        assert_eq!(completion.attempts, 3);
        assert_eq!(completion.usage, TokenUsage::new(3, 4));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let base_url = serve(vec![vec![json_response(
            "401 Unauthorized",
            r#"{"error":"bad key"}"#,
        )]])
        .await;
        let model = local_model(base_url, 3);

        match model.complete(&[Message::user("hi")]).await.unwrap_err() {
            Error::ModelCall { attempts, message, .. } => {
                assert_eq!(attempts, 1);
                assert!(message.contains("401"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_content_delta() {
        let events =
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"你好"}}]}"#);
        assert_eq!(events, vec![SseEvent::Fragment("你好".to_string())]);
    }

    #[test]
    fn test_parse_usage_chunk() {
        let events = parse_sse_line(
            r#"data: {"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":30,"total_tokens":42}}"#,
        );
        assert_eq!(events, vec![SseEvent::Usage(TokenUsage::new(12, 30))]);
    }

    #[test]
    fn test_parse_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]"), vec![SseEvent::Done]);
        assert_eq!(parse_sse_line(": keep-alive"), vec![SseEvent::Skip]);
        assert_eq!(parse_sse_line("data: {not json"), vec![SseEvent::Skip]);
    }

    #[test]
    fn test_empty_delta_is_dropped() {
        let events = parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#);
        assert!(events.is_empty());
    }

    #[test]
    fn test_request_shape() {
        let messages = vec![Message::system("s"), Message::user("u")];
        let body = ChatCompletionRequest {
            model: "qwen-plus-latest",
            messages: &messages,
            temperature: 1.0,
            stream: true,
            stream_options: Some(StreamOptions { include_usage: true }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_auth_header_and_url() {
        let model = OpenAiChatModel::new(LlmSettings {
            api_key: "sk-test-123".to_string(),
            base_url: "https://example.com/v1/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(model.auth_header(), Some("Bearer sk-test-123".to_string()));
        assert_eq!(model.url(), "https://example.com/v1/chat/completions");

        let no_key = OpenAiChatModel::new(LlmSettings::default()).unwrap();
        assert_eq!(no_key.auth_header(), None);
        assert_eq!(no_key.name(), "qwen-plus-latest");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_not_retried_forever() {
        let model = OpenAiChatModel::new(LlmSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            max_retries: 1,
            ..Default::default()
        })
        .unwrap();

        let err = model.complete(&[Message::user("hi")]).await.unwrap_err();
        match err {
            Error::ModelCall { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("unexpected error: {other}"),
        }
    }
}
