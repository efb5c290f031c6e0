//! Scripted chat model
//!
//! Used by the unit tests and by `imitator run --dry-run`, which exercises the
//! whole workflow without network access. Replies, latency and failures are
//! chosen by matching markers in the prompt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::{Message, Role, TokenUsage};

use super::{ChatModel, Completion, FragmentSender};

// ─────────────────────────────────────────────────────────────────
// Mock Configuration
// ─────────────────────────────────────────────────────────────────

/// How the mock builds its reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Repeat the last user message
    Echo,
    /// Always answer with this text
    Fixed(String),
    /// `reply to: <last user message>`, handy for asserting history
    Tagged,
}

/// Configuration for mock model behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub name: String,
    pub reply: MockReply,

    /// Characters per streamed fragment
    pub fragment_chars: usize,

    /// Delay before the first fragment
    pub latency: Duration,

    /// Extra delay when any prompt message contains the marker
    pub delays: Vec<(String, Duration)>,

    /// Fail permanently when any prompt message contains the marker
    pub fail_on: Vec<String>,

    /// Attempts reported when failing
    pub max_retries: u32,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            reply: MockReply::Tagged,
            fragment_chars: 4,
            latency: Duration::ZERO,
            delays: vec![],
            fail_on: vec![],
            max_retries: 10,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Mock Model
// ─────────────────────────────────────────────────────────────────

/// Mock implementation of ChatModel
pub struct MockModel {
    config: MockConfig,
    calls: RwLock<Vec<Vec<Message>>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when a call ends, however it ends
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockModel {
    pub fn new() -> Self {
        Self::with_config(MockConfig::default())
    }

    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config,
            calls: RwLock::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Offline model that hands the prompt back, used for dry runs
    pub fn echo() -> Self {
        Self::with_config(MockConfig {
            name: "dry-run".to_string(),
            reply: MockReply::Echo,
            fragment_chars: 16,
            ..Default::default()
        })
    }

    /// Every prompt received so far, in call order
    #[cfg(test)]
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.read().clone()
    }

    #[cfg(test)]
    pub fn call_count(&self) -> usize {
        self.calls.read().len()
    }

    /// Highest number of calls that were running at the same time
    #[cfg(test)]
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn prompt_contains(messages: &[Message], marker: &str) -> bool {
        messages.iter().any(|m| m.content.contains(marker))
    }

    fn build_reply(&self, messages: &[Message]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        match self.config.reply {
            MockReply::Echo => last_user.to_string(),
            MockReply::Fixed(ref text) => text.clone(),
            MockReply::Tagged => format!("reply to: {}", last_user),
        }
    }

    fn split_fragments(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.config.fragment_chars.max(1))
            .map(|c| c.iter().collect())
            .collect()
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatModel for MockModel {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn stream_chat(
        &self,
        messages: &[Message],
        fragments: FragmentSender,
    ) -> Result<Completion> {
        self.calls.write().push(messages.to_vec());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let mut delay = self.config.latency;
        for (marker, extra) in &self.config.delays {
            if Self::prompt_contains(messages, marker) {
                delay += *extra;
            }
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(marker) = self
            .config
            .fail_on
            .iter()
            .find(|m| Self::prompt_contains(messages, m))
        {
            return Err(Error::ModelCall {
                model: self.config.name.clone(),
                attempts: self.config.max_retries + 1,
                message: format!("scripted failure on '{}'", marker),
            });
        }

        let text = self.build_reply(messages);
        for piece in self.split_fragments(&text) {
            let _ = fragments.send(piece);
            tokio::task::yield_now().await;
        }

        let prompt_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        Ok(Completion {
            usage: TokenUsage::new(prompt_chars as u32, text.chars().count() as u32),
            text,
            attempts: 1,
        })
    }
}
