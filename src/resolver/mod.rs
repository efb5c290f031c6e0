//! Upstream resolver
//!
//! Turns what the user typed into the article the personas rewrite: either the
//! text itself, or the corrected transcript of a shared video link.

mod links;
mod transcribe;

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::info;
use url::Url;

use crate::backend::SharedModel;
use crate::error::{Error, Result};
use crate::types::UsageLedger;

use links::resolve_all;
use transcribe::transcribe_and_correct;

pub use links::{HttpLinkResolver, LinkKind, LinkResolver};
pub use transcribe::{DashScopeTranscriber, Transcriber, Transcript};

/// What the request input turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    /// Plain text, rewritten as is
    Article(String),
    /// First URL found in the input
    Link(String),
}

/// Route the input: anything carrying an http(s) URL is a link
pub fn select_input(user_input: &str) -> InputKind {
    match extract_first_url(user_input) {
        Some(url) => InputKind::Link(url),
        None => InputKind::Article(user_input.to_string()),
    }
}

/// First http(s) URL in free text, e.g. a share message `【标题】 https://b23.tv/x 复制此链接`
pub fn extract_first_url(text: &str) -> Option<String> {
    let start = ["https://", "http://"]
        .iter()
        .filter_map(|scheme| text.find(scheme))
        .min()?;

    let candidate: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii() && !c.is_ascii_whitespace() && !matches!(*c, '"' | '<' | '>'))
        .collect();
    let candidate = candidate.trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ')' | ']'));

    Url::parse(candidate).ok().map(|_| candidate.to_string())
}

/// Link resolution, transcription and correction wired together
pub struct UpstreamResolver {
    links: Arc<dyn LinkResolver>,
    transcriber: Arc<dyn Transcriber>,
    corrector: SharedModel,
    ledger: Arc<UsageLedger>,
    gate: Arc<Semaphore>,
}

impl UpstreamResolver {
    pub fn new(
        links: Arc<dyn LinkResolver>,
        transcriber: Arc<dyn Transcriber>,
        corrector: SharedModel,
        ledger: Arc<UsageLedger>,
        gate: Arc<Semaphore>,
    ) -> Self {
        Self {
            links,
            transcriber,
            corrector,
            ledger,
            gate,
        }
    }

    /// The article for this input; a link with no usable transcript is an error
    pub async fn article_for(&self, input: &InputKind) -> Result<String> {
        let url = match input {
            InputKind::Article(text) => return Ok(text.clone()),
            InputKind::Link(url) => url,
        };

        info!(url = %url, kind = LinkKind::classify(url).as_str(), "Input is a link");

        let direct = resolve_all(self.links.clone(), std::slice::from_ref(url), self.gate.clone()).await;
        let transcripts = transcribe_and_correct(
            self.transcriber.clone(),
            self.corrector.clone(),
            self.ledger.clone(),
            &direct,
            self.gate.clone(),
        )
        .await;

        transcripts
            .into_iter()
            .next()
            .map(|t| t.text)
            .ok_or_else(|| Error::resolution(url.as_str(), "没有有效的转录结果"))
    }
}
