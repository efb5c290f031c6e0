//! Chat model trait definitions
//!
//! Every model call in imitator goes through [`ChatModel`]: the rewrite steps
//! stream, the correction and summary calls use the one-shot form.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{Message, TokenUsage};

/// Receiving end of the fragments emitted while a reply is generated
pub type FragmentReceiver = mpsc::UnboundedReceiver<String>;

/// Sending end handed to [`ChatModel::stream_chat`]
pub type FragmentSender = mpsc::UnboundedSender<String>;

/// Shared handle to a model client
pub type SharedModel = Arc<dyn ChatModel>;

/// A finished model reply
#[derive(Debug, Clone, Default)]
pub struct Completion {
    /// Full reply text, equal to the concatenation of the streamed fragments
    pub text: String,

    /// Token usage reported by the server (zero when not reported)
    pub usage: TokenUsage,

    /// Number of HTTP attempts it took
    pub attempts: u32,
}

/// Core trait for chat-completion clients
///
/// Implementations retry transient failures themselves and only return an
/// error once the retry budget is spent.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier, used as the usage ledger key
    fn name(&self) -> &str;

    /// Generate a reply, sending each text fragment to `fragments` as it arrives
    ///
    /// A dropped receiver is not an error; generation continues and the full
    /// text is still returned.
    async fn stream_chat(&self, messages: &[Message], fragments: FragmentSender)
        -> Result<Completion>;

    /// Generate a reply without observing fragments
    async fn complete(&self, messages: &[Message]) -> Result<Completion> {
        let (tx, _rx) = mpsc::unbounded_channel();
        self.stream_chat(messages, tx).await
    }
}
