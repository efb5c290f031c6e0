//! Rewrite steps
//!
//! A step builds its prompt from the pipeline history, streams one model
//! reply to the output sink and appends the exchange to the history.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::backend::{FragmentReceiver, SharedModel};
use crate::error::Result;
use crate::persona::PromptTemplate;
use crate::types::{Message, UsageLedger};

use super::sink::{OutputSink, SinkTarget, StreamOutput};
use super::state::PipelineState;

/// Wrap the source article the way the seed prompt expects it
pub fn wrap_article(article: &str) -> String {
    format!("<原始文案>\n{}\n</原始文案>", article)
}

/// Instruction for the headline polish pass over `draft`
pub fn polish_prompt(draft: &str) -> String {
    format!(
        "\n\n<待优化文案>\n{}\n</待优化文案>\n以上就是需要优化开头部分的文案，请直接以markdown格式输出优化完成后的全部文案，不要改变文案其他部分的结构和内容",
        draft
    )
}

// ─────────────────────────────────────────────────────────────────
// Step Context
// ─────────────────────────────────────────────────────────────────

/// Everything a step needs besides the pipeline state
#[derive(Clone)]
pub struct StepContext {
    pub model: SharedModel,
    pub ledger: Arc<UsageLedger>,
    pub output: StreamOutput,
}

impl StepContext {
    pub fn new(model: SharedModel, ledger: Arc<UsageLedger>, sink: SinkTarget) -> Self {
        Self {
            model,
            ledger,
            output: StreamOutput::new(sink),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Rewrite Step
// ─────────────────────────────────────────────────────────────────

/// What a step sends on top of the existing history
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// First step: template as system prompt, article as user message
    Seed {
        template: PromptTemplate,
        article: String,
    },
    /// Later steps: template as a follow-up user message
    Continuation { template: PromptTemplate },
    /// Rewrite the opening of the current draft; `fallback` is used when
    /// there is no draft yet
    Polish { fallback: String },
}

/// One node of a persona pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteStep {
    pub index: usize,
    pub kind: StepKind,
}

impl RewriteStep {
    pub fn seed(template: PromptTemplate, article: &str) -> Self {
        Self {
            index: 0,
            kind: StepKind::Seed {
                template,
                article: article.to_string(),
            },
        }
    }

    pub fn continuation(index: usize, template: PromptTemplate) -> Self {
        Self {
            index,
            kind: StepKind::Continuation { template },
        }
    }

    pub fn polish(index: usize, fallback: &str) -> Self {
        Self {
            index,
            kind: StepKind::Polish {
                fallback: fallback.to_string(),
            },
        }
    }

    /// Messages this step adds before calling the model
    fn new_messages(&self, state: &PipelineState) -> Vec<Message> {
        match &self.kind {
            StepKind::Seed { template, article } => vec![
                Message::system(template.as_str()),
                Message::user(wrap_article(article)),
            ],
            StepKind::Continuation { template } => vec![Message::user(template.as_str())],
            StepKind::Polish { fallback } => {
                let draft = if state.final_text.is_empty() {
                    fallback
                } else {
                    &state.final_text
                };
                vec![Message::user(polish_prompt(draft))]
            }
        }
    }

    /// Run the step and return the advanced state
    pub async fn run(&self, mut state: PipelineState, ctx: &StepContext) -> Result<PipelineState> {
        let label = format!("{}/step{}", state.role_name, self.index + 1);
        let start = Instant::now();

        state.messages.extend(self.new_messages(&state));

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = ctx.output.open(&label).await;

        let (completion, ()) = tokio::join!(
            ctx.model.stream_chat(&state.messages, tx),
            forward_fragments(rx, sink)
        );
        let completion = completion?;

        ctx.ledger.record(ctx.model.name(), completion.usage);

        debug!(
            persona = %state.role_name,
            step = self.index + 1,
            attempts = completion.attempts,
            chars = completion.text.chars().count(),
            "Step reply complete"
        );
        info!(
            persona = %state.role_name,
            step = self.index + 1,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Rewrite step finished"
        );

        state.messages.push(Message::assistant(completion.text.clone()));
        state.final_text = completion.text;
        Ok(state)
    }
}

/// Drain the fragment channel into the sink until the model is done
async fn forward_fragments(mut rx: FragmentReceiver, mut sink: OutputSink) {
    while let Some(piece) = rx.recv().await {
        sink.emit(&piece).await;
    }
    sink.finish().await;
}
