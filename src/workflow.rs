//! One request, end to end
//!
//! selection -> article (typed or transcribed) -> pipelines -> concurrent
//! batch alongside the summary -> local files -> document -> usage report.
//! Only setup errors abort; persona, summary and publish failures are
//! reported and the run carries on.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{MockModel, OpenAiChatModel, SharedModel};
use crate::config::ImitatorConfig;
use crate::error::{Error, Result};
use crate::persist::{save_to_local, SavedFiles};
use crate::persona::{PersonaSpec, Selection, TemplateRegistry};
use crate::pipeline::{build_pipeline, Pipeline, SinkTarget, StepContext};
use crate::publish::{FeishuPublisher, PublishReport, Publisher, Section};
use crate::resolver::{
    select_input, DashScopeTranscriber, HttpLinkResolver, LinkResolver, Transcriber, Transcript,
    UpstreamResolver,
};
use crate::scheduler::{run_all, PersonaResults};
use crate::summary::{save_summary, Summarizer};
use crate::types::{TokenUsage, UsageLedger};

/// Characters of the article used as the document title
const TITLE_CHARS: usize = 10;

// ─────────────────────────────────────────────────────────────────
// Collaborators
// ─────────────────────────────────────────────────────────────────

/// External services a request talks to
pub struct Collaborators {
    pub model: SharedModel,
    pub auxiliary: SharedModel,
    pub links: Arc<dyn LinkResolver>,
    pub transcriber: Arc<dyn Transcriber>,
    pub publisher: Option<Arc<dyn Publisher>>,
}

impl Collaborators {
    /// Network-backed services as configured
    pub fn from_config(config: &ImitatorConfig) -> Result<Self> {
        let publisher: Option<Arc<dyn Publisher>> = if config.publish.is_configured() {
            Some(Arc::new(FeishuPublisher::new(config.publish.clone())?))
        } else {
            info!("Publishing not configured, results stay local");
            None
        };

        Ok(Self {
            model: Arc::new(OpenAiChatModel::new(config.llm.clone())?),
            auxiliary: Arc::new(OpenAiChatModel::new(config.auxiliary_llm.clone())?),
            links: Arc::new(HttpLinkResolver::new(config.llm.timeout_secs)?),
            transcriber: Arc::new(DashScopeTranscriber::new(config.transcription.clone())?),
            publisher,
        })
    }

    /// No network at all: echoing model, links rejected, nothing published
    pub fn offline() -> Self {
        Self {
            model: Arc::new(MockModel::echo()),
            auxiliary: Arc::new(MockModel::echo()),
            links: Arc::new(OfflineSource),
            transcriber: Arc::new(OfflineSource),
            publisher: None,
        }
    }
}

/// Link and transcription stand-in for dry runs
struct OfflineSource;

#[async_trait]
impl LinkResolver for OfflineSource {
    async fn resolve(&self, url: &str) -> Result<String> {
        Err(Error::resolution(url, "links are not resolved in a dry run"))
    }
}

#[async_trait]
impl Transcriber for OfflineSource {
    async fn transcribe(&self, direct_url: &str) -> Result<Transcript> {
        Err(Error::Transcription {
            message: format!("{} is not transcribed in a dry run", direct_url),
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Request state
// ─────────────────────────────────────────────────────────────────

/// Everything one request produced, built up stage by stage
pub struct WorkflowState {
    pub run_id: Uuid,
    pub user_input: String,
    pub article: String,
    pub persona_specs: Vec<PersonaSpec>,
    pub pipelines: Vec<Pipeline>,
    /// One entry per requested persona, in request order
    pub results: PersonaResults,
}

/// Outcome of [`Workflow::run`]
pub struct RunReport {
    pub state: WorkflowState,
    pub saved: Option<SavedFiles>,
    pub published: Option<PublishReport>,
    pub usage: BTreeMap<String, TokenUsage>,
}

// ─────────────────────────────────────────────────────────────────
// Workflow
// ─────────────────────────────────────────────────────────────────

pub struct Workflow {
    registry: TemplateRegistry,
    collaborators: Collaborators,
    upstream: UpstreamResolver,
    sink: SinkTarget,
    persona_gate: Arc<Semaphore>,
    ledger: Arc<UsageLedger>,
    imitate_dir: PathBuf,
    summary_dir: PathBuf,
}

impl Workflow {
    pub fn new(
        config: &ImitatorConfig,
        registry: TemplateRegistry,
        collaborators: Collaborators,
        sink: SinkTarget,
    ) -> Self {
        let ledger = Arc::new(UsageLedger::new());
        let upstream = UpstreamResolver::new(
            collaborators.links.clone(),
            collaborators.transcriber.clone(),
            collaborators.auxiliary.clone(),
            ledger.clone(),
            Arc::new(Semaphore::new(config.scheduler.max_concurrent_sources)),
        );

        Self {
            registry,
            collaborators,
            upstream,
            sink,
            persona_gate: Arc::new(Semaphore::new(config.scheduler.max_concurrent_personas)),
            ledger,
            imitate_dir: config.imitate_result_dir(),
            summary_dir: config.summary_result_dir(),
        }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Run one request
    pub async fn run(&self, user_input: String, selection: &Selection) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        info!(run_id = %run_id, selection = %selection, "Request started");

        let persona_specs = self.registry.get_persona_specs(selection)?;
        for spec in &persona_specs {
            println!("已选择*{}*模板", spec.name);
        }

        let article = self.upstream.article_for(&select_input(&user_input)).await?;
        let pipelines = persona_specs
            .iter()
            .map(|spec| build_pipeline(spec, &article))
            .collect::<Result<Vec<_>>>()?;

        let mut state = WorkflowState {
            run_id,
            user_input,
            article,
            persona_specs,
            pipelines,
            results: PersonaResults::default(),
        };

        let ctx = StepContext::new(self.collaborators.model.clone(), self.ledger.clone(), self.sink);
        let summarizer = Summarizer::new(self.collaborators.auxiliary.clone(), self.ledger.clone());
        let (batch, summary) = tokio::join!(
            run_all(&state.pipelines, self.persona_gate.clone(), &ctx),
            summarizer.summarize(&state.article),
        );

        match summary {
            Ok(summary) => {
                println!("{}", summary);
                if let Err(e) = save_summary(&self.summary_dir, &state.article, &summary) {
                    warn!(error = %e.format_for_log(), "Could not save summary");
                }
            }
            Err(e) => warn!(error = %e.format_for_log(), "Summary skipped"),
        }

        let batch = batch?;
        info!(elapsed_ms = batch.elapsed.as_millis() as u64, "Rewrites collected");
        state.results = batch.results;

        let saved = match save_to_local(
            &self.imitate_dir,
            &state.article,
            &state.results,
            &self.ledger.snapshot(),
        ) {
            Ok(saved) => {
                println!("保存到本地:\t{}", saved.stem);
                Some(saved)
            }
            Err(e) => {
                warn!(error = %e.format_for_log(), "Could not save results locally");
                None
            }
        };

        let published = self.publish(&state).await;

        let usage = self.ledger.drain();
        info!(
            run_id = %state.run_id,
            personas = state.persona_specs.len(),
            input_chars = state.user_input.chars().count(),
            succeeded = state.results.succeeded(),
            failed = state.results.failed(),
            "Request finished"
        );

        Ok(RunReport {
            state,
            saved,
            published,
            usage,
        })
    }

    async fn publish(&self, state: &WorkflowState) -> Option<PublishReport> {
        let publisher = self.collaborators.publisher.as_ref()?;

        let title: String = state.article.chars().take(TITLE_CHARS).collect();
        let sections: Vec<Section> = state
            .results
            .iter()
            .map(|(persona, outcome)| Section::new(persona, outcome.display_text()))
            .collect();

        match publisher.publish(&title, &state.article, &sections).await {
            Ok(report) => {
                if !report.is_complete() {
                    warn!(failed = report.failed.len(), "Document is missing sections");
                }
                info!(document_id = %report.document_id, published = report.published.len(), "Document published");
                Some(report)
            }
            Err(e) => {
                warn!(error = %e.format_for_log(), "Publishing failed");
                None
            }
        }
    }
}
