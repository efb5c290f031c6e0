//! Persona scheduler
//!
//! Runs every persona pipeline of a request concurrently behind an admission
//! gate and gathers one outcome per persona, in request order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::pipeline::{Pipeline, StepContext};

// ─────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────

/// Result of one persona pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersonaOutcome {
    Completed { text: String },
    Failed { code: String, message: String },
}

impl PersonaOutcome {
    fn from_error(err: &Error) -> Self {
        PersonaOutcome::Failed {
            code: err.code().as_str(),
            message: err.to_string(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, PersonaOutcome::Completed { .. })
    }

    /// Text to persist or publish; failures render as a visible marker
    pub fn display_text(&self) -> String {
        match self {
            PersonaOutcome::Completed { text } => text.clone(),
            PersonaOutcome::Failed { code, message } => {
                format!("[生成失败 {}] {}", code, message)
            }
        }
    }
}

/// Outcomes keyed by persona name, kept in request order
#[derive(Debug, Clone, Default, Serialize)]
pub struct PersonaResults {
    entries: Vec<(String, PersonaOutcome)>,
}

impl PersonaResults {
    /// Record the outcome for `persona`; a name is written at most once
    pub fn insert(&mut self, persona: String, outcome: PersonaOutcome) -> bool {
        if self.get(&persona).is_some() {
            return false;
        }
        self.entries.push((persona, outcome));
        true
    }

    pub fn get(&self, persona: &str) -> Option<&PersonaOutcome> {
        self.entries
            .iter()
            .find(|(name, _)| name == persona)
            .map(|(_, outcome)| outcome)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PersonaOutcome)> {
        self.entries.iter().map(|(name, outcome)| (name.as_str(), outcome))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|(_, o)| o.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }
}

/// What a batch run produced
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub results: PersonaResults,
    pub elapsed: Duration,
}

// ─────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────

/// Run all pipelines concurrently, at most `gate` permits at a time
///
/// A failing persona never cancels its siblings; its entry becomes a
/// [`PersonaOutcome::Failed`] marker instead.
pub async fn run_all(
    pipelines: &[Pipeline],
    gate: Arc<Semaphore>,
    ctx: &StepContext,
) -> Result<BatchReport> {
    let start = Instant::now();
    info!(
        personas = pipelines.len(),
        capacity = gate.available_permits(),
        "Starting persona batch"
    );

    let mut tasks = FuturesUnordered::new();
    for (idx, pipeline) in pipelines.iter().enumerate() {
        let gate = gate.clone();
        tasks.push(async move {
            let outcome = match gate.acquire().await {
                Ok(_permit) => pipeline.invoke(pipeline.initial_state(), ctx).await,
                Err(_) => Err(Error::Internal("persona gate closed".to_string())),
            };
            (idx, outcome)
        });
    }

    let mut finished: Vec<Option<PersonaOutcome>> = vec![None; pipelines.len()];
    while let Some((idx, outcome)) = tasks.next().await {
        let persona = pipelines[idx].persona();
        finished[idx] = Some(match outcome {
            Ok(state) => {
                info!(persona = %persona, chars = state.final_text.chars().count(), "Persona finished");
                PersonaOutcome::Completed {
                    text: state.final_text,
                }
            }
            Err(e) => {
                warn!(persona = %persona, error = %e.format_for_log(), "Persona failed");
                PersonaOutcome::from_error(&e)
            }
        });
    }

    let mut results = PersonaResults::default();
    for (pipeline, outcome) in pipelines.iter().zip(finished) {
        let outcome = outcome.ok_or_else(|| {
            Error::Internal(format!("no outcome for persona '{}'", pipeline.persona()))
        })?;
        if !results.insert(pipeline.persona().to_string(), outcome) {
            warn!(persona = %pipeline.persona(), "Duplicate persona in batch ignored");
        }
    }

    let elapsed = start.elapsed();
    info!(
        elapsed_ms = elapsed.as_millis() as u64,
        succeeded = results.succeeded(),
        failed = results.failed(),
        "Persona batch finished"
    );

    Ok(BatchReport { results, elapsed })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::backend::{MockConfig, MockModel};
    use crate::persona::{PersonaSpec, PromptTemplate};
    use crate::pipeline::{build_pipeline, SinkTarget};
    use crate::types::{Role, UsageLedger};

    fn pipelines(specs: &[PersonaSpec], article: &str) -> Vec<Pipeline> {
        specs
            .iter()
            .map(|s| build_pipeline(s, article).unwrap())
            .collect()
    }

    fn ctx(model: Arc<MockModel>) -> StepContext {
        StepContext::new(model, Arc::new(UsageLedger::new()), SinkTarget::Null)
    }

    #[tokio::test]
    async fn test_results_keyed_by_request_order_despite_reversed_delays() {
        let n = 5u64;
        let delays = (0..n)
            .map(|i| (format!("T{}", i), Duration::from_millis((n - i) * 30)))
            .collect();
        let model = Arc::new(MockModel::with_config(MockConfig {
            delays,
            ..Default::default()
        }));
        let specs: Vec<_> = (0..n)
            .map(|i| {
                PersonaSpec::new(
                    format!("P{}", i),
                    vec![PromptTemplate::new("S"), PromptTemplate::new(format!("T{}", i))],
                )
            })
            .collect();

        let report = run_all(&pipelines(&specs, "Hello"), Arc::new(Semaphore::new(8)), &ctx(model))
            .await
            .unwrap();

        assert_eq!(report.results.len(), n as usize);
        let names: Vec<_> = report.results.iter().map(|(name, _)| name.to_string()).collect();
        assert_eq!(names, vec!["P0", "P1", "P2", "P3", "P4"]);
        for (i, (_, outcome)) in report.results.iter().enumerate() {
            assert_eq!(outcome.display_text(), format!("reply to: T{}", i));
        }
    }

    #[tokio::test]
    async fn test_gate_bounds_concurrency() {
        let model = Arc::new(MockModel::with_config(MockConfig {
            latency: Duration::from_millis(40),
            ..Default::default()
        }));
        let specs: Vec<_> = (0..6)
            .map(|i| PersonaSpec::new(format!("P{}", i), vec!["T1".into(), "T2".into()]))
            .collect();

        let report = run_all(&pipelines(&specs, "A"), Arc::new(Semaphore::new(2)), &ctx(model.clone()))
            .await
            .unwrap();

        assert_eq!(report.results.succeeded(), 6);
        assert_eq!(model.call_count(), 12);
        assert!(model.peak_concurrency() <= 2, "peak was {}", model.peak_concurrency());
        assert_eq!(model.peak_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let model = Arc::new(MockModel::with_config(MockConfig {
            fail_on: vec!["BAD".to_string()],
            latency: Duration::from_millis(5),
            ..Default::default()
        }));
        let specs = vec![
            PersonaSpec::new("ok1", vec!["T1".into(), "T2".into()]),
            PersonaSpec::new("broken", vec!["T1".into(), "BAD".into()]),
            PersonaSpec::new("ok2", vec!["T3".into()]).with_polish(),
        ];

        let report = run_all(&pipelines(&specs, "A"), Arc::new(Semaphore::new(8)), &ctx(model))
            .await
            .unwrap();

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.results.succeeded(), 2);
        match report.results.get("broken").unwrap() {
            PersonaOutcome::Failed { code, .. } => {
                assert_eq!(*code, crate::error::ErrorCode::ModelCallFailed.as_str())
            }
            other => panic!("expected failure marker, got {:?}", other),
        }
        assert!(report.results.get("broken").unwrap().display_text().contains("E500"));
        assert!(report.results.get("ok1").unwrap().is_completed());
        assert!(report.results.get("ok2").unwrap().is_completed());
    }

    #[tokio::test]
    async fn test_histories_do_not_leak_between_personas() {
        let model = Arc::new(MockModel::new());
        let specs = vec![
            PersonaSpec::new("P1", vec!["T1".into()]),
            PersonaSpec::new("P2", vec!["T1".into(), "T2".into()]),
        ];

        let report = run_all(&pipelines(&specs, "Hello"), Arc::new(Semaphore::new(8)), &ctx(model.clone()))
            .await
            .unwrap();

        assert!(report.results.get("P1").unwrap().is_completed());
        assert!(report.results.get("P2").unwrap().is_completed());

        // every prompt holds at most one assistant turn per earlier step of its own chain
        let calls = model.calls();
        assert_eq!(calls.len(), 3);
        for prompt in &calls {
            let systems = prompt.iter().filter(|m| m.role == Role::System).count();
            assert_eq!(systems, 1);
            let assistants = prompt.iter().filter(|m| m.role == Role::Assistant).count();
            assert!(assistants <= 1);
        }
        let p2_second = calls
            .iter()
            .find(|p| p.last().map(|m| m.content.as_str()) == Some("T2"))
            .unwrap();
        assert_eq!(p2_second.len(), 4);
    }

    #[test]
    fn test_results_write_once() {
        let mut results = PersonaResults::default();
        assert!(results.insert("a".into(), PersonaOutcome::Completed { text: "x".into() }));
        assert!(!results.insert("a".into(), PersonaOutcome::Completed { text: "y".into() }));
        assert_eq!(results.get("a").unwrap().display_text(), "x");
    }
}
