//! Persona pipeline builder
//!
//! Turns a persona spec into a linear chain of rewrite steps and folds the
//! pipeline state through them in order.

use tracing::debug;

use crate::error::{Error, Result};
use crate::persona::PersonaSpec;

use super::state::PipelineState;
use super::step::{RewriteStep, StepContext};

/// A built, runnable chain for one persona
#[derive(Debug, Clone)]
pub struct Pipeline {
    persona: String,
    steps: Vec<RewriteStep>,
}

impl Pipeline {
    pub fn persona(&self) -> &str {
        &self.persona
    }

    pub fn steps(&self) -> &[RewriteStep] {
        &self.steps
    }

    /// Fresh state for a run of this pipeline
    pub fn initial_state(&self) -> PipelineState {
        PipelineState::new(&self.persona)
    }

    /// Run every step in order, each on the state left by the previous one
    pub async fn invoke(&self, initial: PipelineState, ctx: &StepContext) -> Result<PipelineState> {
        let mut state = initial;
        for step in &self.steps {
            state = step.run(state, ctx).await?;
        }
        Ok(state)
    }
}

/// Build the step chain for `spec` with `article` embedded in the seed step
pub fn build_pipeline(spec: &PersonaSpec, article: &str) -> Result<Pipeline> {
    if spec.templates.is_empty() && !spec.polish {
        return Err(Error::EmptyPipeline {
            persona: spec.name.clone(),
        });
    }

    let mut steps = Vec::with_capacity(spec.step_count());
    for (i, template) in spec.templates.iter().enumerate() {
        let step = if i == 0 {
            RewriteStep::seed(template.clone(), article)
        } else {
            RewriteStep::continuation(i, template.clone())
        };
        steps.push(step);
    }
    if spec.polish {
        steps.push(RewriteStep::polish(steps.len(), article));
    }

    debug!(persona = %spec.name, steps = steps.len(), "Pipeline built");

    Ok(Pipeline {
        persona: spec.name.clone(),
        steps,
    })
}
