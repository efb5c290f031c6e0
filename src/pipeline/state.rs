//! Per-persona pipeline state

use crate::types::Message;

/// Conversation state owned by one persona pipeline
///
/// Created when the pipeline is built, threaded through every step and
/// dropped once `final_text` has been copied into the request results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineState {
    /// Persona the pipeline belongs to
    pub role_name: String,

    /// Full conversation so far; steps only ever append
    pub messages: Vec<Message>,

    /// Reply of the most recent step
    pub final_text: String,
}

impl PipelineState {
    pub fn new(role_name: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            messages: Vec::new(),
            final_text: String::new(),
        }
    }
}
