//! Type definitions shared across imitator
//!
//! Conversation messages and token accounting used by the model clients,
//! the rewrite steps and the result writers.

mod message;
mod usage;

pub use message::*;
pub use usage::*;
