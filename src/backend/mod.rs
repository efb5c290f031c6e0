//! Model backends
//!
//! The [`ChatModel`] abstraction plus the OpenAI-compatible HTTP client and a
//! scripted offline model.

mod mock;
mod openai;
mod traits;

pub use mock::{MockConfig, MockModel, MockReply};
pub use openai::OpenAiChatModel;
pub use traits::*;
