//! Cloud document publishing
//!
//! Results are written as one document: the original article under a level-2
//! heading, then one level-1 section per persona in request order.

mod blocks;
mod document;
mod feishu;

use async_trait::async_trait;

use crate::error::Result;

pub use document::{PublishReport, Section};
pub use feishu::FeishuPublisher;

/// Destination for finished rewrites
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Create a document titled `title` holding `article` and `sections`
    async fn publish(&self, title: &str, article: &str, sections: &[Section]) -> Result<PublishReport>;
}
