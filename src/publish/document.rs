//! Document layout: original article first, then one section per persona

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;

use super::blocks::{body_blocks, paragraph_blocks, Block, MAX_CHILDREN_PER_CALL};

/// Heading over the original article
pub const ORIGINAL_HEADING: &str = "原始文章";

/// Block operations of a cloud document service
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// Create an empty document in `folder_token`, returning its id
    async fn create_document(&self, folder_token: &str, title: &str) -> Result<String>;

    /// Append at most [`MAX_CHILDREN_PER_CALL`] children under `parent_id`,
    /// returning the ids of the created blocks
    async fn create_children(
        &self,
        document_id: &str,
        parent_id: &str,
        children: &[Block],
    ) -> Result<Vec<String>>;
}

/// One persona's text to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub persona: String,
    pub body: String,
}

impl Section {
    pub fn new(persona: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            body: body.into(),
        }
    }

    pub fn heading(&self) -> String {
        format!("{}仿写文章", self.persona)
    }
}

/// What made it into the document
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishReport {
    pub document_id: String,
    /// Headings written completely, in document order
    pub published: Vec<String>,
    /// Headings that failed, with the reason
    pub failed: Vec<(String, String)>,
}

impl PublishReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Writes the article and persona sections through a [`DocumentApi`]
pub struct DocumentWriter<'a> {
    api: &'a dyn DocumentApi,
    batch_pause: Duration,
}

impl<'a> DocumentWriter<'a> {
    pub fn new(api: &'a dyn DocumentApi, batch_pause: Duration) -> Self {
        Self { api, batch_pause }
    }

    /// Create the document and fill it
    ///
    /// Only document creation is fatal. A failing section is recorded in the
    /// report and the following sections are still written.
    pub async fn write(
        &self,
        folder_token: &str,
        title: &str,
        article: &str,
        sections: &[Section],
    ) -> Result<PublishReport> {
        let document_id = self.api.create_document(folder_token, title).await?;
        info!(document_id = %document_id, sections = sections.len(), "Document created");

        let mut report = PublishReport {
            document_id: document_id.clone(),
            ..Default::default()
        };

        let original = (Block::heading2(ORIGINAL_HEADING), body_blocks(article));
        let personas = sections
            .iter()
            .map(|s| (Block::heading1(s.heading()), paragraph_blocks(&s.body)));

        for (heading, body) in std::iter::once(original).chain(personas) {
            let name = heading.content.clone();
            match self.write_section(&document_id, heading, &body).await {
                Ok(()) => {
                    debug!(section = %name, blocks = body.len(), "Section published");
                    report.published.push(name);
                }
                Err(e) => {
                    warn!(section = %name, error = %e.format_for_log(), "Section failed to publish");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Heading at the document root, body nested under it
    async fn write_section(&self, document_id: &str, heading: Block, body: &[Block]) -> Result<()> {
        let ids = self
            .post_children(document_id, document_id, std::slice::from_ref(&heading))
            .await?;
        let parent = ids.first().map(String::as_str).unwrap_or(document_id);

        if !body.is_empty() {
            self.post_children(document_id, parent, body).await?;
        }
        Ok(())
    }

    async fn post_children(
        &self,
        document_id: &str,
        parent_id: &str,
        blocks: &[Block],
    ) -> Result<Vec<String>> {
        let mut created = Vec::with_capacity(blocks.len());
        for batch in blocks.chunks(MAX_CHILDREN_PER_CALL) {
            created.extend(
                self.api
                    .create_children(document_id, parent_id, batch)
                    .await?,
            );
            if !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use parking_lot::Mutex;

    /// Records every call; fails children posts whose first block matches `fail_on`
    #[derive(Default)]
    struct RecordingApi {
        calls: Mutex<Vec<(String, Vec<Block>)>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl DocumentApi for RecordingApi {
        async fn create_document(&self, _folder_token: &str, _title: &str) -> Result<String> {
            Ok("doc".to_string())
        }

        async fn create_children(
            &self,
            _document_id: &str,
            parent_id: &str,
            children: &[Block],
        ) -> Result<Vec<String>> {
            if self.fail_on.as_deref() == children.first().map(|b| b.content.as_str()) {
                return Err(Error::publish(parent_id, "rejected"));
            }
            let mut calls = self.calls.lock();
            let ids = (0..children.len())
                .map(|i| format!("blk{}_{}", calls.len(), i))
                .collect();
            calls.push((parent_id.to_string(), children.to_vec()));
            Ok(ids)
        }
    }

    impl RecordingApi {
        fn headings(&self) -> Vec<String> {
            self.calls
                .lock()
                .iter()
                .filter(|(parent, _)| parent == "doc")
                .map(|(_, blocks)| blocks[0].content.clone())
                .collect()
        }
    }

    fn long_body(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|i| format!("第{}段", i))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[tokio::test]
    async fn test_heading_order_and_batch_limit() {
        let api = RecordingApi::default();
        let sections = vec![
            Section::new("小C", long_body(120)),
            Section::new("小A", "短文"),
            Section::new("小B", long_body(51)),
        ];

        let report = DocumentWriter::new(&api, Duration::ZERO)
            .write("folder", "标题", "原文", &sections)
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(
            api.headings(),
            vec!["原始文章", "小C仿写文章", "小A仿写文章", "小B仿写文章"]
        );
        assert_eq!(report.published, api.headings());

        let calls = api.calls.lock();
        assert!(calls.iter().all(|(_, blocks)| blocks.len() <= MAX_CHILDREN_PER_CALL));
        let body_blocks: usize = calls
            .iter()
            .filter(|(parent, _)| parent != "doc")
            .map(|(_, b)| b.len())
            .sum();
        assert_eq!(body_blocks, 1 + 120 + 1 + 51);
    }

    #[tokio::test]
    async fn test_body_nested_under_its_heading() {
        let api = RecordingApi::default();
        DocumentWriter::new(&api, Duration::ZERO)
            .write("folder", "t", "原文", &[Section::new("小A", "正文")])
            .await
            .unwrap();

        let calls = api.calls.lock();
        // heading call #0 returns blk0_0, its body goes under it
        assert_eq!(calls[1].0, "blk0_0");
        assert_eq!(calls[1].1, vec![Block::text("原文")]);
        assert_eq!(calls[3].0, "blk2_0");
    }

    #[tokio::test]
    async fn test_failed_section_keeps_earlier_and_later_ones() {
        let api = RecordingApi {
            fail_on: Some("小B仿写文章".to_string()),
            ..Default::default()
        };
        let sections = vec![
            Section::new("小A", "a"),
            Section::new("小B", "b"),
            Section::new("小C", "c"),
        ];

        let report = DocumentWriter::new(&api, Duration::ZERO)
            .write("folder", "t", "原文", &sections)
            .await
            .unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "小B仿写文章");
        assert_eq!(
            report.published,
            vec!["原始文章", "小A仿写文章", "小C仿写文章"]
        );
    }
}
