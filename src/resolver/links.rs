//! Share link classification and resolution
//!
//! A share link from a video platform is turned into a direct media URL the
//! transcription service can download. Hosts that already serve media are
//! passed through untouched.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use reqwest::Client;
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};

/// Prefixes of hosts that already serve the media file itself
const DIRECT_PREFIXES: &[&str] = &[
    "https://finder.video.qq.com/",
    "http://wxapp.tc.qq.com/",
    "https://ppwtoss01.oss",
    "https://v5-small.douyinvod.com/",
];

/// Mobile browser UA; several share pages only embed media for phones
const SHARE_PAGE_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36";

/// Selectors tried in order when looking for the media URL on a share page
const MEDIA_SELECTORS: &[(&str, &str)] = &[
    (r#"meta[property="og:video:secure_url"]"#, "content"),
    (r#"meta[property="og:video:url"]"#, "content"),
    (r#"meta[property="og:video"]"#, "content"),
    (r#"meta[name="og:video"]"#, "content"),
    ("video[src]", "src"),
    ("video source[src]", "src"),
];

// ─────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────

/// Where a link points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Already a downloadable media URL
    Direct,
    Bilibili,
    Douyin,
    Xiaohongshu,
    YouTube,
    /// Unknown host, used as is
    Other,
}

impl LinkKind {
    pub fn classify(url: &str) -> Self {
        if DIRECT_PREFIXES.iter().any(|p| url.starts_with(p)) {
            LinkKind::Direct
        } else if url.contains("https://www.bilibili.com/video/")
            || url.contains("https://b23.tv/")
            || url.contains("https://bili2233.cn/")
        {
            LinkKind::Bilibili
        } else if url.contains("douyin.com") {
            LinkKind::Douyin
        } else if url.contains("xiaohongshu.com") || url.contains("xhslink.com") {
            LinkKind::Xiaohongshu
        } else if url.contains("youtube.com") || url.contains("youtu.be") {
            LinkKind::YouTube
        } else {
            LinkKind::Other
        }
    }

    /// Whether the link is a share page that has to be scraped
    pub fn is_share_page(&self) -> bool {
        !matches!(self, LinkKind::Direct | LinkKind::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Direct => "direct",
            LinkKind::Bilibili => "bilibili",
            LinkKind::Douyin => "douyin",
            LinkKind::Xiaohongshu => "xiaohongshu",
            LinkKind::YouTube => "youtube",
            LinkKind::Other => "other",
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Resolver
// ─────────────────────────────────────────────────────────────────

/// Turns a share link into a direct media URL
#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Resolve one link; never returns a partial URL
    async fn resolve(&self, url: &str) -> Result<String>;
}

/// Resolver that fetches the share page and reads the embedded media URL
pub struct HttpLinkResolver {
    client: Client,
    timeout_secs: u64,
}

impl HttpLinkResolver {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(SHARE_PAGE_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl LinkResolver for HttpLinkResolver {
    async fn resolve(&self, url: &str) -> Result<String> {
        let kind = LinkKind::classify(url);
        if !kind.is_share_page() {
            debug!(url = %url, kind = kind.as_str(), "Link used as is");
            return Ok(url.to_string());
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(url, e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::resolution(
                url,
                format!("share page returned {}", status),
            ));
        }

        // short links redirect; relative media paths resolve against the final page
        let page_url = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|e| Error::from_reqwest(url, e, self.timeout_secs))?;

        let media = extract_media_url(&html, &page_url)
            .ok_or_else(|| Error::resolution(url, "no media URL on the share page"))?;

        debug!(url = %url, kind = kind.as_str(), media = %media, "Share link resolved");
        Ok(media)
    }
}

/// Find the first media URL in a share page, made absolute against `page_url`
pub fn extract_media_url(html: &str, page_url: &Url) -> Option<String> {
    let doc = Html::parse_document(html);

    MEDIA_SELECTORS.iter().find_map(|(css, attr)| {
        let selector = Selector::parse(css).ok()?;
        doc.select(&selector)
            .filter_map(|el| el.value().attr(attr))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .and_then(|v| page_url.join(v).ok())
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .map(String::from)
    })
}

/// Resolve a link, logging and swallowing the failure
pub async fn resolve_share_link(resolver: &dyn LinkResolver, url: &str) -> Option<String> {
    match resolver.resolve(url).await {
        Ok(direct) => Some(direct),
        Err(e) => {
            warn!(url = %url, error = %e.format_for_log(), "Link resolution failed, skipping");
            None
        }
    }
}

/// Resolve every link concurrently behind `gate`; failures are skipped
///
/// Output keeps the input order of the links that resolved.
pub async fn resolve_all(
    resolver: Arc<dyn LinkResolver>,
    urls: &[String],
    gate: Arc<Semaphore>,
) -> Vec<String> {
    info!(links = urls.len(), "Resolving links");

    let mut tasks = FuturesUnordered::new();
    for (idx, url) in urls.iter().enumerate() {
        let gate = gate.clone();
        let resolver = resolver.clone();
        tasks.push(async move {
            let direct = match gate.acquire().await {
                Ok(_permit) => resolve_share_link(resolver.as_ref(), url).await,
                Err(_) => None,
            };
            (idx, direct)
        });
    }

    let mut resolved: Vec<Option<String>> = vec![None; urls.len()];
    while let Some((idx, direct)) = tasks.next().await {
        resolved[idx] = direct;
    }

    let direct: Vec<String> = resolved.into_iter().flatten().collect();
    info!(resolved = direct.len(), failed = urls.len() - direct.len(), "Link resolution finished");
    direct
}
