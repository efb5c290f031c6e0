//! Feishu (Lark) docx publishing
//!
//! Tries the app's tenant token first. When that flow fails the user access
//! token is used instead: taken from config, or exchanged from a one-time
//! authorisation code. Without either the authorisation URL is logged.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use url::Url;

use crate::config::PublishSettings;
use crate::error::{Error, Result};

use super::blocks::Block;
use super::document::{DocumentApi, DocumentWriter, PublishReport, Section};
use super::Publisher;

const REQUEST_TIMEOUT_SECS: u64 = 30;

// ─────────────────────────────────────────────────────────────────
// API envelope types
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AppTokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
    app_access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedDocument {
    document: DocumentInfo,
}

#[derive(Debug, Deserialize)]
struct DocumentInfo {
    document_id: String,
}

#[derive(Debug, Deserialize)]
struct CreatedChildren {
    #[serde(default)]
    children: Vec<ChildInfo>,
}

#[derive(Debug, Deserialize)]
struct ChildInfo {
    block_id: String,
}

#[derive(Debug, Deserialize)]
struct UserToken {
    access_token: String,
}

// ─────────────────────────────────────────────────────────────────
// Authenticated API client
// ─────────────────────────────────────────────────────────────────

/// Docx block API bound to one access token
pub struct FeishuApi {
    client: Client,
    base_url: String,
    token: String,
}

impl FeishuApi {
    fn new(client: Client, base_url: &str, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn post<T: DeserializeOwned>(&self, section: &str, url: &str, body: &Value) -> Result<T> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(url, e, REQUEST_TIMEOUT_SECS))?;
        unwrap_envelope(section, response).await
    }
}

#[async_trait]
impl DocumentApi for FeishuApi {
    async fn create_document(&self, folder_token: &str, title: &str) -> Result<String> {
        let url = format!("{}/docx/v1/documents", self.base_url);
        let body = json!({ "folder_token": folder_token, "title": title });
        let created: CreatedDocument = self.post(title, &url, &body).await?;
        Ok(created.document.document_id)
    }

    async fn create_children(
        &self,
        document_id: &str,
        parent_id: &str,
        children: &[Block],
    ) -> Result<Vec<String>> {
        let url = format!(
            "{}/docx/v1/documents/{}/blocks/{}/children",
            self.base_url, document_id, parent_id
        );
        let body = json!({
            "children": children.iter().map(Block::to_json).collect::<Vec<_>>(),
            "index": -1,
        });
        let section = children
            .first()
            .map(|b| b.content.chars().take(20).collect::<String>())
            .unwrap_or_default();
        let created: CreatedChildren = self.post(&section, &url, &body).await?;
        Ok(created.children.into_iter().map(|c| c.block_id).collect())
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(section: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(Error::publish(section, format!("HTTP {}: {}", status, text)));
    }

    let envelope: Envelope<T> = response
        .json()
        .await
        .map_err(|e| Error::publish(section, format!("unexpected response: {}", e)))?;
    if envelope.code != 0 {
        return Err(Error::publish(
            section,
            format!("code {}: {}", envelope.code, envelope.msg),
        ));
    }
    envelope
        .data
        .ok_or_else(|| Error::publish(section, "response has no data"))
}

// ─────────────────────────────────────────────────────────────────
// Publisher
// ─────────────────────────────────────────────────────────────────

/// Publishes rewrite results as a new Feishu document
pub struct FeishuPublisher {
    settings: PublishSettings,
    client: Client,
}

impl FeishuPublisher {
    pub fn new(settings: PublishSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { settings, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn api(&self, token: String) -> FeishuApi {
        FeishuApi::new(self.client.clone(), &self.settings.base_url, token)
    }

    /// App-level token for the internal app
    async fn tenant_token(&self) -> Result<String> {
        let url = self.endpoint("auth/v3/app_access_token/internal");
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "app_id": self.settings.app_id,
                "app_secret": self.settings.app_secret,
            }))
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&url, e, REQUEST_TIMEOUT_SECS))?;

        let body: AppTokenResponse = response.json().await.map_err(|e| Error::PublishAuth {
            message: format!("unexpected token response: {}", e),
        })?;
        if body.code != 0 {
            return Err(Error::PublishAuth {
                message: format!("app token rejected, code {}: {}", body.code, body.msg),
            });
        }
        body.tenant_access_token
            .or(body.app_access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::PublishAuth {
                message: "token response carries no token".to_string(),
            })
    }

    /// User token from config, or exchanged from the authorisation code
    async fn user_token(&self) -> Result<String> {
        if let Some(token) = self.settings.user_access_token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }

        let code = match self.settings.auth_code.as_deref().filter(|c| !c.is_empty()) {
            Some(code) => code,
            None => {
                let auth_url = self.authorize_url()?;
                warn!(url = %auth_url, "No user access token; open the URL, then rerun with IMITATOR_PUBLISH_AUTH_CODE set");
                return Err(Error::PublishAuth {
                    message: "missing user_access_token and auth_code".to_string(),
                });
            }
        };

        let url = self.endpoint("authen/v1/access_token");
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "grant_type": "authorization_code",
                "code": code,
                "client_id": self.settings.app_id,
                "client_secret": self.settings.app_secret,
            }))
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&url, e, REQUEST_TIMEOUT_SECS))?;

        let token: UserToken = unwrap_envelope("user access token", response)
            .await
            .map_err(|e| Error::PublishAuth {
                message: e.to_string(),
            })?;
        Ok(token.access_token)
    }

    /// Page where a user grants the app access and receives a code
    pub fn authorize_url(&self) -> Result<String> {
        let state = uuid::Uuid::new_v4().simple().to_string();
        Url::parse_with_params(
            &self.endpoint("authen/v1/authorize"),
            &[
                ("app_id", self.settings.app_id.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("response_type", "code"),
                ("state", state.as_str()),
            ],
        )
        .map(String::from)
        .map_err(|e| Error::config_field_invalid("publish.base_url", e.to_string()))
    }

    async fn write_with(
        &self,
        token: String,
        title: &str,
        article: &str,
        sections: &[Section],
    ) -> Result<PublishReport> {
        let api = self.api(token);
        DocumentWriter::new(&api, Duration::from_millis(self.settings.batch_pause_ms))
            .write(&self.settings.folder_token, title, article, sections)
            .await
    }
}

#[async_trait]
impl Publisher for FeishuPublisher {
    async fn publish(&self, title: &str, article: &str, sections: &[Section]) -> Result<PublishReport> {
        info!(title = %title, sections = sections.len(), "Publishing to Feishu");

        let tenant_attempt = match self.tenant_token().await {
            Ok(token) => self.write_with(token, title, article, sections).await,
            Err(e) => Err(e),
        };

        match tenant_attempt {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(error = %e.format_for_log(), "Tenant token flow failed, trying user access token");
                let token = self.user_token().await?;
                self.write_with(token, title, article, sections).await
            }
        }
    }
}
