//! Configuration system for imitator
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (IMITATOR_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImitatorConfig {
    /// Model used by the rewrite pipelines
    pub llm: LlmSettings,

    /// Model used for transcript correction and summaries
    pub auxiliary_llm: LlmSettings,

    /// Concurrency limits
    pub scheduler: SchedulerSettings,

    /// Speech-to-text service
    pub transcription: TranscriptionSettings,

    /// Cloud document publishing
    pub publish: PublishSettings,

    /// Persona catalog source
    pub personas: PersonaSettings,

    /// Local result files
    pub output: OutputSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// OpenAI-compatible chat model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// API base URL, without the trailing `/chat/completions`
    pub base_url: String,

    /// API key (empty string for local servers)
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum retries on transient failures
    pub max_retries: u32,
}

/// Admission gate capacities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Persona pipelines allowed to run at once
    pub max_concurrent_personas: usize,

    /// Link resolutions and transcriptions allowed to run at once
    pub max_concurrent_sources: usize,
}

/// DashScope file transcription settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,

    /// Delay between task status polls
    pub poll_interval_ms: u64,

    /// Give up on a task after this long
    pub max_poll_secs: u64,
}

/// Feishu docx publishing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    pub enabled: bool,
    pub base_url: String,
    pub app_id: String,
    pub app_secret: String,

    /// Folder the new document is created in
    pub folder_token: String,

    /// Fallback credential when the app token is rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_access_token: Option<String>,

    /// One-time authorisation code exchanged for a user token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_code: Option<String>,

    /// Redirect URI registered for the authorisation flow
    pub redirect_uri: String,

    /// Pause between child-block batches
    pub batch_pause_ms: u64,
}

/// Persona catalog settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaSettings {
    /// Catalog file replacing the bundled one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
}

/// Local result file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Base directory; rewrites go to `imitate_result/`, summaries to `summary_result/`
    pub result_dir: String,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for ImitatorConfig {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            auxiliary_llm: LlmSettings::auxiliary(),
            scheduler: SchedulerSettings::default(),
            transcription: TranscriptionSettings::default(),
            publish: PublishSettings::default(),
            personas: PersonaSettings::default(),
            output: OutputSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            api_key: String::new(),
            model: "qwen-plus-latest".to_string(),
            temperature: 1.0,
            timeout_secs: 60,
            max_retries: 10,
        }
    }
}

impl LlmSettings {
    /// Defaults for the correction/summary model
    pub fn auxiliary() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "google/gemini-2.5-flash-lite".to_string(),
            temperature: 0.5,
            ..Self::default()
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_personas: 8,
            max_concurrent_sources: 5,
        }
    }
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            base_url: "https://dashscope.aliyuncs.com/api/v1".to_string(),
            api_key: String::new(),
            model: "paraformer-v2".to_string(),
            poll_interval_ms: 500,
            max_poll_secs: 600,
        }
    }
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://open.feishu.cn/open-apis".to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            folder_token: String::new(),
            user_access_token: None,
            auth_code: None,
            redirect_uri: "https://open.feishu.cn/api-explorer/loading".to_string(),
            batch_pause_ms: 300,
        }
    }
}

impl PublishSettings {
    /// Whether there is enough configured to attempt publishing at all
    pub fn is_configured(&self) -> bool {
        self.enabled
            && !self.app_id.is_empty()
            && !self.app_secret.is_empty()
            && !self.folder_token.is_empty()
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            result_dir: "result".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl ImitatorConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            config = Self::from_file(&path)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Parse a config file without overrides or validation
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e: toml::de::Error| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e.message()),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    pub fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        let search_paths = [
            Some(PathBuf::from("imitator.toml")),
            Some(PathBuf::from("config.toml")),
            dirs::config_dir().map(|p| p.join("imitator").join("config.toml")),
            dirs::home_dir().map(|p| p.join(".imitator").join("config.toml")),
        ];

        for path in search_paths.into_iter().flatten() {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        apply_llm_env(&mut self.llm, "IMITATOR_LLM");
        apply_llm_env(&mut self.auxiliary_llm, "IMITATOR_AUX_LLM");

        // Scheduler settings
        if let Some(n) = env_parse("IMITATOR_MAX_CONCURRENT_PERSONAS") {
            self.scheduler.max_concurrent_personas = n;
        }
        if let Some(n) = env_parse("IMITATOR_MAX_CONCURRENT_SOURCES") {
            self.scheduler.max_concurrent_sources = n;
        }

        // Transcription settings
        if let Ok(val) = std::env::var("IMITATOR_TRANSCRIPTION_BASE_URL") {
            self.transcription.base_url = val;
        }
        if let Ok(val) = std::env::var("IMITATOR_TRANSCRIPTION_API_KEY") {
            self.transcription.api_key = val;
        }
        if let Ok(val) = std::env::var("IMITATOR_TRANSCRIPTION_MODEL") {
            self.transcription.model = val;
        }

        // Publish settings
        if let Ok(val) = std::env::var("IMITATOR_PUBLISH_ENABLED") {
            self.publish.enabled = env_bool(&val);
        }
        if let Ok(val) = std::env::var("IMITATOR_PUBLISH_APP_ID") {
            self.publish.app_id = val;
        }
        if let Ok(val) = std::env::var("IMITATOR_PUBLISH_APP_SECRET") {
            self.publish.app_secret = val;
        }
        if let Ok(val) = std::env::var("IMITATOR_PUBLISH_FOLDER_TOKEN") {
            self.publish.folder_token = val;
        }
        if let Ok(val) = std::env::var("IMITATOR_PUBLISH_USER_ACCESS_TOKEN") {
            self.publish.user_access_token = Some(val);
        }
        if let Ok(val) = std::env::var("IMITATOR_PUBLISH_AUTH_CODE") {
            self.publish.auth_code = Some(val);
        }

        // Persona and output settings
        if let Ok(val) = std::env::var("IMITATOR_PERSONA_CATALOG") {
            self.personas.catalog = Some(val);
        }
        if let Ok(val) = std::env::var("IMITATOR_RESULT_DIR") {
            self.output.result_dir = val;
        }

        // Logging settings
        if let Ok(val) = std::env::var("IMITATOR_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("IMITATOR_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("IMITATOR_LOG_JSON") {
            self.logging.json_format = env_bool(&val);
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.output.result_dir = expand_path(&self.output.result_dir);

        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
        if let Some(ref catalog) = self.personas.catalog {
            self.personas.catalog = Some(expand_path(catalog));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_llm("llm", &self.llm)?;
        validate_llm("auxiliary_llm", &self.auxiliary_llm)?;
        validate_http_url("transcription.base_url", &self.transcription.base_url)?;
        validate_http_url("publish.base_url", &self.publish.base_url)?;

        if self.scheduler.max_concurrent_personas == 0 {
            return Err(Error::config_field_invalid(
                "scheduler.max_concurrent_personas",
                "max_concurrent_personas must be at least 1",
            ));
        }
        if self.scheduler.max_concurrent_sources == 0 {
            return Err(Error::config_field_invalid(
                "scheduler.max_concurrent_sources",
                "max_concurrent_sources must be at least 1",
            ));
        }
        if self.transcription.poll_interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "transcription.poll_interval_ms",
                "poll_interval_ms must be greater than 0",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Directory for rewrite result files
    pub fn imitate_result_dir(&self) -> PathBuf {
        PathBuf::from(&self.output.result_dir).join("imitate_result")
    }

    /// Directory for summary JSON files
    pub fn summary_result_dir(&self) -> PathBuf {
        PathBuf::from(&self.output.result_dir).join("summary_result")
    }
}

fn apply_llm_env(settings: &mut LlmSettings, prefix: &str) {
    if let Ok(val) = std::env::var(format!("{}_BASE_URL", prefix)) {
        settings.base_url = val;
    }
    if let Ok(val) = std::env::var(format!("{}_API_KEY", prefix)) {
        settings.api_key = val;
    }
    if let Ok(val) = std::env::var(format!("{}_MODEL", prefix)) {
        settings.model = val;
    }
    if let Some(t) = env_parse(&format!("{}_TEMPERATURE", prefix)) {
        settings.temperature = t;
    }
    if let Some(n) = env_parse(&format!("{}_TIMEOUT_SECS", prefix)) {
        settings.timeout_secs = n;
    }
    if let Some(n) = env_parse(&format!("{}_MAX_RETRIES", prefix)) {
        settings.max_retries = n;
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_bool(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| Error::config_field_invalid(field, format!("{} is not a valid URL: {}", field, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::config_field_invalid(
            field,
            format!("{} must start with http:// or https://", field),
        ));
    }
    Ok(())
}

fn validate_llm(section: &str, settings: &LlmSettings) -> Result<()> {
    validate_http_url(&format!("{}.base_url", section), &settings.base_url)?;

    if settings.model.trim().is_empty() {
        return Err(Error::config_field_invalid(
            format!("{}.model", section),
            format!("{}.model cannot be empty", section),
        ));
    }
    if !(0.0..=2.0).contains(&settings.temperature) {
        return Err(Error::config_field_invalid(
            format!("{}.temperature", section),
            format!("{}.temperature must be between 0 and 2", section),
        ));
    }
    if settings.timeout_secs == 0 {
        return Err(Error::config_field_invalid(
            format!("{}.timeout_secs", section),
            format!("{}.timeout_secs must be greater than 0", section),
        ));
    }
    Ok(())
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".imitator")
                .join("config.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::config_validation(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# imitator configuration

[llm]
# OpenAI-compatible endpoint used by the rewrite pipelines
base_url = "https://dashscope.aliyuncs.com/compatible-mode/v1"
api_key = ""
model = "qwen-plus-latest"
temperature = 1.0

# Request timeout in seconds
timeout_secs = 60

# Maximum retries on transient failures
max_retries = 10

[auxiliary_llm]
# Model used for transcript correction and summaries
base_url = "https://openrouter.ai/api/v1"
api_key = ""
model = "google/gemini-2.5-flash-lite"
temperature = 0.5
timeout_secs = 60
max_retries = 10

[scheduler]
# Persona pipelines running at once
max_concurrent_personas = 8

# Link resolutions / transcriptions running at once
max_concurrent_sources = 5

[transcription]
base_url = "https://dashscope.aliyuncs.com/api/v1"
api_key = ""
model = "paraformer-v2"
poll_interval_ms = 500
max_poll_secs = 600

[publish]
# Skipped when app_id, app_secret or folder_token is empty
enabled = true
base_url = "https://open.feishu.cn/open-apis"
app_id = ""
app_secret = ""
folder_token = ""

# Fallback when the app token is rejected
# user_access_token = ""
# auth_code = ""
redirect_uri = "https://open.feishu.cn/api-explorer/loading"

# Pause between block batches in milliseconds
batch_pause_ms = 300

[personas]
# Replace the bundled persona catalog
# catalog = "~/.imitator/personas.toml"

[output]
result_dir = "result"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.imitator/logs/imitator.log"

max_file_size_mb = 100
max_files = 5
json_format = false
"#
    .to_string()
}
