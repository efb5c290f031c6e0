//! Error types for imitator
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Exit codes for the CLI
//!
//! Errors local to one persona or one source link are turned into per-item
//! markers by their callers; everything that reaches `main` aborts the request.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for imitator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Connection errors (3xx)
    ConnectionFailed = 300,
    ConnectionTimeout = 301,

    // Upstream errors (4xx)
    ResolutionFailed = 400,
    TranscriptionFailed = 401,
    SummaryFailed = 402,

    // Model errors (5xx)
    ModelCallFailed = 500,
    ModelResponseMalformed = 501,

    // Pipeline errors (6xx)
    EmptyPipeline = 600,
    InvalidSelection = 601,
    InputAborted = 602,

    // Publish errors (7xx)
    PublishFailed = 700,
    PublishAuth = 701,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            600..=699 => 60,
            700..=799 => 70,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────

    /// HTTP request could not be completed
    #[error("Request to {url} failed: {message}")]
    ConnectionFailed { url: String, message: String },

    /// HTTP request timed out
    #[error("Request to {url} timed out after {timeout_secs}s")]
    ConnectionTimeout { url: String, timeout_secs: u64 },

    // ─────────────────────────────────────────────────────────────
    // Upstream Errors
    // ─────────────────────────────────────────────────────────────

    /// A share link could not be turned into a direct media URL
    #[error("Could not resolve {url}: {reason}")]
    Resolution { url: String, reason: String },

    /// Speech-to-text failed for a source
    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    /// Summarisation produced nothing usable
    #[error("Summary failed: {message}")]
    Summary { message: String },

    // ─────────────────────────────────────────────────────────────
    // Model Errors
    // ─────────────────────────────────────────────────────────────

    /// Model call failed permanently
    #[error("Model call to {model} failed after {attempts} attempt(s): {message}")]
    ModelCall {
        model: String,
        attempts: u32,
        message: String,
    },

    /// Model replied with something we could not use
    #[error("Malformed model response: {message}")]
    ModelResponse { message: String },

    // ─────────────────────────────────────────────────────────────
    // Pipeline Errors
    // ─────────────────────────────────────────────────────────────

    /// A persona has neither templates nor a polish step
    #[error("Persona '{persona}' has no rewrite steps")]
    EmptyPipeline { persona: String },

    /// Persona selection does not match the catalog
    #[error("Invalid persona selection: {message}")]
    InvalidSelection { message: String },

    /// The user asked to quit at a prompt
    #[error("Input aborted by user")]
    InputAborted,

    // ─────────────────────────────────────────────────────────────
    // Publish Errors
    // ─────────────────────────────────────────────────────────────

    /// Document API rejected a request
    #[error("Publishing '{section}' failed: {message}")]
    Publish { section: String, message: String },

    /// No usable credential for the document API
    #[error("Document API authentication failed: {message}")]
    PublishAuth { message: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::Json(_) => ErrorCode::ModelResponseMalformed,

            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,

            Error::Resolution { .. } => ErrorCode::ResolutionFailed,
            Error::Transcription { .. } => ErrorCode::TranscriptionFailed,
            Error::Summary { .. } => ErrorCode::SummaryFailed,

            Error::ModelCall { .. } => ErrorCode::ModelCallFailed,
            Error::ModelResponse { .. } => ErrorCode::ModelResponseMalformed,

            Error::EmptyPipeline { .. } => ErrorCode::EmptyPipeline,
            Error::InvalidSelection { .. } => ErrorCode::InvalidSelection,
            Error::InputAborted => ErrorCode::InputAborted,

            Error::Publish { .. } => ErrorCode::PublishFailed,
            Error::PublishAuth { .. } => ErrorCode::PublishAuth,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if a retry of the same request could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. } | Error::ConnectionTimeout { .. }
        )
    }

    /// Check if the error aborts the whole request
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::EmptyPipeline { .. }
                | Error::InvalidSelection { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'imitator config init' to create a default configuration file.",
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'imitator config validate' to see details.",
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values.",
            ),
            Error::ConnectionFailed { .. } | Error::ConnectionTimeout { .. } => Some(
                "Check your network connection and the configured base URLs.",
            ),
            Error::Resolution { .. } => Some(
                "The share page may have changed. Paste the article text directly instead.",
            ),
            Error::ModelCall { .. } => Some(
                "Verify [llm] base_url, api_key and model, or raise max_retries.",
            ),
            Error::EmptyPipeline { .. } => Some(
                "Give the persona at least one template in the persona catalog.",
            ),
            Error::InvalidSelection { .. } => Some(
                "Run 'imitator personas list' to see the valid persona numbers.",
            ),
            Error::PublishAuth { .. } => Some(
                "Set [publish] user_access_token or auth_code, or check app_id/app_secret.",
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            self.code().as_str(),
            self
        );

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn resolution(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Resolution {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_selection(message: impl Into<String>) -> Self {
        Error::InvalidSelection {
            message: message.into(),
        }
    }

    pub fn publish(section: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Publish {
            section: section.into(),
            message: message.into(),
        }
    }

    /// Map a reqwest failure onto the connection error variants
    pub fn from_reqwest(url: &str, err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Error::ConnectionTimeout {
                url: url.to_string(),
                timeout_secs,
            }
        } else {
            Error::connection_failed(url, err.to_string())
        }
    }
}
