//! Error types for Oppsum.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Library-level error type for Oppsum operations.
#[derive(Error, Debug)]
pub enum OppsumError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Media unavailable: {0}")]
    VideoUnavailable(String),

    #[error("No captions found: {0}")]
    CaptionsNotFound(String),

    #[error("ASR is disabled: {0}")]
    AsrDisabled(String),

    #[error("Media exceeds ASR length limit: {0}")]
    AsrLengthLimit(String),

    #[error("Rate limited by LLM provider: {0}")]
    RateLimit(String),

    #[error("LLM call timed out: {0}")]
    LlmTimeout(String),

    #[error("LLM output failed validation: {0}")]
    LlmValidation(String),

    #[error("Job was canceled")]
    Canceled,

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable error codes surfaced to API and CLI consumers.
///
/// Every terminal job failure maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    VideoUnavailable,
    CaptionsNotFound,
    AsrDisabled,
    AsrLengthLimit,
    RateLimit,
    LlmTimeout,
    LlmValidationFail,
    Canceled,
    InvalidInput,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            ErrorKind::VideoUnavailable => "VIDEO_UNAVAILABLE",
            ErrorKind::CaptionsNotFound => "CAPTIONS_NOT_FOUND",
            ErrorKind::AsrDisabled => "ASR_DISABLED",
            ErrorKind::AsrLengthLimit => "ASR_LENGTH_LIMIT",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::LlmTimeout => "LLM_TIMEOUT",
            ErrorKind::LlmValidationFail => "LLM_VALIDATION_FAIL",
            ErrorKind::Canceled => "CANCELED",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::Internal => "INTERNAL",
        };
        write!(f, "{}", code)
    }
}

impl OppsumError {
    /// Map this error to its stable taxonomy code.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OppsumError::VideoUnavailable(_) => ErrorKind::VideoUnavailable,
            OppsumError::CaptionsNotFound(_) => ErrorKind::CaptionsNotFound,
            OppsumError::AsrDisabled(_) => ErrorKind::AsrDisabled,
            OppsumError::AsrLengthLimit(_) => ErrorKind::AsrLengthLimit,
            OppsumError::RateLimit(_) => ErrorKind::RateLimit,
            OppsumError::LlmTimeout(_) => ErrorKind::LlmTimeout,
            OppsumError::LlmValidation(_) => ErrorKind::LlmValidationFail,
            OppsumError::Canceled => ErrorKind::Canceled,
            OppsumError::InvalidInput(_) | OppsumError::Config(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether a per-call retry with backoff is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OppsumError::RateLimit(_) | OppsumError::LlmTimeout(_))
    }
}

/// Result type alias for Oppsum operations.
pub type Result<T> = std::result::Result<T, OppsumError>;
