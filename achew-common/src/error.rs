//! Common error types for the achew client

use serde::Serialize;
use thiserror::Error;

/// Common result type for achew client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of non-success HTTP responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestCategory {
    BadRequest,
    NotFound,
    Conflict,
    Server,
    Other,
}

impl RequestCategory {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => RequestCategory::BadRequest,
            404 => RequestCategory::NotFound,
            409 => RequestCategory::Conflict,
            500..=599 => RequestCategory::Server,
            _ => RequestCategory::Other,
        }
    }
}

/// Error taxonomy shared by the session synchronizer and the playback arbiter
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input caught before any request is sent
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Non-success response from the backend
    #[error("Request failed ({status}): {message}")]
    Request {
        status: u16,
        category: RequestCategory,
        message: String,
        /// Structured `detail` payload when the backend sent one
        detail: Option<serde_json::Value>,
    },

    /// Push channel could not be (re)established
    #[error("Event channel error: {0}")]
    Channel(String),

    /// Real device or network failure during preview playback
    #[error("Playback error: {0}")]
    Playback(String),

    /// Bounded wait exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport error (wraps reqwest::Error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Payload (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a request error from a status code and a raw response body.
    ///
    /// The backend answers failures with `{"detail": ...}` where `detail`
    /// is either a plain message or a structured object carrying one.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
        let detail = parsed.as_ref().and_then(|v| v.get("detail")).cloned();

        let message = match &detail {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(obj @ serde_json::Value::Object(_)) => obj
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| obj.to_string()),
            Some(other) => other.to_string(),
            None if body.trim().is_empty() => format!("HTTP {}", status),
            None => body.trim().to_string(),
        };

        let detail = match detail {
            Some(serde_json::Value::String(_)) | None => None,
            structured => structured,
        };

        Error::Request {
            status,
            category: RequestCategory::from_status(status),
            message,
            detail,
        }
    }

    /// Short, user-facing message for the session error field
    pub fn user_message(&self) -> String {
        match self {
            Error::Request { message, .. } => message.clone(),
            Error::Validation(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}
