//! Error types for achew-ap
//!
//! `MediaError` is what a media device reports; the arbiter classifies it
//! as a benign interruption or a real playback failure.

use thiserror::Error;

/// Media device error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    /// The platform cancelled an in-flight media operation
    #[error("Operation aborted: {0}")]
    Aborted(String),

    /// Segment could not be fetched (unreachable server, missing segment)
    #[error("Media source unavailable: {0}")]
    SourceUnavailable(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    Device(String),
}

impl MediaError {
    /// Whether the error is a normal interruption rather than a failure.
    ///
    /// Aborts always qualify. Other errors qualify when their message says
    /// the media element was detached or the operation was superseded or
    /// interrupted.
    pub fn is_interruption(&self) -> bool {
        match self {
            MediaError::Aborted(_) => true,
            other => {
                let message = other.to_string().to_ascii_lowercase();
                ["detached", "superseded", "interrupted"]
                    .iter()
                    .any(|needle| message.contains(needle))
            }
        }
    }
}

/// Convenience Result type using MediaError
pub type Result<T> = std::result::Result<T, MediaError>;

impl From<MediaError> for achew_common::Error {
    fn from(err: MediaError) -> Self {
        achew_common::Error::Playback(err.to_string())
    }
}
