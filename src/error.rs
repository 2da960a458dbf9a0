//! Error types for Surveyor

use thiserror::Error;

/// Errors that can occur while collecting modem telemetry
#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("Transport error during {step}: {message}")]
    Transport { step: &'static str, message: String },

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Protocol error during {step}: {message}")]
    Protocol { step: &'static str, message: String },

    #[error("Failed to decode telemetry: {0}")]
    Decode(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session expired and could not be renewed")]
    SessionExpired,

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SurveyError {
    pub(crate) fn transport(step: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            step,
            message: message.into(),
        }
    }

    pub(crate) fn protocol(step: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            step,
            message: message.into(),
        }
    }

    /// True for the HTTP 404 signal that invalidates the current session
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }
}
