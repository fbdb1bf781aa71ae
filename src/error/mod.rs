//! Error types for hookrelay.

use thiserror::Error;

use crate::types::{AgentId, SessionId};

/// Name of the response field that carries the follow-up stream address.
pub const STREAM_ADDRESS_FIELD: &str = "sseUrl";

/// Primary error type for the public hookrelay API.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Agent file error: {0}")]
    AgentFile(#[from] toml::de::Error),
}

/// Failure to start a remote run.
///
/// Never retried automatically; the caller decides whether to trigger again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),

    #[error(
        "Webhook response is missing a non-empty string `{field}` field ({detail}). \
         The remote workflow must respond with {{\"{field}\": \"<event stream url>\"}}."
    )]
    MissingStreamAddress { field: &'static str, detail: String },

    #[error("Network error: {0}")]
    Network(String),
}

impl TriggerError {
    pub(crate) fn missing_stream_address(detail: impl Into<String>) -> Self {
        Self::MissingStreamAddress {
            field: STREAM_ADDRESS_FIELD,
            detail: detail.into(),
        }
    }
}

impl From<reqwest::Error> for TriggerError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

/// Failure on an attached event stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The stream could not be established at all.
    #[error("Could not connect to event stream: {0}")]
    Connect(String),

    /// The stream dropped after it was established.
    #[error("Event stream transport error: {0}")]
    Transport(String),

    /// A single event payload was not valid JSON.
    #[error("Malformed event payload: {raw}")]
    Parse { raw: String },
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_stream_address_message_is_actionable() {
        let err = TriggerError::missing_stream_address("response body was not JSON");
        let text = err.to_string();
        assert!(text.contains("sseUrl"), "unexpected message: {text}");
        assert!(text.contains("remote workflow must respond"));
        assert!(text.contains("response body was not JSON"));
    }

    #[test]
    fn trigger_errors_pass_through_relay_error_display() {
        let err: RelayError = TriggerError::HttpStatus(502).into();
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }
}
