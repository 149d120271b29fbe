use crate::events::ServerEvent;
use crate::ids::StreamId;

/// Failures surfaced to a client as a `streamError` event.
///
/// None of these are fatal: they are resolved at the relay boundary and turned
/// into an outbound message for the connection that caused them. Chunks for
/// unknown streams are not errors at all; they are dropped silently.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Stream not found")]
    NotFound(StreamId),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl RelayError {
    /// The `streamError` event sent back to the client.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::error(self.to_string())
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidMessage(_) => "invalid_message",
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::InvalidMessage(e.to_string())
    }
}
