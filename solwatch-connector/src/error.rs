use crate::listener::ListenerId;
use thiserror::Error;

/// Errors raised while turning one log batch into events.
///
/// Everything except [`ParseError::StackUnderflow`] is per-event: lenient parsing
/// swallows it and keeps scanning, strict parsing stops the batch on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed log sequence: expected a depth-1 invocation, found '{0}'")]
    MalformedLogSequence(String),

    /// The scanner popped an empty execution stack. This is a scanner bug or a
    /// caller feeding a truncated batch, never a decodable condition.
    #[error("Execution stack underflow while handling '{0}'")]
    StackUnderflow(String),

    #[error("Failed to decode event payload: {0}")]
    DecodeFailure(String),

    #[error("Event '{event}' failed validation: {reason}")]
    ValidationFailure { event: String, reason: String },
}

impl ParseError {
    /// Whether the error ends the batch even in lenient mode.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ParseError::StackUnderflow(_))
    }
}

/// Errors surfaced by the connector's caller-facing API.
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown subscription: no listener registered with id {0}")]
    UnknownSubscription(ListenerId),
}

impl From<solana_client::nonblocking::pubsub_client::PubsubClientError> for ConnectorError {
    fn from(err: solana_client::nonblocking::pubsub_client::PubsubClientError) -> Self {
        ConnectorError::Transport(err.to_string())
    }
}
