//! Event dispatch errors

use thiserror::Error;

/// errors raised while decoding or applying events
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    /// no handler is registered under this name
    #[error("unknown event '{name}'; registered events: {}", .known.join(", "))]
    UnknownEvent { name: String, known: Vec<String> },

    /// the payload does not have the shape the handler needs
    #[error("invalid payload for '{event}': {reason}")]
    InvalidPayload { event: String, reason: String },

    /// an index-based event points past the end of `entries`
    #[error("'{event}': index {index} out of range for {len} entries")]
    IndexOutOfRange {
        event: String,
        index: usize,
        len: usize,
    },

    /// a `batch` payload is not a list of `{name, payload}` objects
    #[error("malformed batch: {0}")]
    MalformedBatch(String),

    /// handlers cannot be registered under engine-reserved names
    #[error("'{0}' is a reserved event name")]
    ReservedName(String),

    /// the event may only appear in a repository's root commit
    #[error("'{0}' can only be recorded by the root commit")]
    RootOnly(String),
}

impl EventError {
    pub(crate) fn invalid(event: &str, reason: impl Into<String>) -> Self {
        EventError::InvalidPayload {
            event: event.to_string(),
            reason: reason.into(),
        }
    }
}

/// result type alias for event operations
pub type EventResult<T> = Result<T, EventError>;
