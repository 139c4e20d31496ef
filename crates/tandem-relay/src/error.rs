//! Error types for the relay.

use std::num::ParseIntError;

use thiserror::Error;

use crate::ClientId;

/// Relay errors.
///
/// None of these are fatal to the process; each is scoped to a single
/// client's session.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Inbound frame could not be parsed
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    /// The connection's writer is gone
    #[error("Outbound channel closed")]
    ChannelClosed,

    /// A live connection is already registered under this id
    #[error("Client {0} is already connected")]
    DuplicateClient(ClientId),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error only concerns one inbound frame.
    pub fn is_malformed_frame(&self) -> bool {
        matches!(self, Self::MalformedFrame(_))
    }
}

/// Reasons an inbound `"<target>:<payload>"` frame is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// No `:` between target and payload
    #[error("missing ':' separator between target and payload")]
    MissingSeparator,

    /// Target is not an integer
    #[error("invalid target id {raw:?}: {source}")]
    InvalidTarget {
        /// The text that failed to parse
        raw: String,
        /// Underlying integer parse error
        #[source]
        source: ParseIntError,
    },
}
