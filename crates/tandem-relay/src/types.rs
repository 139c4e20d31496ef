//! Core types shared by the registry, relay, and transport.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::RelayError;

/// Externally supplied identifier of a connected client.
///
/// Opaque to the relay: any integer is accepted and uniqueness among live
/// connections is only enforced by the registration policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub i64);

impl ClientId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

impl From<i64> for ClientId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identifies one accepted connection.
///
/// Two successive registrations under the same [`ClientId`] carry different
/// session ids, which keeps a stale connection's teardown from removing the
/// registration that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A text frame to be written to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// The text payload, already formatted for the wire
    pub text: String,
}

impl OutboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Capability to send text to one client and to check that it is alive.
///
/// Cloning is cheap; all clones refer to the same connection. The transport
/// keeps the receiving half of the channel and writes whatever arrives to the
/// socket, so a send fails once that writer has gone away.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    session: SessionId,
    sender: mpsc::Sender<OutboundMessage>,
    closer: CancellationToken,
}

impl ClientHandle {
    /// Create a handle with an outbound buffer of `buffer` messages.
    ///
    /// Returns the handle and the receiver the transport's writer task drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        Self::with_closer(buffer, CancellationToken::new())
    }

    /// Like [`ClientHandle::channel`] but closing follows `closer`.
    ///
    /// Passing a child of a server-wide token makes shutdown close every
    /// connection.
    pub fn with_closer(
        buffer: usize,
        closer: CancellationToken,
    ) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let handle = Self {
            session: SessionId::new(),
            sender,
            closer,
        };
        (handle, receiver)
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Queue `text` for delivery, waiting for buffer space if the client is slow.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), RelayError> {
        self.sender
            .send(OutboundMessage::new(text))
            .await
            .map_err(|_| RelayError::ChannelClosed)
    }

    /// Whether the connection can still accept messages.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed() && !self.closer.is_cancelled()
    }

    /// Ask the transport to close this connection.
    pub fn close(&self) {
        self.closer.cancel();
    }

    /// Token that is cancelled when the connection should close.
    pub fn close_token(&self) -> CancellationToken {
        self.closer.clone()
    }

    pub fn is_same_session(&self, other: &ClientHandle) -> bool {
        self.session == other.session
    }
}
