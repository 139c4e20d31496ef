//! Application-level text framing.
//!
//! Inbound: `"<target_id>:<payload>"`, split on the first colon.
//! Outbound: `"Client #<sender_id> says: <payload>"` for deliveries and
//! `"Client #<id> left the chat"` when a peer disconnects.

use crate::{ClientId, FrameError};

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Client the payload is addressed to
    pub target: ClientId,
    /// Everything after the first colon, verbatim
    pub payload: String,
}

impl InboundFrame {
    /// Parse `"<target_id>:<payload>"`.
    ///
    /// The payload may itself contain colons and may be empty.
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let (target, payload) = raw.split_once(':').ok_or(FrameError::MissingSeparator)?;

        let target = target
            .parse::<ClientId>()
            .map_err(|source| FrameError::InvalidTarget {
                raw: target.to_string(),
                source,
            })?;

        Ok(Self {
            target,
            payload: payload.to_string(),
        })
    }
}

/// Text delivered to the target of a message.
pub fn format_delivery(sender: ClientId, payload: &str) -> String {
    format!("Client #{} says: {}", sender, payload)
}

/// Text sent to each peer of a client that left.
pub fn format_departure(client: ClientId) -> String {
    format!("Client #{} left the chat", client)
}
