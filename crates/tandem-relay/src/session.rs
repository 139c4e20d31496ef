//! Per-connection read loop.
//!
//! The transport adapts its socket into a stream of [`InboundEvent`]s and
//! hands it to [`run_session`] together with the already-connected handle.
//! The loop ends on a close from the client, the end of the stream, or the
//! handle being closed (replacement, teardown after a failed delivery, or
//! server shutdown), including while a frame is still being routed. Whichever
//! way it ends, the client is torn down exactly once.

use futures::{Stream, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::relay::{MalformedFramePolicy, Relay};
use crate::{ClientHandle, ClientId};

/// One event read from a client's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A text frame
    Text(String),
    /// The client closed the connection
    Close,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent a close
    ClientClosed,
    /// The transport stream ended (read error or dropped connection)
    StreamEnded,
    /// The handle was closed by the server
    ClosedByServer,
    /// A malformed frame under [`MalformedFramePolicy::Close`]
    MalformedFrame,
}

/// Counters for a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Text frames read from the client
    pub frames_received: u64,
    /// Text frames that failed to parse
    pub frames_malformed: u64,
    /// Departure notices dispatched at teardown
    pub peers_notified: usize,
    /// How the session ended
    pub end: SessionEnd,
}

/// Drive one client's connection until it ends, then tear the client down.
///
/// `handle` must already be registered under `client` through
/// [`Relay::connect`].
#[instrument(skip_all, fields(client = %client, session = %handle.session()))]
pub async fn run_session<S>(
    relay: &Relay,
    client: ClientId,
    handle: ClientHandle,
    inbound: S,
) -> SessionSummary
where
    S: Stream<Item = InboundEvent>,
{
    let closed = handle.close_token();
    let policy = relay.config().malformed_frames;
    let mut frames_received = 0u64;
    let mut frames_malformed = 0u64;

    tokio::pin!(inbound);

    let end = loop {
        let event = tokio::select! {
            biased;
            _ = closed.cancelled() => break SessionEnd::ClosedByServer,
            event = inbound.next() => event,
        };

        let text = match event {
            Some(InboundEvent::Text(text)) => text,
            Some(InboundEvent::Close) => break SessionEnd::ClientClosed,
            None => break SessionEnd::StreamEnded,
        };
        frames_received += 1;

        // Routing can wait on a full target queue; a close must still win
        let routed = tokio::select! {
            biased;
            _ = closed.cancelled() => break SessionEnd::ClosedByServer,
            routed = relay.handle_inbound(client, &text) => routed,
        };

        match routed {
            Ok(outcome) => debug!(?outcome, "Frame routed"),
            Err(e) => {
                frames_malformed += 1;
                warn!(error = %e, "Dropping malformed frame");
                if policy == MalformedFramePolicy::Close {
                    break SessionEnd::MalformedFrame;
                }
            }
        }
    };

    let peers_notified = relay.disconnect_session(client, handle.session());
    info!(
        ?end,
        frames_received, frames_malformed, peers_notified, "Session ended"
    );

    SessionSummary {
        frames_received,
        frames_malformed,
        peers_notified,
        end,
    }
}
