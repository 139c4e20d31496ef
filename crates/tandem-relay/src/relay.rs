//! Message relay between paired clients.
//!
//! The relay turns an inbound `"<target>:<payload>"` frame into a delivery on
//! the target's connection and records the pairing. When a client leaves, each
//! of its peers that is still connected gets a departure notice.
//!
//! # Failure handling
//!
//! Nothing here fails the caller except a malformed frame:
//! - target not connected: the message is dropped silently
//! - target's writer is gone: the target is torn down like any other
//!   disconnect and the sender is not told
//! - departure notice fails: logged inside its own task and forgotten
//!
//! # Example
//!
//! ```ignore
//! let relay = Relay::new(Arc::new(ConnectionRegistry::new()), RelayConfig::default());
//!
//! relay.connect(ClientId(1), handle_1)?;
//! relay.connect(ClientId(2), handle_2)?;
//!
//! // Client 2 receives "Client #1 says: hi"
//! relay.handle_inbound(ClientId(1), "2:hi").await?;
//!
//! // Client 1 receives "Client #2 left the chat"
//! relay.disconnect(ClientId(2));
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::frame::{format_delivery, format_departure, InboundFrame};
use crate::registry::{ConnectionRegistry, SendResult};
use crate::{metrics, ClientHandle, ClientId, OutboundMessage, RelayError, SessionId};

/// Default number of messages buffered per connection before senders wait.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// What a session does with a frame that does not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedFramePolicy {
    /// Drop the frame and keep reading
    #[default]
    Drop,
    /// End the session
    Close,
}

impl FromStr for MalformedFramePolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drop" | "ignore" => Ok(Self::Drop),
            "close" | "disconnect" => Ok(Self::Close),
            other => Err(RelayError::config(format!(
                "unknown malformed frame policy {other:?} (expected drop or close)"
            ))),
        }
    }
}

impl fmt::Display for MalformedFramePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drop => write!(f, "drop"),
            Self::Close => write!(f, "close"),
        }
    }
}

/// What happens when a client connects under an id that is already live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateIdPolicy {
    /// Close the previous connection and take over the id with no peers
    #[default]
    Replace,
    /// Refuse the new connection
    Reject,
}

impl FromStr for DuplicateIdPolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "reject" => Ok(Self::Reject),
            other => Err(RelayError::config(format!(
                "unknown duplicate id policy {other:?} (expected replace or reject)"
            ))),
        }
    }
}

impl fmt::Display for DuplicateIdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// Configuration for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Messages buffered per connection before senders wait
    pub outbound_buffer: usize,
    /// Handling of frames that fail to parse
    pub malformed_frames: MalformedFramePolicy,
    /// Handling of a second connection under a live id
    pub duplicate_ids: DuplicateIdPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            malformed_frames: MalformedFramePolicy::default(),
            duplicate_ids: DuplicateIdPolicy::default(),
        }
    }
}

impl RelayConfig {
    /// Set the per-connection outbound buffer.
    pub fn with_outbound_buffer(mut self, outbound_buffer: usize) -> Self {
        self.outbound_buffer = outbound_buffer.max(1);
        self
    }

    /// Set the malformed frame policy.
    pub fn with_malformed_frames(mut self, policy: MalformedFramePolicy) -> Self {
        self.malformed_frames = policy;
        self
    }

    /// Set the duplicate id policy.
    pub fn with_duplicate_ids(mut self, policy: DuplicateIdPolicy) -> Self {
        self.duplicate_ids = policy;
        self
    }
}

/// Result of routing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Message was queued on the target's connection
    Delivered,
    /// Target is not connected; message dropped
    TargetAbsent,
    /// Target's connection was broken; target torn down, message dropped
    TargetGone,
    /// Sender is no longer registered; message dropped
    SenderAbsent,
}

/// Routes messages between registered clients.
#[derive(Debug, Clone)]
pub struct Relay {
    registry: Arc<ConnectionRegistry>,
    config: RelayConfig,
}

impl Relay {
    /// Create a relay over an existing registry.
    pub fn new(registry: Arc<ConnectionRegistry>, config: RelayConfig) -> Self {
        info!(
            outbound_buffer = config.outbound_buffer,
            malformed_frames = %config.malformed_frames,
            duplicate_ids = %config.duplicate_ids,
            "Creating relay"
        );
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Create a handle sized by this relay's outbound buffer.
    pub fn open_handle(
        &self,
        closer: CancellationToken,
    ) -> (ClientHandle, mpsc::Receiver<OutboundMessage>) {
        ClientHandle::with_closer(self.config.outbound_buffer, closer)
    }

    /// Register a newly accepted connection.
    ///
    /// Under [`DuplicateIdPolicy::Replace`] a previous connection under the
    /// same id is closed and its pairings are discarded without notifying
    /// anyone. Under [`DuplicateIdPolicy::Reject`] the new connection is
    /// refused and the existing one is left alone.
    #[instrument(skip(self, handle), fields(client = %id, session = %handle.session()))]
    pub fn connect(&self, id: ClientId, handle: ClientHandle) -> Result<(), RelayError> {
        match self.config.duplicate_ids {
            DuplicateIdPolicy::Replace => {
                if let Some(previous) = self.registry.register(id, handle) {
                    info!(previous = %previous.session(), "Closing replaced connection");
                    previous.close();
                }
                Ok(())
            }
            DuplicateIdPolicy::Reject => {
                if self.registry.register_if_absent(id, handle) {
                    Ok(())
                } else {
                    warn!("Rejecting duplicate connection");
                    Err(RelayError::DuplicateClient(id))
                }
            }
        }
    }

    /// Handle one inbound text frame from `sender`.
    ///
    /// Only a malformed frame is reported to the caller; every delivery
    /// failure is absorbed into the returned [`RouteOutcome`].
    pub async fn handle_inbound(
        &self,
        sender: ClientId,
        raw: &str,
    ) -> Result<RouteOutcome, RelayError> {
        let frame = InboundFrame::parse(raw).inspect_err(|_| metrics::record_malformed())?;
        Ok(self.route(sender, frame).await)
    }

    /// Pair `sender` with the frame's target and forward the payload.
    #[instrument(skip(self, frame), fields(from = %sender, to = %frame.target))]
    pub async fn route(&self, sender: ClientId, frame: InboundFrame) -> RouteOutcome {
        // A torn-down sender must not pair itself back into its peers' sets
        if !self.registry.is_connected(sender) {
            debug!("Sender not registered, dropping message");
            metrics::record_dropped("sender_absent");
            return RouteOutcome::SenderAbsent;
        }
        self.registry.add_pairing(sender, frame.target);

        let text = format_delivery(sender, &frame.payload);
        match self.registry.send_to(frame.target, text).await {
            SendResult::Sent => {
                metrics::record_relayed();
                RouteOutcome::Delivered
            }
            SendResult::NotConnected => {
                debug!("Target not connected, dropping message");
                metrics::record_dropped("target_absent");
                RouteOutcome::TargetAbsent
            }
            SendResult::ChannelClosed { session } => {
                debug!("Target connection broken, tearing it down");
                metrics::record_dropped("target_gone");
                self.disconnect_session(frame.target, session);
                RouteOutcome::TargetGone
            }
        }
    }

    /// Tear down `client`, whatever session it is on, and close its
    /// connection.
    ///
    /// Idempotent: a client that is not registered is a no-op. Returns the
    /// number of departure notices dispatched.
    #[instrument(skip(self), fields(client = %client))]
    pub fn disconnect(&self, client: ClientId) -> usize {
        if !self.registry.is_connected(client) {
            debug!("Client not registered, nothing to tear down");
            return 0;
        }
        let peers = self.registry.unregister(client);
        self.notify_departure(client, peers)
    }

    /// Tear down `client` and close its connection, only if `session` is
    /// still its registration.
    ///
    /// A connection that was replaced under the same id finds nothing to do
    /// here, so it cannot remove its successor.
    #[instrument(skip(self), fields(client = %client, session = %session))]
    pub fn disconnect_session(&self, client: ClientId, session: SessionId) -> usize {
        match self.registry.unregister_session(client, session) {
            Some(peers) => self.notify_departure(client, peers),
            None => 0,
        }
    }

    /// Dispatch a departure notice to every former peer still connected.
    ///
    /// Each notice runs in its own detached task; this never waits on them.
    fn notify_departure(&self, client: ClientId, peers: HashSet<ClientId>) -> usize {
        let notice = format_departure(client);
        let mut dispatched = 0;

        for peer in peers {
            let Some(handle) = self.registry.lookup(peer) else {
                continue;
            };
            let notice = notice.clone();
            tokio::spawn(async move {
                match handle.send(notice).await {
                    Ok(()) => {
                        debug!(peer = %peer, "Departure notice queued");
                        metrics::record_notification(true);
                    }
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "Departure notice not delivered");
                        metrics::record_notification(false);
                    }
                }
            });
            dispatched += 1;
        }

        if dispatched > 0 {
            debug!(client = %client, peers = dispatched, "Dispatched departure notices");
        }
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::FrameError;

    fn relay() -> Relay {
        Relay::new(Arc::new(ConnectionRegistry::new()), RelayConfig::default())
    }

    fn connect(relay: &Relay, id: i64) -> mpsc::Receiver<OutboundMessage> {
        let (handle, rx) = ClientHandle::channel(16);
        relay.connect(ClientId(id), handle).unwrap();
        rx
    }

    async fn recv_text(rx: &mut mpsc::Receiver<OutboundMessage>) -> String {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
            .text
    }

    #[tokio::test]
    async fn test_message_delivered_to_target() {
        let relay = relay();
        let _rx1 = connect(&relay, 1);
        let mut rx2 = connect(&relay, 2);

        let outcome = relay.handle_inbound(ClientId(1), "2:hi").await.unwrap();

        assert_eq!(outcome, RouteOutcome::Delivered);
        assert_eq!(recv_text(&mut rx2).await, "Client #1 says: hi");
    }

    #[tokio::test]
    async fn test_payload_keeps_colons() {
        let relay = relay();
        let _rx1 = connect(&relay, 1);
        let mut rx2 = connect(&relay, 2);

        relay.handle_inbound(ClientId(1), "2:a:b:c").await.unwrap();

        assert_eq!(recv_text(&mut rx2).await, "Client #1 says: a:b:c");
    }

    #[tokio::test]
    async fn test_delivery_pairs_both_clients() {
        let relay = relay();
        let _rx1 = connect(&relay, 1);
        let _rx2 = connect(&relay, 2);

        relay.handle_inbound(ClientId(1), "2:hi").await.unwrap();

        let registry = relay.registry();
        assert!(registry.peers_of(ClientId(1)).unwrap().contains(&ClientId(2)));
        assert!(registry.peers_of(ClientId(2)).unwrap().contains(&ClientId(1)));
    }

    #[tokio::test]
    async fn test_missing_target_is_silent_drop() {
        let relay = relay();
        let mut rx1 = connect(&relay, 1);

        let outcome = relay.handle_inbound(ClientId(1), "42:hello").await.unwrap();

        assert_eq!(outcome, RouteOutcome::TargetAbsent);
        assert!(rx1.try_recv().is_err());
        // Pairing is still recorded on the sender's side
        assert!(relay
            .registry()
            .peers_of(ClientId(1))
            .unwrap()
            .contains(&ClientId(42)));
    }

    #[tokio::test]
    async fn test_malformed_frames_are_reported() {
        let relay = relay();
        let _rx1 = connect(&relay, 1);

        let err = relay.handle_inbound(ClientId(1), "no separator").await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::MalformedFrame(FrameError::MissingSeparator)
        ));

        let err = relay.handle_inbound(ClientId(1), "two:hi").await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::MalformedFrame(FrameError::InvalidTarget { .. })
        ));

        // Nothing was paired
        assert!(relay.registry().peers_of(ClientId(1)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broken_target_is_torn_down() {
        let relay = relay();
        let mut rx1 = connect(&relay, 1);
        let rx2 = connect(&relay, 2);
        let mut rx3 = connect(&relay, 3);

        // 3 and 2 are paired before 2 breaks
        relay.handle_inbound(ClientId(3), "2:hey").await.unwrap();
        drop(rx2);

        let outcome = relay.handle_inbound(ClientId(1), "2:hi").await.unwrap();
        assert_eq!(outcome, RouteOutcome::TargetGone);
        assert!(!relay.registry().is_connected(ClientId(2)));

        // Both former peers of 2 hear about it; the sender gets no error
        assert_eq!(recv_text(&mut rx1).await, "Client #2 left the chat");
        assert_eq!(recv_text(&mut rx3).await, "Client #2 left the chat");
    }

    #[tokio::test]
    async fn test_broken_target_handle_is_closed() {
        let relay = relay();
        let mut rx1 = connect(&relay, 1);
        let (h2, rx2) = ClientHandle::channel(16);
        let closed_2 = h2.close_token();
        relay.connect(ClientId(2), h2).unwrap();
        drop(rx2);

        let outcome = relay.handle_inbound(ClientId(1), "2:hi").await.unwrap();
        assert_eq!(outcome, RouteOutcome::TargetGone);
        assert!(closed_2.is_cancelled());
        assert_eq!(recv_text(&mut rx1).await, "Client #2 left the chat");

        // Whatever 2 still manages to send goes nowhere and re-pairs nothing
        let outcome = relay.handle_inbound(ClientId(2), "1:zombie").await.unwrap();
        assert_eq!(outcome, RouteOutcome::SenderAbsent);
        assert!(!relay.registry().is_connected(ClientId(2)));
        tokio::task::yield_now().await;
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_each_peer_once() {
        let relay = relay();
        let _rx1 = connect(&relay, 1);
        let mut rx2 = connect(&relay, 2);
        let mut rx3 = connect(&relay, 3);

        relay.handle_inbound(ClientId(1), "2:a").await.unwrap();
        relay.handle_inbound(ClientId(1), "3:b").await.unwrap();
        relay.handle_inbound(ClientId(1), "2:c").await.unwrap();
        for _ in 0..2 {
            recv_text(&mut rx2).await;
        }
        recv_text(&mut rx3).await;

        assert_eq!(relay.disconnect(ClientId(1)), 2);

        assert_eq!(recv_text(&mut rx2).await, "Client #1 left the chat");
        assert_eq!(recv_text(&mut rx3).await, "Client #1 left the chat");
        tokio::task::yield_now().await;
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_completes_when_notifications_fail() {
        let relay = relay();
        let _rx1 = connect(&relay, 1);
        let rx2 = connect(&relay, 2);
        let rx3 = connect(&relay, 3);

        relay.handle_inbound(ClientId(1), "2:a").await.unwrap();
        relay.handle_inbound(ClientId(1), "3:b").await.unwrap();
        drop(rx2);
        drop(rx3);

        assert_eq!(relay.disconnect(ClientId(1)), 2);
        assert!(!relay.registry().is_connected(ClientId(1)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let relay = relay();
        let _rx1 = connect(&relay, 1);
        let mut rx2 = connect(&relay, 2);
        relay.handle_inbound(ClientId(1), "2:a").await.unwrap();
        recv_text(&mut rx2).await;

        let closed_1 = relay.registry().lookup(ClientId(1)).unwrap().close_token();
        assert_eq!(relay.disconnect(ClientId(1)), 1);
        assert!(closed_1.is_cancelled());
        assert_eq!(relay.disconnect(ClientId(1)), 0);
        assert_eq!(relay.disconnect(ClientId(99)), 0);

        assert_eq!(recv_text(&mut rx2).await, "Client #1 left the chat");
        tokio::task::yield_now().await;
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_skips_departed_peers() {
        let relay = relay();
        let _rx1 = connect(&relay, 1);
        let _rx2 = connect(&relay, 2);
        relay.handle_inbound(ClientId(1), "2:a").await.unwrap();

        relay.disconnect(ClientId(2));
        assert_eq!(relay.disconnect(ClientId(1)), 0);
    }

    #[tokio::test]
    async fn test_replace_closes_previous_connection() {
        let relay = relay();
        let (old, _old_rx) = ClientHandle::channel(16);
        let old_session = old.session();
        relay.connect(ClientId(1), old.clone()).unwrap();
        let _rx2 = connect(&relay, 2);
        relay.handle_inbound(ClientId(1), "2:a").await.unwrap();

        let (new, _new_rx) = ClientHandle::channel(16);
        relay.connect(ClientId(1), new).unwrap();

        assert!(!old.is_alive());
        assert!(relay.registry().peers_of(ClientId(1)).unwrap().is_empty());

        // The old session's teardown leaves the new registration in place
        assert_eq!(relay.disconnect_session(ClientId(1), old_session), 0);
        assert!(relay.registry().is_connected(ClientId(1)));
    }

    #[tokio::test]
    async fn test_reject_keeps_existing_connection() {
        let relay = Relay::new(
            Arc::new(ConnectionRegistry::new()),
            RelayConfig::default().with_duplicate_ids(DuplicateIdPolicy::Reject),
        );
        let (first, _rx_first) = ClientHandle::channel(16);
        let first_session = first.session();
        relay.connect(ClientId(1), first).unwrap();

        let (second, _rx_second) = ClientHandle::channel(16);
        let err = relay.connect(ClientId(1), second).unwrap_err();

        assert!(matches!(err, RelayError::DuplicateClient(ClientId(1))));
        assert_eq!(
            relay.registry().lookup(ClientId(1)).unwrap().session(),
            first_session
        );
    }

    #[tokio::test]
    async fn test_chat_scenario() {
        let relay = relay();
        let mut rx1 = connect(&relay, 1);
        let mut rx2 = connect(&relay, 2);

        relay.handle_inbound(ClientId(1), "2:hi").await.unwrap();
        assert_eq!(recv_text(&mut rx2).await, "Client #1 says: hi");

        relay.disconnect(ClientId(2));
        assert_eq!(recv_text(&mut rx1).await, "Client #2 left the chat");

        let outcome = relay.handle_inbound(ClientId(1), "2:hi").await.unwrap();
        assert_eq!(outcome, RouteOutcome::TargetAbsent);
        tokio::task::yield_now().await;
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "DROP".parse::<MalformedFramePolicy>().unwrap(),
            MalformedFramePolicy::Drop
        );
        assert_eq!(
            "close".parse::<MalformedFramePolicy>().unwrap(),
            MalformedFramePolicy::Close
        );
        assert!("explode".parse::<MalformedFramePolicy>().is_err());

        assert_eq!(
            "reject".parse::<DuplicateIdPolicy>().unwrap(),
            DuplicateIdPolicy::Reject
        );
        assert!("merge".parse::<DuplicateIdPolicy>().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = RelayConfig::default()
            .with_outbound_buffer(0)
            .with_malformed_frames(MalformedFramePolicy::Close);
        assert_eq!(config.outbound_buffer, 1);
        assert_eq!(config.malformed_frames, MalformedFramePolicy::Close);
        assert_eq!(config.duplicate_ids, DuplicateIdPolicy::Replace);
    }
}
