//! Connection Registry implementation.
//!
//! Tracks active client connections by [`ClientId`] along with the set of
//! peers each client has exchanged messages with.

use std::collections::HashSet;
use std::fmt;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, instrument};

use crate::{metrics, ClientHandle, ClientId, SessionId};

/// Connection state stored in the registry.
#[derive(Debug)]
pub struct ClientEntry {
    /// The live handle for this client
    pub handle: ClientHandle,
    /// Clients this one is paired with
    pub peers: HashSet<ClientId>,
}

impl ClientEntry {
    /// Create a new entry with no peers.
    pub fn new(handle: ClientHandle) -> Self {
        Self {
            handle,
            peers: HashSet::new(),
        }
    }
}

/// Result of attempting to send a message to a client.
#[derive(Debug)]
pub enum SendResult {
    /// Message was queued for delivery
    Sent,
    /// The recipient is not currently connected
    NotConnected,
    /// The recipient's writer is gone; the registration belongs to `session`
    ChannelClosed {
        /// Session of the handle the send was attempted on
        session: SessionId,
    },
}

/// Registry of connected clients and their pairings.
///
/// Thread-safe: all operations take `&self` and are serialized per key by
/// the underlying `DashMap`. No map guard is held across an `.await`, and no
/// operation holds a guard on one key while locking another.
///
/// ## Usage
///
/// ```ignore
/// let registry = ConnectionRegistry::new();
///
/// // When a connection is established:
/// let (handle, rx) = ClientHandle::channel(64);
/// registry.register(ClientId(1), handle);
///
/// // When client 1 messages client 2:
/// registry.add_pairing(ClientId(1), ClientId(2));
/// let result = registry.send_to(ClientId(2), "Client #1 says: hi").await;
///
/// // When the connection closes:
/// let peers = registry.unregister(ClientId(1));
/// ```
pub struct ConnectionRegistry {
    /// Map of client id to connection entry (handle and peer set)
    connections: DashMap<ClientId, ClientEntry>,
}

impl ConnectionRegistry {
    /// Create a new connection registry.
    pub fn new() -> Self {
        info!("Creating connection registry");
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection.
    ///
    /// Any existing registration under `id` is replaced along with its peer
    /// set, and the replaced handle is returned so the caller can close it.
    /// Nobody is notified of the replacement.
    #[instrument(skip(self, handle), fields(client = %id, session = %handle.session()))]
    pub fn register(&self, id: ClientId, handle: ClientHandle) -> Option<ClientHandle> {
        let existing = self.connections.insert(id, ClientEntry::new(handle));
        if existing.is_some() {
            debug!("Replaced existing connection registration");
        } else {
            debug!("Registered new connection");
        }
        metrics::record_connections(self.connections.len());
        existing.map(|entry| entry.handle)
    }

    /// Register a connection only if `id` is not already registered.
    ///
    /// Returns false, leaving the existing registration untouched, if `id`
    /// is taken.
    #[instrument(skip(self, handle), fields(client = %id, session = %handle.session()))]
    pub fn register_if_absent(&self, id: ClientId, handle: ClientHandle) -> bool {
        let inserted = match self.connections.entry(id) {
            Entry::Occupied(_) => {
                debug!("Client id already registered");
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ClientEntry::new(handle));
                debug!("Registered new connection");
                true
            }
        };
        if inserted {
            metrics::record_connections(self.connections.len());
        }
        inserted
    }

    /// Get the live handle for a client.
    pub fn lookup(&self, id: ClientId) -> Option<ClientHandle> {
        self.connections.get(&id).map(|entry| entry.handle.clone())
    }

    /// Unregister a client and close its handle.
    ///
    /// Returns the client's former peers, or an empty set if it was not
    /// registered.
    #[instrument(skip(self), fields(client = %id))]
    pub fn unregister(&self, id: ClientId) -> HashSet<ClientId> {
        match self.connections.remove(&id) {
            Some((_, entry)) => {
                debug!(peers = entry.peers.len(), "Unregistered connection");
                metrics::record_connections(self.connections.len());
                entry.handle.close();
                entry.peers
            }
            None => {
                debug!("Connection was not registered");
                HashSet::new()
            }
        }
    }

    /// Unregister a client only if its registration belongs to `session`.
    /// The removed handle is closed.
    ///
    /// Returns `None` when nothing was removed, either because the client is
    /// not registered or because a newer session has replaced it.
    #[instrument(skip(self), fields(client = %id, session = %session))]
    pub fn unregister_session(&self, id: ClientId, session: SessionId) -> Option<HashSet<ClientId>> {
        let removed = self
            .connections
            .remove_if(&id, |_, entry| entry.handle.session() == session);
        match removed {
            Some((_, entry)) => {
                debug!(peers = entry.peers.len(), "Unregistered connection");
                metrics::record_connections(self.connections.len());
                entry.handle.close();
                Some(entry.peers)
            }
            None => {
                debug!("No registration for this session");
                None
            }
        }
    }

    /// Record that `a` and `b` have exchanged a message.
    ///
    /// `b` is added to `a`'s peers. `a` is added to `b`'s peers only if `b`
    /// is registered; pairing with an absent client is a one-sided no-op.
    pub fn add_pairing(&self, a: ClientId, b: ClientId) {
        match self.connections.get_mut(&a) {
            Some(mut entry) => {
                entry.peers.insert(b);
            }
            None => debug!(client = %a, peer = %b, "Pairing from unregistered client ignored"),
        }

        if let Some(mut entry) = self.connections.get_mut(&b) {
            entry.peers.insert(a);
        }
    }

    /// Check if a client is currently connected.
    pub fn is_connected(&self, id: ClientId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// List all connected client ids.
    pub fn list_connections(&self) -> Vec<ClientId> {
        self.connections.iter().map(|r| *r.key()).collect()
    }

    /// Get a snapshot of a client's peers, if it is registered.
    pub fn peers_of(&self, id: ClientId) -> Option<HashSet<ClientId>> {
        self.connections.get(&id).map(|entry| entry.peers.clone())
    }

    /// Send text to a connected client.
    #[instrument(skip(self, text), fields(to = %id))]
    pub async fn send_to(&self, id: ClientId, text: impl Into<String>) -> SendResult {
        let handle = match self.lookup(id) {
            Some(handle) => handle,
            None => {
                debug!("Recipient not connected");
                return SendResult::NotConnected;
            }
        };

        match handle.send(text).await {
            Ok(()) => {
                debug!("Message queued for delivery");
                SendResult::Sent
            }
            Err(_) => {
                debug!("Outbound channel closed, connection may have dropped");
                SendResult::ChannelClosed {
                    session: handle.session(),
                }
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.connections.len())
            .finish()
    }
}
