//! Connection Registry for pairwise message routing.
//!
//! Tracks which clients are connected and which clients each one is paired
//! with. A client's handle and its peer set live in the same map entry, so
//! removing a client returns its peers in one step.
//!
//! ```text
//! session (client 1) <-> ConnectionRegistry <-> session (client 2)
//!         |                      |                       |
//!         v                      v                       v
//!   ClientHandle        DashMap<ClientId,          ClientHandle
//!                         ClientEntry { handle, peers }>
//! ```

mod connection_registry;

pub use connection_registry::{ClientEntry, ConnectionRegistry, SendResult};
