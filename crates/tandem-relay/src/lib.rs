//! # tandem-relay
//!
//! Connection registry and pairwise message relay for Tandem.
//!
//! Every connected client is known by a numeric [`ClientId`]. A client sends
//! `"<target>:<payload>"` and the relay forwards `"Client #<sender> says: <payload>"`
//! to the target's connection, recording that the two are now paired. When a
//! client leaves, each of its peers is told so on a best-effort basis.
//!
//! ## Architecture
//!
//! ```text
//! transport reader --> session::run_session --> Relay --> ConnectionRegistry
//!                                                 |              |
//!                                                 v              v
//!                                           ClientHandle   DashMap<ClientId, ClientEntry>
//!                                                 |
//!                                                 v
//!                                     mpsc --> transport writer task
//! ```
//!
//! The crate owns no sockets. The transport layer (see `tandem-server`) lends a
//! [`ClientHandle`] at registration and feeds inbound frames to
//! [`session::run_session`].

pub mod frame;
pub mod metrics;
pub mod registry;
pub mod relay;
pub mod session;

mod error;
mod types;

pub use error::{FrameError, RelayError};
pub use frame::InboundFrame;
pub use registry::{ConnectionRegistry, SendResult};
pub use relay::{DuplicateIdPolicy, MalformedFramePolicy, Relay, RelayConfig, RouteOutcome};
pub use session::{run_session, InboundEvent, SessionEnd, SessionSummary};
pub use types::*;
