//! Tandem Server: HTTP and WebSocket front end for the Tandem relay.
//!
//! Routes:
//! - `GET /ws/:client_id`: join the relay as `client_id`
//! - `GET /ws`: echo endpoint
//! - `GET /`: browser client (`index.html` from the static directory)
//! - `GET /static/*`: static assets
//! - `GET /health`: liveness and connection count

pub mod cli;
pub mod config;
pub mod server;
pub mod telemetry;

pub use config::{LogFormat, ServerConfig};
pub use server::{create_router, serve, start, AppState};
