//! Logging setup for Tandem Server.
//!
//! Both entry points install a global `tracing` subscriber filtered by
//! `RUST_LOG` (default: `info,tandem_server=debug,tandem_relay=debug`).
//! Relay metrics go through the global OpenTelemetry meter and stay no-ops
//! unless a provider is installed by the embedding application.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "info,tandem_server=debug,tandem_relay=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize logging in the requested format.
pub fn init(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match format {
        LogFormat::Pretty => init_local(),
        LogFormat::Json => init_json(),
    }
}

/// Initialize JSON line logging, for deployments that ship logs elsewhere.
pub fn init_json() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true)
        .with_span_list(false);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Telemetry initialized (json)");

    Ok(())
}

/// Initialize telemetry for local development.
///
/// Provides pretty console output with file and line numbers.
pub fn init_local() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Local telemetry initialized");

    Ok(())
}

/// Flush and tear down telemetry before exit.
pub fn shutdown() {
    tracing::info!("Telemetry shutdown complete");
}
