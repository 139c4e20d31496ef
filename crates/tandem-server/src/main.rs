use anyhow::Result;
use clap::Parser;
use tracing::info;

use tandem_server::cli::Cli;
use tandem_server::config::{LogFormat, ServerConfig};
use tandem_server::{server, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging comes up first so configuration problems get reported
    let log_format = cli
        .log_format
        .or_else(LogFormat::from_env)
        .unwrap_or_default();
    telemetry::init(log_format).map_err(|e| anyhow::anyhow!("{e}"))?;

    info!("Tandem Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("License: AGPL-3.0");

    let config = cli.apply_to(ServerConfig::from_env());
    config.log_config();

    server::start(config).await?;

    telemetry::shutdown();
    Ok(())
}
