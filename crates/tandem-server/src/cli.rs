//! Command line interface.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tandem_relay::{DuplicateIdPolicy, MalformedFramePolicy};

use crate::config::{LogFormat, ServerConfig};

/// Tandem - pairwise WebSocket chat relay
#[derive(Debug, Parser)]
#[command(name = "tandem-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on (overrides TANDEM_BIND_ADDR)
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Directory with index.html and static assets (overrides TANDEM_STATIC_DIR)
    #[arg(short, long)]
    pub static_dir: Option<PathBuf>,

    /// Messages buffered per connection (overrides TANDEM_OUTBOUND_BUFFER)
    #[arg(long)]
    pub outbound_buffer: Option<usize>,

    /// What to do with unparseable frames: drop | close
    #[arg(long, value_parser = parse_malformed_frames)]
    pub malformed_frames: Option<MalformedFramePolicy>,

    /// What to do when a client id connects twice: replace | reject
    #[arg(long, value_parser = parse_duplicate_ids)]
    pub duplicate_ids: Option<DuplicateIdPolicy>,

    /// Log output: pretty | json (overrides TANDEM_LOG_FORMAT)
    #[arg(long)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Apply flags given on the command line on top of `config`.
    pub fn apply_to(&self, mut config: ServerConfig) -> ServerConfig {
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(static_dir) = &self.static_dir {
            config.static_dir = static_dir.clone();
        }
        if let Some(log_format) = self.log_format {
            config.log_format = log_format;
        }
        if let Some(outbound_buffer) = self.outbound_buffer {
            config.relay = config.relay.with_outbound_buffer(outbound_buffer);
        }
        if let Some(policy) = self.malformed_frames {
            config.relay = config.relay.with_malformed_frames(policy);
        }
        if let Some(policy) = self.duplicate_ids {
            config.relay = config.relay.with_duplicate_ids(policy);
        }
        config
    }
}

fn parse_malformed_frames(s: &str) -> Result<MalformedFramePolicy, String> {
    s.parse().map_err(|e: tandem_relay::RelayError| e.to_string())
}

fn parse_duplicate_ids(s: &str) -> Result<DuplicateIdPolicy, String> {
    s.parse().map_err(|e: tandem_relay::RelayError| e.to_string())
}
