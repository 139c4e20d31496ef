//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `TANDEM_BIND_ADDR`: HTTP/WebSocket listen address. Default: `0.0.0.0:8000`
//! - `TANDEM_STATIC_DIR`: Directory holding `index.html` and static assets. Default: `static`
//! - `TANDEM_OUTBOUND_BUFFER`: Messages buffered per connection. Default: `64`
//! - `TANDEM_MALFORMED_FRAMES`: `drop` or `close`. Default: `drop`
//! - `TANDEM_DUPLICATE_IDS`: `replace` or `reject`. Default: `replace`
//! - `TANDEM_CORS_ORIGINS`: Comma-separated allowed origins. Default: permissive
//! - `TANDEM_LOG_FORMAT`: `pretty` or `json`. Default: `pretty`
//!
//! Command line flags (see [`crate::cli`]) take precedence over these.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use tandem_relay::RelayConfig;
use tracing::{info, warn};

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Default static asset directory.
pub const DEFAULT_STATIC_DIR: &str = "static";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other:?} (expected pretty or json)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl LogFormat {
    /// Read `TANDEM_LOG_FORMAT`, if set and valid.
    ///
    /// Read separately from [`ServerConfig`] because logging has to be set up
    /// before the rest of the configuration can report problems.
    pub fn from_env() -> Option<Self> {
        std::env::var("TANDEM_LOG_FORMAT")
            .ok()
            .and_then(|v| v.parse().ok())
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP/WebSocket listener
    pub bind_addr: SocketAddr,
    /// Directory served at `/static`, with `index.html` served at `/`
    pub static_dir: PathBuf,
    /// Allowed CORS origins; empty means permissive
    pub cors_origins: Vec<String>,
    /// Log output format
    pub log_format: LogFormat,
    /// Relay behaviour
    pub relay: RelayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.parse().expect("Valid default address"),
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            cors_origins: Vec::new(),
            log_format: LogFormat::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    ///
    /// Invalid values are logged and replaced by their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let bind_addr = parse_or_default(&lookup, "TANDEM_BIND_ADDR", defaults.bind_addr);
        let static_dir = lookup("TANDEM_STATIC_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.static_dir);
        let cors_origins = lookup("TANDEM_CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let log_format = parse_or_default(&lookup, "TANDEM_LOG_FORMAT", defaults.log_format);

        let outbound_buffer = parse_or_default(
            &lookup,
            "TANDEM_OUTBOUND_BUFFER",
            defaults.relay.outbound_buffer,
        );
        let malformed_frames = parse_or_default(
            &lookup,
            "TANDEM_MALFORMED_FRAMES",
            defaults.relay.malformed_frames,
        );
        let duplicate_ids =
            parse_or_default(&lookup, "TANDEM_DUPLICATE_IDS", defaults.relay.duplicate_ids);

        Self {
            bind_addr,
            static_dir,
            cors_origins,
            log_format,
            relay: RelayConfig::default()
                .with_outbound_buffer(outbound_buffer)
                .with_malformed_frames(malformed_frames)
                .with_duplicate_ids(duplicate_ids),
        }
    }

    /// Log the current server configuration.
    pub fn log_config(&self) {
        info!("Bind address: {}", self.bind_addr);
        info!("Static directory: {}", self.static_dir.display());
        info!("Outbound buffer: {} messages", self.relay.outbound_buffer);
        info!("Malformed frames: {}", self.relay.malformed_frames);
        info!("Duplicate client ids: {}", self.relay.duplicate_ids);
        if self.cors_origins.is_empty() {
            info!("CORS: permissive");
        } else {
            info!("CORS origins: {}", self.cors_origins.join(", "));
        }
    }

    /// Create a test configuration bound to an ephemeral local port.
    pub fn for_tests(static_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".parse().expect("Valid test address"),
            static_dir: static_dir.into(),
            ..Self::default()
        }
    }
}

fn parse_or_default<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + fmt::Display,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                warn!(key, value = %raw, error = %e, "Invalid value, using default {}", default);
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tandem_relay::{DuplicateIdPolicy, MalformedFramePolicy};

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(|_| None);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR.parse().unwrap());
        assert_eq!(config.static_dir, PathBuf::from("static"));
        assert!(config.cors_origins.is_empty());
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.relay.outbound_buffer, 64);
        assert_eq!(config.relay.malformed_frames, MalformedFramePolicy::Drop);
        assert_eq!(config.relay.duplicate_ids, DuplicateIdPolicy::Replace);
    }

    #[test]
    fn test_values_from_environment() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("TANDEM_BIND_ADDR", "127.0.0.1:9000"),
            ("TANDEM_STATIC_DIR", "/srv/tandem"),
            ("TANDEM_OUTBOUND_BUFFER", "8"),
            ("TANDEM_MALFORMED_FRAMES", "close"),
            ("TANDEM_DUPLICATE_IDS", "reject"),
            ("TANDEM_CORS_ORIGINS", "https://a.example, https://b.example,"),
            ("TANDEM_LOG_FORMAT", "json"),
        ]));

        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.static_dir, PathBuf::from("/srv/tandem"));
        assert_eq!(config.relay.outbound_buffer, 8);
        assert_eq!(config.relay.malformed_frames, MalformedFramePolicy::Close);
        assert_eq!(config.relay.duplicate_ids, DuplicateIdPolicy::Reject);
        assert_eq!(
            config.cors_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("TANDEM_BIND_ADDR", "not an address"),
            ("TANDEM_OUTBOUND_BUFFER", "lots"),
            ("TANDEM_MALFORMED_FRAMES", "explode"),
            ("TANDEM_STATIC_DIR", "  "),
        ]));

        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR.parse().unwrap());
        assert_eq!(config.relay.outbound_buffer, 64);
        assert_eq!(config.relay.malformed_frames, MalformedFramePolicy::Drop);
        assert_eq!(config.static_dir, PathBuf::from("static"));
    }

    #[test]
    fn test_zero_buffer_is_clamped() {
        let config = ServerConfig::from_lookup(lookup_from(&[("TANDEM_OUTBOUND_BUFFER", "0")]));
        assert_eq!(config.relay.outbound_buffer, 1);
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
