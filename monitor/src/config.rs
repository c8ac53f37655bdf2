use anyhow::{ensure, Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::socket_url;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";
pub const DEFAULT_EVENT: &str = "sensor-data";

/// Connection settings shared by every command.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Base URL of the telemetry/alert server
    #[arg(long, env = "SERVER_URL", default_value = DEFAULT_SERVER_URL, global = true)]
    pub server_url: String,

    /// Name of the Socket.IO event carrying sensor readings
    #[arg(long, env = "SENSOR_EVENT", default_value = DEFAULT_EVENT, global = true)]
    pub event: String,

    /// JSON file holding the user profile
    #[arg(
        long,
        env = "PROFILE_PATH",
        default_value = "safespark-profile.json",
        global = true
    )]
    pub profile_path: PathBuf,

    /// Serve Prometheus metrics on this address (watch mode only)
    #[arg(long, env = "METRICS_ADDR", global = true)]
    pub metrics_addr: Option<String>,

    /// Stay disconnected after the first connection error
    #[arg(long, env = "NO_RECONNECT", global = true)]
    pub no_reconnect: bool,

    #[arg(long, env = "RECONNECT_INITIAL_MS", default_value_t = 100, global = true)]
    pub reconnect_initial_ms: u64,

    #[arg(long, env = "RECONNECT_MAX_MS", default_value_t = 2000, global = true)]
    pub reconnect_max_ms: u64,

    /// How long to wait for the server's handshake after connecting
    #[arg(long, env = "HANDSHAKE_TIMEOUT_SECS", default_value_t = 20, global = true)]
    pub handshake_timeout_secs: u64,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.server_url)
            .with_context(|| format!("SERVER_URL is not a valid URL: {:?}", self.server_url))?;
        ensure!(
            matches!(url.scheme(), "http" | "https"),
            "SERVER_URL must use http or https, got {:?}",
            url.scheme()
        );
        socket_url(&self.server_url).context("SERVER_URL cannot be turned into a WebSocket URL")?;

        ensure!(!self.event.is_empty(), "SENSOR_EVENT must not be empty");
        ensure!(
            self.reconnect_initial_ms > 0,
            "RECONNECT_INITIAL_MS must be a positive integer"
        );
        ensure!(
            self.reconnect_initial_ms <= self.reconnect_max_ms,
            "RECONNECT_INITIAL_MS ({}) must not exceed RECONNECT_MAX_MS ({})",
            self.reconnect_initial_ms,
            self.reconnect_max_ms
        );
        ensure!(
            self.handshake_timeout_secs > 0,
            "HANDSHAKE_TIMEOUT_SECS must be a positive integer"
        );
        Ok(())
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            base_url: self.server_url.clone(),
            event: self.event.clone(),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            reconnect: ReconnectPolicy {
                enabled: !self.no_reconnect,
                initial_backoff: Duration::from_millis(self.reconnect_initial_ms),
                max_backoff: Duration::from_millis(self.reconnect_max_ms),
            },
        }
    }
}

/// Settings for one telemetry stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub base_url: String,
    pub event: String,
    pub handshake_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl StreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            event: DEFAULT_EVENT.to_string(),
            handshake_timeout: Duration::from_secs(20),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// What the stream does after a connection error.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(2000),
        }
    }
}
