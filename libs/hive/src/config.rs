//! Hive configuration loading and validation.
//!
//! All fields have working defaults so a hive can start from an empty
//! config. TOML files may set any subset:
//!
//! ```toml
//! addr = "0.0.0.0:7767"
//! data_queue_capacity = 8192
//!
//! [proxy]
//! max_retries = 5
//! max_backoff_ms = 2000
//! ```

use crate::error::{HiveError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level hive configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HiveConfig {
    /// Listen address; also the hive's identity once bound.
    /// Port 0 binds an ephemeral port and the identity follows it.
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Capacity of the shared dispatch queue.
    #[serde(default = "default_data_queue_capacity")]
    pub data_queue_capacity: usize,

    /// Capacity of each bee's private queue.
    #[serde(default = "default_bee_queue_capacity")]
    pub bee_queue_capacity: usize,

    /// Capacity of the control command queue.
    #[serde(default = "default_ctrl_queue_capacity")]
    pub ctrl_queue_capacity: usize,

    /// Largest wire frame accepted or produced, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Default timeout for synchronous request/reply calls (milliseconds).
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,

    /// Outbound connection behavior.
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Dial and retry behavior for proxy connections to remote hives.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Timeout for a single connection attempt (milliseconds).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Backoff before the first retry (milliseconds). Doubles per retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling (milliseconds).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Retries after the first attempt. Total attempts = 1 + max_retries.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_addr() -> String {
    "127.0.0.1:7767".to_string()
}

fn default_data_queue_capacity() -> usize {
    4096
}

fn default_bee_queue_capacity() -> usize {
    1024
}

fn default_ctrl_queue_capacity() -> usize {
    64
}

fn default_max_frame_size() -> usize {
    codec::DEFAULT_MAX_FRAME_SIZE
}

fn default_sync_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    1_000
}

fn default_max_retries() -> u32 {
    3
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            data_queue_capacity: default_data_queue_capacity(),
            bee_queue_capacity: default_bee_queue_capacity(),
            ctrl_queue_capacity: default_ctrl_queue_capacity(),
            max_frame_size: default_max_frame_size(),
            sync_timeout_ms: default_sync_timeout_ms(),
            proxy: ProxyConfig::default(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl HiveConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            HiveError::configuration(format!("failed to read config file: {}", e), None)
        })?;

        let config: Self = toml::from_str(&contents).map_err(|e| {
            HiveError::configuration(format!("failed to parse config: {}", e), None)
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check every field before the hive starts with it.
    pub fn validate(&self) -> Result<()> {
        if self.addr.parse::<SocketAddr>().is_err() {
            return Err(HiveError::configuration(
                format!("addr {:?} is not a valid socket address", self.addr),
                Some("addr"),
            ));
        }

        if self.data_queue_capacity == 0 {
            return Err(HiveError::configuration(
                "data_queue_capacity must be > 0",
                Some("data_queue_capacity"),
            ));
        }

        if self.bee_queue_capacity == 0 {
            return Err(HiveError::configuration(
                "bee_queue_capacity must be > 0",
                Some("bee_queue_capacity"),
            ));
        }

        if self.ctrl_queue_capacity == 0 {
            return Err(HiveError::configuration(
                "ctrl_queue_capacity must be > 0",
                Some("ctrl_queue_capacity"),
            ));
        }

        if self.max_frame_size < 8 {
            return Err(HiveError::configuration(
                "max_frame_size must be at least 8 bytes",
                Some("max_frame_size"),
            ));
        }

        if self.sync_timeout_ms == 0 {
            return Err(HiveError::configuration(
                "sync_timeout_ms must be > 0",
                Some("sync_timeout_ms"),
            ));
        }

        self.proxy.validate()
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(HiveError::configuration(
                "proxy.connect_timeout_ms must be > 0",
                Some("proxy.connect_timeout_ms"),
            ));
        }

        if self.initial_backoff_ms == 0 {
            return Err(HiveError::configuration(
                "proxy.initial_backoff_ms must be > 0",
                Some("proxy.initial_backoff_ms"),
            ));
        }

        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(HiveError::configuration(
                "proxy.max_backoff_ms must be >= proxy.initial_backoff_ms",
                Some("proxy.max_backoff_ms"),
            ));
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}
