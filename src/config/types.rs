//! Configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::classify::Mode;

/// Default port for the bridge endpoint.
pub const DEFAULT_PORT: u16 = 9234;

/// Default executable to spawn when no override is configured.
pub const DEFAULT_EXECUTABLE: &str = "claude";

/// Default interval between output-log polls, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_executable() -> PathBuf {
    PathBuf::from(DEFAULT_EXECUTABLE)
}

fn default_log_file() -> PathBuf {
    dirs::data_local_dir()
        .map_or_else(std::env::temp_dir, |dir| dir.join("claude-bridge"))
        .join("output.log")
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Configuration for the bridge.
///
/// Resolved once at process start from the config file, environment and
/// CLI flags; never hot-reloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Port for the bridge endpoint.
    pub port: u16,
    /// Host address to bind to.
    pub host: String,
    /// Executable spawned when a `start` command carries none.
    pub executable: PathBuf,
    /// Path of the durable output log.
    pub log_file: PathBuf,
    /// Interval between output-log polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Permission mode used when a `start` command carries none.
    pub mode: Mode,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            executable: default_executable(),
            log_file: default_log_file(),
            poll_interval_ms: default_poll_interval_ms(),
            mode: Mode::Normal,
        }
    }
}

impl BridgeConfig {
    /// The `host:port` address of the bridge endpoint.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
