//! Configuration file loader with environment overrides.

use std::path::PathBuf;

use crate::config::types::BridgeConfig;

/// Environment variable overriding the bridge port.
pub const ENV_PORT: &str = "CLAUDE_WS_PORT";

/// Environment variable overriding the spawned executable.
pub const ENV_EXECUTABLE: &str = "CLAUDE_BIN";

/// Environment variable overriding the output log path.
pub const ENV_LOG_FILE: &str = "CLAUDE_LOG_FILE";

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file exists but could not be parsed.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        // 1. Current directory: .claude-bridge.toml
        search_paths.push(PathBuf::from(".claude-bridge.toml"));

        // 2. User config directory: ~/.config/claude-bridge/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("claude-bridge").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Create a config loader with a specific config file path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load configuration from the first available file, or defaults, then
    /// apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load(&self) -> Result<BridgeConfig, ConfigError> {
        let mut config = self.load_file()?;
        apply_env_overrides(&mut config);
        Ok(config)
    }

    fn load_file(&self) -> Result<BridgeConfig, ConfigError> {
        for path in &self.search_paths {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading config file");
                return Self::load_from_path(path);
            }
        }

        tracing::debug!("no config file found, using defaults");
        Ok(BridgeConfig::default())
    }

    fn load_from_path(path: &PathBuf) -> Result<BridgeConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            source: e,
        })
    }

    /// Get the search paths for debugging.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `CLAUDE_WS_PORT`, `CLAUDE_BIN` and `CLAUDE_LOG_FILE` on top of the
/// loaded configuration.
pub fn apply_env_overrides(config: &mut BridgeConfig) {
    if let Ok(port) = std::env::var(ENV_PORT) {
        match port.parse::<u16>() {
            Ok(port) => config.port = port,
            Err(_) => {
                tracing::warn!(value = %port, "ignoring invalid CLAUDE_WS_PORT");
            }
        }
    }
    if let Ok(executable) = std::env::var(ENV_EXECUTABLE) {
        if !executable.is_empty() {
            config.executable = PathBuf::from(executable);
        }
    }
    if let Ok(log_file) = std::env::var(ENV_LOG_FILE) {
        if !log_file.is_empty() {
            config.log_file = PathBuf::from(log_file);
        }
    }
}
