//! Configuration loading
//!
//! Resolution priority for every setting:
//! 1. Environment variable (highest)
//! 2. TOML config file (`CHORDWISE_CONFIG` or `./chordwise.toml`)
//! 3. Compiled default

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the HTTP/WebSocket server
    pub bind_addr: String,
    /// SQLite database path; `:memory:` for ephemeral runs
    pub database_path: String,
    /// Shared secret for credential signature verification
    pub shared_secret: i64,
    /// Job monitor poll interval in milliseconds
    pub monitor_poll_interval_ms: u64,
    /// Upper bound on the handshake credential check
    pub handshake_timeout_ms: u64,
    /// External analyzer binary consulted by the derivation pipeline
    pub analyzer_binary: String,
    /// Media fetch timeout in seconds
    pub media_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5740".to_string(),
            database_path: "chordwise.db".to_string(),
            shared_secret: 0,
            monitor_poll_interval_ms: 1000,
            handshake_timeout_ms: 3000,
            analyzer_binary: "chordwise-analyzer".to_string(),
            media_timeout_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Load configuration following the documented priority order
    pub fn load() -> Result<Self> {
        let path = std::env::var("CHORDWISE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("chordwise.toml"));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("CHORDWISE_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(path) = std::env::var("CHORDWISE_DATABASE_PATH") {
            self.database_path = path;
        }
        if let Ok(secret) = std::env::var("CHORDWISE_SHARED_SECRET") {
            if let Ok(value) = secret.parse() {
                self.shared_secret = value;
            }
        }
        if let Ok(interval) = std::env::var("CHORDWISE_MONITOR_POLL_INTERVAL_MS") {
            if let Ok(value) = interval.parse() {
                self.monitor_poll_interval_ms = value;
            }
        }
    }
}
