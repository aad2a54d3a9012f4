//! Configuration loader for the ret2frp controller
//!
//! Settings come from a single TOML file: the controller's own HTTP surface
//! (`[app]`), the shared KV store (`[cache]`), the tunnel master credentials
//! (`[master]`), and one `[[server]]` block per tunnel server this controller
//! is allowed to place traffic on.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Controller-level settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    /// Bearer token expected on every `/v1` request
    pub auth_token: String,

    /// Bind address for the HTTP API
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Interval between garbage-collection sweeps, in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

/// Shared KV store settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheSettings {
    /// KV store endpoint (e.g. `redis://127.0.0.1:6379/0`).
    /// Empty means an in-process store.
    #[serde(default)]
    pub url: String,
}

/// Tunnel master credentials
#[derive(Debug, Clone, Deserialize)]
pub struct MasterSettings {
    /// Base URL of the master's HTTP API (e.g. `https://panel.example.com/api`)
    pub api_base: String,

    /// Master account username. Client and server identities on the master
    /// are prefixed with this name.
    pub username: String,

    /// Master account password
    pub password: String,
}

/// One tunnel server this controller may place traffic on
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Node name; the master-side server id is `{username}.s.{node_name}`
    pub node_name: String,

    /// Inclusive remote port range available on this server
    pub port_range: [u16; 2],

    /// Public address (host or ip) callers use to reach allocated ports
    pub remote_addr: String,
}

/// Complete controller settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub app: AppSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    pub master: MasterSettings,

    #[serde(default, rename = "server")]
    pub servers: Vec<ServerSettings>,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_cleanup_interval() -> u64 {
    60
}

impl Settings {
    /// Load and validate settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse and validate settings from TOML text
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.app.auth_token.is_empty() {
            return Err(ConfigError::Invalid("app.auth_token must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for server in &self.servers {
            let [lo, hi] = server.port_range;
            if lo > hi {
                return Err(ConfigError::Invalid(format!(
                    "server '{}' has inverted port_range [{}, {}]",
                    server.node_name, lo, hi
                )));
            }
            if !seen.insert(server.node_name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate server node_name '{}'",
                    server.node_name
                )));
            }
        }

        Ok(())
    }
}
