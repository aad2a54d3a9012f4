//! Tunnel master API surface
//!
//! The master is an frp-panel-style control plane: JSON over HTTP with
//! bearer auth and lowerCamelCase wire fields. This crate exposes the
//! engine-facing [`MasterApi`] trait (snake_case types, see [`types`]), the
//! production [`MasterClient`] with token refresh, and keeps the wire-format
//! translation confined to one boundary module.

mod client;
pub mod types;
mod wire;

pub use client::{MasterClient, MasterError, TOKEN_TTL_SECONDS};
pub use types::{ClientInfo, ProxyConfig, ProxyDetail, ProxyRef, ProxyState, ProxyType, Server, WorkingStatus};

use async_trait::async_trait;

/// Operations the traffic engine needs from the tunnel master
///
/// All teardown-path calls are treated as best-effort by callers; this trait
/// only reports errors, it never retries.
#[async_trait]
pub trait MasterApi: Send + Sync {
    /// List tunnel servers whose id matches `keyword`
    async fn list_servers(&self, keyword: &str) -> Result<Vec<Server>, MasterError>;

    /// List tunnel clients whose id matches `keyword`.
    /// Not consumed by the engine today; kept for parity with the master API.
    async fn list_clients(&self, keyword: &str) -> Result<Vec<ClientInfo>, MasterError>;

    /// Create (or, with `overwrite`, replace) a proxy configuration
    async fn create_proxy_config(
        &self,
        client_id: &str,
        server_id: &str,
        config: &ProxyConfig,
        overwrite: bool,
    ) -> Result<(), MasterError>;

    /// List proxy configurations whose name matches `keyword`
    async fn list_proxy_configs(&self, keyword: &str) -> Result<Vec<ProxyRef>, MasterError>;

    /// Fetch one proxy configuration together with its runtime status
    async fn get_proxy_config(&self, proxy: &ProxyRef) -> Result<ProxyState, MasterError>;

    /// Delete one proxy configuration
    async fn delete_proxy_config(&self, proxy: &ProxyRef) -> Result<(), MasterError>;
}
