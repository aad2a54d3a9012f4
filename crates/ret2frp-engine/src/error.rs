//! Engine error taxonomy

use thiserror::Error;

use ret2frp_cache::CacheError;
use ret2frp_master::MasterError;

/// Errors surfaced by traffic operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// No tunnel server matches the master-user prefix and the local
    /// configuration
    #[error("no tunnel server is available for this controller")]
    NoServer,

    /// The allocator could not find enough free remote ports
    #[error("tunnel server {server_id} has fewer than {wanted} free ports in [{lo}, {hi}]")]
    PortsExhausted {
        server_id: String,
        wanted: usize,
        lo: u16,
        hi: u16,
    },

    /// The master listed no proxies right after a create
    #[error("no proxies were provisioned for traffic {traffic}")]
    ProvisioningEmpty { traffic: String },

    /// The readiness poll was exhausted before every proxy was running
    #[error("proxies for traffic {traffic} did not become ready in time")]
    NotReady { traffic: String },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Master(#[from] MasterError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
