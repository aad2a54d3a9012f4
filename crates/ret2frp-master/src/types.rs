//! Engine-facing master types
//!
//! Everything here uses the controller's internal snake_case convention;
//! these are also the document shapes persisted in the KV index. The
//! lowerCamelCase translation happens only in the wire module.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Proxy flavor on the tunnel master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Http,
    Tcp,
    Udp,
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProxyType::Http => "http",
            ProxyType::Tcp => "tcp",
            ProxyType::Udp => "udp",
        })
    }
}

/// One tunnel rule inside a proxy configuration
///
/// `subdomain` is set exactly for http proxies, `remote_port` exactly for
/// tcp/udp proxies; the absent member is omitted from serialized documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyDetail {
    pub name: String,
    #[serde(rename = "type")]
    pub proxy_type: ProxyType,
    pub local_port: u16,
    pub local_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
}

/// The proxy set submitted to the master for one traffic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub proxies: Vec<ProxyDetail>,
}

/// Unique identity of a proxy on the master
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyRef {
    pub client_id: String,
    pub server_id: String,
    pub name: String,
}

/// A tunnel server registered on the master
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub id: String,
}

/// A tunnel client registered on the master
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: String,
}

/// Runtime status the master reports for a proxy
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingStatus {
    pub name: String,
    pub proxy_type: ProxyType,
    pub status: String,
    pub err: Option<String>,
    pub remote_addr: String,
}

impl WorkingStatus {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// One proxy configuration together with its runtime status
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyState {
    /// Absent while the master has not started (or has lost) the proxy
    pub working_status: Option<WorkingStatus>,
}
