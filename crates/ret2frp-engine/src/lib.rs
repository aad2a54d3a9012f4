//! Traffic lifecycle engine
//!
//! Turns caller-described services into proxy configurations on the tunnel
//! master: allocates remote ports without collision, creates or extends
//! idempotently, maintains the three coupled index tables in the shared KV
//! store, and runs the garbage-collection sweeps that converge those tables
//! after partial failures.

pub mod error;
mod keys;
pub mod manager;
pub mod ports;
pub mod reaper;
pub mod service;

#[cfg(test)]
pub(crate) mod testsupport;

pub use error::EngineError;
pub use manager::{AddrRecord, ConfRecord, DeleteOutcome, TrafficManager, TunnelServer};
pub use ports::PortAllocator;
pub use reaper::{sweep_dead_ports, sweep_dead_traffic, Reaper};
pub use service::{
    generate_subdomain, now_seconds, port_key, proxy_name, sanitize_node_name, ttl_until,
    AppProtocol, NormalizedPort, NormalizedService, Port, Protocol, Service, PROXY_NAME_PREFIX,
};
