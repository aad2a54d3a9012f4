//! Service input model, normalization, and proxy naming
//!
//! A *service* is the caller's description of one traffic: an opaque id, a
//! deadline (`created_at + lifetime`, unix seconds), and a set of named
//! ports. Normalization collapses the two protocol fields into one concrete
//! proxy type per port; everything downstream works on normalized services
//! only.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use ret2frp_master::ProxyType;

/// Prefix of every proxy name this controller owns on the master
pub const PROXY_NAME_PREFIX: &str = "ret2shell";

/// Transport protocol on the workload side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    TCP,
    UDP,
    STCP,
}

/// Application-level protocol of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppProtocol {
    Raw,
    Http,
}

/// One port of a service, as submitted by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Port {
    pub name: String,
    pub node_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ProxyType>,
    pub protocol: Protocol,
    pub app_protocol: AppProtocol,
}

/// A caller-submitted service description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Service {
    /// Opaque traffic id this service belongs to
    pub traffic: String,
    /// Unix seconds
    pub created_at: i64,
    /// Seconds of validity from `created_at`
    pub lifetime: i64,
    pub ports: Vec<Port>,
}

/// A port after normalization: exactly one concrete proxy type
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPort {
    pub name: String,
    pub node_port: u16,
    pub service_type: ProxyType,
}

/// A service after normalization
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedService {
    pub traffic: String,
    pub created_at: i64,
    pub lifetime: i64,
    pub ports: Vec<NormalizedPort>,
}

impl Service {
    /// Collapse `app_protocol`/`protocol` into one proxy type per port.
    /// `app_protocol = http` dominates; otherwise UDP maps to udp and
    /// everything else to tcp.
    pub fn normalize(self) -> NormalizedService {
        let ports = self
            .ports
            .into_iter()
            .map(|port| {
                let service_type = if port.app_protocol == AppProtocol::Http {
                    ProxyType::Http
                } else if port.protocol == Protocol::UDP {
                    ProxyType::Udp
                } else {
                    ProxyType::Tcp
                };
                NormalizedPort {
                    name: port.name,
                    node_port: port.node_port,
                    service_type,
                }
            })
            .collect();

        NormalizedService {
            traffic: self.traffic,
            created_at: self.created_at,
            lifetime: self.lifetime,
            ports,
        }
    }
}

impl NormalizedService {
    /// Deadline in unix seconds
    pub fn expire_at(&self) -> i64 {
        self.created_at + self.lifetime
    }
}

/// Current unix time in seconds
pub fn now_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Remaining TTL for a deadline, clamped at zero. Recomputed at the instant
/// of every write.
pub fn ttl_until(expire_at: i64) -> i64 {
    (expire_at - now_seconds()).max(0)
}

/// Full proxy name: `ret2shell:{traffic}:{port_name}:{node_port}/{type}`
pub fn proxy_name(traffic: &str, port: &NormalizedPort) -> String {
    format!(
        "{PROXY_NAME_PREFIX}:{traffic}:{}:{}/{}",
        port.name, port.node_port, port.service_type
    )
}

/// The last two colon segments of a proxy name, `{name}:{node_port}/{type}`.
/// Taken from the tail so the name prefix may itself contain colons.
pub fn port_key(proxy_name: &str) -> String {
    let mut tail: Vec<&str> = proxy_name.rsplitn(3, ':').take(2).collect();
    tail.reverse();
    tail.join(":")
}

/// Lowercase the node name and squash anything outside `[a-z0-9-]`
pub fn sanitize_node_name(node_name: &str) -> String {
    let squashed: String = node_name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    squashed.trim_matches('-').to_string()
}

const SUBDOMAIN_ID_LEN: usize = 21;
const SUBDOMAIN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Subdomain for an http proxy: sanitized node name plus a random
/// 21-character lowercase-alphanumeric id
pub fn generate_subdomain(node_name: &str) -> String {
    let mut rng = rand::thread_rng();
    let id: String = (0..SUBDOMAIN_ID_LEN)
        .map(|_| SUBDOMAIN_ALPHABET[rng.gen_range(0..SUBDOMAIN_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", sanitize_node_name(node_name), id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(protocol: Protocol, app_protocol: AppProtocol) -> Port {
        Port {
            name: "p".into(),
            node_port: 1000,
            service_type: None,
            protocol,
            app_protocol,
        }
    }

    fn normalize_one(p: Port) -> ProxyType {
        let service = Service {
            traffic: "T".into(),
            created_at: 0,
            lifetime: 0,
            ports: vec![p],
        };
        service.normalize().ports[0].service_type
    }

    #[test]
    fn normalization_is_total_and_http_dominates() {
        assert_eq!(
            normalize_one(port(Protocol::TCP, AppProtocol::Http)),
            ProxyType::Http
        );
        assert_eq!(
            normalize_one(port(Protocol::UDP, AppProtocol::Http)),
            ProxyType::Http
        );
        assert_eq!(
            normalize_one(port(Protocol::UDP, AppProtocol::Raw)),
            ProxyType::Udp
        );
        assert_eq!(
            normalize_one(port(Protocol::TCP, AppProtocol::Raw)),
            ProxyType::Tcp
        );
        assert_eq!(
            normalize_one(port(Protocol::STCP, AppProtocol::Raw)),
            ProxyType::Tcp
        );
    }

    #[test]
    fn proxy_names_round_trip_through_port_key() {
        let normalized = NormalizedPort {
            name: "web".into(),
            node_port: 8080,
            service_type: ProxyType::Http,
        };
        let name = proxy_name("T1", &normalized);
        assert_eq!(name, "ret2shell:T1:web:8080/http");
        assert_eq!(port_key(&name), "web:8080/http");
    }

    #[test]
    fn port_key_ignores_colons_in_the_prefix() {
        assert_eq!(
            port_key("pre:fix:with:colons:ctrl:2222/tcp"),
            "ctrl:2222/tcp"
        );
        assert_eq!(port_key("ab:cd"), "ab:cd");
        assert_eq!(port_key("solo"), "solo");
    }

    #[test]
    fn service_schema_is_strict() {
        let raw = r#"{
            "traffic": "T1",
            "created_at": 1700000000,
            "lifetime": 3600,
            "ports": [{
                "name": "web",
                "node_port": 8080,
                "protocol": "TCP",
                "app_protocol": "http"
            }]
        }"#;
        let service: Service = serde_json::from_str(raw).unwrap();
        assert_eq!(service.ports[0].app_protocol, AppProtocol::Http);

        let unknown_field = raw.replace("\"lifetime\"", "\"bogus\": 1, \"lifetime\"");
        assert!(serde_json::from_str::<Service>(&unknown_field).is_err());

        let bad_protocol = raw.replace("\"TCP\"", "\"tcp\"");
        assert!(serde_json::from_str::<Service>(&bad_protocol).is_err());
    }

    #[test]
    fn sanitization_squashes_to_dns_safe_names() {
        assert_eq!(sanitize_node_name("node1"), "node1");
        assert_eq!(sanitize_node_name("Node_1.prod"), "node-1-prod");
        assert_eq!(sanitize_node_name("--edgy--"), "edgy");
    }

    #[test]
    fn subdomains_carry_a_21_char_lowercase_id() {
        let subdomain = generate_subdomain("Node_1");
        let (prefix, id) = subdomain.rsplit_once('-').unwrap();
        assert!(prefix.starts_with("node-1"));
        assert_eq!(id.len(), 21);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn ttl_clamps_at_zero() {
        let now = now_seconds();
        assert_eq!(ttl_until(now - 100), 0);
        let ttl = ttl_until(now + 3600);
        assert!((3599..=3600).contains(&ttl));
    }
}
