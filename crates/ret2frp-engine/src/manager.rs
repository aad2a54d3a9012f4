//! Traffic lifecycle management
//!
//! The manager owns all write concurrency discipline. Every state-mutating
//! operation runs under `mutex_cache_w`; the create path additionally takes
//! `mutex_port` around port allocation, the master-side create, and the
//! reservation writes. Lock order is fixed (`mutex_cache_w` first), so the
//! pair cannot deadlock.

use futures::future::{join_all, BoxFuture};
use rand::seq::SliceRandom;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use ret2frp_cache::{try_parse_json, Cache, Key};
use ret2frp_master::{MasterApi, ProxyConfig, ProxyDetail, ProxyRef, ProxyType, WorkingStatus};

use crate::error::EngineError;
use crate::keys;
use crate::ports::PortAllocator;
use crate::service::{
    generate_subdomain, proxy_name, port_key, ttl_until, NormalizedService, Service,
    PROXY_NAME_PREFIX,
};

/// Local IP the tunnel client forwards to; workload ports are bound on the
/// node's loopback
const LOCAL_IP: &str = "127.0.0.1";

const READINESS_ATTEMPTS: u32 = 5;
const READINESS_BACKOFF: Duration = Duration::from_millis(500);

/// A tunnel server this controller may place traffic on, from local
/// configuration
#[derive(Debug, Clone)]
pub struct TunnelServer {
    pub node_name: String,
    pub port_range: (u16, u16),
    pub remote_addr: String,
}

/// `traffic:{id}:conf` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfRecord {
    pub client_id: String,
    pub server_id: String,
    pub config: ProxyConfig,
}

/// `traffic:{id}:addr` document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddrRecord {
    pub remote_ports: Vec<u16>,
    pub remote_addr: BTreeMap<String, String>,
}

/// Answer to a delete request; `remote_addr` is the last known address map
#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub traffic_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<BTreeMap<String, String>>,
}

/// A server chosen for placement: master-side id plus local configuration
#[derive(Debug, Clone)]
struct PlacedServer {
    id: String,
    port_range: (u16, u16),
    remote_addr: String,
}

/// Coordinates the tunnel master, the port allocator, and the KV index
pub struct TrafficManager {
    cache: Cache,
    master: Arc<dyn MasterApi>,
    master_user: String,
    servers: Vec<TunnelServer>,
    allocator: PortAllocator,
    mutex_cache_w: Mutex<()>,
    mutex_port: Mutex<()>,
}

impl TrafficManager {
    pub fn new(
        cache: Cache,
        master: Arc<dyn MasterApi>,
        master_user: impl Into<String>,
        servers: Vec<TunnelServer>,
    ) -> Self {
        Self {
            allocator: PortAllocator::new(cache.clone()),
            cache,
            master,
            master_user: master_user.into(),
            servers,
            mutex_cache_w: Mutex::new(()),
            mutex_port: Mutex::new(()),
        }
    }

    pub(crate) fn cache(&self) -> &Cache {
        &self.cache
    }

    pub(crate) fn master(&self) -> &dyn MasterApi {
        self.master.as_ref()
    }

    /// The writer lock serializing all state-mutating operations
    pub(crate) fn write_lock(&self) -> &Mutex<()> {
        &self.mutex_cache_w
    }

    fn client_id(&self, node_name: &str) -> String {
        format!("{}.c.{}", self.master_user, node_name)
    }

    /// Create the traffic's proxies, or extend its lifetime if it already
    /// exists. Returns the public address per port key.
    pub async fn update_traffic(
        &self,
        node_name: &str,
        service: Service,
    ) -> Result<BTreeMap<String, String>, EngineError> {
        let _write = self.mutex_cache_w.lock().await;
        let service = service.normalize();

        let conf_key = keys::conf(&service.traffic);
        let addr_key = keys::addr(&service.traffic);
        let conf: Option<ConfRecord> = self.read_json(&conf_key).await?;
        let addr: Option<AddrRecord> = self.read_json(&addr_key).await?;

        if let (Some(_), Some(addr)) = (conf, addr) {
            // extend: refresh both TTLs, no master involvement
            let ttl = ttl_until(service.expire_at());
            self.cache.expire(&conf_key, ttl).await?;
            self.cache.expire(&addr_key, ttl).await?;
            debug!(traffic = %service.traffic, ttl, "extended existing traffic");
            return Ok(addr.remote_addr);
        }

        self.provision(node_name, &service).await
    }

    /// Create path: place the traffic on a tunnel server, register its
    /// proxies on the master, and record all three index tables
    async fn provision(
        &self,
        node_name: &str,
        service: &NormalizedService,
    ) -> Result<BTreeMap<String, String>, EngineError> {
        let traffic = service.traffic.as_str();

        if ttl_until(service.expire_at()) <= 0 {
            // late arrival: every TTL write would collapse to a delete
            info!(traffic, "service is already past its deadline, not provisioning");
            return Ok(BTreeMap::new());
        }

        let server = self.pick_server().await?;
        let client_id = self.client_id(node_name);
        debug!(traffic, server_id = %server.id, %client_id, "placing traffic");

        let details = {
            let _ports = self.mutex_port.lock().await;

            let details = self.build_proxy_details(node_name, service, &server).await?;
            let config = ProxyConfig {
                proxies: details.clone(),
            };
            if let Err(err) = self
                .master
                .create_proxy_config(&client_id, &server.id, &config, false)
                .await
            {
                // a later update or the reaper reconciles whatever landed
                warn!(traffic, error = %err, "create_proxy_config failed");
            }

            for port in details.iter().filter_map(|d| d.remote_port) {
                self.cache
                    .set(keys::port(&server.id, port), traffic, None)
                    .await?;
            }
            details
        };

        let name_prefix = format!("{PROXY_NAME_PREFIX}:{traffic}:");
        let proxies = self.master.list_proxy_configs(&name_prefix).await?;
        if proxies.is_empty() {
            return Err(EngineError::ProvisioningEmpty {
                traffic: traffic.to_string(),
            });
        }

        self.cache
            .set(keys::working(traffic), &serde_json::to_string(&proxies)?, None)
            .await?;

        let conf = ConfRecord {
            client_id,
            server_id: server.id.clone(),
            config: ProxyConfig {
                proxies: details.clone(),
            },
        };
        self.cache
            .set(
                keys::conf(traffic),
                &serde_json::to_string(&conf)?,
                Some(ttl_until(service.expire_at())),
            )
            .await?;

        let Some(statuses) = self.await_running(&proxies).await else {
            warn!(traffic, "proxies did not become ready, rolling back");
            let _ = self.delete_traffic_locked(traffic).await;
            return Err(EngineError::NotReady {
                traffic: traffic.to_string(),
            });
        };

        let mut remote_addr = BTreeMap::new();
        for status in &statuses {
            let value = match status.proxy_type {
                ProxyType::Http => status.remote_addr.clone(),
                ProxyType::Tcp | ProxyType::Udp => format!(
                    "{}:{}",
                    server.remote_addr,
                    status.remote_addr.rsplit(':').next().unwrap_or_default()
                ),
            };
            remote_addr.insert(port_key(&status.name), value);
        }

        let record = AddrRecord {
            remote_ports: details.iter().filter_map(|d| d.remote_port).collect(),
            remote_addr: remote_addr.clone(),
        };
        self.cache
            .set(
                keys::addr(traffic),
                &serde_json::to_string(&record)?,
                Some(ttl_until(service.expire_at())),
            )
            .await?;

        info!(
            traffic,
            server_id = %server.id,
            proxies = statuses.len(),
            remote_ports = record.remote_ports.len(),
            "provisioned traffic"
        );
        Ok(remote_addr)
    }

    /// Tear the traffic down. The `working` ledger is left in place on
    /// purpose: the dead-traffic sweep removes it only after confirming the
    /// master-side proxies are being deleted, so a crash in here still
    /// converges.
    pub async fn delete_traffic(&self, traffic_id: &str) -> Result<DeleteOutcome, EngineError> {
        let _write = self.mutex_cache_w.lock().await;
        self.delete_traffic_locked(traffic_id).await
    }

    /// Body of [`Self::delete_traffic`]; the caller must hold
    /// `mutex_cache_w`
    pub(crate) async fn delete_traffic_locked(
        &self,
        traffic_id: &str,
    ) -> Result<DeleteOutcome, EngineError> {
        let working: Option<Vec<ProxyRef>> = self.read_json(&keys::working(traffic_id)).await?;
        let conf: Option<ConfRecord> = self.read_json(&keys::conf(traffic_id)).await?;
        let addr: Option<AddrRecord> = self.read_json(&keys::addr(traffic_id)).await?;

        let outcome = DeleteOutcome {
            traffic_id: traffic_id.to_string(),
            remote_addr: addr.as_ref().map(|a| a.remote_addr.clone()),
        };

        let mut teardown: Vec<BoxFuture<'_, ()>> = Vec::new();
        teardown.push(Box::pin(self.best_effort_del(keys::conf(traffic_id))));
        teardown.push(Box::pin(self.best_effort_del(keys::addr(traffic_id))));

        if let (Some(conf), Some(addr)) = (&conf, &addr) {
            for &port in &addr.remote_ports {
                teardown.push(Box::pin(
                    self.best_effort_del(keys::port(&conf.server_id, port)),
                ));
            }
        }
        if let Some(working) = &working {
            for proxy in working.clone() {
                teardown.push(Box::pin(async move {
                    if let Err(err) = self.master.delete_proxy_config(&proxy).await {
                        warn!(proxy = %proxy.name, error = %err, "best-effort master delete failed");
                    }
                }));
            }
        }

        join_all(teardown).await;
        info!(traffic_id, "deleted traffic");
        Ok(outcome)
    }

    async fn best_effort_del(&self, key: Key) {
        if let Err(err) = self.cache.del(&key).await {
            warn!(key = %key, error = %err, "best-effort delete failed");
        }
    }

    /// Tunnel servers matching `{master_user}.s.` on the master and present
    /// in the local configuration; one is picked uniformly at random
    async fn pick_server(&self) -> Result<PlacedServer, EngineError> {
        let listed = self
            .master
            .list_servers(&format!("{}.s", self.master_user))
            .await?;

        let prefix = format!("{}.s.", self.master_user);
        let candidates: Vec<PlacedServer> = listed
            .into_iter()
            .filter_map(|server| {
                let node_name = server.id.strip_prefix(&prefix)?;
                let local = self.servers.iter().find(|s| s.node_name == node_name)?;
                Some(PlacedServer {
                    id: server.id.clone(),
                    port_range: local.port_range,
                    remote_addr: local.remote_addr.clone(),
                })
            })
            .collect();

        candidates
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(EngineError::NoServer)
    }

    /// One proxy detail per normalized port; remote ports come from a single
    /// allocator call covering every non-http port
    async fn build_proxy_details(
        &self,
        node_name: &str,
        service: &NormalizedService,
        server: &PlacedServer,
    ) -> Result<Vec<ProxyDetail>, EngineError> {
        let wanted = service
            .ports
            .iter()
            .filter(|p| p.service_type != ProxyType::Http)
            .count();
        let mut remote_ports = self
            .allocator
            .allocate(&server.id, server.port_range, wanted)
            .await?
            .into_iter();

        Ok(service
            .ports
            .iter()
            .map(|port| {
                let name = proxy_name(&service.traffic, port);
                match port.service_type {
                    ProxyType::Http => ProxyDetail {
                        name,
                        proxy_type: ProxyType::Http,
                        local_port: port.node_port,
                        local_ip: LOCAL_IP.to_string(),
                        subdomain: Some(generate_subdomain(node_name)),
                        remote_port: None,
                    },
                    proxy_type => ProxyDetail {
                        name,
                        proxy_type,
                        local_port: port.node_port,
                        local_ip: LOCAL_IP.to_string(),
                        subdomain: None,
                        remote_port: remote_ports.next(),
                    },
                }
            })
            .collect())
    }

    /// Poll until every proxy reports `running`. Each attempt issues the N
    /// status RPCs concurrently and joins them; a transport error counts as
    /// not-ready. Returns the final statuses, or `None` on exhaustion.
    async fn await_running(&self, proxies: &[ProxyRef]) -> Option<Vec<WorkingStatus>> {
        for attempt in 1..=READINESS_ATTEMPTS {
            let polls = join_all(proxies.iter().map(|p| self.master.get_proxy_config(p))).await;

            let mut statuses = Vec::with_capacity(polls.len());
            for poll in polls {
                match poll {
                    Ok(state) => match state.working_status {
                        Some(status) if status.is_running() => statuses.push(status),
                        other => {
                            debug!(attempt, status = ?other.map(|s| s.status), "proxy not running yet");
                            statuses.clear();
                            break;
                        }
                    },
                    Err(err) => {
                        debug!(attempt, error = %err, "readiness poll failed");
                        statuses.clear();
                        break;
                    }
                }
            }

            if statuses.len() == proxies.len() {
                return Some(statuses);
            }
            if attempt < READINESS_ATTEMPTS {
                tokio::time::sleep(READINESS_BACKOFF).await;
            }
        }
        None
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &Key) -> Result<Option<T>, EngineError> {
        Ok(self
            .cache
            .get(key)
            .await?
            .as_deref()
            .and_then(try_parse_json))
    }
}
