//! Garbage-collection sweeps
//!
//! Two independent periodic sweeps repair index drift left behind by TTL
//! expiry, crashes, and best-effort master calls. `sweep_dead_traffic`
//! anchors the `working` ledger on `conf`: once `conf` is gone the master-
//! side proxies are torn down and the ledger entry removed.
//! `sweep_dead_ports` anchors reservations on `working` (not `conf`), so a
//! port stays reserved until its proxies have actually been deleted.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use ret2frp_cache::try_parse_json;
use ret2frp_master::ProxyRef;

use crate::error::EngineError;
use crate::keys;
use crate::manager::TrafficManager;

/// Pause between per-item critical sections, keeping the KV store breathing
const ITEM_PAUSE: Duration = Duration::from_millis(5);

/// Spawns and paces the two sweeps
pub struct Reaper {
    manager: Arc<TrafficManager>,
    interval: Duration,
}

impl Reaper {
    pub fn new(manager: Arc<TrafficManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Start both tickers. Each adjusts its next tick for the time a pass
    /// took; the second starts offset by half an interval so the two do not
    /// contend for the writer lock in step. The tasks run until process
    /// exit.
    pub fn spawn(self) -> (JoinHandle<()>, JoinHandle<()>) {
        let Reaper { manager, interval } = self;

        let traffic_sweep = tokio::spawn({
            let manager = manager.clone();
            async move {
                loop {
                    let started = Instant::now();
                    if let Err(err) = sweep_dead_traffic(&manager).await {
                        warn!(error = %err, "dead traffic sweep failed");
                    }
                    tokio::time::sleep(interval.saturating_sub(started.elapsed())).await;
                }
            }
        });

        let port_sweep = tokio::spawn(async move {
            tokio::time::sleep(interval / 2).await;
            loop {
                let started = Instant::now();
                if let Err(err) = sweep_dead_ports(&manager).await {
                    warn!(error = %err, "dead port sweep failed");
                }
                tokio::time::sleep(interval.saturating_sub(started.elapsed())).await;
            }
        });

        (traffic_sweep, port_sweep)
    }
}

/// One pass over `working:*`: any ledger entry whose `conf` has expired is
/// torn down on the master and removed, and unparseable entries are dropped
pub async fn sweep_dead_traffic(manager: &TrafficManager) -> Result<(), EngineError> {
    let working_keys = manager.cache().keys("working:*").await?;
    for key in working_keys {
        let Some(traffic_id) = key.strip_prefix("working:") else {
            continue;
        };
        {
            let _write = manager.write_lock().lock().await;
            if let Err(err) = reap_traffic(manager, traffic_id).await {
                warn!(traffic_id, error = %err, "failed to reap traffic");
            }
        }
        tokio::time::sleep(ITEM_PAUSE).await;
    }
    Ok(())
}

async fn reap_traffic(manager: &TrafficManager, traffic_id: &str) -> Result<(), EngineError> {
    let working_key = keys::working(traffic_id);
    let Some(raw) = manager.cache().get(&working_key).await? else {
        return Ok(()); // raced away since enumeration
    };

    match try_parse_json::<Vec<ProxyRef>>(&raw) {
        Some(proxies) => {
            if manager.cache().exists(keys::conf(traffic_id)).await? {
                return Ok(()); // still anchored
            }
            info!(traffic_id, proxies = proxies.len(), "reaping dead traffic");
            manager.cache().del(&working_key).await?;
            manager.cache().del(keys::conf(traffic_id)).await?;
            manager.cache().del(keys::addr(traffic_id)).await?;
            for proxy in &proxies {
                if let Err(err) = manager.master().delete_proxy_config(proxy).await {
                    warn!(traffic_id, proxy = %proxy.name, error = %err, "best-effort master delete failed");
                }
            }
        }
        None => {
            warn!(traffic_id, "working entry does not parse, dropping it");
            manager.cache().del(&working_key).await?;
            manager.cache().del(keys::conf(traffic_id)).await?;
            manager.cache().del(keys::addr(traffic_id)).await?;
        }
    }
    Ok(())
}

/// One pass over `port:*:*`: any reservation whose anchoring `working`
/// ledger is gone (or whose value is empty) is removed
pub async fn sweep_dead_ports(manager: &TrafficManager) -> Result<(), EngineError> {
    let port_keys = manager.cache().keys("port:*:*").await?;
    for key in port_keys {
        // a loose backend glob can hand back extra-segment matches
        let segments: Vec<&str> = key.split(':').collect();
        if segments.len() != 3 || segments[0] != "port" || segments[2].parse::<u16>().is_err() {
            continue;
        }
        {
            let _write = manager.write_lock().lock().await;
            if let Err(err) = reap_port(manager, &key).await {
                warn!(key, error = %err, "failed to reap port");
            }
        }
        tokio::time::sleep(ITEM_PAUSE).await;
    }
    Ok(())
}

async fn reap_port(manager: &TrafficManager, key: &str) -> Result<(), EngineError> {
    match manager.cache().get(key).await? {
        Some(traffic_id) if !traffic_id.is_empty() => {
            if !manager.cache().exists(keys::working(&traffic_id)).await? {
                info!(key, traffic_id = %traffic_id, "reaping orphaned port reservation");
                manager.cache().del(key).await?;
            }
        }
        _ => {
            // empty or vanished anchor: garbage either way
            manager.cache().del(key).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::TunnelServer;
    use crate::service::{now_seconds, AppProtocol, Port, Protocol, Service};
    use crate::testsupport::MockMaster;
    use ret2frp_cache::Cache;

    fn setup() -> (Arc<TrafficManager>, Arc<MockMaster>, Cache) {
        let cache = Cache::memory();
        let mock = Arc::new(MockMaster::with_servers(&["admin.s.node1"]));
        let manager = Arc::new(TrafficManager::new(
            cache.clone(),
            mock.clone(),
            "admin",
            vec![TunnelServer {
                node_name: "node1".into(),
                port_range: (10000, 10001),
                remote_addr: "1.2.3.4".into(),
            }],
        ));
        (manager, mock, cache)
    }

    fn proxy_ref(traffic: &str) -> ProxyRef {
        ProxyRef {
            client_id: "admin.c.node1".into(),
            server_id: "admin.s.node1".into(),
            name: format!("ret2shell:{traffic}:web:8080/http"),
        }
    }

    #[tokio::test]
    async fn dead_traffic_is_torn_down_on_the_master() {
        let (manager, mock, cache) = setup();

        // conf TTL elapsed; ledger and a leftover addr are still present
        let proxy = proxy_ref("T2");
        cache
            .set(
                "working:T2",
                &serde_json::to_string(&vec![proxy.clone()]).unwrap(),
                None,
            )
            .await
            .unwrap();
        cache.set("traffic:T2:addr", "{}", None).await.unwrap();

        sweep_dead_traffic(&manager).await.unwrap();

        assert!(!cache.exists("working:T2").await.unwrap());
        assert!(!cache.exists("traffic:T2:addr").await.unwrap());
        assert_eq!(mock.deleted(), vec![proxy]);
    }

    #[tokio::test]
    async fn anchored_traffic_is_left_alone() {
        let (manager, mock, cache) = setup();
        cache
            .set(
                "working:T3",
                &serde_json::to_string(&vec![proxy_ref("T3")]).unwrap(),
                None,
            )
            .await
            .unwrap();
        cache.set("traffic:T3:conf", "{}", None).await.unwrap();

        sweep_dead_traffic(&manager).await.unwrap();

        assert!(cache.exists("working:T3").await.unwrap());
        assert!(mock.deleted().is_empty());
    }

    #[tokio::test]
    async fn unparseable_ledger_entries_are_dropped() {
        let (manager, mock, cache) = setup();
        cache.set("working:T4", "not json", None).await.unwrap();
        cache.set("traffic:T4:conf", "{}", None).await.unwrap();

        sweep_dead_traffic(&manager).await.unwrap();

        assert!(!cache.exists("working:T4").await.unwrap());
        assert!(!cache.exists("traffic:T4:conf").await.unwrap());
        assert!(mock.deleted().is_empty());
    }

    #[tokio::test]
    async fn orphaned_port_reservations_are_reaped() {
        let (manager, _mock, cache) = setup();
        cache
            .set("port:admin.s.node1:10042", "T_ghost", None)
            .await
            .unwrap();
        cache
            .set("port:admin.s.node1:10043", "T_live", None)
            .await
            .unwrap();
        cache.set("working:T_live", "[]", None).await.unwrap();
        cache.set("port:admin.s.node1:10044", "", None).await.unwrap();

        sweep_dead_ports(&manager).await.unwrap();

        assert!(!cache.exists("port:admin.s.node1:10042").await.unwrap());
        assert!(cache.exists("port:admin.s.node1:10043").await.unwrap());
        assert!(!cache.exists("port:admin.s.node1:10044").await.unwrap());
    }

    #[tokio::test]
    async fn sweeps_converge_after_conf_expiry() {
        let (manager, mock, cache) = setup();

        let svc = Service {
            traffic: "T5".into(),
            created_at: now_seconds(),
            lifetime: 3600,
            ports: vec![Port {
                name: "ctrl".into(),
                node_port: 2222,
                service_type: None,
                protocol: Protocol::TCP,
                app_protocol: AppProtocol::Raw,
            }],
        };
        manager.update_traffic("node1", svc).await.unwrap();
        assert_eq!(cache.keys("port:*:*").await.unwrap().len(), 1);

        // simulate the conf/addr TTLs elapsing
        cache.del("traffic:T5:conf").await.unwrap();
        cache.del("traffic:T5:addr").await.unwrap();

        sweep_dead_traffic(&manager).await.unwrap();
        sweep_dead_ports(&manager).await.unwrap();

        assert!(cache.keys("working:*").await.unwrap().is_empty());
        assert!(cache.keys("port:*:*").await.unwrap().is_empty());
        assert_eq!(mock.deleted().len(), 1);
    }
}
