//! Scripted tunnel master for engine tests
//!
//! Mirrors the observable behavior the engine relies on: created configs
//! show up in listings, statuses echo `0.0.0.0:{remote_port}` for tcp/udp
//! and `{subdomain}.example.com` for http, deletes unregister.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use ret2frp_master::{
    ClientInfo, MasterApi, MasterError, ProxyConfig, ProxyDetail, ProxyRef, ProxyState, ProxyType,
    Server, WorkingStatus,
};

#[derive(Default)]
pub struct MockState {
    pub proxies: Vec<ProxyRef>,
    pub details: HashMap<String, ProxyDetail>,
    pub deleted: Vec<ProxyRef>,
    pub create_calls: usize,
    /// When set, creates fail (and register nothing)
    pub fail_create: bool,
    /// Status reported for every proxy; defaults to "running"
    pub reported_status: Option<String>,
}

pub struct MockMaster {
    pub servers: Vec<Server>,
    pub state: Mutex<MockState>,
}

impl MockMaster {
    pub fn with_servers(ids: &[&str]) -> Self {
        Self {
            servers: ids.iter().map(|id| Server { id: id.to_string() }).collect(),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    pub fn deleted(&self) -> Vec<ProxyRef> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub fn set_reported_status(&self, status: &str) {
        self.state.lock().unwrap().reported_status = Some(status.to_string());
    }
}

#[async_trait]
impl MasterApi for MockMaster {
    async fn list_servers(&self, keyword: &str) -> Result<Vec<Server>, MasterError> {
        Ok(self
            .servers
            .iter()
            .filter(|s| s.id.contains(keyword))
            .cloned()
            .collect())
    }

    async fn list_clients(&self, _keyword: &str) -> Result<Vec<ClientInfo>, MasterError> {
        Ok(Vec::new())
    }

    async fn create_proxy_config(
        &self,
        client_id: &str,
        server_id: &str,
        config: &ProxyConfig,
        _overwrite: bool,
    ) -> Result<(), MasterError> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        if state.fail_create {
            return Err(MasterError::Api {
                code: 500,
                msg: "create failed".into(),
            });
        }
        for detail in &config.proxies {
            state.proxies.push(ProxyRef {
                client_id: client_id.to_string(),
                server_id: server_id.to_string(),
                name: detail.name.clone(),
            });
            state.details.insert(detail.name.clone(), detail.clone());
        }
        Ok(())
    }

    async fn list_proxy_configs(&self, keyword: &str) -> Result<Vec<ProxyRef>, MasterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .proxies
            .iter()
            .filter(|p| p.name.contains(keyword))
            .cloned()
            .collect())
    }

    async fn get_proxy_config(&self, proxy: &ProxyRef) -> Result<ProxyState, MasterError> {
        let state = self.state.lock().unwrap();
        let Some(detail) = state.details.get(&proxy.name) else {
            return Ok(ProxyState {
                working_status: None,
            });
        };
        let remote_addr = match detail.proxy_type {
            ProxyType::Http => format!(
                "{}.example.com",
                detail.subdomain.as_deref().unwrap_or("unknown")
            ),
            ProxyType::Tcp | ProxyType::Udp => {
                format!("0.0.0.0:{}", detail.remote_port.unwrap_or(0))
            }
        };
        Ok(ProxyState {
            working_status: Some(WorkingStatus {
                name: proxy.name.clone(),
                proxy_type: detail.proxy_type,
                status: state
                    .reported_status
                    .clone()
                    .unwrap_or_else(|| "running".to_string()),
                err: None,
                remote_addr,
            }),
        })
    }

    async fn delete_proxy_config(&self, proxy: &ProxyRef) -> Result<(), MasterError> {
        let mut state = self.state.lock().unwrap();
        state.deleted.push(proxy.clone());
        state.proxies.retain(|p| p.name != proxy.name);
        state.details.remove(&proxy.name);
        Ok(())
    }
}
