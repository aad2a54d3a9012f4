//! Wire-format shims for the master API
//!
//! The master speaks lowerCamelCase; the controller speaks snake_case. The
//! conversion lives here and nowhere else. The `config` member of a create
//! request is base64(JSON(config)) even though the envelope is itself JSON;
//! that nesting is part of the master's contract and must be preserved.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::types::{
    ClientInfo, ProxyConfig, ProxyDetail, ProxyRef, ProxyState, Server, WorkingStatus,
};
use crate::MasterError;

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageRequest<'a> {
    pub page: u64,
    pub page_size: u64,
    pub keyword: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ServerListResponse {
    pub total: u64,
    pub servers: Vec<WireServer>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct WireServer {
    pub id: String,
}

impl From<WireServer> for Server {
    fn from(wire: WireServer) -> Self {
        Server { id: wire.id }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ClientListResponse {
    pub total: u64,
    pub clients: Vec<WireClient>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct WireClient {
    pub id: String,
}

impl From<WireClient> for ClientInfo {
    fn from(wire: WireClient) -> Self {
        ClientInfo { id: wire.id }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateProxyRequest<'a> {
    pub client_id: &'a str,
    pub server_id: &'a str,
    /// base64(JSON({proxies: [...]})) with lowerCamelCase proxy keys
    pub config: String,
    pub overwrite: bool,
}

impl<'a> CreateProxyRequest<'a> {
    pub fn new(
        client_id: &'a str,
        server_id: &'a str,
        config: &ProxyConfig,
        overwrite: bool,
    ) -> Result<Self, MasterError> {
        let wire = WireProxyConfig {
            proxies: config.proxies.iter().map(WireProxyDetail::from).collect(),
        };
        let payload = serde_json::to_vec(&wire)?;
        Ok(Self {
            client_id,
            server_id,
            config: BASE64.encode(payload),
            overwrite,
        })
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct WireProxyConfig {
    pub proxies: Vec<WireProxyDetail>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireProxyDetail {
    pub name: String,
    #[serde(rename = "type")]
    pub proxy_type: String,
    pub local_port: u16,
    pub local_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
}

impl From<&ProxyDetail> for WireProxyDetail {
    fn from(detail: &ProxyDetail) -> Self {
        Self {
            name: detail.name.clone(),
            proxy_type: detail.proxy_type.to_string(),
            local_port: detail.local_port,
            local_ip: detail.local_ip.clone(),
            subdomain: detail.subdomain.clone(),
            remote_port: detail.remote_port,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ProxyListResponse {
    pub total: u64,
    pub proxy_configs: Vec<WireProxySummary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct WireProxySummary {
    pub client_id: String,
    pub server_id: String,
    pub name: String,
}

impl From<WireProxySummary> for ProxyRef {
    fn from(wire: WireProxySummary) -> Self {
        ProxyRef {
            client_id: wire.client_id,
            server_id: wire.server_id,
            name: wire.name,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProxyRefRequest<'a> {
    pub client_id: &'a str,
    pub server_id: &'a str,
    pub name: &'a str,
}

impl<'a> From<&'a ProxyRef> for ProxyRefRequest<'a> {
    fn from(proxy: &'a ProxyRef) -> Self {
        Self {
            client_id: &proxy.client_id,
            server_id: &proxy.server_id,
            name: &proxy.name,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct GetProxyResponse {
    #[allow(dead_code)]
    pub proxy_config: Option<serde_json::Value>,
    pub working_status: Option<WireWorkingStatus>,
}

impl From<GetProxyResponse> for ProxyState {
    fn from(wire: GetProxyResponse) -> Self {
        ProxyState {
            working_status: wire.working_status.map(WorkingStatus::from),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireWorkingStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub proxy_type: crate::types::ProxyType,
    pub status: String,
    #[serde(default)]
    pub err: Option<String>,
    #[serde(default)]
    pub remote_addr: String,
}

impl From<WireWorkingStatus> for WorkingStatus {
    fn from(wire: WireWorkingStatus) -> Self {
        WorkingStatus {
            name: wire.name,
            proxy_type: wire.proxy_type,
            status: wire.status,
            err: wire.err,
            remote_addr: wire.remote_addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProxyType;

    #[test]
    fn create_request_wraps_config_in_base64_json() {
        let config = ProxyConfig {
            proxies: vec![
                ProxyDetail {
                    name: "ret2shell:T1:web:8080/http".into(),
                    proxy_type: ProxyType::Http,
                    local_port: 8080,
                    local_ip: "127.0.0.1".into(),
                    subdomain: Some("node1-x".into()),
                    remote_port: None,
                },
                ProxyDetail {
                    name: "ret2shell:T1:ctrl:2222/tcp".into(),
                    proxy_type: ProxyType::Tcp,
                    local_port: 2222,
                    local_ip: "127.0.0.1".into(),
                    subdomain: None,
                    remote_port: Some(10000),
                },
            ],
        };

        let request = CreateProxyRequest::new("u.c.node1", "u.s.node1", &config, false).unwrap();
        let envelope = serde_json::to_value(&request).unwrap();
        assert_eq!(envelope["clientId"], "u.c.node1");
        assert_eq!(envelope["serverId"], "u.s.node1");
        assert_eq!(envelope["overwrite"], false);

        // the config member is base64(JSON(...)), not inline JSON
        let decoded = BASE64
            .decode(envelope["config"].as_str().unwrap())
            .unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        let proxies = payload["proxies"].as_array().unwrap();
        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies[0]["type"], "http");
        assert_eq!(proxies[0]["localPort"], 8080);
        assert_eq!(proxies[0]["localIp"], "127.0.0.1");
        assert_eq!(proxies[0]["subdomain"], "node1-x");
        assert!(proxies[0].get("remotePort").is_none());
        assert_eq!(proxies[1]["remotePort"], 10000);
        assert!(proxies[1].get("subdomain").is_none());
    }

    #[test]
    fn working_status_translates_to_snake_case() {
        let raw = r#"{
            "proxyConfig": {"name": "p"},
            "workingStatus": {
                "name": "ret2shell:T1:web:8080/http",
                "type": "http",
                "status": "running",
                "remoteAddr": "node1-x.example.com"
            }
        }"#;
        let response: GetProxyResponse = serde_json::from_str(raw).unwrap();
        let state = ProxyState::from(response);
        let status = state.working_status.unwrap();
        assert!(status.is_running());
        assert_eq!(status.proxy_type, ProxyType::Http);
        assert_eq!(status.remote_addr, "node1-x.example.com");
        assert_eq!(status.err, None);
    }

    #[test]
    fn list_responses_tolerate_missing_members() {
        let response: ProxyListResponse = serde_json::from_str(r#"{"total": 0}"#).unwrap();
        assert!(response.proxy_configs.is_empty());

        let response: ServerListResponse =
            serde_json::from_str(r#"{"total": 1, "servers": [{"id": "u.s.node1"}]}"#).unwrap();
        assert_eq!(response.servers[0].id, "u.s.node1");
    }
}
