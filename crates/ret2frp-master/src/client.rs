//! HTTP client for the tunnel master
//!
//! Bearer-authenticated JSON over HTTP(S). The session token is persisted in
//! the shared KV under `token:{username}` so concurrent controller replicas
//! reuse one session. The master rotates tokens two ways: by answering
//! `{code:500, msg:"token invalid"}` (we re-login and retry once) and by
//! attaching a replacement in an `X-Set-Authorization` header or an
//! `frp-panel-cookie` cookie (we absorb it on every response).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use ret2frp_cache::{Cache, CacheError, Key};

use crate::types::{ClientInfo, ProxyConfig, ProxyRef, ProxyState, Server};
use crate::{wire, MasterApi};

/// Lifetime of a persisted master token
pub const TOKEN_TTL_SECONDS: i64 = 84_600;

const PAGE_SIZE: u64 = 100;

/// Errors surfaced by master RPCs
#[derive(Error, Debug)]
pub enum MasterError {
    #[error("master transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("master rejected request: code {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("unexpected master response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("login succeeded but no token was returned")]
    MissingToken,

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Production [`MasterApi`] implementation
pub struct MasterClient {
    http: reqwest::Client,
    api_base: String,
    username: String,
    password: String,
    cache: Cache,
}

impl MasterClient {
    pub fn new(
        api_base: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        cache: Cache,
    ) -> Result<Self, MasterError> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            cache,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn token_key(&self) -> Key {
        Key::root("token").at(&self.username)
    }

    async fn store_token(&self, token: &str) -> Result<(), MasterError> {
        self.cache
            .set(self.token_key(), token, Some(TOKEN_TTL_SECONDS))
            .await?;
        Ok(())
    }

    /// Token from the KV, logging in if none is stored
    async fn current_token(&self) -> Result<String, MasterError> {
        if let Some(token) = self.cache.get(self.token_key()).await? {
            return Ok(token);
        }
        self.login().await
    }

    async fn login(&self) -> Result<String, MasterError> {
        let response = self
            .http
            .post(self.endpoint("v1/auth/login"))
            .json(&wire::LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;

        let rotated = rotated_token(response.headers());
        let body: Value = response.json().await?;
        let token = body
            .get("token")
            .and_then(Value::as_str)
            .or_else(|| body.pointer("/data/token").and_then(Value::as_str))
            .map(str::to_string)
            .or(rotated)
            .ok_or(MasterError::MissingToken)?;

        self.store_token(&token).await?;
        debug!(username = %self.username, "logged in to tunnel master");
        Ok(token)
    }

    async fn post_once(
        &self,
        path: &str,
        body: &(impl Serialize + Sync),
        token: &str,
    ) -> Result<Value, MasterError> {
        let response = self
            .http
            .post(self.endpoint(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        if let Some(token) = rotated_token(response.headers()) {
            self.store_token(&token).await?;
        }

        let text = response.text().await?;
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Issue one RPC, re-logging in and retrying once on a stale token
    async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &(impl Serialize + Sync),
    ) -> Result<T, MasterError> {
        let token = self.current_token().await?;
        let mut value = self.post_once(path, body, &token).await?;

        if is_token_invalid(&value) {
            let token = self.login().await?;
            value = self.post_once(path, body, &token).await?;
        }

        if let Some(err) = api_error(&value) {
            return Err(err);
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// `{code:500, msg:"token invalid"}` marks a stale session
fn is_token_invalid(value: &Value) -> bool {
    value.get("code").and_then(Value::as_i64) == Some(500)
        && value.get("msg").and_then(Value::as_str) == Some("token invalid")
}

/// A `code` outside the success range marks an application-level rejection
fn api_error(value: &Value) -> Option<MasterError> {
    let code = value.get("code").and_then(Value::as_i64)?;
    if code == 0 || code == 200 {
        return None;
    }
    Some(MasterError::Api {
        code,
        msg: value
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    })
}

/// Extract a rotated token from `X-Set-Authorization` or the
/// `frp-panel-cookie` cookie
fn rotated_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-set-authorization") {
        if let Ok(value) = value.to_str() {
            let token = value.strip_prefix("Bearer ").unwrap_or(value);
            return Some(token.to_string());
        }
    }

    for cookie in headers.get_all(SET_COOKIE) {
        let Ok(cookie) = cookie.to_str() else { continue };
        let pair = cookie.split(';').next().unwrap_or("").trim();
        if let Some(token) = pair.strip_prefix("frp-panel-cookie=") {
            return Some(token.to_string());
        }
    }

    None
}

#[async_trait]
impl MasterApi for MasterClient {
    async fn list_servers(&self, keyword: &str) -> Result<Vec<Server>, MasterError> {
        let mut servers: Vec<Server> = Vec::new();
        let mut page = 1;
        loop {
            let response: wire::ServerListResponse = self
                .call(
                    "v1/server/list",
                    &wire::PageRequest {
                        page,
                        page_size: PAGE_SIZE,
                        keyword,
                    },
                )
                .await?;
            let fetched = response.servers.len();
            servers.extend(response.servers.into_iter().map(Server::from));
            if fetched == 0 || servers.len() as u64 >= response.total {
                break;
            }
            page += 1;
        }
        Ok(servers)
    }

    async fn list_clients(&self, keyword: &str) -> Result<Vec<ClientInfo>, MasterError> {
        let mut clients: Vec<ClientInfo> = Vec::new();
        let mut page = 1;
        loop {
            let response: wire::ClientListResponse = self
                .call(
                    "v1/client/list",
                    &wire::PageRequest {
                        page,
                        page_size: PAGE_SIZE,
                        keyword,
                    },
                )
                .await?;
            let fetched = response.clients.len();
            clients.extend(response.clients.into_iter().map(ClientInfo::from));
            if fetched == 0 || clients.len() as u64 >= response.total {
                break;
            }
            page += 1;
        }
        Ok(clients)
    }

    async fn create_proxy_config(
        &self,
        client_id: &str,
        server_id: &str,
        config: &ProxyConfig,
        overwrite: bool,
    ) -> Result<(), MasterError> {
        let request = wire::CreateProxyRequest::new(client_id, server_id, config, overwrite)?;
        let _: Value = self.call("v1/proxy/create_config", &request).await?;
        Ok(())
    }

    async fn list_proxy_configs(&self, keyword: &str) -> Result<Vec<ProxyRef>, MasterError> {
        let mut proxies: Vec<ProxyRef> = Vec::new();
        let mut page = 1;
        loop {
            let response: wire::ProxyListResponse = self
                .call(
                    "v1/proxy/list_configs",
                    &wire::PageRequest {
                        page,
                        page_size: PAGE_SIZE,
                        keyword,
                    },
                )
                .await?;
            let fetched = response.proxy_configs.len();
            proxies.extend(response.proxy_configs.into_iter().map(ProxyRef::from));
            if fetched == 0 || proxies.len() as u64 >= response.total {
                break;
            }
            page += 1;
        }
        Ok(proxies)
    }

    async fn get_proxy_config(&self, proxy: &ProxyRef) -> Result<ProxyState, MasterError> {
        let response: wire::GetProxyResponse = self
            .call("v1/proxy/get_config", &wire::ProxyRefRequest::from(proxy))
            .await?;
        Ok(ProxyState::from(response))
    }

    async fn delete_proxy_config(&self, proxy: &ProxyRef) -> Result<(), MasterError> {
        let _: Value = self
            .call("v1/proxy/delete_config", &wire::ProxyRefRequest::from(proxy))
            .await?;
        Ok(())
    }
}
