//! REST Cluster API Adapter
//!
//! Talks to the cluster management REST API:
//!
//! - `PUT /login` trades credentials for an API key sent as `Auth-Token`;
//!   a 401 triggers one re-login and a retry
//! - responses wrap their payload in a `{"data": ...}` envelope
//! - collections are paginated with `offset` / `limit`
//! - 404 maps to [`Error::NotFound`], 409 to [`Error::Conflict`]

use crate::config::ClusterConfig;
use crate::domain::ports::ClusterApi;
use crate::domain::resources::{
    AppInstance, AppInstanceUpdate, Initiator, NetworkPath, NewAppInstance, Snapshot,
    StorageInstance, Volume, VolumeUpdate,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Management API port
pub const API_PORT: u16 = 7718;
const PAGE_SIZE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(default)]
    total_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct AccessVip {
    #[serde(default)]
    network_paths: Vec<NetworkPath>,
}

/// Cluster API over HTTPS
pub struct RestClusterApi {
    client: reqwest::Client,
    base_url: String,
    config: ClusterConfig,
    api_key: RwLock<Option<String>>,
}

impl RestClusterApi {
    /// Create a client for the configured cluster; no request is made yet
    pub fn new(config: ClusterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;
        let base_url = format!(
            "https://{}:{}/v{}",
            config.mgmt_ip, API_PORT, config.api_version
        );

        Ok(Self {
            client,
            base_url,
            config,
            api_key: RwLock::new(None),
        })
    }

    /// Base URL of the versioned API
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn login(&self) -> Result<String> {
        debug!("Logging in to {} as {}", self.base_url, self.config.username);
        let mut body = json!({
            "name": self.config.username,
            "password": self.config.password,
        });
        if let Some(ldap) = &self.config.ldap {
            body["remote_server"] = json!(ldap);
        }

        let response = self
            .client
            .put(format!("{}/login", self.base_url))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let value: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(Error::Authentication(error_message(&value, status)));
        }

        let key = value
            .get("key")
            .or_else(|| value.get("data").and_then(|d| d.get("key")))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Authentication("login response carried no key".to_string()))?
            .to_string();
        *self.api_key.write() = Some(key.clone());
        info!("Logged in to cluster {}", self.config.mgmt_ip);
        Ok(key)
    }

    async fn api_key(&self) -> Result<String> {
        let cached = self.api_key.read().clone();
        match cached {
            Some(key) => Ok(key),
            None => self.login().await,
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<(StatusCode, Value)> {
        let url = format!("{}{}", self.base_url, path);
        let mut relogged = false;
        loop {
            let key = self.api_key().await?;
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Auth-Token", key)
                .query(query);
            if !self.config.tenant.is_empty() {
                request = request.header("tenant", &self.config.tenant);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!("{} {}", method, url);
            let response = request.send().await?;
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !relogged {
                debug!("API key rejected, logging in again");
                *self.api_key.write() = None;
                relogged = true;
                continue;
            }
            let value: Value = if status == StatusCode::NO_CONTENT {
                Value::Null
            } else {
                response.json().await.unwrap_or(Value::Null)
            };
            return Ok((status, value));
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        kind: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let (status, value) = self.send(method, path, &[], body).await?;
        check_status(status, path, kind, &value)?;
        let envelope: Envelope<T> = serde_json::from_value(value)?;
        Ok(envelope.data)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, kind: &str) -> Result<T> {
        self.request(Method::GET, path, kind, None).await
    }

    async fn put<T: DeserializeOwned>(&self, path: &str, kind: &str, body: &Value) -> Result<T> {
        self.request(Method::PUT, path, kind, Some(body)).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, kind: &str, body: &Value) -> Result<T> {
        self.request(Method::POST, path, kind, Some(body)).await
    }

    /// Fetch every page of a collection
    async fn list<T: DeserializeOwned>(&self, path: &str, kind: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        loop {
            let query = [
                ("offset", items.len().to_string()),
                ("limit", PAGE_SIZE.to_string()),
            ];
            let (status, value) = self.send(Method::GET, path, &query, None).await?;
            check_status(status, path, kind, &value)?;
            let page: Envelope<Vec<T>> = serde_json::from_value(value)?;
            let fetched = page.data.len();
            items.extend(page.data);

            let total = page.metadata.and_then(|m| m.total_count);
            match total {
                Some(total) if items.len() < total && fetched > 0 => continue,
                None if fetched == PAGE_SIZE => continue,
                _ => return Ok(items),
            }
        }
    }
}

fn error_message(value: &Value, status: StatusCode) -> String {
    value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string())
}

fn check_status(status: StatusCode, path: &str, kind: &str, value: &Value) -> Result<()> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND => Err(Error::not_found(kind, path)),
        StatusCode::CONFLICT => Err(Error::Conflict {
            kind: kind.to_string(),
            name: path.to_string(),
        }),
        StatusCode::UNAUTHORIZED => Err(Error::Authentication(error_message(value, status))),
        _ => Err(Error::ClusterApi {
            path: path.to_string(),
            status: status.as_u16(),
            message: error_message(value, status),
        }),
    }
}

fn encode(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

#[async_trait]
impl ClusterApi for RestClusterApi {
    fn tenant(&self) -> Option<&str> {
        Some(self.config.tenant.as_str()).filter(|t| !t.is_empty())
    }

    async fn list_app_instances(&self) -> Result<Vec<AppInstance>> {
        self.list("/app_instances", "AppInstance").await
    }

    async fn get_app_instance(&self, id: &str) -> Result<AppInstance> {
        self.get(&format!("/app_instances/{}", encode(id)), "AppInstance")
            .await
    }

    async fn create_app_instance(&self, request: &NewAppInstance) -> Result<AppInstance> {
        self.post("/app_instances", "AppInstance", &serde_json::to_value(request)?)
            .await
    }

    async fn update_app_instance(
        &self,
        ai: &AppInstance,
        update: &AppInstanceUpdate,
    ) -> Result<AppInstance> {
        self.put(&ai.path, "AppInstance", &serde_json::to_value(update)?)
            .await
    }

    async fn list_storage_instances(&self, ai: &AppInstance) -> Result<Vec<StorageInstance>> {
        self.list(&format!("{}/storage_instances", ai.path), "StorageInstance")
            .await
    }

    async fn get_storage_instance(&self, ai_id: &str, si_id: &str) -> Result<StorageInstance> {
        let path = format!(
            "/app_instances/{}/storage_instances/{}",
            encode(ai_id),
            encode(si_id)
        );
        self.get(&path, "StorageInstance").await
    }

    async fn list_volumes(&self, si: &StorageInstance) -> Result<Vec<Volume>> {
        self.list(&format!("{}/volumes", si.path), "Volume").await
    }

    async fn get_volume(&self, ai_id: &str, si_id: &str, vol_id: &str) -> Result<Volume> {
        let path = format!(
            "/app_instances/{}/storage_instances/{}/volumes/{}",
            encode(ai_id),
            encode(si_id),
            encode(vol_id)
        );
        self.get(&path, "Volume").await
    }

    async fn update_volume(&self, vol: &Volume, update: &VolumeUpdate) -> Result<Volume> {
        self.put(&vol.path, "Volume", &serde_json::to_value(update)?)
            .await
    }

    async fn list_snapshots(&self, parent_path: &str) -> Result<Vec<Snapshot>> {
        self.list(&format!("{}/snapshots", parent_path), "Snapshot")
            .await
    }

    async fn create_snapshot(&self, parent_path: &str) -> Result<Snapshot> {
        self.post(&format!("{}/snapshots", parent_path), "Snapshot", &json!({}))
            .await
    }

    async fn get_initiator(&self, id: &str) -> Result<Initiator> {
        self.get(&format!("/initiators/{}", encode(id)), "Initiator")
            .await
    }

    async fn create_initiator(&self, name: &str, id: &str) -> Result<Initiator> {
        self.post("/initiators", "Initiator", &json!({"name": name, "id": id}))
            .await
    }

    async fn add_acl_initiator(&self, si: &StorageInstance, initiator: &Initiator) -> Result<()> {
        let path = format!("{}/acl_policy/initiators", si.path);
        let _: Value = self
            .post(&path, "AclPolicy", &json!({"path": initiator.path}))
            .await?;
        Ok(())
    }

    async fn access_network_paths(&self) -> Result<Vec<NetworkPath>> {
        let vip: AccessVip = self
            .get("/system/network/access_vip", "AccessVip")
            .await?;
        Ok(vip.network_paths)
    }
}
