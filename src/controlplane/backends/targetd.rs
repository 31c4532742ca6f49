//! targetd Block Storage Adapter
//!
//! JSON-RPC 2.0 client for the targetd service, which manages LVM volumes
//! and their LIO iSCSI exports.

use crate::domain::ports::{BackendError, BackendErrorCode, BackendResult, StorageBackend};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the targetd adapter
#[derive(Clone)]
pub struct TargetdConfig {
    /// JSON-RPC endpoint, e.g. https://targetd:18700/targetrpc
    pub api_url: String,
    pub username: String,
    pub password: String,
    /// Accept any TLS certificate
    pub insecure_skip_verify: bool,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for TargetdConfig {
    fn default() -> Self {
        Self {
            api_url: "https://localhost:18700/targetrpc".to_string(),
            username: "admin".to_string(),
            password: String::new(),
            insecure_skip_verify: false,
            timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for TargetdConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetdConfig")
            .field("api_url", &self.api_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    #[serde(default)]
    message: String,
}

/// Entry of `export_list`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Export {
    pub initiator_wwn: String,
    pub lun: i32,
    pub vol_name: String,
    pub pool: String,
}

// =============================================================================
// targetd Adapter
// =============================================================================

/// Adapter for a targetd server
pub struct TargetdClient {
    config: TargetdConfig,
    url: Url,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl TargetdClient {
    /// Create a new targetd adapter
    pub fn new(config: TargetdConfig) -> Result<Self> {
        let url = Url::parse(&config.api_url).map_err(|e| {
            Error::Configuration(format!("Invalid targetd API URL {}: {}", config.api_url, e))
        })?;

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            config,
            url,
            http,
            next_id: AtomicU64::new(1),
        })
    }

    /// Invoke a JSON-RPC method
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> BackendResult<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        trace!("targetd request: {:?}", request);

        let response = self
            .http
            .post(self.url.clone())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::transport(format!("{} failed: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::transport(format!(
                "{} failed: HTTP {}",
                method, status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| BackendError::transport(format!("{} failed: {}", method, e)))?;

        decode_response(&body)
    }

    /// List every export known to the server
    pub async fn export_list(&self) -> BackendResult<Vec<Export>> {
        self.call("export_list", json!({})).await
    }
}

#[async_trait]
impl StorageBackend for TargetdClient {
    async fn create_volume(&self, pool: &str, name: &str, size_bytes: u64) -> BackendResult<()> {
        debug!("vol_create pool={} name={} size={}", pool, name, size_bytes);
        self.call::<Value>(
            "vol_create",
            json!({ "pool": pool, "name": name, "size": size_bytes }),
        )
        .await
        .map(|_| ())
    }

    async fn create_export(&self, pool: &str, name: &str, initiator: &str) -> BackendResult<i32> {
        let exports = self.export_list().await?;

        // an earlier attempt may have exported the volume already
        if let Some(existing) = find_export(&exports, pool, name, initiator) {
            debug!("{}/{} already exported to {} as LUN {}", pool, name, initiator, existing.lun);
            return Ok(existing.lun);
        }

        let lun = first_free_lun(&exports);
        debug!("export_create pool={} vol={} initiator={} lun={}", pool, name, initiator, lun);
        self.call::<Value>(
            "export_create",
            json!({ "pool": pool, "vol": name, "initiator_wwn": initiator, "lun": lun }),
        )
        .await?;

        Ok(lun)
    }

    async fn destroy_export(&self, pool: &str, name: &str, initiator: &str) -> BackendResult<()> {
        debug!("export_destroy pool={} vol={} initiator={}", pool, name, initiator);
        self.call::<Value>(
            "export_destroy",
            json!({ "pool": pool, "vol": name, "initiator_wwn": initiator }),
        )
        .await
        .map(|_| ())
    }

    async fn destroy_volume(&self, pool: &str, name: &str) -> BackendResult<()> {
        debug!("vol_destroy pool={} name={}", pool, name);
        self.call::<Value>("vol_destroy", json!({ "pool": pool, "name": name }))
            .await
            .map(|_| ())
    }

    fn backend_name(&self) -> &str {
        "targetd"
    }
}

/// Decode a JSON-RPC response body
fn decode_response<T: DeserializeOwned>(body: &[u8]) -> BackendResult<T> {
    let response: RpcResponse = serde_json::from_slice(body)
        .map_err(|e| BackendError::transport(format!("invalid JSON-RPC response: {}", e)))?;

    if let Some(error) = response.error {
        return Err(BackendError::new(
            BackendErrorCode::from_code(error.code),
            error.message,
        ));
    }

    serde_json::from_value(response.result.unwrap_or(Value::Null))
        .map_err(|e| BackendError::transport(format!("unexpected JSON-RPC result: {}", e)))
}

fn find_export<'a>(
    exports: &'a [Export],
    pool: &str,
    name: &str,
    initiator: &str,
) -> Option<&'a Export> {
    exports
        .iter()
        .find(|e| e.pool == pool && e.vol_name == name && e.initiator_wwn == initiator)
}

/// Lowest LUN not used by any export
fn first_free_lun(exports: &[Export]) -> i32 {
    let used: BTreeSet<i32> = exports.iter().map(|e| e.lun).collect();
    (0..).find(|lun| !used.contains(lun)).unwrap_or_default()
}
