//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! Used for one-shot calls outside the subscription path, such as checking
//! factory deployments at start-up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use pairwatch_core::error::WatchError;
use pairwatch_core::request::{JsonRpcRequest, JsonRpcResponse, RpcParam};

/// Request/response JSON-RPC transport.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, WatchError>;

    fn url(&self) -> &str;

    /// Allocate the next request id.
    fn next_id(&self) -> u64;

    /// Send `method` and unwrap the result.
    async fn call(&self, method: &str, params: Vec<RpcParam>) -> Result<Value, WatchError> {
        let req = JsonRpcRequest::new(self.next_id(), method, params);
        self.send(req).await?.into_result().map_err(WatchError::Rpc)
    }
}

/// Plain HTTP JSON-RPC client.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, WatchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WatchError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, WatchError> {
        tracing::debug!(method = %req.method, url = %self.url, "HTTP RPC call");
        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| WatchError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(WatchError::Http(format!("HTTP {status}: {body}")));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| WatchError::Http(e.to_string()))
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn next_id(&self) -> u64 {
        self.id.fetch_add(1, Ordering::Relaxed)
    }
}
