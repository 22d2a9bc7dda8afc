//! GoPlus token-security trust check.

use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use pairwatch_core::error::WatchError;
use pairwatch_core::trust::TrustCheck;

/// Flags that must read `"0"` for an unlisted token to pass.
const MUST_BE_ZERO: [&str; 13] = [
    "is_honeypot",
    "is_blacklisted",
    "can_take_back_ownership",
    "cannot_buy",
    "cannot_sell_all",
    "personal_slippage_modifiable",
    "slippage_modifiable",
    "sell_tax",
    "buy_tax",
    "is_airdrop_scam",
    "is_proxy",
    "trading_cooldown",
    "transfer_pausable",
];

#[derive(Debug, Deserialize)]
struct SecurityResponse {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Map<String, Value>,
}

/// A token passes if GoPlus lists it as trusted, or if every safety flag is
/// clean and it trades on a DEX. Missing fields fail.
pub fn is_trusted(report: &Map<String, Value>) -> bool {
    let flag = |key: &str| report.get(key).and_then(Value::as_str);
    if flag("trust_list") == Some("1") {
        return true;
    }
    MUST_BE_ZERO.iter().all(|key| flag(key) == Some("0")) && flag("is_in_dex") == Some("1")
}

/// Queries `GET {endpoint}/token_security/{chain_id}`.
pub struct GoPlusTrustCheck {
    http: reqwest::Client,
    endpoint: String,
    chain_id: u64,
    access_token: Option<String>,
}

impl GoPlusTrustCheck {
    pub fn new(
        endpoint: impl Into<String>,
        chain_id: u64,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, WatchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WatchError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            chain_id,
            access_token,
        })
    }

    async fn fetch(&self, token: Address) -> Result<Map<String, Value>, WatchError> {
        let key = format!("{token:#x}");
        let url = format!("{}/token_security/{}", self.endpoint, self.chain_id);
        let mut req = self.http.get(&url).query(&[("contract_addresses", key.as_str())]);
        if let Some(access_token) = &self.access_token {
            req = req.header(reqwest::header::AUTHORIZATION, access_token);
        }

        let resp = req.send().await.map_err(|e| WatchError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(WatchError::Http(format!("HTTP {}", resp.status().as_u16())));
        }
        let body: SecurityResponse = resp.json().await.map_err(|e| WatchError::Http(e.to_string()))?;
        report_for(body, &key)
    }
}

fn report_for(mut body: SecurityResponse, key: &str) -> Result<Map<String, Value>, WatchError> {
    if body.code != 1 {
        return Err(WatchError::Http(format!("GoPlus code {}: {}", body.code, body.message)));
    }
    match body.result.remove(key) {
        Some(Value::Object(report)) => Ok(report),
        _ => Err(WatchError::Malformed(format!("no security report for {key}"))),
    }
}

#[async_trait]
impl TrustCheck for GoPlusTrustCheck {
    async fn check_token_security(&self, token: Address) -> bool {
        match self.fetch(token).await {
            Ok(report) => {
                let trusted = is_trusted(&report);
                tracing::debug!(%token, trusted, "token security checked");
                trusted
            }
            Err(e) => {
                tracing::warn!(%token, error = %e, "token security check failed, treating as untrusted");
                false
            }
        }
    }
}
