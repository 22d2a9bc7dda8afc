//! Watcher configuration, loaded from TOML.
//!
//! Every field has a default, so a minimal file only needs the provider URL:
//!
//! ```toml
//! [provider]
//! ws_url = "wss://example.quiknode.pro/KEY"
//! ```
//!
//! `PAIRWATCH_WS_URL` and `PAIRWATCH_GOPLUS_TOKEN` override the matching
//! fields when set.

use std::path::Path;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::buffer::BufferConfig;
use crate::decode::FactoryKind;
use crate::dispatch::BatchConfig;
use crate::error::WatchError;
use crate::event::SubscriptionSpec;
use crate::network::{Network, V2_PAIR_CREATED_TOPIC, V3_POOL_CREATED_TOPIC};
use crate::policy::{AdmissionConfig, BackoffPolicy, RetryConfig};
use crate::trust::CacheConfig;

pub const ENV_WS_URL: &str = "PAIRWATCH_WS_URL";
pub const ENV_GOPLUS_TOKEN: &str = "PAIRWATCH_GOPLUS_TOKEN";

/// Serde helpers for `Duration` fields stored as integer milliseconds.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Node provider endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// `ws://` or `wss://` endpoint used for the log subscription.
    pub ws_url: String,
    /// HTTP endpoint for factory validation. Derived from `ws_url` if unset.
    pub http_url: Option<String>,
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            http_url: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-version factory overrides. Unset entries fall back to the network
/// profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryOverrides {
    pub v2: Option<Address>,
    pub v3: Option<Address>,
    /// Factory versions to leave out entirely.
    pub disabled: Vec<FactoryKind>,
}

/// Creation event topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub v2_pair_created: B256,
    pub v3_pool_created: B256,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            v2_pair_created: V2_PAIR_CREATED_TOPIC,
            v3_pool_created: V3_POOL_CREATED_TOPIC,
        }
    }
}

/// Fixed delays used by the connection supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Wait after the admission gate denies a subscribe attempt.
    #[serde(rename = "gate_retry_delay_ms", with = "millis")]
    pub gate_retry_delay: Duration,
    /// Wait after the provider throttles a subscribe attempt.
    #[serde(rename = "subscribe_rate_limit_delay_ms", with = "millis")]
    pub subscribe_rate_limit_delay: Duration,
    /// Wait after any other subscribe error.
    #[serde(rename = "subscribe_error_delay_ms", with = "millis")]
    pub subscribe_error_delay: Duration,
    /// Pause in the receive loop after a throttling notice.
    #[serde(rename = "listen_rate_limit_delay_ms", with = "millis")]
    pub listen_rate_limit_delay: Duration,
    /// How long to wait for the `eth_subscribe` reply.
    #[serde(rename = "subscribe_timeout_ms", with = "millis")]
    pub subscribe_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            gate_retry_delay: Duration::from_secs(5),
            subscribe_rate_limit_delay: Duration::from_secs(10),
            subscribe_error_delay: Duration::from_secs(5),
            listen_rate_limit_delay: Duration::from_secs(2),
            subscribe_timeout: Duration::from_secs(10),
        }
    }
}

/// Token trust-check provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// When disabled every token is treated as untrusted.
    pub enabled: bool,
    pub endpoint: String,
    pub access_token: Option<String>,
    /// Chain id sent to the provider. Defaults to the network's.
    pub chain_id: Option<u64>,
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    pub cache: CacheConfig,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.gopluslabs.io/api/v1".into(),
            access_token: None,
            chain_id: None,
            timeout: Duration::from_secs(10),
            cache: CacheConfig::default(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    pub level: String,
    /// Emit JSON structured logs (true) or human-readable text (false)
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub provider: ProviderConfig,
    pub network: Network,
    pub factories: FactoryOverrides,
    pub topics: TopicConfig,
    /// Only report pairs whose tokens both pass the trust check.
    pub clean_mode: bool,
    /// Check factories for contract code before subscribing.
    pub validate_factories: bool,
    pub admission: AdmissionConfig,
    pub buffer: BufferConfig,
    pub batch: BatchConfig,
    pub supervisor: SupervisorConfig,
    pub retry: RetryConfig,
    pub trust: TrustConfig,
    pub log: LogConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            network: Network::default(),
            factories: FactoryOverrides::default(),
            topics: TopicConfig::default(),
            clean_mode: false,
            validate_factories: true,
            admission: AdmissionConfig::default(),
            buffer: BufferConfig::default(),
            batch: BatchConfig::default(),
            supervisor: SupervisorConfig::default(),
            retry: RetryConfig::default(),
            trust: TrustConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl WatcherConfig {
    /// Read, parse, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WatchError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| WatchError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::parse(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without touching the environment or validating.
    pub fn parse(content: &str) -> Result<Self, WatchError> {
        toml::from_str(content).map_err(|e| WatchError::Config(e.to_string()))
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_WS_URL) {
            if !url.trim().is_empty() {
                self.provider.ws_url = url.trim().to_string();
            }
        }
        if let Ok(token) = std::env::var(ENV_GOPLUS_TOKEN) {
            if !token.trim().is_empty() {
                self.trust.access_token = Some(token.trim().to_string());
            }
        }
    }

    /// Reject configurations the watcher cannot run with.
    pub fn validate(&self) -> Result<(), WatchError> {
        let url = self.provider.ws_url.trim();
        if url.is_empty() {
            return Err(config_err("provider.ws_url is required"));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(config_err(format!(
                "provider.ws_url must be a ws:// or wss:// URL, got `{url}`"
            )));
        }
        if self.factories().is_empty() {
            return Err(config_err(format!(
                "no factory address configured for network {}",
                self.network
            )));
        }
        if self.buffer.capacity == 0 {
            return Err(config_err("buffer.capacity must be at least 1"));
        }
        if self.batch.size == 0 {
            return Err(config_err("batch.size must be at least 1"));
        }
        let a = &self.admission;
        if a.initial_rate == 0 || a.max_rate == 0 {
            return Err(config_err("admission rates must be at least 1"));
        }
        if a.failure_threshold == 0 {
            return Err(config_err("admission.failure_threshold must be at least 1"));
        }
        if !(a.adaptive_factor > 0.0 && a.adaptive_factor < 1.0) {
            return Err(config_err(format!(
                "admission.adaptive_factor must be in (0, 1), got {}",
                a.adaptive_factor
            )));
        }
        if a.window.is_zero() {
            return Err(config_err("admission.window_ms must be positive"));
        }
        if let BackoffPolicy::Exponential {
            multiplier,
            jitter_fraction,
            ..
        } = self.retry.backoff
        {
            if !(multiplier.is_finite() && multiplier >= 1.0) {
                return Err(config_err(format!(
                    "retry.backoff.multiplier must be a finite number >= 1, got {multiplier}"
                )));
            }
            if !(0.0..=1.0).contains(&jitter_fraction) {
                return Err(config_err(format!(
                    "retry.backoff.jitter_fraction must be in [0, 1], got {jitter_fraction}"
                )));
            }
        }
        Ok(())
    }

    /// Active factories: overrides first, then the network profile.
    pub fn factories(&self) -> Vec<(FactoryKind, Address)> {
        [FactoryKind::V2, FactoryKind::V3]
            .into_iter()
            .filter(|kind| !self.factories.disabled.contains(kind))
            .filter_map(|kind| {
                let configured = match kind {
                    FactoryKind::V2 => self.factories.v2,
                    FactoryKind::V3 => self.factories.v3,
                };
                configured
                    .or_else(|| self.network.factory(kind))
                    .map(|addr| (kind, addr))
            })
            .collect()
    }

    pub fn topic(&self, kind: FactoryKind) -> B256 {
        match kind {
            FactoryKind::V2 => self.topics.v2_pair_created,
            FactoryKind::V3 => self.topics.v3_pool_created,
        }
    }

    /// One multiplexed filter covering every active factory.
    pub fn subscription_spec(&self) -> SubscriptionSpec {
        let factories = self.factories();
        SubscriptionSpec {
            addresses: factories.iter().map(|(_, addr)| *addr).collect(),
            topics: factories.iter().map(|(kind, _)| self.topic(*kind)).collect(),
        }
    }

    /// HTTP endpoint for one-shot JSON-RPC calls.
    pub fn http_url(&self) -> String {
        if let Some(url) = &self.provider.http_url {
            return url.clone();
        }
        let ws = self.provider.ws_url.trim();
        if let Some(rest) = ws.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if let Some(rest) = ws.strip_prefix("ws://") {
            format!("http://{rest}")
        } else {
            ws.to_string()
        }
    }

    pub fn trust_chain_id(&self) -> u64 {
        self.trust.chain_id.unwrap_or_else(|| self.network.chain_id())
    }
}

fn config_err(msg: impl Into<String>) -> WatchError {
    WatchError::Config(msg.into())
}
