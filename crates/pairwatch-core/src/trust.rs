//! Token trust checks and their bounded cache.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::millis;

/// Decides whether a token is safe to report.
///
/// Implementations must fail closed: any internal error resolves to `false`.
#[async_trait]
pub trait TrustCheck: Send + Sync {
    async fn check_token_security(&self, token: Address) -> bool;
}

/// Cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    #[serde(rename = "ttl_ms", with = "millis")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            ttl: Duration::from_secs(3_600),
        }
    }
}

/// Bounded TTL cache in front of another [`TrustCheck`].
///
/// When full, the least recently used entry is evicted. A capacity of zero
/// disables caching.
pub struct CachedTrustCheck {
    inner: Arc<dyn TrustCheck>,
    ttl: Duration,
    entries: Option<Mutex<LruCache<Address, (bool, Instant)>>>,
}

impl CachedTrustCheck {
    pub fn new(inner: Arc<dyn TrustCheck>, config: CacheConfig) -> Self {
        Self {
            inner,
            ttl: config.ttl,
            entries: NonZeroUsize::new(config.capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.lock().unwrap().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, token: &Address) -> Option<bool> {
        let mut entries = self.entries.as_ref()?.lock().unwrap();
        match entries.get(token).copied() {
            Some((verdict, at)) if at.elapsed() < self.ttl => Some(verdict),
            Some(_) => {
                entries.pop(token);
                None
            }
            None => None,
        }
    }

    fn store(&self, token: Address, verdict: bool) {
        if let Some(entries) = &self.entries {
            entries.lock().unwrap().put(token, (verdict, Instant::now()));
        }
    }
}

#[async_trait]
impl TrustCheck for CachedTrustCheck {
    async fn check_token_security(&self, token: Address) -> bool {
        if let Some(verdict) = self.lookup(&token) {
            return verdict;
        }
        let verdict = self.inner.check_token_security(token).await;
        self.store(token, verdict);
        verdict
    }
}

/// Trust check backed by a fixed allow-list. Useful offline and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTrustCheck {
    trusted: HashSet<Address>,
}

impl StaticTrustCheck {
    pub fn new(trusted: impl IntoIterator<Item = Address>) -> Self {
        Self {
            trusted: trusted.into_iter().collect(),
        }
    }
}

#[async_trait]
impl TrustCheck for StaticTrustCheck {
    async fn check_token_security(&self, token: Address) -> bool {
        self.trusted.contains(&token)
    }
}
