//! Rate limiting and caching in front of external reference lookups.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use super::Reference;

/// A searchable source of trusted references.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<Reference>>;
}

fn default_requests_per_window() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    1
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_cache_capacity() -> u64 {
    1024
}

/// Limits and cache sizing for [`GuardedReferenceSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardSettings {
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Fixed-window limiter keyed by caller name.
///
/// A caller that has used up its window waits until the window rolls over
/// instead of failing.
pub struct WindowRateLimiter {
    max_per_window: u32,
    window: Duration,
    state: Mutex<HashMap<String, (Instant, u32)>>,
}

impl WindowRateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            window,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Take one slot for `key`, sleeping until one is available.
    pub async fn acquire(&self, key: &str) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let entry = state.entry(key.to_string()).or_insert((now, 0));
                if now.duration_since(entry.0) >= self.window {
                    *entry = (now, 0);
                }
                if entry.1 < self.max_per_window {
                    entry.1 += 1;
                    return;
                }
                self.window.saturating_sub(now.duration_since(entry.0))
            };
            debug!(key, wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

/// A [`ReferenceSource`] behind a rate limiter and a TTL cache.
pub struct GuardedReferenceSource {
    inner: Arc<dyn ReferenceSource>,
    limiter: WindowRateLimiter,
    cache: Cache<String, Arc<Vec<Reference>>>,
}

impl GuardedReferenceSource {
    pub fn new(inner: Arc<dyn ReferenceSource>, settings: &GuardSettings) -> Self {
        let cache = Cache::builder()
            .max_capacity(settings.cache_capacity)
            .time_to_live(Duration::from_secs(settings.cache_ttl_secs))
            .build();
        Self {
            inner,
            limiter: WindowRateLimiter::new(
                settings.requests_per_window,
                Duration::from_secs(settings.window_secs),
            ),
            cache,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Search, serving repeated queries from the cache.
    pub async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<Reference>> {
        let key = signature(self.inner.name(), query, limit);
        if let Some(hit) = self.cache.get(&key).await {
            debug!(source = self.inner.name(), query, "Reference cache hit");
            return Ok(hit.as_ref().clone());
        }

        self.limiter.acquire(self.inner.name()).await;
        let found = self.inner.search(query, limit).await?;
        self.cache.insert(key, Arc::new(found.clone())).await;
        Ok(found)
    }
}

fn signature(source: &str, query: &str, limit: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(query.trim().to_lowercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(limit.to_le_bytes());
    format!("{:x}", hasher.finalize())
}
