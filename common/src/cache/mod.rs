//! Tenant-scoped cache with per-family TTLs, sitting in front of the chunk store, graph store,
//! and embedding provider. Backed by Redis; if no `REDIS_URL` is configured or the connection
//! cannot be established, every operation degrades to a no-op so a missing cache never fails a
//! user request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::utils::config::AppConfig;

/// The retrieval families that share the cache's key/TTL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFamily {
    VectorSearch,
    GraphSearch,
    HybridSearch,
    Embedding,
    Document,
}

impl CacheFamily {
    const fn prefix(self) -> &'static str {
        match self {
            Self::VectorSearch => "vs",
            Self::GraphSearch => "gs",
            Self::HybridSearch => "hs",
            Self::Embedding => "emb",
            Self::Document => "doc",
        }
    }

    const fn ttl(self) -> Duration {
        match self {
            Self::VectorSearch => Duration::from_secs(30 * 60),
            Self::GraphSearch => Duration::from_secs(2 * 60 * 60),
            Self::HybridSearch => Duration::from_secs(45 * 60),
            Self::Embedding => Duration::from_secs(24 * 60 * 60),
            Self::Document => Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// Per-family hit/miss/error counters, reported to `/metrics`. Plain atomics rather than a
/// metrics crate — the pack carries none (see `DESIGN.md`), and a handful of monotonic gauges
/// doesn't warrant introducing one.
#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

/// Snapshot of `/metrics`-facing cache counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

/// Tenant-scoped cache handle. Cloning is cheap; `ConnectionManager` is itself a cheap,
/// internally-pooled handle (the same discipline the rest of the core uses for its backend
/// clients). The counters are shared across clones via `Arc` so every caller reporting through
/// the same `Cache` contributes to one snapshot.
#[derive(Clone)]
pub struct Cache {
    inner: Option<ConnectionManager>,
    counters: Arc<CacheCounters>,
}

impl Cache {
    /// Connects to `REDIS_URL` if configured. Connection failure degrades to a disabled cache
    /// rather than failing startup.
    pub async fn from_config(config: &AppConfig) -> Self {
        let Some(url) = config.redis_url.as_deref() else {
            debug!("no REDIS_URL configured; cache disabled");
            return Self { inner: None, counters: Arc::new(CacheCounters::default()) };
        };

        match redis::Client::open(url) {
            Ok(client) => match client.get_connection_manager().await {
                Ok(manager) => Self {
                    inner: Some(manager),
                    counters: Arc::new(CacheCounters::default()),
                },
                Err(err) => {
                    warn!(error = %err, "failed to connect to redis; cache disabled");
                    Self { inner: None, counters: Arc::new(CacheCounters::default()) }
                }
            },
            Err(err) => {
                warn!(error = %err, "invalid REDIS_URL; cache disabled");
                Self { inner: None, counters: Arc::new(CacheCounters::default()) }
            }
        }
    }

    pub fn disabled() -> Self {
        Self { inner: None, counters: Arc::new(CacheCounters::default()) }
    }

    pub const fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Snapshot of hit/miss/error counts accumulated since this `Cache` (or a clone sharing its
    /// counters) was constructed.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    fn key(family: CacheFamily, tenant_id: &str, payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        let digest = hasher.finalize();
        format!("{}:{}:{:x}", family.prefix(), tenant_id, digest)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        family: CacheFamily,
        tenant_id: &str,
        payload: &str,
    ) -> Option<T> {
        let mut conn = self.inner.clone()?;
        let key = Self::key(family, tenant_id, payload);
        match redis::cmd("GET")
            .arg(&key)
            .query_async::<_, Option<String>>(&mut conn)
            .await
        {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    Some(value)
                }
                Err(err) => {
                    warn!(error = %err, %key, "cache value failed to deserialize; treating as miss");
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                warn!(error = %err, %key, "cache get failed; treating as miss");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn set<T: Serialize>(
        &self,
        family: CacheFamily,
        tenant_id: &str,
        payload: &str,
        value: &T,
    ) {
        let Some(mut conn) = self.inner.clone() else {
            return;
        };
        let key = Self::key(family, tenant_id, payload);
        let Ok(raw) = serde_json::to_string(value) else {
            return;
        };

        if let Err(err) = redis::cmd("SET")
            .arg(&key)
            .arg(raw)
            .arg("EX")
            .arg(family.ttl().as_secs())
            .query_async::<_, ()>(&mut conn)
            .await
        {
            warn!(error = %err, %key, "cache set failed");
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn delete(&self, family: CacheFamily, tenant_id: &str, payload: &str) {
        let Some(mut conn) = self.inner.clone() else {
            return;
        };
        let key = Self::key(family, tenant_id, payload);
        let _: Result<(), _> = redis::cmd("DEL").arg(&key).query_async(&mut conn).await;
    }

    /// Removes every key whose tenant segment matches `tenant_id`, across all families.
    pub async fn clear_tenant(&self, tenant_id: &str) {
        let Some(mut conn) = self.inner.clone() else {
            return;
        };

        for family in [
            CacheFamily::VectorSearch,
            CacheFamily::GraphSearch,
            CacheFamily::HybridSearch,
            CacheFamily::Embedding,
            CacheFamily::Document,
        ] {
            let pattern = format!("{}:{}:*", family.prefix(), tenant_id);
            let keys: Vec<String> = match redis::cmd("KEYS")
                .arg(&pattern)
                .query_async(&mut conn)
                .await
            {
                Ok(keys) => keys,
                Err(err) => {
                    warn!(error = %err, %pattern, "cache scan failed during tenant clear");
                    continue;
                }
            };
            if keys.is_empty() {
                continue;
            }
            if let Err(err) = redis::cmd("DEL")
                .arg(keys)
                .query_async::<_, ()>(&mut conn)
                .await
            {
                warn!(error = %err, "cache delete failed during tenant clear");
            }
        }
    }

    /// Exercises a short-TTL round trip; used by the `/health/detailed` endpoint.
    pub async fn health(&self) -> bool {
        let Some(mut conn) = self.inner.clone() else {
            return false;
        };
        let key = "health:probe".to_string();
        let set: Result<(), _> = redis::cmd("SET")
            .arg(&key)
            .arg("ok")
            .arg("EX")
            .arg(5_u64)
            .query_async(&mut conn)
            .await;
        if set.is_err() {
            return false;
        }
        matches!(
            redis::cmd("GET")
                .arg(&key)
                .query_async::<_, Option<String>>(&mut conn)
                .await,
            Ok(Some(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_cache_degrades_silently() {
        let cache = Cache::disabled();
        assert!(!cache.is_enabled());
        assert_eq!(cache.get::<String>(CacheFamily::VectorSearch, "t1", "q").await, None);
        cache.set(CacheFamily::VectorSearch, "t1", "q", &"value".to_string()).await;
        assert!(!cache.health().await);
        cache.clear_tenant("t1").await;

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.errors), (0, 0, 0));
    }

    #[test]
    fn keys_are_scoped_by_tenant_and_payload() {
        let a = Cache::key(CacheFamily::VectorSearch, "tenant-a", "query");
        let b = Cache::key(CacheFamily::VectorSearch, "tenant-b", "query");
        assert_ne!(a, b);
        assert!(a.starts_with("vs:tenant-a:"));
    }
}
