//! Namespaced TTL memoization in front of the tree walkers and aggregator.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::UserId;

pub mod memory;

pub use memory::MemoryCache;

/// Hex characters kept from the options digest.
const OPTIONS_HASH_LEN: usize = 16;

/// Key/value cache with namespace-level invalidation.
///
/// Values are JSON so one store can hold every cached result type.
#[async_trait]
pub trait Cache: Send + Sync + fmt::Debug {
    /// Fetch a live (non-expired) entry.
    async fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// Store `value` under `key` for `ttl`, tagged with every namespace in
    /// `namespaces`.
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration, namespaces: &[String]);

    async fn invalidate(&self, key: &str);

    /// Drop every entry tagged with `namespace`; returns how many went.
    async fn invalidate_namespace(&self, namespace: &str) -> usize;
}

/// A cache that never stores anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

#[async_trait]
impl Cache for NoCache {
    async fn get(&self, _key: &str) -> Option<serde_json::Value> {
        None
    }

    async fn set(&self, _key: &str, _value: serde_json::Value, _ttl: Duration, _namespaces: &[String]) {}

    async fn invalidate(&self, _key: &str) {}

    async fn invalidate_namespace(&self, _namespace: &str) -> usize {
        0
    }
}

/// Return the cached value for `key`, or compute, store and return it.
///
/// Concurrent misses may both compute; the later `set` wins.
pub async fn get_or_compute<T, E, F, Fut>(
    cache: &dyn Cache,
    key: &str,
    ttl: Duration,
    namespaces: &[String],
    compute: F,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if let Some(value) = cache.get(key).await {
        match serde_json::from_value::<T>(value) {
            Ok(hit) => {
                debug!(key = %key, "Cache hit");
                return Ok(hit);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                cache.invalidate(key).await;
            }
        }
    }

    let computed = compute().await?;
    match serde_json::to_value(&computed) {
        Ok(value) => cache.set(key, value, ttl, namespaces).await,
        Err(e) => warn!(key = %key, error = %e, "Result not cacheable"),
    }
    Ok(computed)
}

/// Truncated SHA-256 of a canonical option string.
pub fn options_hash(canonical: &str) -> String {
    let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
    digest[..OPTIONS_HASH_LEN].to_string()
}

/// Namespace covering everything derived from a member's subtree.
pub fn subtree_namespace(user_id: &UserId) -> String {
    format!("subtree:{}", user_id)
}

/// Namespace covering everything derived from a member's ancestor chain.
pub fn upline_namespace(user_id: &UserId) -> String {
    format!("upline:{}", user_id)
}

/// Structured cache keys.
pub mod keys {
    use crate::domain::UserId;

    pub fn upline(user_id: &UserId, max_levels: usize) -> String {
        format!("upline:{}:{}", user_id, max_levels)
    }

    pub fn downline(
        user_id: &UserId,
        max_level: usize,
        page: u32,
        page_size: u32,
        options_hash: &str,
    ) -> String {
        format!(
            "downline:{}:{}:{}:{}:{}",
            user_id, max_level, page, page_size, options_hash
        )
    }

    pub fn downline_ids(user_id: &UserId, max_depth: usize) -> String {
        format!("downline-ids:{}:{}", user_id, max_depth)
    }

    pub fn level_counts(user_id: &UserId, max_depth: usize) -> String {
        format!("level-counts:{}:{}", user_id, max_depth)
    }

    pub fn binary_legs(user_id: &UserId) -> String {
        format!("binary-legs:{}", user_id)
    }

    pub fn metrics(user_id: &UserId) -> String {
        format!("metrics:{}", user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_options_hash_is_stable_and_short() {
        let a = options_hash("sort=name:asc;search=ann");
        let b = options_hash("sort=name:asc;search=ann");
        let c = options_hash("sort=name:desc;search=ann");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), OPTIONS_HASH_LEN);
    }

    #[test]
    fn test_downline_key_layout() {
        let key = keys::downline(&UserId::new("u1"), 3, 2, 20, "abcd");
        assert_eq!(key, "downline:u1:3:2:20:abcd");
    }

    #[tokio::test]
    async fn test_get_or_compute_memoizes() {
        let cache = MemoryCache::new();
        let calls = AtomicUsize::new(0);
        let ns = vec![subtree_namespace(&UserId::new("u1"))];

        for _ in 0..3 {
            let value: Result<u32, String> =
                get_or_compute(&cache, "k", Duration::from_secs(60), &ns, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await;
            assert_eq!(value.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate_namespace("subtree:u1").await;
        let _: Result<u32, String> =
            get_or_compute(&cache, "k", Duration::from_secs(60), &ns, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = MemoryCache::new();
        let failed: Result<u32, String> =
            get_or_compute(&cache, "k", Duration::from_secs(60), &[], || async {
                Err("boom".to_string())
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_no_cache_always_misses() {
        let cache = NoCache;
        cache
            .set("k", serde_json::json!(1), Duration::from_secs(60), &[])
            .await;
        assert!(cache.get("k").await.is_none());
    }
}
