//! In-process cache with a namespace → keys index.

use super::Cache;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Writes between opportunistic sweeps of expired entries.
const SWEEP_EVERY: usize = 256;

#[derive(Debug)]
struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
    namespaces: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    by_namespace: HashMap<String, HashSet<String>>,
    writes_since_sweep: usize,
}

impl Inner {
    fn remove(&mut self, key: &str) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        for ns in entry.namespaces {
            if let Some(keys) = self.by_namespace.get_mut(&ns) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_namespace.remove(&ns);
                }
            }
        }
        true
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.writes_since_sweep = 0;
        expired.len()
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: RwLock<Inner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries. Also runs on its own every few hundred writes.
    pub async fn purge_expired(&self) -> usize {
        self.inner.write().await.purge_expired(Instant::now())
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        {
            let inner = self.inner.read().await;
            match inner.entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }
        self.inner.write().await.remove(key);
        None
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration, namespaces: &[String]) {
        let mut inner = self.inner.write().await;
        inner.writes_since_sweep += 1;
        if inner.writes_since_sweep >= SWEEP_EVERY {
            let purged = inner.purge_expired(Instant::now());
            if purged > 0 {
                debug!(purged, remaining = inner.entries.len(), "Swept expired cache entries");
            }
        }
        inner.remove(key);
        for ns in namespaces {
            inner
                .by_namespace
                .entry(ns.clone())
                .or_default()
                .insert(key.to_string());
        }
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
                namespaces: namespaces.to_vec(),
            },
        );
    }

    async fn invalidate(&self, key: &str) {
        self.inner.write().await.remove(key);
    }

    async fn invalidate_namespace(&self, namespace: &str) -> usize {
        let mut inner = self.inner.write().await;
        let Some(keys) = inner.by_namespace.remove(namespace) else {
            return 0;
        };
        keys.iter().filter(|key| inner.remove(key)).count()
    }
}
