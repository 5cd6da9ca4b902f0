use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub items: usize,
}

struct CacheEntry {
    payload: Value,
    stored_at: Instant,
    ttl: Duration,
    generation: u64,
    eviction: JoinHandle<()>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) > self.ttl
    }
}

struct CacheShared {
    entries: Mutex<HashMap<String, CacheEntry>>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Drop for CacheShared {
    fn drop(&mut self) {
        if let Ok(mut entries) = self.entries.lock() {
            for (_, entry) in entries.drain() {
                entry.eviction.abort();
            }
        }
    }
}

/// In-memory key/value store with per-entry expiry. Values round-trip
/// through JSON so heterogeneous payloads can share one store. Each entry
/// schedules an eviction task, but expiry is also enforced lazily on read
/// so a drifting timer can never resurrect a stale value.
///
/// Not a module-level singleton: construct one per application root and
/// hand out clones (they share storage).
#[derive(Clone)]
pub struct TtlCache {
    shared: Arc<CacheShared>,
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TtlCache {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(CacheShared {
                entries: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    /// Stores `value` under `key` for `ttl`. A later `put` on the same key
    /// wins: it cancels the previous eviction task and restarts the clock.
    pub fn put<T>(&self, key: impl Into<String>, value: &T, ttl: Duration) -> Result<(), CacheError>
    where
        T: Serialize,
    {
        let key = key.into();
        let payload = serde_json::to_value(value)?;
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let eviction = spawn_eviction(Arc::downgrade(&self.shared), key.clone(), ttl, generation);
        let entry = CacheEntry {
            payload,
            stored_at: Instant::now(),
            ttl,
            generation,
            eviction,
        };
        if let Ok(mut entries) = self.shared.entries.lock() {
            if let Some(previous) = entries.insert(key, entry) {
                previous.eviction.abort();
            }
        }
        Ok(())
    }

    /// Returns the stored value if present and unexpired, `None` otherwise.
    /// Expired entries are evicted on access even if their timer has not
    /// fired yet.
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let payload = {
            let mut entries = self.shared.entries.lock().ok()?;
            match entries.get(key) {
                Some(entry) if entry.is_expired(Instant::now()) => {
                    if let Some(stale) = entries.remove(key) {
                        stale.eviction.abort();
                    }
                    None
                }
                Some(entry) => Some(entry.payload.clone()),
                None => None,
            }
        };
        match payload {
            Some(value) => {
                self.shared.hits.fetch_add(1, Ordering::Relaxed);
                match serde_json::from_value(value) {
                    Ok(decoded) => Some(decoded),
                    Err(err) => {
                        tracing::warn!("cache entry for {key} failed to decode: {err}");
                        self.remove(key);
                        None
                    }
                }
            }
            None => {
                self.shared.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get::<Value>(key).is_some()
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.shared.entries.lock() {
            if let Some(entry) = entries.remove(key) {
                entry.eviction.abort();
            }
        }
    }

    /// Drops every entry, cancelling pending eviction tasks first so no
    /// timer outlives the data it was guarding.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.shared.entries.lock() {
            for (_, entry) in entries.drain() {
                entry.eviction.abort();
            }
        }
        self.shared.hits.store(0, Ordering::Relaxed);
        self.shared.misses.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        let items = self
            .shared
            .entries
            .lock()
            .map(|entries| entries.len())
            .unwrap_or(0);
        CacheStats {
            hits: self.shared.hits.load(Ordering::Relaxed),
            misses: self.shared.misses.load(Ordering::Relaxed),
            items,
        }
    }

    /// Joins key parts with `:`, skipping empty segments.
    pub fn make_key(parts: &[&str]) -> String {
        parts
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(":")
    }
}

fn spawn_eviction(
    shared: Weak<CacheShared>,
    key: String,
    ttl: Duration,
    generation: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if let Ok(mut entries) = shared.entries.lock() {
            // Only evict the entry this timer was armed for. A newer put
            // under the same key carries a newer generation.
            if entries
                .get(&key)
                .is_some_and(|entry| entry.generation == generation)
            {
                entries.remove(&key);
            }
        }
    })
}
