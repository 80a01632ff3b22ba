//! In-memory backend (default, thread-safe, async).
//!
//! Uses DashMap for lock-free concurrent access with per-key sharding.
//! Mirrors the subset of Redis semantics the gateway relies on: string values,
//! sets and counters, each with an optional expiry checked lazily on access.
//!
//! Expiry uses `tokio::time::Instant`, so tests running with a paused clock can
//! step over TTLs with `tokio::time::advance`.

use super::{window_steps, BatchEntry, CacheBackend, WindowOutcome};
use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

enum Data {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
    Counter(u64),
}

impl Data {
    fn kind(&self) -> &'static str {
        match self {
            Data::Bytes(_) => "string",
            Data::Set(_) => "set",
            Data::Counter(_) => "counter",
        }
    }

    fn byte_len(&self) -> usize {
        match self {
            Data::Bytes(b) => b.len(),
            Data::Set(s) => s.iter().map(String::len).sum(),
            Data::Counter(_) => std::mem::size_of::<u64>(),
        }
    }
}

/// Stored value with optional expiration.
struct StoredEntry {
    data: Data,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn new(data: Data, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        StoredEntry { data, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

fn wrong_type(key: &str, found: &str, wanted: &str) -> Error {
    Error::BackendError(format!(
        "WRONGTYPE key {} holds a {}, expected a {}",
        key, found, wanted
    ))
}

/// Thread-safe async in-memory backend.
///
/// # Example
///
/// ```no_run
/// use cache_gate::backend::{InMemoryBackend, CacheBackend};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::new();
///
///     backend.set("exercises:1", b"{}".to_vec(), Some(Duration::from_secs(300))).await?;
///     assert!(backend.get("exercises:1").await?.is_some());
///
///     backend.set_add("invalidation_set:exercises", &["exercises:1"], None).await?;
///     assert_eq!(backend.set_members("invalidation_set:exercises").await?.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, StoredEntry>>,
    // serialises `consume_window`, which spans two keys
    windows: Arc<Mutex<()>>,
}

impl InMemoryBackend {
    /// Create a new in-memory backend.
    pub fn new() -> Self {
        InMemoryBackend {
            store: Arc::new(DashMap::new()),
            windows: Arc::new(Mutex::new(())),
        }
    }

    /// Number of stored keys, expired ones included until they are touched.
    pub async fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Memory statistics.
    pub async fn stats(&self) -> MemoryStats {
        let total_bytes: usize = self.store.iter().map(|e| e.data.byte_len()).sum();
        let expired_count = self.store.iter().filter(|e| e.is_expired()).count();

        MemoryStats {
            total_entries: self.store.len(),
            expired_entries: expired_count,
            total_bytes,
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let before = self.store.len();
        self.store.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.store.len());
        if removed > 0 {
            debug!("✓ InMemory PURGE removed {} expired keys", removed);
        }
        removed
    }

    fn remove_if_expired(&self, key: &str) {
        self.store.remove_if(key, |_, entry| entry.is_expired());
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.store.get(key) {
            if !entry.is_expired() {
                debug!("✓ InMemory GET {} -> HIT", key);
                return match &entry.data {
                    Data::Bytes(b) => Ok(Some(b.clone())),
                    Data::Counter(n) => Ok(Some(n.to_string().into_bytes())),
                    Data::Set(_) => Err(wrong_type(key, "set", "string")),
                };
            }
        }

        self.remove_if_expired(key);
        debug!("✓ InMemory GET {} -> MISS", key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.store
            .insert(key.to_string(), StoredEntry::new(Data::Bytes(value), ttl));

        if let Some(d) = ttl {
            debug!("✓ InMemory SET {} (TTL: {:?})", key, d);
        } else {
            debug!("✓ InMemory SET {}", key);
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self
            .store
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired());
        debug!("✓ InMemory DELETE {} (existed: {})", key, existed);
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if let Some(entry) = self.store.get(key) {
            return Ok(!entry.is_expired());
        }

        Ok(false)
    }

    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        // MGET never fails on type mismatch; non-string keys read as nil
        let results: Vec<Option<Vec<u8>>> = keys
            .iter()
            .map(|k| match self.store.get(*k) {
                Some(entry) if !entry.is_expired() => match &entry.data {
                    Data::Bytes(b) => Some(b.clone()),
                    Data::Counter(n) => Some(n.to_string().into_bytes()),
                    Data::Set(_) => None,
                },
                _ => None,
            })
            .collect();

        debug!("✓ InMemory MGET {} keys", keys.len());
        Ok(results)
    }

    async fn mset(&self, entries: &[BatchEntry]) -> Result<()> {
        for entry in entries {
            self.store.insert(
                entry.key.clone(),
                StoredEntry::new(Data::Bytes(entry.value.clone()), entry.ttl),
            );
        }

        debug!("✓ InMemory MSET {} keys", entries.len());
        Ok(())
    }

    async fn mdelete(&self, keys: &[&str]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.store.remove(*key) {
                if !entry.is_expired() {
                    removed += 1;
                }
            }
        }

        debug!("✓ InMemory MDELETE {} keys ({} existed)", keys.len(), removed);
        Ok(removed)
    }

    async fn set_add(&self, set_key: &str, members: &[&str], ttl: Option<Duration>) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let added = members.iter().map(|m| m.to_string());

        match self.store.entry(set_key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired() {
                    *entry = StoredEntry::new(Data::Set(added.collect()), ttl);
                } else {
                    match &mut entry.data {
                        Data::Set(existing) => existing.extend(added),
                        other => return Err(wrong_type(set_key, other.kind(), "set")),
                    }
                    entry.expires_at = ttl.map(|d| Instant::now() + d);
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(StoredEntry::new(Data::Set(added.collect()), ttl));
            }
        }

        debug!("✓ InMemory SADD {} ({} members)", set_key, members.len());
        Ok(())
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>> {
        if let Some(entry) = self.store.get(set_key) {
            if !entry.is_expired() {
                return match &entry.data {
                    Data::Set(members) => Ok(members.iter().cloned().collect()),
                    other => Err(wrong_type(set_key, other.kind(), "set")),
                };
            }
        }

        self.remove_if_expired(set_key);
        Ok(Vec::new())
    }

    async fn incr(&self, key: &str, window: Duration) -> Result<u64> {
        let count = match self.store.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired() {
                    *entry = StoredEntry::new(Data::Counter(1), Some(window));
                    1
                } else {
                    let next = match &entry.data {
                        Data::Counter(n) => n + 1,
                        Data::Bytes(bytes) => std::str::from_utf8(bytes)
                            .ok()
                            .and_then(|s| s.parse::<u64>().ok())
                            .map(|n| n + 1)
                            .ok_or_else(|| {
                                Error::BackendError(format!(
                                    "value at {} is not an integer",
                                    key
                                ))
                            })?,
                        Data::Set(_) => return Err(wrong_type(key, "set", "counter")),
                    };
                    entry.data = Data::Counter(next);
                    next
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(StoredEntry::new(Data::Counter(1), Some(window)));
                1
            }
        };

        debug!("✓ InMemory INCR {} -> {}", key, count);
        Ok(count)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        if let Some(entry) = self.store.get(key) {
            return Ok(match entry.expires_at {
                Some(exp) if exp > now => Some(exp - now),
                _ => None,
            });
        }
        Ok(None)
    }

    async fn consume_window(
        &self,
        counter_key: &str,
        block_key: &str,
        points: u64,
        window: Duration,
        block: Duration,
    ) -> Result<WindowOutcome> {
        let _guard = self.windows.lock().await;
        window_steps(self, counter_key, block_key, points, window, block).await
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// In-memory backend statistics.
#[derive(Clone, Debug)]
pub struct MemoryStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub total_bytes: usize,
}
