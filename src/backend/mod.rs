//! Backing store implementations.

use crate::error::Result;
use std::time::Duration;

pub mod inmemory;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use redis::{PoolStats, RedisBackend, RedisConfig};

/// One entry of a batched write.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchEntry {
    pub key: String,
    pub value: Vec<u8>,
    /// `None` = no expiry.
    pub ttl: Option<Duration>,
}

impl BatchEntry {
    pub fn new(key: impl Into<String>, value: Vec<u8>, ttl: Option<Duration>) -> Self {
        BatchEntry {
            key: key.into(),
            value,
            ttl,
        }
    }
}

/// Outcome of one [`CacheBackend::consume_window`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowOutcome {
    /// Counted. Holds the window's count including this request.
    Admitted(u64),
    /// The block marker is present with this much time left; nothing counted.
    Blocked(Duration),
    /// This request pushed the count (held here) past the quota. The block
    /// marker was set and the counter dropped.
    Tripped(u64),
}

/// Trait for the backing key-value store.
///
/// Covers what the gateway needs from Redis: string get/set with TTL, set
/// membership, counters, pipelined batches and a liveness probe.
///
/// **IMPORTANT:** All methods use `&self`; implementations must be cheap to
/// clone and share their state (pool handle, `Arc`'d map).
///
/// **ASYNC:** All methods are async and must be awaited. Every call is a
/// potential network round trip.
#[allow(async_fn_in_trait)]
pub trait CacheBackend: Send + Sync + Clone {
    /// Retrieve value by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - Value found
    /// - `Ok(None)` - Key absent or expired
    ///
    /// # Errors
    /// Returns `Err` if the store is unreachable or the command times out.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store value with optional TTL (`None` = persistent).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key. Returns whether it existed.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check if key exists.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Bulk get. The result always has `keys.len()` elements.
    ///
    /// Default implementation calls `get()` for each key.
    /// Override for batch efficiency (Redis MGET).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.get(key).await?);
        }
        Ok(results)
    }

    /// Bulk write, each entry with its own TTL.
    ///
    /// Default implementation calls `set()` for each entry.
    /// Override to send a single pipeline.
    ///
    /// # Errors
    /// Returns `Err` if any write fails. Earlier writes are not rolled back.
    async fn mset(&self, entries: &[BatchEntry]) -> Result<()> {
        for entry in entries {
            self.set(&entry.key, entry.value.clone(), entry.ttl).await?;
        }
        Ok(())
    }

    /// Bulk delete. Returns how many of the keys existed.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn mdelete(&self, keys: &[&str]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Add `members` to the set stored at `set_key` and (re)arm the set's TTL.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn set_add(&self, set_key: &str, members: &[&str], ttl: Option<Duration>) -> Result<()>;

    /// All members of the set at `set_key`; empty if the set does not exist.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn set_members(&self, set_key: &str) -> Result<Vec<String>>;

    /// Atomically increment the counter at `key`.
    ///
    /// A counter created by this call expires after `window`; incrementing an
    /// existing counter leaves its expiry untouched.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn incr(&self, key: &str, window: Duration) -> Result<u64>;

    /// Remaining time to live of `key`.
    ///
    /// `None` when the key is absent or has no expiry.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Count one request against a fixed window guarded by a block marker.
    ///
    /// Checks `block_key`, increments `counter_key` (created with a `window`
    /// expiry) and, once the count exceeds `points`, sets `block_key` for
    /// `block` and deletes the counter. Implementations must run the whole
    /// sequence as one atomic step per key pair; the default does not and is
    /// only suitable for single-caller backends.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn consume_window(
        &self,
        counter_key: &str,
        block_key: &str,
        points: u64,
        window: Duration,
        block: Duration,
    ) -> Result<WindowOutcome> {
        window_steps(self, counter_key, block_key, points, window, block).await
    }

    /// Health check - verify backend is accessible (PING).
    ///
    /// # Errors
    /// Returns `Err` if backend is not accessible
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// The window sequence as separate backend calls.
pub(crate) async fn window_steps<B: CacheBackend>(
    backend: &B,
    counter_key: &str,
    block_key: &str,
    points: u64,
    window: Duration,
    block: Duration,
) -> Result<WindowOutcome> {
    if let Some(remaining) = backend.ttl(block_key).await? {
        return Ok(WindowOutcome::Blocked(remaining));
    }

    let count = backend.incr(counter_key, window).await?;
    if count <= points {
        return Ok(WindowOutcome::Admitted(count));
    }

    backend.set(block_key, b"1".to_vec(), Some(block)).await?;
    backend.delete(counter_key).await?;
    Ok(WindowOutcome::Tripped(count))
}
