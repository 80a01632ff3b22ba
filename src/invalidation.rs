//! Namespace-wide invalidation.
//!
//! Every key written through [`CacheStore`](crate::store::CacheStore) is also
//! recorded in a per-namespace set (`invalidation_set:{namespace}`). Evicting a
//! namespace reads that set and deletes its members plus the set itself in a
//! single pipeline; there is no keyspace scan.
//!
//! The set carries a TTL of twice the default entry TTL and is re-armed on
//! every write, so a namespace nobody invalidates cleans itself up.

use crate::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::key::CacheKeyBuilder;
use std::time::Duration;

pub struct InvalidationIndex<B: CacheBackend> {
    backend: B,
    prefix: String,
    set_ttl: Duration,
}

impl<B: CacheBackend> InvalidationIndex<B> {
    pub fn new(backend: B, config: &CacheConfig) -> Self {
        InvalidationIndex {
            backend,
            prefix: config.invalidation_prefix.clone(),
            set_ttl: config.invalidation_set_ttl(),
        }
    }

    /// Key of the set tracking `namespace`.
    pub fn set_key(&self, namespace: &str) -> String {
        CacheKeyBuilder::invalidation_set(&self.prefix, namespace)
    }

    /// Record `keys` as live members of `namespace`.
    ///
    /// # Errors
    /// Returns `Err` if the backend rejects the SADD.
    pub async fn track(&self, namespace: &str, keys: &[&str]) -> Result<()> {
        let set_key = self.set_key(namespace);
        self.backend.set_add(&set_key, keys, Some(self.set_ttl)).await
    }

    /// Keys currently tracked for `namespace`.
    pub async fn members(&self, namespace: &str) -> Result<Vec<String>> {
        self.backend.set_members(&self.set_key(namespace)).await
    }

    /// Delete every tracked key of `namespace` and the tracking set.
    ///
    /// Returns the number of tracked keys; `0` when the set is absent or empty,
    /// in which case nothing is deleted.
    ///
    /// # Errors
    /// Returns `Err` if reading the set or the pipelined delete fails. A failed
    /// delete may have removed some keys already.
    pub async fn invalidate_namespace(&self, namespace: &str) -> Result<u64> {
        let set_key = self.set_key(namespace);
        let members = self.backend.set_members(&set_key).await?;

        if members.is_empty() {
            debug!("No tracked keys for namespace {}", namespace);
            return Ok(0);
        }

        let mut keys: Vec<&str> = members.iter().map(String::as_str).collect();
        keys.push(&set_key);
        self.backend.mdelete(&keys).await?;

        info!(
            "Invalidated {} cache entries for namespace: {}",
            members.len(),
            namespace
        );
        Ok(members.len() as u64)
    }
}
