//! Cache-aside orchestration for route handlers.

use crate::backend::CacheBackend;
use crate::store::CacheStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Per-call overrides for [`QueryCache::get_or_compute`].
///
/// ```ignore
/// let config = OperationConfig::default()
///     .with_ttl(Duration::from_secs(1800))
///     .with_params(json!({"difficulty": "beginner", "page": 2}));
/// ```
#[derive(Clone, Debug, Default)]
pub struct OperationConfig {
    /// TTL for the entry written on a miss.
    ///
    /// - **`None`**: the store's default TTL
    /// - **`Some(Duration::ZERO)`**: no expiry
    pub ttl_override: Option<Duration>,

    /// Parameters folded into the cache key (see [`crate::key::CacheKeyBuilder`]).
    pub params: Option<Value>,
}

impl OperationConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_override = Some(ttl);
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// "Check the cache, else compute and populate."
///
/// A cache outage only costs latency: the computed value is always what gets
/// returned, and cache failures are logged and counted, never surfaced.
pub struct QueryCache<B: CacheBackend> {
    store: Arc<CacheStore<B>>,
}

impl<B: CacheBackend> Clone for QueryCache<B> {
    fn clone(&self) -> Self {
        QueryCache {
            store: Arc::clone(&self.store),
        }
    }
}

impl<B: CacheBackend> QueryCache<B> {
    pub fn new(store: Arc<CacheStore<B>>) -> Self {
        QueryCache { store }
    }

    /// Return the cached value for `(namespace, identifier, config.params)`,
    /// or run `compute`, cache its result and return it.
    ///
    /// `compute` runs at most once, and only on a miss.
    ///
    /// # Errors
    /// Only `compute`'s own error, unchanged. Nothing is cached in that case.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let exercise = query_cache
    ///     .get_or_compute("exercises", "123", || repo.find_exercise("123"), OperationConfig::default())
    ///     .await?;
    /// ```
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        namespace: &str,
        identifier: &str,
        compute: F,
        config: OperationConfig,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let params = config.params.as_ref();

        if let Some(cached) = self.store.get::<T>(namespace, identifier, params).await {
            return Ok(cached);
        }

        let value = compute().await?;

        if !self
            .store
            .set(namespace, identifier, &value, config.ttl_override, params)
            .await
        {
            debug!(
                "Computed value for {}:{} returned uncached",
                namespace, identifier
            );
        }

        Ok(value)
    }

    pub fn store(&self) -> &CacheStore<B> {
        &self.store
    }
}
