//! Namespaced cache reads and writes.
//!
//! [`CacheStore`] is the fail-open layer over a [`CacheBackend`]: reads turn
//! every failure into a miss, writes turn every failure into `false`. Nothing
//! here returns a cache error to the caller except the operator-facing
//! [`CacheStore::delete`].
//!
//! Single-key reads and writes pass through the per-key [`CircuitRegistry`];
//! batch calls go straight to the backend as one pipelined round trip.

use crate::backend::{BatchEntry, CacheBackend};
use crate::circuit::CircuitRegistry;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::invalidation::InvalidationIndex;
use crate::key::CacheKeyBuilder;
use crate::observability::{CacheMetrics, CacheStats, NoOpMetrics, StatsCollector};
use crate::serialization::{deserialize_from_cache, serialize_for_cache};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One item of [`CacheStore::mset`].
#[derive(Clone, Debug)]
pub struct BatchItem<T> {
    pub identifier: String,
    pub value: T,
    /// `None` uses the store's default TTL.
    pub ttl: Option<Duration>,
}

impl<T> BatchItem<T> {
    pub fn new(identifier: impl Into<String>, value: T) -> Self {
        BatchItem {
            identifier: identifier.into(),
            value,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Circuit-protected, statistics-tracking cache over a backend.
///
/// # Example
///
/// ```ignore
/// use cache_gate::{CacheStore, backend::InMemoryBackend};
///
/// let store = CacheStore::new(InMemoryBackend::new());
/// store.set("exercises", "123", &exercise, None, None).await;
/// let cached: Option<Exercise> = store.get("exercises", "123", None).await;
/// ```
pub struct CacheStore<B: CacheBackend> {
    backend: B,
    config: CacheConfig,
    circuits: CircuitRegistry,
    index: InvalidationIndex<B>,
    stats: Arc<StatsCollector>,
    metrics: Box<dyn CacheMetrics>,
}

impl<B: CacheBackend> CacheStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, CacheConfig::default())
    }

    pub fn with_config(backend: B, config: CacheConfig) -> Self {
        CacheStore {
            index: InvalidationIndex::new(backend.clone(), &config),
            circuits: CircuitRegistry::new(config.circuit.clone()),
            backend,
            config,
            stats: Arc::new(StatsCollector::new()),
            metrics: Box::new(NoOpMetrics),
        }
    }

    /// Attach an extra metrics sink. The built-in [`StatsCollector`] keeps
    /// counting regardless.
    pub fn with_metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Share an existing collector, e.g. one already handed to a monitor.
    pub fn with_stats(mut self, stats: Arc<StatsCollector>) -> Self {
        self.stats = stats;
        self
    }

    /// Read `namespace:identifier[:params]`.
    ///
    /// `None` on a miss, an open circuit, a store error or an undecodable
    /// payload. Never fails.
    pub async fn get<T>(&self, namespace: &str, identifier: &str, params: Option<&Value>) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let key = CacheKeyBuilder::build(namespace, identifier, params);
        let start = Instant::now();

        let backend = &self.backend;
        let read_key = key.as_str();
        let result = self
            .circuits
            .guard(&key, || async move {
                match backend.get(read_key).await? {
                    Some(bytes) => deserialize_from_cache::<T>(&bytes).map(Some),
                    None => Ok(None),
                }
            })
            .await;

        match result {
            Ok(Some(Some(value))) => {
                self.on_hit(&key, start.elapsed());
                Some(value)
            }
            Ok(Some(None)) | Ok(None) => {
                self.on_miss(&key, start.elapsed());
                None
            }
            Err(e) => {
                self.on_error(&key, &e.to_string());
                None
            }
        }
    }

    /// Write `value` under `namespace:identifier[:params]` and track the key
    /// for namespace invalidation.
    ///
    /// `ttl` of `None` uses the configured default; `Some(Duration::ZERO)`
    /// stores without expiry. Returns `false` on any failure, including a
    /// failed tracking write after the value itself was stored.
    pub async fn set<T>(
        &self,
        namespace: &str,
        identifier: &str,
        value: &T,
        ttl: Option<Duration>,
        params: Option<&Value>,
    ) -> bool
    where
        T: Serialize + ?Sized,
    {
        let key = CacheKeyBuilder::build(namespace, identifier, params);
        let start = Instant::now();

        let bytes = match serialize_for_cache(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.on_error(&key, &e.to_string());
                return false;
            }
        };

        let backend = &self.backend;
        let index = &self.index;
        let write_key = key.as_str();
        let expiry = self.effective_ttl(ttl);
        let result = self
            .circuits
            .guard(&key, || async move {
                backend.set(write_key, bytes, expiry).await?;
                index.track(namespace, &[write_key]).await
            })
            .await;

        match result {
            Ok(Some(())) => {
                self.on_write(&key, start.elapsed());
                true
            }
            Ok(None) => {
                debug!("Cache write skipped for {}: circuit open", key);
                false
            }
            Err(e) => {
                self.on_error(&key, &e.to_string());
                false
            }
        }
    }

    /// Read many identifiers of one namespace in a single round trip.
    ///
    /// The result has exactly `identifiers.len()` elements; missing,
    /// undecodable and failed entries are `None`.
    pub async fn mget<T>(&self, namespace: &str, identifiers: &[&str]) -> Vec<Option<T>>
    where
        T: DeserializeOwned,
    {
        if identifiers.is_empty() {
            return Vec::new();
        }

        let keys: Vec<String> = identifiers
            .iter()
            .map(|id| CacheKeyBuilder::build(namespace, id, None))
            .collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let start = Instant::now();

        let raw = match self.backend.mget(&key_refs).await {
            Ok(raw) => raw,
            Err(e) => {
                self.on_error(&format!("{}:*", namespace), &e.to_string());
                return identifiers.iter().map(|_| None).collect();
            }
        };

        let share = start.elapsed() / keys.len() as u32;
        let mut values = Vec::with_capacity(keys.len());

        for (i, key) in keys.iter().enumerate() {
            let value = match raw.get(i).and_then(|slot| slot.as_deref()) {
                Some(bytes) => match deserialize_from_cache::<T>(bytes) {
                    Ok(value) => {
                        self.on_hit(key, share);
                        Some(value)
                    }
                    Err(e) => {
                        self.on_error(key, &e.to_string());
                        None
                    }
                },
                None => {
                    self.on_miss(key, share);
                    None
                }
            };
            values.push(value);
        }

        values
    }

    /// Write many entries of one namespace in a single pipeline, tracking
    /// every key for invalidation.
    ///
    /// `false` if anything fails; which entries landed is not reported.
    pub async fn mset<T>(&self, namespace: &str, items: &[BatchItem<T>]) -> bool
    where
        T: Serialize,
    {
        if items.is_empty() {
            return true;
        }

        let start = Instant::now();
        let mut entries = Vec::with_capacity(items.len());

        for item in items {
            let key = CacheKeyBuilder::build(namespace, &item.identifier, None);
            match serialize_for_cache(&item.value) {
                Ok(bytes) => entries.push(BatchEntry::new(key, bytes, self.effective_ttl(item.ttl))),
                Err(e) => {
                    self.on_error(&key, &e.to_string());
                    return false;
                }
            }
        }

        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        let result = match self.backend.mset(&entries).await {
            Ok(()) => self.index.track(namespace, &keys).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                let share = start.elapsed() / entries.len() as u32;
                for key in &keys {
                    self.on_write(key, share);
                }
                true
            }
            Err(e) => {
                self.on_error(&format!("{}:*", namespace), &e.to_string());
                false
            }
        }
    }

    /// Evict a single entry. Returns whether it existed.
    ///
    /// # Errors
    /// Returns `Err` if the backend delete fails.
    pub async fn delete(
        &self,
        namespace: &str,
        identifier: &str,
        params: Option<&Value>,
    ) -> Result<bool> {
        let key = CacheKeyBuilder::build(namespace, identifier, params);
        let existed = self.backend.delete(&key).await?;
        debug!("Cache delete for key: {} (existed: {})", key, existed);
        Ok(existed)
    }

    /// Evict every tracked key of `namespace`. See
    /// [`InvalidationIndex::invalidate_namespace`].
    ///
    /// # Errors
    /// Returns `Err` if the backend fails.
    pub async fn invalidate_namespace(&self, namespace: &str) -> Result<u64> {
        self.index.invalidate_namespace(namespace).await
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    pub fn stats_collector(&self) -> Arc<StatsCollector> {
        Arc::clone(&self.stats)
    }

    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    pub fn invalidation(&self) -> &InvalidationIndex<B> {
        &self.index
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        match ttl {
            None => Some(self.config.default_ttl),
            Some(ttl) if ttl.is_zero() => None,
            Some(ttl) => Some(ttl),
        }
    }

    fn on_hit(&self, key: &str, elapsed: Duration) {
        self.stats.record_hit(key, elapsed);
        self.metrics.record_hit(key, elapsed);
    }

    fn on_miss(&self, key: &str, elapsed: Duration) {
        self.stats.record_miss(key, elapsed);
        self.metrics.record_miss(key, elapsed);
    }

    fn on_write(&self, key: &str, elapsed: Duration) {
        self.stats.record_write(key, elapsed);
        self.metrics.record_write(key, elapsed);
    }

    fn on_error(&self, key: &str, error: &str) {
        self.stats.record_error(key, error);
        self.metrics.record_error(key, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Exercise {
        id: String,
        name: String,
        muscle_group: String,
    }

    fn squat() -> Exercise {
        Exercise {
            id: "123".to_string(),
            name: "Back Squat".to_string(),
            muscle_group: "legs".to_string(),
        }
    }

    #[derive(Default)]
    struct CountingMetrics {
        hits: AtomicUsize,
        writes: AtomicUsize,
    }

    impl CacheMetrics for Arc<CountingMetrics> {
        fn record_hit(&self, _key: &str, _duration: Duration) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }

        fn record_write(&self, _key: &str, _duration: Duration) {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = CacheStore::new(InMemoryBackend::new());

        assert!(store.set("exercises", "123", &squat(), None, None).await);
        let cached: Option<Exercise> = store.get("exercises", "123", None).await;
        assert_eq!(cached, Some(squat()));

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_miss() {
        let store = CacheStore::new(InMemoryBackend::new());
        let cached: Option<Exercise> = store.get("exercises", "nope", None).await;
        assert!(cached.is_none());
        assert_eq!(store.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_params_select_distinct_entries() {
        let store = CacheStore::new(InMemoryBackend::new());
        let page1 = json!({"page": 1});
        let page2 = json!({"page": 2});

        store.set("workouts", "list", &vec![1, 2], None, Some(&page1)).await;
        store.set("workouts", "list", &vec![3, 4], None, Some(&page2)).await;

        let first: Option<Vec<i32>> = store.get("workouts", "list", Some(&page1)).await;
        let second: Option<Vec<i32>> = store.get("workouts", "list", Some(&page2)).await;
        let bare: Option<Vec<i32>> = store.get("workouts", "list", None).await;

        assert_eq!(first, Some(vec![1, 2]));
        assert_eq!(second, Some(vec![3, 4]));
        assert_eq!(bare, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_and_zero_ttl() {
        let backend = InMemoryBackend::new();
        let store = CacheStore::new(backend.clone());

        store.set("a", "default", &1, None, None).await;
        store.set("a", "forever", &2, Some(Duration::ZERO), None).await;

        assert_eq!(
            backend.ttl("a:default").await.unwrap(),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(backend.ttl("a:forever").await.unwrap(), None);
        assert!(backend.exists("a:forever").await.unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_payload_counts_error() {
        let backend = InMemoryBackend::new();
        let store = CacheStore::new(backend.clone());
        backend.set("exercises:1", b"not json".to_vec(), None).await.unwrap();

        let cached: Option<Exercise> = store.get("exercises", "1", None).await;
        assert!(cached.is_none());
        assert_eq!(store.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_mget_preserves_shape() {
        let store = CacheStore::new(InMemoryBackend::new());
        store.set("n", "a", &"A", None, None).await;
        store.set("n", "c", &"C", None, None).await;

        let values: Vec<Option<String>> = store.mget("n", &["a", "b", "c", "d"]).await;
        assert_eq!(
            values,
            vec![Some("A".to_string()), None, Some("C".to_string()), None]
        );

        let stats = store.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_mget_empty() {
        let store = CacheStore::new(InMemoryBackend::new());
        let values: Vec<Option<String>> = store.mget("n", &[]).await;
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn test_mset_then_invalidate() {
        let store = CacheStore::new(InMemoryBackend::new());
        let items = vec![
            BatchItem::new("1", squat()),
            BatchItem::new("2", squat()).with_ttl(Duration::from_secs(60)),
        ];

        assert!(store.mset("exercises", &items).await);
        assert_eq!(store.stats().writes, 2);

        let values: Vec<Option<Exercise>> = store.mget("exercises", &["1", "2"]).await;
        assert!(values.iter().all(Option::is_some));

        assert_eq!(store.invalidate_namespace("exercises").await.unwrap(), 2);
        let values: Vec<Option<Exercise>> = store.mget("exercises", &["1", "2"]).await;
        assert!(values.iter().all(Option::is_none));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = CacheStore::new(InMemoryBackend::new());
        store.set("exercises", "123", &squat(), None, None).await;

        assert!(store.delete("exercises", "123", None).await.unwrap());
        assert!(!store.delete("exercises", "123", None).await.unwrap());
        let cached: Option<Exercise> = store.get("exercises", "123", None).await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_extra_metrics_sink() {
        let counting = Arc::new(CountingMetrics::default());
        let store =
            CacheStore::new(InMemoryBackend::new()).with_metrics(Box::new(counting.clone()));

        store.set("n", "1", &1, None, None).await;
        let _: Option<i32> = store.get("n", "1", None).await;

        assert_eq!(counting.writes.load(Ordering::SeqCst), 1);
        assert_eq!(counting.hits.load(Ordering::SeqCst), 1);
        assert_eq!(store.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_shared_stats_collector() {
        let stats = Arc::new(StatsCollector::new());
        let store = CacheStore::new(InMemoryBackend::new()).with_stats(stats.clone());

        let _: Option<i32> = store.get("n", "1", None).await;
        assert_eq!(stats.snapshot().misses, 1);
        assert!(Arc::ptr_eq(&stats, &store.stats_collector()));
    }
}
