//! High-level cache service for web applications.
//!
//! Bundles the store, query cache, warmer and health checker behind `Arc`s so
//! one cheap-to-clone handle can be put in HTTP handler state.

use crate::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::health::{HealthChecker, HealthReport};
use crate::observability::{spawn_monitor, CacheMetrics, CacheStats, MonitorConfig};
use crate::query::{OperationConfig, QueryCache};
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::repository::DataRepository;
use crate::store::CacheStore;
use crate::warmer::{CacheWarmer, WarmPlan, WarmReport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// High-level cache service.
///
/// # Example
///
/// ```ignore
/// use cache_gate::{CacheService, backend::InMemoryBackend};
///
/// let cache = CacheService::builder(InMemoryBackend::new())
///     .repository(Arc::new(repo))
///     .build();
///
/// cache.warm_all().await;
/// let exercise = cache
///     .get_or_compute("exercises", "123", || repo.find("123"), OperationConfig::default())
///     .await?;
/// ```
#[derive(Clone)]
pub struct CacheService<B: CacheBackend> {
    store: Arc<CacheStore<B>>,
    query: QueryCache<B>,
    warmer: Option<Arc<CacheWarmer<B>>>,
    health: Arc<HealthChecker<B>>,
}

impl<B: CacheBackend> CacheService<B> {
    /// Service with default configuration and no repository.
    pub fn new(backend: B) -> Self {
        Self::builder(backend).build()
    }

    pub fn builder(backend: B) -> CacheServiceBuilder<B> {
        CacheServiceBuilder {
            backend,
            config: CacheConfig::default(),
            repository: None,
            metrics: None,
            plans: Vec::new(),
        }
    }

    /// See [`QueryCache::get_or_compute`].
    ///
    /// # Errors
    /// Only `compute`'s own error.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        namespace: &str,
        identifier: &str,
        compute: F,
        config: OperationConfig,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.query
            .get_or_compute(namespace, identifier, compute, config)
            .await
    }

    /// See [`CacheStore::invalidate_namespace`].
    ///
    /// # Errors
    /// Returns `Err` if the backend fails.
    pub async fn invalidate_namespace(&self, namespace: &str) -> Result<u64> {
        self.store.invalidate_namespace(namespace).await
    }

    /// Warm one namespace. Without a repository nothing is loaded and the
    /// report carries the reason.
    pub async fn warm(&self, namespace: &str) -> WarmReport {
        match &self.warmer {
            Some(warmer) => warmer.warm(namespace).await,
            None => {
                warn!("Cache warming requested for {} without a repository", namespace);
                WarmReport {
                    namespace: namespace.to_string(),
                    error: Some("no repository configured".to_string()),
                    ..WarmReport::default()
                }
            }
        }
    }

    pub async fn warm_all(&self) -> Vec<WarmReport> {
        match &self.warmer {
            Some(warmer) => warmer.warm_all().await,
            None => Vec::new(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub async fn health_check(&self) -> HealthReport {
        self.health.check().await
    }

    /// Start the periodic performance report over this service's counters.
    pub fn spawn_monitor(&self, config: MonitorConfig) -> JoinHandle<()> {
        spawn_monitor(self.store.stats_collector(), config)
    }

    /// Limiter sharing this service's backend.
    pub fn rate_limiter(&self, config: RateLimitConfig) -> RateLimiter<B> {
        RateLimiter::new(self.store.backend().clone(), config)
    }

    pub fn store(&self) -> &CacheStore<B> {
        &self.store
    }

    pub fn query(&self) -> &QueryCache<B> {
        &self.query
    }
}

/// Builder for [`CacheService`].
pub struct CacheServiceBuilder<B: CacheBackend> {
    backend: B,
    config: CacheConfig,
    repository: Option<Arc<dyn DataRepository>>,
    metrics: Option<Box<dyn CacheMetrics>>,
    plans: Vec<WarmPlan>,
}

impl<B: CacheBackend> CacheServiceBuilder<B> {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Data source for warming and the database health probe.
    pub fn repository(mut self, repository: Arc<dyn DataRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Extra warming plan, on top of the defaults.
    pub fn plan(mut self, plan: WarmPlan) -> Self {
        self.plans.push(plan);
        self
    }

    pub fn build(self) -> CacheService<B> {
        let probe_timeout = self.config.probe_timeout;

        let mut store = CacheStore::with_config(self.backend.clone(), self.config);
        if let Some(metrics) = self.metrics {
            store = store.with_metrics(metrics);
        }
        let store = Arc::new(store);

        let mut health = HealthChecker::new(self.backend, store.stats_collector(), probe_timeout);
        let warmer = match self.repository {
            Some(repository) => {
                health = health.with_repository(Arc::clone(&repository));
                let warmer = self
                    .plans
                    .into_iter()
                    .fold(CacheWarmer::new(Arc::clone(&store), repository), |w, plan| {
                        w.with_plan(plan)
                    });
                Some(Arc::new(warmer))
            }
            None => None,
        };

        CacheService {
            query: QueryCache::new(Arc::clone(&store)),
            store,
            warmer,
            health: Arc::new(health),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::repository::{InMemoryRepository, Record};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn repository() -> Arc<InMemoryRepository> {
        let mut repo = InMemoryRepository::new();
        repo.insert("exercises", Record::new("1", json!({"name": "Deadlift"})));
        repo.insert("nutrition", Record::new("oats", json!({"kcal": 389})));
        Arc::new(repo)
    }

    #[test]
    fn test_cache_service_clone() {
        let service1 = CacheService::new(InMemoryBackend::new());
        let service2 = service1.clone();

        // Both handles share the same store
        assert!(Arc::ptr_eq(&service1.store, &service2.store));
    }

    #[tokio::test]
    async fn test_get_or_compute_and_invalidate() {
        let service = CacheService::new(InMemoryBackend::new());

        let value: std::result::Result<Value, String> = service
            .get_or_compute(
                "exercises",
                "1",
                || async { Ok(json!({"name": "Row"})) },
                OperationConfig::default(),
            )
            .await;
        assert_eq!(value.unwrap(), json!({"name": "Row"}));
        assert_eq!(service.stats().writes, 1);

        assert_eq!(service.invalidate_namespace("exercises").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_warm_requires_repository() {
        let service = CacheService::new(InMemoryBackend::new());
        assert!(service.warm("exercises").await.error.is_some());
        assert!(service.warm_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_builder_with_repository_and_plan() {
        let service = CacheService::builder(InMemoryBackend::new())
            .repository(repository())
            .plan(WarmPlan::new("nutrition", Duration::from_secs(600)))
            .build();

        let reports = service.warm_all().await;
        assert_eq!(reports.len(), 4);
        assert_eq!(service.warm("nutrition").await.written, 1);

        let oats: Option<Value> = service.store().get("nutrition", "oats", None).await;
        assert_eq!(oats, Some(json!({"kcal": 389})));

        let health = service.health_check().await;
        assert!(health.is_healthy());
        assert!(health.database.is_some());
    }

    #[tokio::test]
    async fn test_rate_limiter_shares_backend() {
        let backend = InMemoryBackend::new();
        let service = CacheService::new(backend.clone());
        let limiter = service.rate_limiter(RateLimitConfig::new("t", 1, Duration::from_secs(60)));

        assert!(limiter.consume("ip").await.allowed);
        assert!(backend.exists("t:ip").await.unwrap());
    }

    #[tokio::test]
    async fn test_spawn_monitor() {
        let service = CacheService::new(InMemoryBackend::new());
        let handle = service.spawn_monitor(MonitorConfig::default());
        handle.abort();
    }
}
