//! Liveness and readiness probing.

use crate::backend::CacheBackend;
use crate::error::{Error, Result};
use crate::observability::{CacheStats, StatsCollector};
use crate::repository::DataRepository;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Outcome of probing one dependency.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub connected: bool,
    /// Round trip in milliseconds, when the dependency answered.
    pub ping_ms: Option<f64>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub redis: ProbeResult,
    /// Absent when no repository is attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<ProbeResult>,
    pub cache: CacheStats,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Probes the backing store and, optionally, the application database.
///
/// Healthy only when every probed dependency answers within `timeout`.
pub struct HealthChecker<B: CacheBackend> {
    backend: B,
    repository: Option<Arc<dyn DataRepository>>,
    stats: Arc<StatsCollector>,
    timeout: Duration,
}

impl<B: CacheBackend> HealthChecker<B> {
    pub fn new(backend: B, stats: Arc<StatsCollector>, timeout: Duration) -> Self {
        HealthChecker {
            backend,
            repository: None,
            stats,
            timeout,
        }
    }

    pub fn with_repository(mut self, repository: Arc<dyn DataRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Probe all dependencies concurrently.
    pub async fn check(&self) -> HealthReport {
        let redis = self.probe("redis", async {
            if self.backend.health_check().await? {
                Ok(())
            } else {
                Err(Error::BackendError("unexpected PING reply".to_string()))
            }
        });

        let database = async {
            match &self.repository {
                Some(repository) => Some(self.probe("database", repository.ping()).await),
                None => None,
            }
        };

        let (redis, database) = tokio::join!(redis, database);

        let healthy = redis.connected && database.as_ref().map_or(true, |db| db.connected);
        let status = if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport {
            status,
            redis,
            database,
            cache: self.stats.snapshot(),
        }
    }

    async fn probe<F>(&self, name: &str, ping: F) -> ProbeResult
    where
        F: Future<Output = Result<()>>,
    {
        let start = Instant::now();

        let outcome = match tokio::time::timeout(self.timeout, ping).await {
            Ok(result) => result,
            Err(elapsed) => Err(Error::from(elapsed)),
        };

        match outcome {
            Ok(()) => ProbeResult {
                connected: true,
                ping_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
                error: None,
            },
            Err(e) => {
                error!("{} health check failed: {}", name, e);
                ProbeResult {
                    connected: false,
                    ping_ms: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::repository::{InMemoryRepository, Record};
    use futures::future::BoxFuture;
    use futures::FutureExt;

    struct SlowRepository;

    impl DataRepository for SlowRepository {
        fn load<'a>(&'a self, _namespace: &'a str, _limit: Option<usize>) -> BoxFuture<'a, Result<Vec<Record>>> {
            async { Ok(Vec::new()) }.boxed()
        }

        fn ping(&self) -> BoxFuture<'_, Result<()>> {
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
            .boxed()
        }
    }

    fn checker() -> HealthChecker<InMemoryBackend> {
        HealthChecker::new(
            InMemoryBackend::new(),
            Arc::new(StatsCollector::new()),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_healthy_without_database() {
        let report = checker().check().await;
        assert!(report.is_healthy());
        assert!(report.redis.connected);
        assert!(report.redis.ping_ms.is_some());
        assert!(report.database.is_none());
    }

    #[tokio::test]
    async fn test_unhealthy_when_database_down() {
        let mut repo = InMemoryRepository::new();
        repo.set_offline(true);

        let report = checker().with_repository(Arc::new(repo)).check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        let database = report.database.unwrap();
        assert!(!database.connected);
        assert!(database.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout() {
        let report = checker()
            .with_repository(Arc::new(SlowRepository))
            .check()
            .await;

        assert!(!report.is_healthy());
        assert!(report.redis.connected);
        assert!(!report.database.unwrap().connected);
    }

    #[tokio::test]
    async fn test_report_json_shape() {
        let report = checker()
            .with_repository(Arc::new(InMemoryRepository::new()))
            .check()
            .await;
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["redis"]["connected"], true);
        assert!(json["database"]["pingMs"].is_number());
        assert!(json["cache"]["hitRate"].is_number());
    }
}
