//! Cache warming.
//!
//! A [`CacheWarmer`] holds one [`WarmPlan`] per namespace. Warming a namespace
//! loads a bounded batch from the [`DataRepository`] and writes each record
//! through [`CacheStore::set`] with the plan's TTL, so warmed keys are tracked
//! for invalidation like any other write. Runs at startup or when an operator
//! asks; user traffic never triggers it.

use crate::backend::CacheBackend;
use crate::repository::{DataRepository, Record};
use crate::store::CacheStore;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// How to warm one namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct WarmPlan {
    /// Name the plan is requested by and the repository is queried with.
    pub namespace: String,
    /// Namespace the entries are written under.
    pub target_namespace: String,
    pub ttl: Duration,
    /// Upper bound on records loaded; `None` loads everything.
    pub limit: Option<usize>,
}

impl WarmPlan {
    pub fn new(namespace: impl Into<String>, ttl: Duration) -> Self {
        let namespace = namespace.into();
        WarmPlan {
            target_namespace: namespace.clone(),
            namespace,
            ttl,
            limit: None,
        }
    }

    pub fn with_target(mut self, target_namespace: impl Into<String>) -> Self {
        self.target_namespace = target_namespace.into();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Plans for the gateway's hot namespaces: every exercise for two hours,
/// the 100 most recent public workouts for an hour, and user preferences for
/// thirty minutes.
pub fn default_plans() -> Vec<WarmPlan> {
    vec![
        WarmPlan::new("exercises", Duration::from_secs(7200)),
        WarmPlan::new("workouts", Duration::from_secs(3600)).with_limit(100),
        WarmPlan::new("users", Duration::from_secs(1800)).with_target("user_preferences"),
    ]
}

/// Outcome of warming one namespace.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WarmReport {
    pub namespace: String,
    pub loaded: usize,
    pub written: usize,
    pub failed: usize,
    /// Set when the repository could not be read, or the namespace has no plan.
    pub error: Option<String>,
}

pub struct CacheWarmer<B: CacheBackend> {
    store: Arc<CacheStore<B>>,
    repository: Arc<dyn DataRepository>,
    plans: Vec<WarmPlan>,
}

impl<B: CacheBackend> CacheWarmer<B> {
    /// Warmer with [`default_plans`].
    pub fn new(store: Arc<CacheStore<B>>, repository: Arc<dyn DataRepository>) -> Self {
        CacheWarmer {
            store,
            repository,
            plans: default_plans(),
        }
    }

    /// Add a plan, replacing any existing plan for the same namespace.
    pub fn with_plan(mut self, plan: WarmPlan) -> Self {
        self.plans.retain(|p| p.namespace != plan.namespace);
        self.plans.push(plan);
        self
    }

    /// Drop all plans, including the defaults.
    pub fn without_plans(mut self) -> Self {
        self.plans.clear();
        self
    }

    pub fn plans(&self) -> &[WarmPlan] {
        &self.plans
    }

    /// Warm `namespace` according to its plan.
    ///
    /// Never fails: an unknown namespace or unreadable repository is logged
    /// and reported, and a failed entry write is counted without aborting
    /// the rest of the batch.
    pub async fn warm(&self, namespace: &str) -> WarmReport {
        match self.plans.iter().find(|p| p.namespace == namespace) {
            Some(plan) => self.run(plan).await,
            None => {
                warn!("Unknown cache warming namespace: {}", namespace);
                WarmReport {
                    namespace: namespace.to_string(),
                    error: Some("no warming plan".to_string()),
                    ..WarmReport::default()
                }
            }
        }
    }

    /// Warm every planned namespace concurrently.
    pub async fn warm_all(&self) -> Vec<WarmReport> {
        info!("Starting cache warming for {} namespaces", self.plans.len());
        let reports = join_all(self.plans.iter().map(|plan| self.run(plan))).await;

        let written: usize = reports.iter().map(|r| r.written).sum();
        info!("Cache warming completed: {} entries written", written);
        reports
    }

    async fn run(&self, plan: &WarmPlan) -> WarmReport {
        let mut report = WarmReport {
            namespace: plan.namespace.clone(),
            ..WarmReport::default()
        };

        let records = match self.repository.load(&plan.namespace, plan.limit).await {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to load {} for cache warming: {}", plan.namespace, e);
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.loaded = records.len();

        let writes = records.iter().map(|record| self.write(plan, record));
        for (record, ok) in records.iter().zip(join_all(writes).await) {
            if ok {
                report.written += 1;
            } else {
                report.failed += 1;
                warn!(
                    "Failed to warm {}:{}",
                    plan.target_namespace, record.id
                );
            }
        }

        info!(
            "Warmed {} {} entries ({} failed)",
            report.written, plan.target_namespace, report.failed
        );
        report
    }

    async fn write(&self, plan: &WarmPlan, record: &Record) -> bool {
        self.store
            .set(
                &plan.target_namespace,
                &record.id,
                &record.data,
                Some(plan.ttl),
                None,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::repository::InMemoryRepository;
    use serde_json::{json, Value};

    fn repository() -> InMemoryRepository {
        let mut repo = InMemoryRepository::new();
        for i in 0..3 {
            repo.insert(
                "exercises",
                Record::new(i.to_string(), json!({"name": format!("exercise {}", i)})),
            );
        }
        for i in 0..150 {
            repo.insert("workouts", Record::new(format!("w{}", i), json!({"public": true})));
        }
        repo.insert("users", Record::new("u1", json!({"units": "metric"})));
        repo
    }

    fn setup(repo: InMemoryRepository) -> (Arc<CacheStore<InMemoryBackend>>, CacheWarmer<InMemoryBackend>) {
        let store = Arc::new(CacheStore::new(InMemoryBackend::new()));
        let warmer = CacheWarmer::new(store.clone(), Arc::new(repo));
        (store, warmer)
    }

    #[test]
    fn test_default_plans() {
        let plans = default_plans();
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].ttl, Duration::from_secs(7200));
        assert_eq!(plans[1].limit, Some(100));
        assert_eq!(plans[2].target_namespace, "user_preferences");
    }

    #[tokio::test]
    async fn test_warm_exercises() {
        let (store, warmer) = setup(repository());

        let report = warmer.warm("exercises").await;
        assert_eq!(report.loaded, 3);
        assert_eq!(report.written, 3);
        assert_eq!(report.failed, 0);

        let cached: Option<Value> = store.get("exercises", "1", None).await;
        assert_eq!(cached, Some(json!({"name": "exercise 1"})));
    }

    #[tokio::test]
    async fn test_warm_respects_limit_and_target() {
        let (store, warmer) = setup(repository());

        assert_eq!(warmer.warm("workouts").await.written, 100);
        warmer.warm("users").await;

        let prefs: Option<Value> = store.get("user_preferences", "u1", None).await;
        assert!(prefs.is_some());
        let under_source_name: Option<Value> = store.get("users", "u1", None).await;
        assert!(under_source_name.is_none());
    }

    #[tokio::test]
    async fn test_warmed_entries_are_invalidatable() {
        let (store, warmer) = setup(repository());
        warmer.warm("exercises").await;
        assert_eq!(store.invalidate_namespace("exercises").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unknown_namespace() {
        let (_, warmer) = setup(repository());
        let report = warmer.warm("nutrition").await;
        assert_eq!(report.loaded, 0);
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn test_repository_failure_is_reported() {
        let mut repo = repository();
        repo.set_offline(true);
        let (_, warmer) = setup(repo);

        let reports = warmer.warm_all().await;
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.error.is_some() && r.written == 0));
    }

    #[tokio::test]
    async fn test_custom_plan_replaces_default() {
        let (_, warmer) = setup(repository());
        let warmer = warmer.with_plan(WarmPlan::new("exercises", Duration::from_secs(60)).with_limit(1));

        assert_eq!(warmer.plans().len(), 3);
        assert_eq!(warmer.warm("exercises").await.written, 1);
        assert!(warmer.without_plans().plans().is_empty());
    }
}
