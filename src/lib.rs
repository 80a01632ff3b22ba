//! # cache-gate
//!
//! Redis-backed cache and rate-limiting layer for API gateways.
//!
//! ## Features
//!
//! - **Namespaced keys:** `namespace:identifier[:params-hash]`, with parameter
//!   objects canonicalised so property order never changes the key
//! - **Fail-open caching:** reads degrade to misses and writes to `false`; a
//!   cache outage never becomes a user-visible error
//! - **Per-key circuit breaking:** three consecutive store failures stop calls
//!   for that key for 30 seconds
//! - **Namespace invalidation:** every write is tracked in a self-expiring set,
//!   evicted in one pipeline without scanning the keyspace
//! - **Cache warming, fixed-window rate limiting, stats and health probes**
//! - **Backend agnostic:** in-memory for tests and single-process use, Redis
//!   (feature `redis`) for production
//!
//! ## Quick Start
//!
//! ```ignore
//! use cache_gate::{CacheService, OperationConfig, RateLimitConfig, backend::InMemoryBackend};
//!
//! let cache = CacheService::new(InMemoryBackend::new());
//! let limiter = cache.rate_limiter(RateLimitConfig::gateway());
//!
//! // In the request middleware
//! let decision = limiter.consume(&client_ip).await;
//! if !decision.allowed {
//!     // 429, Retry-After: decision.retry_after_secs
//! }
//!
//! // In the handler
//! let exercise = cache
//!     .get_or_compute("exercises", "123", || db.find_exercise("123"), OperationConfig::default())
//!     .await?;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod circuit;
pub mod config;
pub mod error;
pub mod health;
pub mod invalidation;
pub mod key;
pub mod observability;
pub mod query;
pub mod ratelimit;
pub mod repository;
pub mod serialization;
pub mod service;
pub mod store;
pub mod warmer;

// Re-exports for convenience
pub use backend::CacheBackend;
pub use circuit::CircuitRegistry;
pub use config::{CacheConfig, CircuitConfig};
pub use error::{Error, Result};
pub use health::{HealthChecker, HealthReport, HealthStatus};
pub use invalidation::InvalidationIndex;
pub use key::CacheKeyBuilder;
pub use observability::{CacheMetrics, CacheStats, MonitorConfig, StatsCollector};
pub use query::{OperationConfig, QueryCache};
pub use ratelimit::{FailMode, RateLimitConfig, RateLimitDecision, RateLimiter};
pub use repository::{DataRepository, Record};
pub use service::CacheService;
pub use store::{BatchItem, CacheStore};
pub use warmer::{CacheWarmer, WarmPlan, WarmReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
