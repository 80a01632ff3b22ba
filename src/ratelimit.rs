//! Fixed-window request limiting with a blocking cooldown.
//!
//! Each limiter key owns two backend keys:
//!
//! - `{prefix}:{key}`: the window counter, created by the first request of a
//!   window with the window's TTL
//! - `{prefix}:blocked:{key}`: present while the key is blocked
//!
//! Exceeding the quota sets the block marker for `block_duration` and drops the
//! counter, so the first request after the block starts a fresh window. While
//! blocked, requests are rejected without touching the counter.
//!
//! When the backend itself is unreachable the limiter follows its
//! [`FailMode`]; the default admits traffic.

use crate::backend::{CacheBackend, WindowOutcome};
use crate::error::Result;
use serde::Serialize;
use std::time::Duration;

/// Behaviour when the limiter's own store is unreachable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailMode {
    /// Admit the request.
    #[default]
    Open,
    /// Reject the request with the window length as the retry hint.
    Closed,
}

/// Quota for one class of endpoints.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitConfig {
    pub key_prefix: String,
    /// Requests allowed per window.
    pub points: u64,
    pub window: Duration,
    /// How long a key stays blocked once it exceeds the quota.
    pub block_duration: Duration,
    pub fail_mode: FailMode,
}

impl RateLimitConfig {
    pub fn new(key_prefix: impl Into<String>, points: u64, window: Duration) -> Self {
        RateLimitConfig {
            key_prefix: key_prefix.into(),
            points,
            window,
            block_duration: window,
            fail_mode: FailMode::default(),
        }
    }

    pub fn with_block_duration(mut self, block_duration: Duration) -> Self {
        self.block_duration = block_duration;
        self
    }

    pub fn with_fail_mode(mut self, fail_mode: FailMode) -> Self {
        self.fail_mode = fail_mode;
        self
    }

    /// General API traffic: 100 requests per minute, blocked for a minute.
    pub fn gateway() -> Self {
        Self::new("api_gateway", 100, Duration::from_secs(60))
    }

    /// Login and signup: 5 attempts per 15 minutes, blocked for 30 minutes.
    pub fn auth() -> Self {
        Self::new("auth_limit", 5, Duration::from_secs(900))
            .with_block_duration(Duration::from_secs(1800))
    }

    /// LLM-backed endpoints: 20 requests per minute.
    pub fn ai() -> Self {
        Self::new("ai_limit", 20, Duration::from_secs(60))
    }

    /// File uploads: 10 per minute.
    pub fn upload() -> Self {
        Self::new("upload_limit", 10, Duration::from_secs(60))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::gateway()
    }
}

/// Result of [`RateLimiter::consume`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Points left in the current window.
    pub remaining: u64,
    /// Seconds until a rejected caller may retry; `0` when allowed.
    #[serde(rename = "retryAfter")]
    pub retry_after_secs: u64,
}

impl RateLimitDecision {
    fn allow(remaining: u64) -> Self {
        RateLimitDecision {
            allowed: true,
            remaining,
            retry_after_secs: 0,
        }
    }

    fn deny(retry_after: Duration) -> Self {
        RateLimitDecision {
            allowed: false,
            remaining: 0,
            retry_after_secs: ceil_secs(retry_after),
        }
    }
}

pub struct RateLimiter<B: CacheBackend> {
    backend: B,
    config: RateLimitConfig,
}

impl<B: CacheBackend> RateLimiter<B> {
    pub fn new(backend: B, config: RateLimitConfig) -> Self {
        RateLimiter { backend, config }
    }

    /// Count one request from `key` against the quota.
    ///
    /// Never fails; backend errors resolve through the configured [`FailMode`].
    pub async fn consume(&self, key: &str) -> RateLimitDecision {
        match self.try_consume(key).await {
            Ok(decision) => {
                if !decision.allowed {
                    debug!(
                        "Rate limit exceeded for {}:{}, retry after {}s",
                        self.config.key_prefix, key, decision.retry_after_secs
                    );
                }
                decision
            }
            Err(e) => match self.config.fail_mode {
                FailMode::Open => {
                    warn!(
                        "Rate limiter store unavailable for {}, admitting request: {}",
                        key, e
                    );
                    RateLimitDecision::allow(self.config.points)
                }
                FailMode::Closed => {
                    warn!(
                        "Rate limiter store unavailable for {}, rejecting request: {}",
                        key, e
                    );
                    RateLimitDecision::deny(self.config.window)
                }
            },
        }
    }

    async fn try_consume(&self, key: &str) -> Result<RateLimitDecision> {
        let outcome = self
            .backend
            .consume_window(
                &self.counter_key(key),
                &self.block_key(key),
                self.config.points,
                self.config.window,
                self.config.block_duration,
            )
            .await?;

        Ok(match outcome {
            WindowOutcome::Admitted(count) => RateLimitDecision::allow(self.config.points - count),
            WindowOutcome::Blocked(remaining) => RateLimitDecision::deny(remaining),
            WindowOutcome::Tripped(count) => {
                info!(
                    "Blocking {}:{} for {:?} after {} requests",
                    self.config.key_prefix, key, self.config.block_duration, count
                );
                RateLimitDecision::deny(self.config.block_duration)
            }
        })
    }

    /// Forget the counter and any block for `key`.
    ///
    /// # Errors
    /// Returns `Err` if the backend delete fails.
    pub async fn reset(&self, key: &str) -> Result<()> {
        let counter_key = self.counter_key(key);
        let block_key = self.block_key(key);
        self.backend
            .mdelete(&[counter_key.as_str(), block_key.as_str()])
            .await?;
        Ok(())
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn counter_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    fn block_key(&self, key: &str) -> String {
        format!("{}:blocked:{}", self.config.key_prefix, key)
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;

    fn limiter(points: u64, window: u64, block: u64) -> RateLimiter<InMemoryBackend> {
        let config = RateLimitConfig::new("test", points, Duration::from_secs(window))
            .with_block_duration(Duration::from_secs(block));
        RateLimiter::new(InMemoryBackend::new(), config)
    }

    #[test]
    fn test_presets() {
        let auth = RateLimitConfig::auth();
        assert_eq!(auth.points, 5);
        assert_eq!(auth.window, Duration::from_secs(900));
        assert_eq!(auth.block_duration, Duration::from_secs(1800));

        let gateway = RateLimitConfig::default();
        assert_eq!(gateway.points, 100);
        assert_eq!(gateway.block_duration, Duration::from_secs(60));
        assert_eq!(gateway.fail_mode, FailMode::Open);

        assert_eq!(RateLimitConfig::ai().points, 20);
        assert_eq!(RateLimitConfig::upload().points, 10);
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ceil_secs(Duration::from_secs(30)), 30);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::ZERO), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_then_block() {
        let limiter = limiter(3, 10, 30);

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.consume("1.2.3.4").await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = limiter.consume("1.2.3.4").await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs, 30);

        tokio::time::advance(Duration::from_secs(10)).await;
        let still_blocked = limiter.consume("1.2.3.4").await;
        assert!(!still_blocked.allowed);
        assert_eq!(still_blocked.retry_after_secs, 20);

        tokio::time::advance(Duration::from_secs(21)).await;
        let after_block = limiter.consume("1.2.3.4").await;
        assert!(after_block.allowed);
        assert_eq!(after_block.remaining, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_resets_count() {
        let limiter = limiter(2, 10, 30);

        limiter.consume("k").await;
        limiter.consume("k").await;
        tokio::time::advance(Duration::from_secs(11)).await;

        let decision = limiter.consume("k").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = limiter(1, 60, 60);

        assert!(limiter.consume("a").await.allowed);
        assert!(!limiter.consume("a").await.allowed);
        assert!(limiter.consume("b").await.allowed);
    }

    #[tokio::test]
    async fn test_reset_clears_block() {
        let limiter = limiter(1, 60, 600);

        limiter.consume("a").await;
        assert!(!limiter.consume("a").await.allowed);

        limiter.reset("a").await.unwrap();
        assert!(limiter.consume("a").await.allowed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_burst_admits_exactly_quota() {
        let backend = InMemoryBackend::new();
        let limiter = std::sync::Arc::new(RateLimiter::new(
            backend.clone(),
            RateLimitConfig::new("burst", 5, Duration::from_secs(60)),
        ));

        let mut handles = vec![];
        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.consume("10.0.0.1").await }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 5);
        // the trip dropped the counter and nothing recreated it
        assert!(!backend.exists("burst:10.0.0.1").await.unwrap());
        assert!(backend.exists("burst:blocked:10.0.0.1").await.unwrap());
    }

    #[test]
    fn test_decision_serialises_retry_after() {
        let json = serde_json::to_value(RateLimitDecision::deny(Duration::from_secs(60))).unwrap();
        assert_eq!(json["allowed"], false);
        assert_eq!(json["retryAfter"], 60);
    }
}
