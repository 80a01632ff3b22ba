//! Per-key circuit breaking for backing-store calls.
//!
//! State is process-local and best-effort: each gateway instance tracks its
//! own failures and nothing is persisted. A circuit opens after
//! `failure_threshold` consecutive failures on one key and fails fast for
//! `cooldown` after the most recent failure. The first call after the cooldown
//! is let through as a probe; if it fails the circuit reopens immediately,
//! because the failure count is still at or above the threshold.
//!
//! Keys that fail and are never touched again are swept out: a circuit below
//! the threshold is stale one `cooldown` after its last failure, an opened one
//! after two. The sweep runs every [`PRUNE_EVERY`] newly created circuits and
//! on demand through [`CircuitRegistry::prune`].

use crate::config::CircuitConfig;
use crate::error::Result;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Instant;

/// Newly created circuits between two automatic sweeps.
pub const PRUNE_EVERY: usize = 256;

/// Failure bookkeeping for one key.
#[derive(Clone, Debug, PartialEq)]
pub struct CircuitState {
    pub failure_count: u32,
    pub last_failure: Instant,
    pub is_open: bool,
}

/// Registry of per-key circuits.
///
/// Entries are created on the first failure and dropped on the next success
/// or once stale, so the map only holds keys that failed recently.
pub struct CircuitRegistry {
    circuits: DashMap<String, CircuitState>,
    config: CircuitConfig,
    created: AtomicUsize,
}

impl CircuitRegistry {
    pub fn new(config: CircuitConfig) -> Self {
        CircuitRegistry {
            circuits: DashMap::new(),
            config,
            created: AtomicUsize::new(0),
        }
    }

    /// Run `operation` unless the circuit for `key` is open.
    ///
    /// # Returns
    /// - `Ok(Some(value))` - operation ran and succeeded
    /// - `Ok(None)` - circuit open, operation not invoked
    ///
    /// # Errors
    /// Propagates the operation's own error after recording the failure.
    pub async fn guard<T, F, Fut>(&self, key: &str, operation: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.allow(key) {
            debug!("Circuit open for {}, skipping store call", key);
            return Ok(None);
        }

        match operation().await {
            Ok(value) => {
                self.record_success(key);
                Ok(Some(value))
            }
            Err(e) => {
                self.record_failure(key);
                Err(e)
            }
        }
    }

    /// Whether a call for `key` may proceed. Moves an expired open circuit
    /// to half-open.
    pub fn allow(&self, key: &str) -> bool {
        let Some(mut circuit) = self.circuits.get_mut(key) else {
            return true;
        };

        if !circuit.is_open {
            return true;
        }

        if circuit.last_failure.elapsed() < self.config.cooldown {
            return false;
        }

        circuit.is_open = false;
        info!("Circuit half-open for key: {}, probing store", key);
        true
    }

    pub fn record_success(&self, key: &str) {
        if let Some((_, previous)) = self.circuits.remove(key) {
            if previous.failure_count >= self.config.failure_threshold {
                info!("Circuit closed for key: {}", key);
            }
        }
    }

    pub fn record_failure(&self, key: &str) {
        let created = {
            let mut created = false;
            let mut circuit = self.circuits.entry(key.to_string()).or_insert_with(|| {
                created = true;
                CircuitState {
                    failure_count: 0,
                    last_failure: Instant::now(),
                    is_open: false,
                }
            });

            circuit.failure_count += 1;
            circuit.last_failure = Instant::now();

            if circuit.failure_count >= self.config.failure_threshold && !circuit.is_open {
                circuit.is_open = true;
                warn!(
                    "Circuit breaker opened for key: {} ({} consecutive failures)",
                    key, circuit.failure_count
                );
            }
            created
        };

        // entry guard released above; sweeping takes every shard lock
        if created && (self.created.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_EVERY == 0 {
            self.prune();
        }
    }

    /// Drop stale circuits. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.circuits.len();
        let cooldown = self.config.cooldown;
        let threshold = self.config.failure_threshold;

        self.circuits.retain(|_, c| {
            let idle = c.last_failure.elapsed();
            if c.failure_count >= threshold {
                idle < cooldown * 2
            } else {
                idle < cooldown
            }
        });

        let removed = before.saturating_sub(self.circuits.len());
        if removed > 0 {
            debug!("Pruned {} stale circuits", removed);
        }
        removed
    }

    /// Number of tracked circuits, open or not.
    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    /// Snapshot of the circuit for `key`, if it has failed recently.
    pub fn state(&self, key: &str) -> Option<CircuitState> {
        self.circuits.get(key).map(|c| c.clone())
    }

    /// Number of circuits currently open.
    pub fn open_count(&self) -> usize {
        self.circuits.iter().filter(|c| c.is_open).count()
    }

    /// Forget all circuit state.
    pub fn reset(&self) {
        self.circuits.clear();
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}
