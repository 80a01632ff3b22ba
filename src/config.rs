//! Cache layer configuration.
//!
//! Plain structs with `Default` impls; `from_env` overlays the handful of
//! environment variables the gateway is deployed with.

use crate::error::{Error, Result};
use std::str::FromStr;
use std::time::Duration;

/// Default TTL for entries written without an explicit one (1 hour).
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Prefix of the per-namespace invalidation set keys.
pub const DEFAULT_INVALIDATION_PREFIX: &str = "invalidation_set";

/// Per-key circuit breaker settings.
#[derive(Clone, Debug, PartialEq)]
pub struct CircuitConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls after the last failure.
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        CircuitConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Settings for [`crate::store::CacheStore`] and the layers built on it.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheConfig {
    /// TTL applied when a write does not name one.
    pub default_ttl: Duration,
    /// Budget for the health checker's individual probes.
    pub probe_timeout: Duration,
    pub circuit: CircuitConfig,
    pub invalidation_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            default_ttl: DEFAULT_TTL,
            probe_timeout: Duration::from_secs(5),
            circuit: CircuitConfig::default(),
            invalidation_prefix: DEFAULT_INVALIDATION_PREFIX.to_string(),
        }
    }
}

impl CacheConfig {
    /// Defaults overlaid with `CACHE_DEFAULT_TTL_SECS` and `CACHE_PROBE_TIMEOUT_MS`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if a variable is set but not a number.
    pub fn from_env() -> Result<Self> {
        let mut config = CacheConfig::default();

        if let Some(secs) = env_parse::<u64>("CACHE_DEFAULT_TTL_SECS")? {
            config.default_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("CACHE_PROBE_TIMEOUT_MS")? {
            config.probe_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_circuit(mut self, circuit: CircuitConfig) -> Self {
        self.circuit = circuit;
        self
    }

    /// Invalidation sets outlive the entries they track by a factor of two,
    /// so a set nobody invalidates still expires on its own.
    pub fn invalidation_set_ttl(&self) -> Duration {
        self.default_ttl * 2
    }
}

/// Parse an optional environment variable.
pub(crate) fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::ConfigError(format!("{} is not a valid value: {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}
