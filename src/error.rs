//! Error types for the gateway cache layer.
//!
//! Most public cache operations are fail-open and never surface these errors:
//! a read that fails is a miss, a write that fails returns `false`. The enum is
//! still the currency inside the crate and on operator-facing calls such as
//! namespace invalidation or backend construction.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the cache and rate-limiting layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// A value could not be encoded for storage.
    SerializationError(String),

    /// Bytes read from the store could not be decoded into the requested type.
    ///
    /// Treated exactly like a backend failure by the read path: the entry is
    /// reported as a miss and the caller recomputes.
    DeserializationError(String),

    /// Backing store error (Redis connection lost, protocol error, pool exhausted).
    BackendError(String),

    /// A backing-store command exceeded its configured timeout.
    Timeout(String),

    /// Invalid configuration (bad URL, unparsable environment variable).
    ConfigError(String),

    /// The collaborator's data source failed (warming loads, database probe).
    SourceError(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// True for failures that originate in the backing store or its transport.
    pub fn is_backend(&self) -> bool {
        matches!(self, Error::BackendError(_) | Error::Timeout(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::SourceError(msg) => write!(f, "Source error: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() || e.is_eof() || e.is_data() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::redis::RedisError> for Error {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        if e.is_timeout() {
            Error::Timeout(format!("Redis error: {}", e))
        } else {
            Error::BackendError(format!("Redis error: {}", e))
        }
    }
}
