//! Authoritative data source consulted by the warmer and the health check.
//!
//! The `DataRepository` trait decouples the gateway from the application's
//! database. The warmer asks it for bounded batches of records per namespace;
//! the health checker pings it. Which rows a namespace means ("all exercises",
//! "the 100 most recent public workouts") is the implementation's business.
//!
//! The trait is object-safe (methods return [`BoxFuture`]) so the service can
//! hold any repository as `Arc<dyn DataRepository>`.
//!
//! # Mocking for Tests
//!
//! ```ignore
//! use cache_gate::repository::{InMemoryRepository, Record};
//! use serde_json::json;
//!
//! let mut repo = InMemoryRepository::new();
//! repo.insert("exercises", Record::new("1", json!({"name": "Plank"})));
//! ```

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;

/// One row to be cached, keyed by its identifier within the namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub id: String,
    pub data: Value,
}

impl Record {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Record {
            id: id.into(),
            data,
        }
    }
}

/// Trait for the application's primary store.
pub trait DataRepository: Send + Sync {
    /// Load up to `limit` records (all when `None`) for `namespace`.
    ///
    /// # Errors
    /// Returns `Err` if the data source is unavailable or the query fails.
    fn load<'a>(&'a self, namespace: &'a str, limit: Option<usize>) -> BoxFuture<'a, Result<Vec<Record>>>;

    /// Lightweight liveness probe (`SELECT 1` or equivalent).
    ///
    /// # Errors
    /// Returns `Err` if the data source does not answer.
    fn ping(&self) -> BoxFuture<'_, Result<()>>;
}

// ============================================================================
// In-Memory Test Repository
// ============================================================================

/// Simple in-memory repository for tests and demos.
///
/// Records are returned in insertion order, so callers that want "most
/// recent first" insert newest first.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRepository {
    data: HashMap<String, Vec<Record>>,
    offline: bool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, namespace: &str, record: Record) {
        self.data
            .entry(namespace.to_string())
            .or_default()
            .push(record);
    }

    /// Make every call fail, as if the database were unreachable.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn len(&self, namespace: &str) -> usize {
        self.data.get(namespace).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.data.values().all(Vec::is_empty)
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    fn unavailable(&self) -> Error {
        Error::SourceError("in-memory repository is offline".to_string())
    }
}

impl DataRepository for InMemoryRepository {
    fn load<'a>(&'a self, namespace: &'a str, limit: Option<usize>) -> BoxFuture<'a, Result<Vec<Record>>> {
        async move {
            if self.offline {
                return Err(self.unavailable());
            }

            let records = self.data.get(namespace).map_or(&[][..], Vec::as_slice);
            let take = limit.unwrap_or(records.len());
            Ok(records.iter().take(take).cloned().collect())
        }
        .boxed()
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            if self.offline {
                Err(self.unavailable())
            } else {
                Ok(())
            }
        }
        .boxed()
    }
}
