//! Per-collection sync locks.
//!
//! A sync diffs against one snapshot of a collection, so two runs against the
//! same collection must not interleave. Runs on different collections proceed
//! in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock registry, keyed by collection name.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct CollectionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CollectionLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Create a new registry wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Wait until no other run holds `collection`, then hold it.
    pub async fn acquire(&self, collection: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard is not held across the await.
        let lock = self
            .locks
            .entry(collection.to_string())
            .or_default()
            .clone();

        if lock.try_lock().is_err() {
            tracing::debug!(collection, "waiting for running sync on collection");
        }
        lock.lock_owned().await
    }

    /// Number of collections that have been synced.
    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}
