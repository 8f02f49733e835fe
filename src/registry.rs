//! Partition registry — one [`Store`] per credential partition.
//!
//! The registry is an explicit object constructed once at process start
//! and passed by reference to every client builder, rather than a
//! process-global singleton; tests get isolated cache state by building
//! their own registry. Partitions are created lazily on first resolve and
//! never destroyed — the number of distinct credentials is small and
//! bounded by configuration.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use metrics::{counter, gauge};
use tracing::debug;

use crate::credentials::Credentials;
use crate::store::Store;
use crate::telemetry;

/// Process-wide table mapping partition keys to their [`Store`].
#[derive(Debug, Default)]
pub struct PartitionRegistry {
    partitions: RwLock<HashMap<String, Arc<Store>>>,
}

impl PartitionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the store owning `credentials`' partition, creating it on
    /// first use with the given capacity.
    ///
    /// Get-or-create is idempotent: repeated calls with an equal descriptor
    /// return the same `Arc`, and a racing first call creates the partition
    /// at most once. Later callers' `capacity` is ignored — capacity is
    /// fixed when the partition is created.
    ///
    /// The registry lock is held only for the lookup/create step, never
    /// while a store's own lock is held.
    pub fn resolve(&self, credentials: &Credentials, capacity: usize) -> Arc<Store> {
        let key = credentials.partition_key();

        {
            let partitions = self
                .partitions
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(store) = partitions.get(&key) {
                return Arc::clone(store);
            }
        }

        let mut partitions = self
            .partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(partitions.entry(key.clone()).or_insert_with(|| {
            debug!(partition = %key, capacity, "created cache partition");
            // Zero the series at creation so collectors see them before
            // the first eviction or store.
            counter!(telemetry::EVICTIONS_TOTAL, "partition" => key.clone()).absolute(0);
            gauge!(telemetry::CACHED_ITEMS, "partition" => key.clone()).set(0.0);
            Arc::new(Store::new(key.clone(), capacity))
        }))
    }

    /// Number of partitions created so far.
    pub fn len(&self) -> usize {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether any partition has been created.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_idempotent() {
        let registry = PartitionRegistry::new();
        let creds = Credentials::token("s", "k");
        let a = registry.resolve(&creds, 8);
        let b = registry.resolve(&creds, 99);
        assert!(Arc::ptr_eq(&a, &b));
        // First creation fixed the capacity.
        assert_eq!(b.capacity(), 8);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_credentials_get_distinct_stores() {
        let registry = PartitionRegistry::new();
        let a = registry.resolve(&Credentials::anonymous(), 4);
        let b = registry.resolve(&Credentials::app("secret"), 4);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }
}
