//! Per-partition bounded storage of validated responses.
//!
//! A [`Store`] is the cache for exactly one credential partition: an LRU
//! map from request key (method plus normalized URL) to an immutable
//! [`CacheEntry`]. Stores
//! are created by the [`PartitionRegistry`](crate::registry::PartitionRegistry)
//! and live for the rest of the process; every client built against the
//! same credentials shares one store.
//!
//! # Locking
//!
//! Each store owns its own reader/writer lock. [`Store::get`] takes the
//! shared lock and peeks without touching recency; [`Store::put`] takes
//! the exclusive lock and performs insert/evict bookkeeping. The lock is
//! never held across an await point, and never while the registry lock
//! is held.

use std::num::NonZeroUsize;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use lru::LruCache;
use metrics::{counter, gauge};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::telemetry;

/// Request headers whose values select which cached representation is
/// valid for a URL. Authorization is tracked by digest only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VarySnapshot {
    /// `Accept` header value, if present.
    pub accept: Option<String>,
    /// `Accept-Encoding` header value, if present.
    pub accept_encoding: Option<String>,
    /// Hex SHA-256 of the `Authorization` header value. The raw token is
    /// hashed immediately and never stored.
    pub authorization: Option<String>,
}

impl VarySnapshot {
    /// Snapshot the vary fields of an outgoing request's headers.
    pub fn of(headers: &HeaderMap) -> Self {
        Self {
            accept: header_text(headers, &ACCEPT),
            accept_encoding: header_text(headers, &ACCEPT_ENCODING),
            authorization: headers
                .get(AUTHORIZATION)
                .map(|v| hex::encode(Sha256::digest(v.as_bytes()))),
        }
    }
}

fn header_text(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v: &HeaderValue| v.to_str().ok())
        .map(str::to_owned)
}

/// An immutable snapshot of a validated 200 response.
///
/// Built once at store time (status, cloned headers, owned body buffer);
/// never aliases the live response handed to the caller. Entries without
/// an ETag are never constructed — there would be nothing to revalidate
/// against later.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Response status (always 200 for stored entries).
    pub status: StatusCode,
    /// Response headers with volatile fields stripped and `Content-Length`
    /// rewritten to the buffered body length.
    pub headers: HeaderMap,
    /// Fully buffered response body.
    pub body: Bytes,
    /// The upstream's validator, exactly as received.
    pub etag: String,
    /// Vary-field values of the request that produced this entry.
    pub vary: VarySnapshot,
}

/// Bounded LRU storage for one credential partition.
pub struct Store {
    partition: String,
    capacity: NonZeroUsize,
    entries: RwLock<LruCache<String, Arc<CacheEntry>>>,
}

impl Store {
    /// Create a store for `partition` holding at most `capacity` entries.
    ///
    /// A capacity of zero is clamped to one.
    pub(crate) fn new(partition: String, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            partition,
            capacity,
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// The partition key this store belongs to.
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Maximum number of entries this store holds.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Look up the cached entry for a request key.
    ///
    /// Takes the shared lock and does not touch LRU recency; recency is
    /// maintained by [`put`](Self::put), which runs on every successful
    /// revalidation-or-store cycle anyway.
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.peek(key).cloned()
    }

    /// Insert or replace the entry for a request key.
    ///
    /// Evicts the least-recently-used entry when the store is at capacity,
    /// incrementing this partition's eviction counter once per eviction.
    pub fn put(&self, key: String, entry: CacheEntry) {
        let len = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            if let Some((displaced, _)) = entries.push(key.clone(), Arc::new(entry)) {
                // push returns the previous value on replace and the LRU
                // victim on eviction; only the latter counts.
                if displaced != key {
                    counter!(
                        telemetry::EVICTIONS_TOTAL,
                        "partition" => self.partition.clone()
                    )
                    .increment(1);
                    debug!(partition = %self.partition, key = %displaced, "evicted LRU entry");
                }
            }
            entries.len()
        };
        gauge!(telemetry::CACHED_ITEMS, "partition" => self.partition.clone()).set(len as f64);
        debug!(partition = %self.partition, %key, items = len, "stored entry");
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record that a request attempted to use a cached candidate.
    pub(crate) fn note_revalidation(&self) {
        counter!(
            telemetry::REVALIDATIONS_TOTAL,
            "partition" => self.partition.clone()
        )
        .increment(1);
    }

    /// Record a revalidation the upstream confirmed with 304.
    pub(crate) fn note_hit(&self) {
        counter!(telemetry::HITS_TOTAL, "partition" => self.partition.clone()).increment(1);
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("partition", &self.partition)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
