//! Telemetry metric name constants.
//!
//! Centralised metric names for scmcache. The host process installs its
//! own `metrics` recorder (e.g. prometheus); without a recorder installed,
//! all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `scmcache_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `partition` — the credential partition key the cache operation ran
//!   against (e.g. "anonymous", "token/repo-creds/token").

/// Number of entries currently held by a partition.
///
/// Labels: `partition`.
pub const CACHED_ITEMS: &str = "scmcache_cached_items";

/// Total entries evicted from a partition by LRU pressure.
///
/// Initialised to zero when a partition is created, so hit-rate dashboards
/// see the series before the first eviction.
///
/// Labels: `partition`.
pub const EVICTIONS_TOTAL: &str = "scmcache_evictions_total";

/// Total requests that attempted to use a cached candidate (conditional
/// requests sent with a validator), whether or not the upstream confirmed it.
///
/// Labels: `partition`.
pub const REVALIDATIONS_TOTAL: &str = "scmcache_revalidations_total";

/// Total revalidations the upstream confirmed with 304 Not Modified.
///
/// Labels: `partition`.
pub const HITS_TOTAL: &str = "scmcache_hits_total";
