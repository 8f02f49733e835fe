//! scmcache — credential-partitioned conditional HTTP cache for SCM APIs.
//!
//! A GitOps controller discovering pull requests and branches hammers the
//! same source-control API URLs on every reconciliation loop. This crate
//! fronts those calls with a read-through cache speaking standard
//! conditional-GET: 200 responses carrying an `ETag` are kept in memory,
//! later requests revalidate with `If-None-Match`, and a 304 serves the
//! stored body without spending rate-limit budget on the payload.
//!
//! Cached state is partitioned by credential descriptor — clients built
//! with different credentials can never observe each other's responses,
//! and raw `Authorization` values are hashed before anything is stored.
//! Each partition is a bounded LRU with per-partition metrics (items,
//! evictions, revalidations, hits) labeled by partition key.
//!
//! # Example
//!
//! ```rust,no_run
//! use scmcache::{CachedClient, Credentials, PartitionRegistry};
//!
//! #[tokio::main]
//! async fn main() -> scmcache::Result<()> {
//!     let registry = PartitionRegistry::new();
//!     let creds = Credentials::token("repo-creds", "token");
//!     let client = CachedClient::new(&registry, &creds, 512);
//!
//!     // First call populates the cache; repeats revalidate with
//!     // If-None-Match and are served locally on 304.
//!     let response = client
//!         .get("https://api.github.com/repos/owner/repo/branches/main")
//!         .await?;
//!     println!("{}", response.status());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod credentials;
pub mod error;
pub mod registry;
pub mod store;
pub mod telemetry;

// Re-export main types at crate root
pub use client::{CachedClient, Upstream};
pub use credentials::Credentials;
pub use error::{CacheError, Result};
pub use registry::PartitionRegistry;
pub use store::{CacheEntry, Store, VarySnapshot};
