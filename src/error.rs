//! scmcache error types.

/// scmcache error types.
///
/// Caching is strictly additive: a genuine upstream failure or status code
/// is never suppressed or rewritten. The variants distinguish "the request
/// itself failed" from "the caching side effect failed" so callers can tell
/// whether retrying is worthwhile.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The wrapped transport failed (connect, TLS, timeout, ...).
    ///
    /// Propagated unchanged from the upstream; the cache never converts a
    /// network failure into a stale cached response.
    #[error("upstream request failed: {0}")]
    Upstream(#[source] reqwest::Error),

    /// Reading a response body failed while draining a 304 or buffering a
    /// fresh 200 for storage.
    ///
    /// The store is left in its prior, valid state when this is returned.
    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),

    /// Reassembling an in-memory response for the caller failed.
    #[error("failed to assemble cached response: {0}")]
    Assemble(#[from] http::Error),
}

/// Result type alias for scmcache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
