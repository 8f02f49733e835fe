//! Conditional read-through client for SCM API calls.
//!
//! [`CachedClient`] wraps an upstream transport with standard
//! conditional-GET semantics: cacheable responses carrying an `ETag` are
//! snapshotted into the owning credential partition, and later requests
//! for the same URL are sent with `If-None-Match` so the upstream can
//! answer with a bodiless 304 instead of shipping the body again. SCM
//! APIs don't count 304s against rate limits, which is the whole point.
//!
//! The client is an immutable pair (upstream, store) and is safe to share
//! across tasks without external synchronization.
//!
//! # Failure policy
//!
//! Caching is strictly additive. Upstream errors and statuses pass through
//! unchanged; any failure on the caching side degrades to "behave as if
//! caching were disabled" and never corrupts the store.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{
    AUTHORIZATION, CONTENT_LENGTH, ETAG, HeaderMap, HeaderValue, IF_NONE_MATCH, RANGE,
};
use reqwest::{Method, Request, Response, StatusCode};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::credentials::Credentials;
use crate::error::{CacheError, Result};
use crate::registry::PartitionRegistry;
use crate::store::{CacheEntry, Store, VarySnapshot};

/// Point-in-time/session-specific response headers that must never be
/// persisted across cache entries. Rate-limit families are matched by
/// prefix in [`strip_volatile`].
const VOLATILE_HEADERS: &[&str] = &[
    "date",
    "set-cookie",
    "x-request-id",
    "x-github-request-id",
    "retry-after",
];

/// The transport a [`CachedClient`] delegates to.
///
/// Implemented for [`reqwest::Client`]; tests and callers with custom
/// connection handling can supply their own. Deadlines and cancellation
/// are whatever the implementation honors — the cache only propagates
/// the outcome.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Execute a request against the upstream endpoint.
    async fn execute(&self, request: Request) -> reqwest::Result<Response>;
}

#[async_trait]
impl Upstream for reqwest::Client {
    async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        reqwest::Client::execute(self, request).await
    }
}

/// HTTP client front that revalidates against a per-credential cache.
#[derive(Clone)]
pub struct CachedClient {
    upstream: Arc<dyn Upstream>,
    store: Arc<Store>,
}

impl CachedClient {
    /// Build a client for `credentials` over the default transport.
    ///
    /// The owning [`Store`] is resolved through `registry`, so every
    /// client built against an equal descriptor shares one partition;
    /// `capacity` only applies if this call creates the partition.
    pub fn new(
        registry: &PartitionRegistry,
        credentials: &Credentials,
        capacity: usize,
    ) -> Self {
        Self::with_upstream(registry, credentials, capacity, Arc::new(reqwest::Client::new()))
    }

    /// Build a client delegating to a custom upstream transport.
    pub fn with_upstream(
        registry: &PartitionRegistry,
        credentials: &Credentials,
        capacity: usize,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        Self {
            upstream,
            store: registry.resolve(credentials, capacity),
        }
    }

    /// The store backing this client's partition.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Convenience wrapper: `GET` a URL through the cache.
    pub async fn get(&self, url: impl reqwest::IntoUrl) -> Result<Response> {
        let url = url.into_url().map_err(CacheError::Upstream)?;
        self.execute(Request::new(Method::GET, url)).await
    }

    /// Execute a request, revalidating against the cache when possible.
    ///
    /// Non-cacheable requests are forwarded verbatim and never read from
    /// or write to the store.
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        if !is_cacheable(&request) {
            return self
                .upstream
                .execute(request)
                .await
                .map_err(CacheError::Upstream);
        }

        let key = cache_key(&request);
        let vary = VarySnapshot::of(request.headers());
        let candidate = self.store.get(&key);

        if let Some(entry) = &candidate {
            self.store.note_revalidation();
            let validator = if entry.vary == vary {
                // Fast path: vary fields unchanged, reuse the upstream's
                // validator without touching the cached body.
                entry.etag.clone()
            } else {
                // The request differs in a vary field (typically a rotated
                // credential). Recompute the validator the upstream would
                // derive for the cached body under the new fields; whether
                // a 304 comes back is gated by the upstream's own auth
                // check, so an invalid credential fails there instead of
                // silently reusing another principal's bytes.
                expected_validator(&vary, &entry.body)
            };
            match HeaderValue::from_str(&validator) {
                Ok(value) => {
                    request.headers_mut().insert(IF_NONE_MATCH, value);
                }
                Err(_) => {
                    warn!(partition = %self.store.partition(), %key,
                        "cached validator is not a valid header value; revalidating unconditionally");
                }
            }
        }

        let response = self
            .upstream
            .execute(request)
            .await
            .map_err(CacheError::Upstream)?;

        if let Some(entry) = candidate {
            if response.status() == StatusCode::NOT_MODIFIED {
                return self.serve_cached(&key, &entry, response).await;
            }
            debug!(partition = %self.store.partition(), %key, status = %response.status(),
                "revalidation rejected; using fresh response");
        }

        self.maybe_store(key, vary, response).await
    }

    /// Serve the cached entry after the upstream confirmed it with 304.
    async fn serve_cached(
        &self,
        key: &str,
        entry: &CacheEntry,
        not_modified: Response,
    ) -> Result<Response> {
        self.store.note_hit();
        debug!(partition = %self.store.partition(), %key, "revalidated, serving cached body");

        let mut headers = entry.headers.clone();
        for (name, value) in not_modified.headers() {
            // Carry over anything the 304 added (fresh rate-limit state,
            // a new date) without clobbering the stored representation.
            if !entry.headers.contains_key(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        // The 304 is defined to be bodiless, but drain it so the
        // connection can be reused.
        not_modified.bytes().await.map_err(CacheError::Body)?;

        assemble(entry.status, headers, entry.body.clone())
    }

    /// Store the response if eligible and hand the caller an equivalent
    /// in-memory response.
    ///
    /// Eligible means status 200 with an `ETag` validator; anything else
    /// passes through untouched, body stream intact.
    async fn maybe_store(
        &self,
        key: String,
        vary: VarySnapshot,
        response: Response,
    ) -> Result<Response> {
        let status = response.status();
        let Some(etag) = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
        else {
            return Ok(response);
        };
        if status != StatusCode::OK {
            return Ok(response);
        }

        let caller_headers = response.headers().clone();
        let body = response.bytes().await.map_err(CacheError::Body)?;

        let mut stored_headers = caller_headers.clone();
        strip_volatile(&mut stored_headers);
        if let Ok(len) = HeaderValue::from_str(&body.len().to_string()) {
            stored_headers.insert(CONTENT_LENGTH, len);
        }

        self.store.put(
            key,
            CacheEntry {
                status,
                headers: stored_headers,
                body: body.clone(),
                etag,
                vary,
            },
        );

        assemble(status, caller_headers, body)
    }
}

impl std::fmt::Debug for CachedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedClient")
            .field("partition", &self.store.partition())
            .finish_non_exhaustive()
    }
}

/// Whether a request may consult or populate the cache.
///
/// GET/HEAD only, no byte-range requests, and never the rate-limit probe
/// endpoint — its whole payload is point-in-time state.
fn is_cacheable(request: &Request) -> bool {
    matches!(*request.method(), Method::GET | Method::HEAD)
        && !request.headers().contains_key(RANGE)
        && !is_rate_limit_path(request.url().path())
}

fn is_rate_limit_path(path: &str) -> bool {
    path.split('/').any(|segment| segment == "rate_limit")
}

/// Storage key for a cacheable request: method plus normalized URL.
///
/// Qualifying by method keeps a HEAD response (bodiless 200 + ETag) from
/// overwriting the GET entry for the same URL, which a later GET
/// revalidation would otherwise serve as an empty body.
fn cache_key(request: &Request) -> String {
    format!("{} {}", request.method(), request.url())
}

/// Validator expected for the cached body under new vary-field values.
///
/// Mirrors the upstream's digest shape: vary fields (Authorization already
/// hashed) followed by the body. This assumes the endpoint derives its
/// ETags deterministically from those inputs; endpoints that don't simply
/// answer 200 and the entry is replaced.
fn expected_validator(vary: &VarySnapshot, body: &Bytes) -> String {
    let mut hasher = Sha256::new();
    hasher.update(vary.accept_encoding.as_deref().unwrap_or("").as_bytes());
    hasher.update(vary.accept.as_deref().unwrap_or("").as_bytes());
    hasher.update(vary.authorization.as_deref().unwrap_or("").as_bytes());
    hasher.update(body);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

/// Drop point-in-time/session headers from a snapshot about to be stored.
fn strip_volatile(headers: &mut HeaderMap) {
    let doomed: Vec<_> = headers
        .keys()
        .filter(|name| {
            let name = name.as_str();
            VOLATILE_HEADERS.contains(&name)
                || name.starts_with("x-ratelimit-")
                || name.starts_with("ratelimit-")
        })
        .cloned()
        .collect();
    for name in doomed {
        headers.remove(&name);
    }
    // A request header never belongs in a stored response snapshot.
    headers.remove(AUTHORIZATION);
}

/// Build an in-memory response the caller can consume like a live one.
fn assemble(status: StatusCode, headers: HeaderMap, body: Bytes) -> Result<Response> {
    let mut response = http::Response::builder().status(status).body(body)?;
    *response.headers_mut() = headers;
    Ok(Response::from(response))
}
