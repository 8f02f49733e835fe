//! Tests for per-partition cache metrics.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Method, Request, Url};
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Match, Mock, MockServer, ResponseTemplate};

use scmcache::{CachedClient, Credentials, PartitionRegistry, telemetry};

struct NoHeader(&'static str);

impl Match for NoHeader {
    fn matches(&self, request: &wiremock::Request) -> bool {
        !request.headers.contains_key(self.0)
    }
}

// ============================================================================
// Snapshot helpers (type alias for readability)
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Latest gauge value for a given metric name, if any was recorded.
fn gauge_value(snapshot: &SnapshotVec, name: &str) -> Option<f64> {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Gauge && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Gauge(v) => v.into_inner(),
            _ => 0.0,
        })
        .next_back()
}

// ============================================================================
// Tests
// ============================================================================

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn revalidation_and_hit_counters() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/owner/repo/branches/main"))
        .and(NoHeader("if-none-match"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"abc\"")
                .set_body_string("body"),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/owner/repo/branches/main"))
        .and(header("if-none-match", "\"abc\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;

    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let url = format!("{}/owner/repo/branches/main", server.uri());

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let registry = PartitionRegistry::new();
                let client = CachedClient::new(&registry, &Credentials::anonymous(), 16);

                // Miss, then two revalidations confirmed by 304.
                client.get(&url).await.unwrap();
                client.get(&url).await.unwrap();
                client.get(&url).await.unwrap();
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::REVALIDATIONS_TOTAL), 2);
    assert_eq!(counter_total(&snapshot, telemetry::HITS_TOTAL), 2);
    assert_eq!(counter_total(&snapshot, telemetry::EVICTIONS_TOTAL), 0);
    assert_eq!(gauge_value(&snapshot, telemetry::CACHED_ITEMS), Some(1.0));
}

/// A revalidation whose vary fields changed (here: a credential appears)
/// sends a recomputed validator; when the upstream confirms with 304 it
/// still counts as one attempt and one hit.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn changed_vary_confirmation_counts_hit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/owner/repo/branches/main"))
        .and(NoHeader("if-none-match"))
        .and(NoHeader("authorization"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"abc\"")
                .set_body_string("body"),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/owner/repo/branches/main"))
        .and(header_exists("if-none-match"))
        .and(header("authorization", "token ok1"))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;

    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let url = format!("{}/owner/repo/branches/main", server.uri());

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let registry = PartitionRegistry::new();
                let client = CachedClient::new(&registry, &Credentials::anonymous(), 16);

                client.get(&url).await.unwrap();

                let mut authed = Request::new(Method::GET, Url::parse(&url).unwrap());
                authed
                    .headers_mut()
                    .insert(AUTHORIZATION, HeaderValue::from_static("token ok1"));
                let response = client.execute(authed).await.unwrap();
                assert_eq!(response.status(), 200);
                assert_eq!(response.text().await.unwrap(), "body");
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::REVALIDATIONS_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::HITS_TOTAL), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn rejected_revalidation_counts_attempt_but_not_hit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(NoHeader("if-none-match"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"v1\"")
                .set_body_string("one"),
        )
        .mount(&server)
        .await;

    // Stale validator: full 200 again instead of a 304.
    Mock::given(method("GET"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"v2\"")
                .set_body_string("two"),
        )
        .mount(&server)
        .await;

    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let url = format!("{}/owner/repo/branches", server.uri());

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let registry = PartitionRegistry::new();
                let client = CachedClient::new(&registry, &Credentials::anonymous(), 16);
                client.get(&url).await.unwrap();
                client.get(&url).await.unwrap();
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::REVALIDATIONS_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::HITS_TOTAL), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn eviction_counter_tracks_capacity_pressure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"e\"")
                .set_body_string("body"),
        )
        .mount(&server)
        .await;

    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let base = server.uri();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let registry = PartitionRegistry::new();
                let client = CachedClient::new(&registry, &Credentials::anonymous(), 2);

                // Three distinct URLs into a capacity-2 partition: exactly
                // one eviction.
                client.get(format!("{base}/owner/repo/branches/a")).await.unwrap();
                client.get(format!("{base}/owner/repo/branches/b")).await.unwrap();
                client.get(format!("{base}/owner/repo/branches/c")).await.unwrap();
                assert_eq!(client.store().len(), 2);
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::EVICTIONS_TOTAL), 1);
    assert_eq!(gauge_value(&snapshot, telemetry::CACHED_ITEMS), Some(2.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn partition_creation_zeroes_the_eviction_series() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let registry = PartitionRegistry::new();
        registry.resolve(&Credentials::app("secret"), 8);
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::EVICTIONS_TOTAL), 0);
    // The series exists even though nothing was evicted yet.
    assert!(
        snapshot
            .iter()
            .any(|(key, _, _, _)| key.key().name() == telemetry::EVICTIONS_TOTAL),
        "expected eviction counter series after partition creation"
    );
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"e\"")
                .set_body_string("body"),
        )
        .mount(&server)
        .await;

    let registry = PartitionRegistry::new();
    let client = CachedClient::new(&registry, &Credentials::anonymous(), 2);
    client.get(format!("{}/owner/repo", server.uri())).await.unwrap();
    client.get(format!("{}/owner/repo", server.uri())).await.unwrap();
}
