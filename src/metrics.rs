//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedgate_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");

    // Federation Metrics
    pub static ref ACTIVITYPUB_ACTIVITIES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("fedgate_activitypub_activities_received_total", "Total number of authenticated ActivityPub activities received"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref SIGNATURE_VERIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedgate_signature_verifications_total", "HTTP signature verification outcomes"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref KEY_FETCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedgate_key_fetches_total", "Outbound public key fetches"),
        &["status"]
    ).expect("metric can be created");
    pub static ref KEY_FETCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "fedgate_key_fetch_duration_seconds",
            "Outbound public key fetch duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["status"]
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedgate_cache_hits_total", "Total number of cache hits"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedgate_cache_misses_total", "Total number of cache misses"),
        &["cache_name"]
    ).expect("metric can be created");

    // Identity Metrics
    pub static ref IDENTIFIER_RESOLUTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedgate_identifier_resolutions_total", "Account identifier resolutions"),
        &["kind", "result"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedgate_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
///
/// Safe to call more than once; later registrations are ignored.
pub fn init_metrics() {
    let collectors: [Box<dyn prometheus::core::Collector>; 9] = [
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(ACTIVITYPUB_ACTIVITIES_RECEIVED.clone()),
        Box::new(SIGNATURE_VERIFICATIONS_TOTAL.clone()),
        Box::new(KEY_FETCHES_TOTAL.clone()),
        Box::new(KEY_FETCH_DURATION_SECONDS.clone()),
        Box::new(CACHE_HITS_TOTAL.clone()),
        Box::new(CACHE_MISSES_TOTAL.clone()),
        Box::new(IDENTIFIER_RESOLUTIONS_TOTAL.clone()),
        Box::new(ERRORS_TOTAL.clone()),
    ];

    for collector in collectors {
        if let Err(error) = REGISTRY.register(collector) {
            tracing::debug!(%error, "Metric already registered");
        }
    }

    tracing::info!("Metrics registry initialized");
}
