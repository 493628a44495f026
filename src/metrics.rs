//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("quire_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");
    pub static ref HTTP_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "quire_http_request_duration_seconds",
            "HTTP request duration in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "endpoint"]
    ).expect("metric can be created");

    // Federation Metrics
    pub static ref ACTIVITYPUB_ACTIVITIES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("quire_activitypub_activities_received_total", "Total number of ActivityPub activities received"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref ACTIVITYPUB_ACTIVITIES_SENT: IntCounterVec = IntCounterVec::new(
        Opts::new("quire_activitypub_activities_sent_total", "Total number of ActivityPub activities sent"),
        &["activity_type", "software"]
    ).expect("metric can be created");
    pub static ref FEDERATION_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("quire_federation_requests_total", "Total number of federation requests"),
        &["direction", "status"]
    ).expect("metric can be created");
    pub static ref FEDERATION_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "quire_federation_request_duration_seconds",
            "Federation request duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["direction"]
    ).expect("metric can be created");

    // Background task Metrics
    pub static ref TASKS_ENQUEUED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("quire_tasks_enqueued_total", "Total number of background tasks enqueued"),
        &["task"]
    ).expect("metric can be created");
    pub static ref TASKS_PROCESSED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("quire_tasks_processed_total", "Total number of background tasks processed"),
        &["task", "outcome"]
    ).expect("metric can be created");
    pub static ref IMPORT_ITEMS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("quire_import_items_total", "Total number of import items processed"),
        &["result"]
    ).expect("metric can be created");

    // Application Metrics
    pub static ref USERS_TOTAL: IntGauge = IntGauge::new(
        "quire_local_users_total",
        "Total number of local users"
    ).expect("metric can be created");
    pub static ref POSTS_TOTAL: IntGauge = IntGauge::new(
        "quire_local_posts_total",
        "Total number of local posts"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("quire_errors_total", "Total number of errors"),
        &["error_type", "endpoint"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
            .expect("HTTP_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
            .expect("HTTP_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(ACTIVITYPUB_ACTIVITIES_RECEIVED.clone()))
            .expect("ACTIVITYPUB_ACTIVITIES_RECEIVED can be registered");
        REGISTRY
            .register(Box::new(ACTIVITYPUB_ACTIVITIES_SENT.clone()))
            .expect("ACTIVITYPUB_ACTIVITIES_SENT can be registered");
        REGISTRY
            .register(Box::new(FEDERATION_REQUESTS_TOTAL.clone()))
            .expect("FEDERATION_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(FEDERATION_REQUEST_DURATION_SECONDS.clone()))
            .expect("FEDERATION_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(TASKS_ENQUEUED_TOTAL.clone()))
            .expect("TASKS_ENQUEUED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(TASKS_PROCESSED_TOTAL.clone()))
            .expect("TASKS_PROCESSED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(IMPORT_ITEMS_TOTAL.clone()))
            .expect("IMPORT_ITEMS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(USERS_TOTAL.clone()))
            .expect("USERS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(POSTS_TOTAL.clone()))
            .expect("POSTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}
