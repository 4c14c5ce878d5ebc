//! Prometheus metrics for the proxy fleet.
//!
//! Tracks per-port request outcomes, retries, durations and listener churn.
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    /// Proxied requests by terminal outcome
    pub static ref PROXY_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "portfleet_proxy_requests_total",
        "Total number of proxied requests by terminal outcome",
        &["port", "outcome"]  // outcome: status code class (2xx..5xx) or error kind
    )
    .unwrap();

    /// Retry attempts after a transport failure
    pub static ref UPSTREAM_RETRIES_TOTAL: CounterVec = register_counter_vec!(
        "portfleet_upstream_retries_total",
        "Total number of upstream retry attempts",
        &["port"]
    )
    .unwrap();

    /// End-to-end proxy duration
    pub static ref PROXY_DURATION_MS: HistogramVec = register_histogram_vec!(
        "portfleet_proxy_duration_ms",
        "Histogram of proxied request duration in milliseconds",
        &["port"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 30000.0]
    )
    .unwrap();

    /// Listeners currently bound
    pub static ref ACTIVE_LISTENERS: Gauge = register_gauge!(
        "portfleet_active_listeners",
        "Number of proxy listeners currently running"
    )
    .unwrap();

    /// Failed listener binds
    pub static ref BIND_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "portfleet_bind_failures_total",
        "Total number of listener bind failures",
        &["port"]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    // Unlabelled gauge shows up even before the first listener starts
    lazy_static::initialize(&ACTIVE_LISTENERS);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Status class label, e.g. `2xx`
fn status_class(status: u16) -> String {
    format!("{}xx", status / 100)
}

/// Record a request that received an upstream response
pub fn record_completed(port: u16, status: u16, duration_ms: f64) {
    let port = port.to_string();
    PROXY_REQUESTS_TOTAL
        .with_label_values(&[&port, &status_class(status)])
        .inc();
    PROXY_DURATION_MS
        .with_label_values(&[&port])
        .observe(duration_ms);
}

/// Record a request that ended in a proxy error
pub fn record_failed(port: u16, kind: &str, duration_ms: f64) {
    let port = port.to_string();
    PROXY_REQUESTS_TOTAL.with_label_values(&[&port, kind]).inc();
    PROXY_DURATION_MS
        .with_label_values(&[&port])
        .observe(duration_ms);
}

pub fn record_retry(port: u16) {
    UPSTREAM_RETRIES_TOTAL
        .with_label_values(&[&port.to_string()])
        .inc();
}

pub fn record_bind_failure(port: u16) {
    BIND_FAILURES_TOTAL
        .with_label_values(&[&port.to_string()])
        .inc();
}

pub fn set_active_listeners(count: usize) {
    ACTIVE_LISTENERS.set(count as f64);
}
