use crate::error::{ProxyError, Result};
use axum::{extract::State, http::header, response::IntoResponse, Json};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder; fails if one is already installed
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            ProxyError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_counter!(
            "proxy_requests_total",
            "Total number of HTTP requests received by the proxy handler"
        );
        describe_counter!(
            "proxy_responses_total",
            "Total number of responses written by the proxy handler"
        );
        describe_histogram!(
            "proxy_request_duration_seconds",
            "End-to-end proxy latencies in seconds"
        );
        describe_counter!(
            "proxy_rate_limit_rejections_total",
            "Total number of requests rejected by a rate limit rule"
        );
        describe_gauge!(
            "proxy_circuit_breaker_state",
            "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
        );
        describe_counter!(
            "proxy_circuit_breaker_transitions_total",
            "Total number of circuit breaker state transitions"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Prometheus scrape endpoint
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

const STATUS_CLASSES: [&str; 5] = ["1xx", "2xx", "3xx", "4xx", "5xx"];

/// Process-wide totals behind the stats endpoint; kept whether or not a recorder is installed
struct ProxyStats {
    requests: AtomicU64,
    responses_by_class: [AtomicU64; 5],
    rate_limit_rejections: AtomicU64,
}

static STATS: ProxyStats = ProxyStats {
    requests: AtomicU64::new(0),
    responses_by_class: [
        AtomicU64::new(0),
        AtomicU64::new(0),
        AtomicU64::new(0),
        AtomicU64::new(0),
        AtomicU64::new(0),
    ],
    rate_limit_rejections: AtomicU64::new(0),
};

/// Summary of proxy traffic since startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests_total: u64,
    /// Only classes that have seen at least one response
    pub responses_by_class_total: BTreeMap<String, u64>,
    pub rate_limit_rejections_total: u64,
}

/// Read the current totals
pub fn stats_snapshot() -> StatsSnapshot {
    let responses_by_class_total = STATUS_CLASSES
        .iter()
        .zip(STATS.responses_by_class.iter())
        .map(|(class, count)| (class.to_string(), count.load(Ordering::Relaxed)))
        .filter(|(_, count)| *count > 0)
        .collect();

    StatsSnapshot {
        requests_total: STATS.requests.load(Ordering::Relaxed),
        responses_by_class_total,
        rate_limit_rejections_total: STATS.rate_limit_rejections.load(Ordering::Relaxed),
    }
}

/// JSON traffic summary served under the management prefix
pub async fn stats_handler() -> Json<StatsSnapshot> {
    Json(stats_snapshot())
}

/// Record an inbound request
pub fn record_request(method: &str) {
    STATS.requests.fetch_add(1, Ordering::Relaxed);
    counter!("proxy_requests_total", "method" => method.to_string()).increment(1);
}

/// Record the response written to the client and its latency
pub fn record_response(status: u16, duration: f64) {
    let labels = [
        ("status", status.to_string()),
        ("status_class", status_class(status).to_string()),
    ];

    STATS.responses_by_class[status_class_index(status)].fetch_add(1, Ordering::Relaxed);
    counter!("proxy_responses_total", &labels).increment(1);
    histogram!("proxy_request_duration_seconds", &labels).record(duration);
}

/// Record a request rejected by the named rule
pub fn record_rate_limit_rejection(rule: &str) {
    STATS.rate_limit_rejections.fetch_add(1, Ordering::Relaxed);
    counter!("proxy_rate_limit_rejections_total", "rule" => rule.to_string()).increment(1);
}

/// Record circuit breaker state
/// State: 0 = Closed, 1 = Open, 2 = HalfOpen
pub fn record_circuit_breaker_state(name: &str, state: u8) {
    gauge!("proxy_circuit_breaker_state", "name" => name.to_string()).set(state as f64);
}

/// Record circuit breaker transition
pub fn record_circuit_breaker_transition(name: &str, from_state: &str, to_state: &str) {
    let labels = [
        ("name", name.to_string()),
        ("from", from_state.to_string()),
        ("to", to_state.to_string()),
    ];
    counter!("proxy_circuit_breaker_transitions_total", &labels).increment(1);
}

fn status_class(status: u16) -> &'static str {
    STATUS_CLASSES[status_class_index(status)]
}

fn status_class_index(status: u16) -> usize {
    match status {
        100..=199 => 0,
        200..=299 => 1,
        300..=399 => 2,
        400..=499 => 3,
        _ => 4,
    }
}

/// Timer for measuring request duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer and count the request
    pub fn start(method: &str) -> Self {
        record_request(method);
        Self {
            start: Instant::now(),
        }
    }

    /// Record the elapsed time with the given status code
    pub fn record(self, status: u16) {
        record_response(status, self.elapsed());
    }

    /// Get the elapsed time in seconds
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
