//! Metrics collection and exposition.
//!
//! # Metrics
//! - `interceptor_requests_total` (counter): requests by method, status
//! - `interceptor_request_duration_seconds` (histogram): latency distribution
//! - `interceptor_cold_starts_total` (counter): forwarded requests by cold start flag
//! - `interceptor_placeholder_served_total` (counter): placeholder short-circuits
//! - `interceptor_wait_failures_total` (counter): capacity waits that failed
//! - `interceptor_pending_requests` (gauge): in-flight requests per service
//!
//! # Design Decisions
//! - Labels for namespace and service, never for paths
//! - Pending requests are what an external scaler reads to scale from zero

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "interceptor_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("interceptor_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cold_start(namespace: &str, service: &str, cold_start: bool) {
    counter!(
        "interceptor_cold_starts_total",
        "namespace" => namespace.to_string(),
        "service" => service.to_string(),
        "cold_start" => cold_start.to_string()
    )
    .increment(1);
}

pub fn record_placeholder_served(namespace: &str, service: &str) {
    counter!(
        "interceptor_placeholder_served_total",
        "namespace" => namespace.to_string(),
        "service" => service.to_string()
    )
    .increment(1);
}

pub fn record_wait_failure(namespace: &str, service: &str) {
    counter!(
        "interceptor_wait_failures_total",
        "namespace" => namespace.to_string(),
        "service" => service.to_string()
    )
    .increment(1);
}

/// Tracks one in-flight request for a service until dropped.
#[derive(Debug)]
pub struct PendingGuard {
    namespace: String,
    service: String,
}

impl PendingGuard {
    pub fn new(namespace: &str, service: &str) -> Self {
        gauge!(
            "interceptor_pending_requests",
            "namespace" => namespace.to_string(),
            "service" => service.to_string()
        )
        .increment(1.0);
        Self {
            namespace: namespace.to_string(),
            service: service.to_string(),
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        gauge!(
            "interceptor_pending_requests",
            "namespace" => self.namespace.clone(),
            "service" => self.service.clone()
        )
        .decrement(1.0);
    }
}
