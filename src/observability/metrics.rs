//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_dispatch_total` (counter): dispatches by route (`bridge`, `native`)
//! - `bridge_request_outcome_total` (counter): forwarded requests by terminal state
//! - `bridge_cleanup_total` (counter): remote release calls by handle kind and result
//! - `bridge_reorder_depth` (histogram): events waiting in the reorder buffer
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - The Prometheus endpoint is optional and owned by the binary

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a routing decision.
pub fn record_dispatch(route: &'static str) {
    counter!("bridge_dispatch_total", "route" => route).increment(1);
}

/// Record the terminal state of a forwarded request.
pub fn record_outcome(outcome: &'static str) {
    counter!("bridge_request_outcome_total", "outcome" => outcome).increment(1);
}

/// Record one remote release call.
pub fn record_cleanup(kind: &'static str, ok: bool) {
    let result = if ok { "ok" } else { "failed" };
    counter!("bridge_cleanup_total", "kind" => kind, "result" => result).increment(1);
}

pub fn record_reorder_depth(depth: usize) {
    histogram!("bridge_reorder_depth").record(depth as f64);
}
