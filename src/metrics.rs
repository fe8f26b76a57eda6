//! Prometheus metrics for the relay.
//!
//! The recorder is installed once per process; every router built afterwards
//! shares the same handle.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder (idempotent) and return its handle.
pub fn init() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                warn!("A metrics recorder is already installed; /metrics will be empty");
            }
            handle
        })
        .clone()
}

/// Render the current metrics in Prometheus text format.
pub fn render() -> String {
    let handle = init();
    handle.run_upkeep();
    handle.render()
}

pub fn record_request(route: &'static str, status: u16) {
    counter!("relay_requests_total", "route" => route, "status" => status.to_string()).increment(1);
}

pub fn record_duration(route: &'static str, start: Instant) {
    histogram!("relay_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error() {
    counter!("relay_upstream_errors_total").increment(1);
}

pub fn record_playlist_rewrite() {
    counter!("relay_playlists_rewritten_total").increment(1);
}
