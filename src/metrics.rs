//! Prometheus metrics for the gateway.
//!
//! The recorder is process-global; [`handle`] installs it on first use and
//! hands out the same render handle afterwards.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the Prometheus recorder once and return its render handle.
///
/// Returns `None` when another recorder already owns the global slot.
pub fn handle() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Prometheus recorder not installed: {}", e);
                None
            }
        })
        .clone()
}

/// Count a finished request by route and status code.
pub fn record_request(route: &'static str, status: u16) {
    counter!("livegate_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
}

/// Observe wall-clock latency for a route.
pub fn record_duration(route: &'static str, start: Instant) {
    histogram!("livegate_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

/// Count an upstream failure (`timeout`, `network`, `status`, `stream`).
pub fn record_upstream_error(kind: &'static str) {
    counter!("livegate_upstream_errors_total", "kind" => kind).increment(1);
}

/// Count a rewritten playlist and how many references it carried.
pub fn record_playlist_rewrite(references: usize) {
    counter!("livegate_playlists_rewritten_total").increment(1);
    histogram!("livegate_playlist_references").record(references as f64);
}
