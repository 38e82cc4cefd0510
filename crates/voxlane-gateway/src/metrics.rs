//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

pub fn record_ws_connect() {
    metrics::gauge!("voxlane_connections_active").increment(1.0);
}

pub fn record_ws_disconnect() {
    metrics::gauge!("voxlane_connections_active").decrement(1.0);
}

/// Record a turn starting; `source` is "chat" or "speech".
pub fn record_turn(source: &str) {
    let labels = [("source", source.to_string())];
    metrics::counter!("voxlane_turns_total", &labels).increment(1);
}

pub fn record_interrupt() {
    metrics::counter!("voxlane_interrupts_total").increment(1);
}

pub fn record_auth_failure(command: &str) {
    let labels = [("command", command.to_string())];
    metrics::counter!("voxlane_auth_failures_total", &labels).increment(1);
}

pub fn record_audio_in(bytes: usize) {
    metrics::counter!("voxlane_audio_in_bytes_total").increment(bytes as u64);
}

pub fn record_frame_out(kind: &str) {
    let labels = [("type", kind.to_string())];
    metrics::counter!("voxlane_frames_out_total", &labels).increment(1);
}
