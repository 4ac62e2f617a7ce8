//! Metrics collection and exposition.
//!
//! # Metrics
//! - `supervisor_role_restarts_total` (counter): restarts by role
//! - `supervisor_role_state` (gauge): 0=pending 1=starting 2=ready 3=failed 4=stopped
//! - `supervisor_tunnel_up` (gauge): 1 while the tunnel is established
//! - `supervisor_ready` (gauge): 1 while overall-ready
//!
//! # Design Decisions
//! - Recording before `init_metrics` is a no-op, so library code records unconditionally
//! - Labels are role names only

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::supervisor::ProcessState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_role_state(role: &str, state: ProcessState) {
    metrics::gauge!("supervisor_role_state", "role" => role.to_string()).set(state.as_gauge());
}

pub fn record_restart(role: &str) {
    metrics::counter!("supervisor_role_restarts_total", "role" => role.to_string()).increment(1);
}

pub fn record_tunnel_up(up: bool) {
    metrics::gauge!("supervisor_tunnel_up").set(if up { 1.0 } else { 0.0 });
}

pub fn record_ready(ready: bool) {
    metrics::gauge!("supervisor_ready").set(if ready { 1.0 } else { 0.0 });
}
