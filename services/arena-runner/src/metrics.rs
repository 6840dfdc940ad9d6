//! Prometheus metrics exposition
//!
//! The library crates record through the `metrics` facade:
//!
//! - `arena_requests_total` (counter): label `outcome`
//! - `arena_request_retries_total` (counter)
//! - `arena_cycles_total` (counter): label `result`
//! - `arena_matches_total` (counter): label `result`
//! - `arena_quarantined_total` (counter)
//! - `arena_units_running` (gauge)
//!
//! This module installs the recorder and adds the per-run exit counter.

use arena_session::ExitReason;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder. Call once, before any unit starts.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record how a unit ended, labelled by exit kind.
pub fn record_unit_exit(exit: &ExitReason) {
    let kind = match exit {
        ExitReason::QuotaReached => "quota_reached",
        ExitReason::Quarantined(_) => "quarantined",
        ExitReason::Cancelled => "cancelled",
        ExitReason::Failed(_) => "failed",
    };
    metrics::counter!("arena_unit_exits_total", "exit" => kind).increment(1);
}
