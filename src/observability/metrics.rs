//! Metrics collection and exposition.
//!
//! # Metrics
//! - `policy_verdicts_total` (counter): verdicts by module, phase, verdict
//! - `policy_phase_duration_seconds` (histogram): time spent in one phase
//! - `policy_admin_mutations_total` (counter): admin writes by module, outcome
//! - `proxy_requests_total` (counter): client requests by outcome
//!
//! Recording is a no-op until a recorder is installed, so unit tests can
//! call these freely.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::policy::{Phase, Verdict};

/// Installs the Prometheus recorder with its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_verdict(module: &'static str, phase: Phase, verdict: Verdict) {
    ::metrics::counter!(
        "policy_verdicts_total",
        "module" => module,
        "phase" => phase.as_str(),
        "verdict" => verdict.as_str()
    )
    .increment(1);
}

pub fn record_phase_duration(phase: Phase, start: Instant) {
    ::metrics::histogram!("policy_phase_duration_seconds", "phase" => phase.as_str())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_admin_mutation(module: &'static str, outcome: &'static str) {
    ::metrics::counter!(
        "policy_admin_mutations_total",
        "module" => module,
        "outcome" => outcome
    )
    .increment(1);
}

/// `outcome`: `forwarded`, `answered`, `not_found`, `rejected`,
/// `upstream_error` or `pipeline_error`.
pub fn record_request(outcome: &'static str) {
    ::metrics::counter!("proxy_requests_total", "outcome" => outcome).increment(1);
}
