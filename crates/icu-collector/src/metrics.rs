//! Metrics collection and export for the collector.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use icu_core::HealthCheckReport;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const HEALTH_CHECKS_TOTAL: &str = "icu_health_checks_total";
    pub const MONITORS_SCANNED_TOTAL: &str = "icu_monitors_scanned_total";
    pub const DETERIORATIONS_TOTAL: &str = "icu_deteriorations_total";
    pub const ALARMS_DISPATCHED_TOTAL: &str = "icu_alarms_dispatched_total";
    pub const DISPATCH_FAILURES_TOTAL: &str = "icu_dispatch_failures_total";
    pub const REGISTERED_MONITORS: &str = "icu_registered_monitors";
    pub const OBSERVE_RELATIONS: &str = "icu_observe_relations";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::HEALTH_CHECKS_TOTAL, "Health check runs since start");
    metrics::describe_counter!(
        names::MONITORS_SCANNED_TOTAL,
        "Monitors visited by the health check"
    );
    metrics::describe_counter!(
        names::DETERIORATIONS_TOTAL,
        "Patients flagged by the detection policy"
    );
    metrics::describe_counter!(names::ALARMS_DISPATCHED_TOTAL, "Alarm commands sent");
    metrics::describe_counter!(
        names::DISPATCH_FAILURES_TOTAL,
        "Detection or alarm dispatch failures"
    );
    metrics::describe_gauge!(
        names::REGISTERED_MONITORS,
        "Monitors currently registered, per collector"
    );
    metrics::describe_gauge!(names::OBSERVE_RELATIONS, "Live CoAP observe relations");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!(addr = %addr, "Metrics server listening");
    Ok(())
}

/// Record the outcome of a health check run.
pub fn record_health_check(report: &HealthCheckReport) {
    counter!(names::HEALTH_CHECKS_TOTAL).increment(1);
    counter!(names::MONITORS_SCANNED_TOTAL).increment(report.scanned as u64);
    counter!(names::DETERIORATIONS_TOTAL).increment(report.deteriorating as u64);
    counter!(names::ALARMS_DISPATCHED_TOTAL).increment(report.dispatched as u64);
    counter!(names::DISPATCH_FAILURES_TOTAL).increment(report.failed as u64);
}

/// Update the registered monitor count of a collector.
pub fn set_registered_monitors(collector: &'static str, count: usize) {
    gauge!(names::REGISTERED_MONITORS, "collector" => collector).set(count as f64);
}

/// Update the live observe relation count.
pub fn set_observe_relations(count: usize) {
    gauge!(names::OBSERVE_RELATIONS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter() {
        // No recorder installed: calls are no-ops.
        record_health_check(&HealthCheckReport {
            scanned: 3,
            dispatched: 1,
            ..HealthCheckReport::default()
        });
        set_registered_monitors("mqtt", 3);
        set_observe_relations(7);
    }
}
