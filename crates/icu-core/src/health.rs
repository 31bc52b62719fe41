//! Periodic patient health check.
//!
//! Every run scans the registry of each collector, asks the detection policy
//! about every monitor that has a patient attached and no alarm running, and
//! turns the alarm on where the policy reports a deterioration. A failure for
//! one monitor is logged and the scan moves on.

use crate::collector::{AlarmDispatch, Collector};
use crate::policy::DeteriorationPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

/// Counters for one health check run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckReport {
    /// Monitors visited.
    pub scanned: usize,
    /// Monitors skipped (alarm already on, or no patient).
    pub skipped: usize,
    /// Monitors the policy flagged.
    pub deteriorating: usize,
    /// Alarm commands sent.
    pub dispatched: usize,
    /// Policy or dispatch failures.
    pub failed: usize,
}

/// The health check over a set of collectors.
pub struct HealthCheck {
    collectors: Vec<Arc<dyn Collector>>,
    policy: Arc<dyn DeteriorationPolicy>,
}

impl HealthCheck {
    /// Create a health check with no collectors.
    #[must_use]
    pub fn new(policy: Arc<dyn DeteriorationPolicy>) -> Self {
        Self {
            collectors: Vec::new(),
            policy,
        }
    }

    /// Add a collector to scan.
    #[must_use]
    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    /// Run one scan over every collector.
    pub async fn run_once(&self) -> HealthCheckReport {
        info!("Starting the patient health deterioration check");
        let mut report = HealthCheckReport::default();
        for collector in &self.collectors {
            self.scan(collector.as_ref(), &mut report).await;
        }
        info!(
            scanned = report.scanned,
            deteriorating = report.deteriorating,
            dispatched = report.dispatched,
            failed = report.failed,
            "Ending the patient health deterioration check"
        );
        report
    }

    async fn scan(&self, collector: &dyn Collector, report: &mut HealthCheckReport) {
        for monitor in collector.registry().snapshot() {
            report.scanned += 1;
            if monitor.alarm_active || !monitor.has_patient() {
                report.skipped += 1;
                continue;
            }

            let id = monitor.id();
            match self.policy.detect(id, &monitor.patient_id) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => {
                    warn!(collector = collector.name(), monitor = %id, error = %e, "Detection failed");
                    report.failed += 1;
                    continue;
                }
            }

            report.deteriorating += 1;
            info!(
                collector = collector.name(),
                monitor = %id,
                patient = %monitor.patient_id,
                "Detected a health deterioration"
            );

            match collector.turn_on_alarm(id).await {
                Ok(AlarmDispatch::Sent) => report.dispatched += 1,
                Ok(AlarmDispatch::UnknownMonitor) => {
                    debug!(collector = collector.name(), monitor = %id, "Monitor vanished before dispatch");
                }
                Err(e) => {
                    warn!(collector = collector.name(), monitor = %id, error = %e, "Failed to turn on alarm");
                    report.failed += 1;
                }
            }
        }
    }

    /// Run the check at a fixed rate, first after one full period.
    ///
    /// `on_report` is called after every run.
    pub fn spawn<F>(self: Arc<Self>, period: Duration, on_report: F) -> JoinHandle<()>
    where
        F: Fn(&HealthCheckReport) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let report = self.run_once().await;
                on_report(&report);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorError;
    use crate::monitor::Monitor;
    use crate::policy::PolicyError;
    use crate::registry::Registry;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakeCollector {
        registry: Registry,
        failing: HashSet<String>,
        sent: Mutex<Vec<String>>,
    }

    impl FakeCollector {
        fn new(failing: &[&str]) -> Self {
            Self {
                registry: Registry::new(),
                failing: failing.iter().map(|s| s.to_string()).collect(),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn add(&self, id: &str, patient: &str, alarm: bool) {
            self.registry.register(Monitor::new(id));
            self.registry.set_patient(id, patient);
            self.registry.set_alarm(id, alarm);
        }

        fn sent(&self) -> Vec<String> {
            let mut sent = self.sent.lock().unwrap().clone();
            sent.sort();
            sent
        }
    }

    #[async_trait]
    impl Collector for FakeCollector {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn registry(&self) -> &Registry {
            &self.registry
        }

        async fn start(&self) -> Result<(), CollectorError> {
            Ok(())
        }

        async fn stop(&self) {}

        async fn turn_on_alarm(&self, monitor_id: &str) -> Result<AlarmDispatch, CollectorError> {
            if self.failing.contains(monitor_id) {
                return Err(CollectorError::SendFailed("unreachable".into()));
            }
            if !self.registry.contains(monitor_id) {
                return Ok(AlarmDispatch::UnknownMonitor);
            }
            self.sent.lock().unwrap().push(monitor_id.to_string());
            self.registry.set_alarm(monitor_id, true);
            Ok(AlarmDispatch::Sent)
        }
    }

    /// Flags every patient except those listed as healthy; errors on "p-err".
    struct FlagAll {
        healthy: HashSet<&'static str>,
    }

    impl DeteriorationPolicy for FlagAll {
        fn detect(&self, _monitor_id: &str, patient_id: &str) -> Result<bool, PolicyError> {
            if patient_id == "p-err" {
                return Err(PolicyError::Failed("model offline".into()));
            }
            Ok(!self.healthy.contains(patient_id))
        }
    }

    fn flag_all() -> Arc<dyn DeteriorationPolicy> {
        Arc::new(FlagAll {
            healthy: HashSet::from(["p-ok"]),
        })
    }

    #[tokio::test]
    async fn test_skips_alarmed_and_unattached_monitors() {
        let collector = Arc::new(FakeCollector::new(&[]));
        collector.add("m1", "p1", false);
        collector.add("m2", "p2", true);
        collector.add("m3", "", false);
        collector.add("m4", "p-ok", false);

        let check = HealthCheck::new(flag_all()).with_collector(collector.clone());
        let report = check.run_once().await;

        assert_eq!(collector.sent(), vec!["m1"]);
        assert_eq!(
            report,
            HealthCheckReport {
                scanned: 4,
                skipped: 2,
                deteriorating: 1,
                dispatched: 1,
                failed: 0,
            }
        );
        assert!(collector.registry().get("m1").unwrap().alarm_active);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_scan() {
        let collector = Arc::new(FakeCollector::new(&["m2"]));
        collector.add("m1", "p1", false);
        collector.add("m2", "p2", false);
        collector.add("m3", "p-err", false);
        collector.add("m4", "p4", false);

        let check = HealthCheck::new(flag_all()).with_collector(collector.clone());
        let report = check.run_once().await;

        assert_eq!(collector.sent(), vec!["m1", "m4"]);
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.failed, 2);
        assert!(!collector.registry().get("m2").unwrap().alarm_active);
    }

    #[tokio::test]
    async fn test_scans_every_collector() {
        let mqtt = Arc::new(FakeCollector::new(&[]));
        let coap = Arc::new(FakeCollector::new(&[]));
        mqtt.add("m1", "p1", false);
        coap.add("m1", "p9", false);

        let check = HealthCheck::new(flag_all())
            .with_collector(mqtt.clone())
            .with_collector(coap.clone());
        let report = check.run_once().await;

        assert_eq!(report.dispatched, 2);
        assert_eq!(mqtt.sent(), vec!["m1"]);
        assert_eq!(coap.sent(), vec!["m1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_runs_at_fixed_rate() {
        let collector = Arc::new(FakeCollector::new(&[]));
        collector.add("m1", "p1", false);

        let runs = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&runs);
        let check = Arc::new(HealthCheck::new(flag_all()).with_collector(collector.clone()));
        let handle = check.spawn(Duration::from_secs(10), move |report| {
            recorded.lock().unwrap().push(*report);
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(runs.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(26)).await;
        handle.abort();

        let runs = runs.lock().unwrap().clone();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].dispatched, 1);
        // Alarm is on after the first run, so later runs skip the monitor.
        assert_eq!(runs[1].skipped, 1);
        assert_eq!(collector.sent(), vec!["m1"]);
    }
}
