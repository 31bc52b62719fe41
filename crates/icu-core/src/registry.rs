//! Concurrent monitor registry.
//!
//! Each collector owns one registry. It is written from every transport
//! callback task and read by the health check, so it is backed by a sharded
//! map: every single-monitor update runs as a read-modify-write under the
//! entry's shard lock and readers never see a half-applied update.

use crate::monitor::{Monitor, MonitorId};
use dashmap::DashMap;
use std::net::SocketAddr;
use tracing::debug;

/// Outcome of a field update on a registered monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// No monitor with that identifier.
    UnknownMonitor,
    /// The field already held the value; nothing was written.
    Unchanged,
    /// The field was written.
    Changed,
}

/// The live set of monitors known to one collector.
#[derive(Debug, Default)]
pub struct Registry {
    monitors: DashMap<MonitorId, Monitor>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a monitor, replacing any previous entry with the same identifier.
    ///
    /// Returns `true` if an entry was replaced.
    pub fn register(&self, monitor: Monitor) -> bool {
        let id = monitor.id().to_string();
        let replaced = self.monitors.insert(id.clone(), monitor).is_some();
        debug!(monitor = %id, replaced, "Monitor registered");
        replaced
    }

    /// Get a copy of a monitor's current state.
    #[must_use]
    pub fn get(&self, monitor_id: &str) -> Option<Monitor> {
        self.monitors.get(monitor_id).map(|m| m.clone())
    }

    /// Check if a monitor is registered.
    #[must_use]
    pub fn contains(&self, monitor_id: &str) -> bool {
        self.monitors.contains_key(monitor_id)
    }

    /// Get the number of registered monitors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Get all registered monitor identifiers.
    #[must_use]
    pub fn monitor_ids(&self) -> Vec<MonitorId> {
        self.monitors.iter().map(|e| e.key().clone()).collect()
    }

    /// Copy out every monitor.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Monitor> {
        self.monitors.iter().map(|e| e.value().clone()).collect()
    }

    /// Forget every monitor.
    pub fn clear(&self) {
        self.monitors.clear();
    }

    /// Visit every monitor.
    ///
    /// The visitor runs on a snapshot, so it may call back into the registry.
    pub fn for_each(&self, mut f: impl FnMut(&Monitor)) {
        for monitor in self.snapshot() {
            f(&monitor);
        }
    }

    /// Set the alarm state.
    pub fn set_alarm(&self, monitor_id: &str, active: bool) -> Update {
        let Some(mut monitor) = self.monitors.get_mut(monitor_id) else {
            return Update::UnknownMonitor;
        };
        if monitor.alarm_active == active {
            return Update::Unchanged;
        }
        monitor.alarm_active = active;
        Update::Changed
    }

    /// Attach or detach a patient.
    ///
    /// A change of patient always turns the alarm off.
    pub fn set_patient(&self, monitor_id: &str, patient_id: &str) -> Update {
        let Some(mut monitor) = self.monitors.get_mut(monitor_id) else {
            return Update::UnknownMonitor;
        };
        if monitor.patient_id == patient_id {
            return Update::Unchanged;
        }
        monitor.patient_id = patient_id.to_string();
        monitor.alarm_active = false;
        Update::Changed
    }

    /// Record where a monitor can be reached.
    pub fn set_endpoint(&self, monitor_id: &str, endpoint: SocketAddr) -> Update {
        let Some(mut monitor) = self.monitors.get_mut(monitor_id) else {
            return Update::UnknownMonitor;
        };
        if monitor.endpoint == Some(endpoint) {
            return Update::Unchanged;
        }
        monitor.endpoint = Some(endpoint);
        Update::Changed
    }
}
