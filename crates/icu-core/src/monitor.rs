//! Monitor entity.
//!
//! A monitor is a bedside device known to one collector.

use std::net::SocketAddr;

/// A monitor identifier, assigned by the device at registration.
pub type MonitorId = String;

/// State of a registered monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monitor {
    /// Device-assigned identifier.
    id: MonitorId,
    /// Attached patient, empty when no patient is attached.
    pub patient_id: String,
    /// Whether the alarm system is on.
    pub alarm_active: bool,
    /// Where commands are pushed, for transports that learn it from traffic.
    pub endpoint: Option<SocketAddr>,
}

impl Monitor {
    /// Create a freshly registered monitor: no patient, alarm off.
    #[must_use]
    pub fn new(id: impl Into<MonitorId>) -> Self {
        Self {
            id: id.into(),
            patient_id: String::new(),
            alarm_active: false,
            endpoint: None,
        }
    }

    /// Get the monitor identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check if a patient is attached.
    #[must_use]
    pub fn has_patient(&self) -> bool {
        !self.patient_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_creation() {
        let monitor = Monitor::new("m1");
        assert_eq!(monitor.id(), "m1");
        assert!(!monitor.has_patient());
        assert!(!monitor.alarm_active);
        assert!(monitor.endpoint.is_none());
    }
}
