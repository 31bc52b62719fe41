//! CoAP resource table.
//!
//! The collector serves a single collection resource. Each CoAP monitor serves
//! one resource per observable value; the collector observes all of them once
//! the monitor has registered.

use crate::sensor::SensorKind;

/// Collection resource served by the collector.
pub const REGISTERED_MONITORS: &str = "registeredMonitors";

/// Resource served by a monitor and observed by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservedResource {
    /// `registeredPatient`: identity of the attached patient.
    RegisteredPatient,
    /// `patientState/alarmState`: alarm system state.
    AlarmState,
    /// `patientState/<sensor>`: last sample of a sensor.
    Sensor(SensorKind),
}

impl ObservedResource {
    /// Every resource observed on a freshly registered monitor.
    pub const ALL: [ObservedResource; 7] = [
        ObservedResource::RegisteredPatient,
        ObservedResource::AlarmState,
        ObservedResource::Sensor(SensorKind::HeartRate),
        ObservedResource::Sensor(SensorKind::BloodPressure),
        ObservedResource::Sensor(SensorKind::Temperature),
        ObservedResource::Sensor(SensorKind::Respiration),
        ObservedResource::Sensor(SensorKind::OxygenSaturation),
    ];

    /// Path of the resource on the monitor.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            ObservedResource::RegisteredPatient => "registeredPatient",
            ObservedResource::AlarmState => "patientState/alarmState",
            ObservedResource::Sensor(kind) => kind.resource_path(),
        }
    }

    /// Path segments, one per `Uri-Path` option.
    pub fn segments(self) -> impl Iterator<Item = &'static str> {
        self.path().split('/')
    }
}

/// Split a request path into its `Uri-Path` segments.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_resource_segments() {
        let segments: Vec<_> = ObservedResource::AlarmState.segments().collect();
        assert_eq!(segments, vec!["patientState", "alarmState"]);
    }

    #[test]
    fn test_every_sensor_is_observed() {
        for kind in SensorKind::ALL {
            assert!(ObservedResource::ALL.contains(&ObservedResource::Sensor(kind)));
        }
        assert_eq!(ObservedResource::ALL.len(), 7);
    }

    #[test]
    fn test_path_segments_skip_empty() {
        let segments: Vec<_> = path_segments("/registeredMonitors/").collect();
        assert_eq!(segments, vec![REGISTERED_MONITORS]);
    }
}
