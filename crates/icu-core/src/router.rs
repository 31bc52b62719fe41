//! Message router.
//!
//! Validates decoded payloads and applies them to a [`Registry`]. There is one
//! entry point per message category; both transports call the same functions
//! so a monitor behaves the same whichever protocol it speaks.
//!
//! Routing never fails hard: a payload that cannot be applied yields a
//! [`Rejection`] that the caller logs before moving on to the next message.

use crate::archive::{ArchiveSink, TelemetrySample};
use crate::monitor::{Monitor, MonitorId};
use crate::registry::{Registry, Update};
use icu_protocol::codec::{ALARM, MONITOR_ID, PATIENT_ID, REGISTRATION, TIMESTAMP, UNIT};
use icu_protocol::{Payload, SensorKind};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Reasons a message is not applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    /// A required key is missing or has the wrong type.
    #[error("Bad format: missing or mistyped '{0}'")]
    BadFormat(&'static str),

    /// The target monitor is not registered.
    #[error("Monitor not registered: {0}")]
    UnknownMonitor(MonitorId),

    /// A registration asked for removal.
    #[error("Removal of a registration is not supported")]
    DeregistrationUnsupported,

    /// A sample carries no sensor value.
    #[error("No sensor value in sample")]
    MissingSensorValue,

    /// A sample carries values for more than one sensor.
    #[error("More than one sensor value in sample")]
    AmbiguousSensorValue,

    /// A sample arrived on a channel bound to another sensor.
    #[error("Expected a {expected} sample, got {actual}")]
    SensorMismatch {
        expected: SensorKind,
        actual: SensorKind,
    },
}

/// What happened to an applied message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Monitor state changed.
    Changed,
    /// The message repeated the current state; nothing was written.
    Unchanged,
    /// The sample was handed to the archive.
    Forwarded,
}

fn string_field<'a>(payload: &'a Payload, key: &'static str) -> Result<&'a str, Rejection> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or(Rejection::BadFormat(key))
}

fn bool_field(payload: &Payload, key: &'static str) -> Result<bool, Rejection> {
    payload
        .get(key)
        .and_then(Value::as_bool)
        .ok_or(Rejection::BadFormat(key))
}

fn number_field(payload: &Payload, key: &'static str) -> Result<f64, Rejection> {
    payload
        .get(key)
        .and_then(Value::as_f64)
        .ok_or(Rejection::BadFormat(key))
}

/// Apply a monitor registration.
///
/// Registering an identifier that is already known replaces the entry, as a
/// rebooted device starts from scratch. Returns the registered identifier.
///
/// # Errors
///
/// Returns a rejection if the payload is malformed or asks for removal.
pub fn handle_monitor_registration(
    registry: &Registry,
    payload: &Payload,
) -> Result<MonitorId, Rejection> {
    let monitor_id = string_field(payload, MONITOR_ID)?;
    let registration = bool_field(payload, REGISTRATION)?;

    if !registration {
        info!(monitor = %monitor_id, "Removal of the registration is not supported");
        return Err(Rejection::DeregistrationUnsupported);
    }

    registry.register(Monitor::new(monitor_id));
    info!(monitor = %monitor_id, "Registered monitor");
    Ok(monitor_id.to_string())
}

/// Apply a patient registration addressed to `monitor_id`.
///
/// A change of patient turns the monitor's alarm off.
///
/// # Errors
///
/// Returns a rejection if the payload is malformed or the monitor is unknown.
pub fn handle_patient_registration(
    registry: &Registry,
    monitor_id: &str,
    payload: &Payload,
) -> Result<Applied, Rejection> {
    let patient_id = string_field(payload, PATIENT_ID)?;

    match registry.set_patient(monitor_id, patient_id) {
        Update::UnknownMonitor => Err(Rejection::UnknownMonitor(monitor_id.to_string())),
        Update::Unchanged => {
            debug!(monitor = %monitor_id, "Patient unchanged");
            Ok(Applied::Unchanged)
        }
        Update::Changed => {
            if patient_id.is_empty() {
                info!(monitor = %monitor_id, "Removed patient");
            } else {
                info!(monitor = %monitor_id, patient = %patient_id, "Attached patient");
            }
            Ok(Applied::Changed)
        }
    }
}

/// Apply a patient registration that names its monitor in the payload.
///
/// # Errors
///
/// Returns a rejection if the payload is malformed or the monitor is unknown.
pub fn handle_addressed_patient_registration(
    registry: &Registry,
    payload: &Payload,
) -> Result<Applied, Rejection> {
    let monitor_id = string_field(payload, MONITOR_ID)?;
    handle_patient_registration(registry, monitor_id, payload)
}

/// Apply an alarm state reported by `monitor_id`.
///
/// # Errors
///
/// Returns a rejection if the payload is malformed or the monitor is unknown.
pub fn handle_alarm_state(
    registry: &Registry,
    monitor_id: &str,
    payload: &Payload,
) -> Result<Applied, Rejection> {
    let alarm = bool_field(payload, ALARM)?;

    match registry.set_alarm(monitor_id, alarm) {
        Update::UnknownMonitor => Err(Rejection::UnknownMonitor(monitor_id.to_string())),
        Update::Unchanged => {
            debug!(monitor = %monitor_id, alarm, "Alarm state unchanged");
            Ok(Applied::Unchanged)
        }
        Update::Changed => {
            info!(monitor = %monitor_id, alarm, "Alarm state changed");
            Ok(Applied::Changed)
        }
    }
}

/// Accept a sample from `monitor_id` on a channel bound to `expected`, and
/// forward it to the archive.
///
/// # Errors
///
/// Returns a rejection if the monitor is unknown or the payload is malformed.
pub fn handle_sample(
    registry: &Registry,
    archive: &dyn ArchiveSink,
    monitor_id: &str,
    expected: SensorKind,
    payload: &Payload,
) -> Result<Applied, Rejection> {
    let Some(monitor) = registry.get(monitor_id) else {
        return Err(Rejection::UnknownMonitor(monitor_id.to_string()));
    };

    let unit = string_field(payload, UNIT)?;
    let timestamp = number_field(payload, TIMESTAMP)?;

    let mut present = SensorKind::ALL
        .into_iter()
        .filter(|kind| payload.contains_key(kind.payload_key()));
    let kind = present.next().ok_or(Rejection::MissingSensorValue)?;
    if present.next().is_some() {
        return Err(Rejection::AmbiguousSensorValue);
    }
    if kind != expected {
        return Err(Rejection::SensorMismatch {
            expected,
            actual: kind,
        });
    }
    let value = number_field(payload, kind.payload_key())?;

    let sample = TelemetrySample {
        kind,
        value,
        unit: unit.to_string(),
        timestamp,
        monitor_id: monitor_id.to_string(),
        patient_id: monitor.patient_id,
    };
    debug!(monitor = %monitor_id, sensor = %kind, value, "Forwarding sample");

    if let Err(e) = archive.save(sample) {
        warn!(monitor = %monitor_id, sensor = %kind, error = %e, "Failed to archive sample");
    }
    Ok(Applied::Forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveError;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingArchive {
        samples: Mutex<Vec<TelemetrySample>>,
    }

    impl RecordingArchive {
        fn samples(&self) -> Vec<TelemetrySample> {
            self.samples.lock().unwrap().clone()
        }
    }

    impl ArchiveSink for RecordingArchive {
        fn save(&self, sample: TelemetrySample) -> Result<(), ArchiveError> {
            self.samples.lock().unwrap().push(sample);
            Ok(())
        }
    }

    struct FailingArchive;

    impl ArchiveSink for FailingArchive {
        fn save(&self, _sample: TelemetrySample) -> Result<(), ArchiveError> {
            Err(ArchiveError::Unavailable("offline".into()))
        }
    }

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn registered(ids: &[&str]) -> Registry {
        let registry = Registry::new();
        for id in ids {
            registry.register(Monitor::new(*id));
        }
        registry
    }

    #[test]
    fn test_monitor_registration() {
        let registry = Registry::new();
        let id = handle_monitor_registration(
            &registry,
            &payload(json!({"monitorID": "m1", "registration": true})),
        )
        .unwrap();

        assert_eq!(id, "m1");
        let monitor = registry.get("m1").unwrap();
        assert_eq!(monitor.patient_id, "");
        assert!(!monitor.alarm_active);
    }

    #[test]
    fn test_monitor_deregistration_rejected() {
        let registry = registered(&["m1"]);
        let result = handle_monitor_registration(
            &registry,
            &payload(json!({"monitorID": "m1", "registration": false})),
        );

        assert_eq!(result, Err(Rejection::DeregistrationUnsupported));
        assert!(registry.contains("m1"));
    }

    #[test]
    fn test_monitor_registration_bad_format() {
        let registry = Registry::new();
        assert_eq!(
            handle_monitor_registration(&registry, &payload(json!({"monitorID": "m1"}))),
            Err(Rejection::BadFormat(REGISTRATION))
        );
        assert_eq!(
            handle_monitor_registration(
                &registry,
                &payload(json!({"monitorID": 7, "registration": true}))
            ),
            Err(Rejection::BadFormat(MONITOR_ID))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registration_lifecycle() {
        let registry = Registry::new();
        let register = payload(json!({"monitorID": "m1", "registration": true}));

        handle_monitor_registration(&registry, &register).unwrap();

        let applied =
            handle_patient_registration(&registry, "m1", &payload(json!({"patientID": "p1"})));
        assert_eq!(applied, Ok(Applied::Changed));
        let monitor = registry.get("m1").unwrap();
        assert_eq!(monitor.patient_id, "p1");
        assert!(!monitor.alarm_active);

        let applied = handle_alarm_state(&registry, "m1", &payload(json!({"alarm": true})));
        assert_eq!(applied, Ok(Applied::Changed));
        assert!(registry.get("m1").unwrap().alarm_active);

        handle_monitor_registration(&registry, &register).unwrap();
        let monitor = registry.get("m1").unwrap();
        assert_eq!(monitor.patient_id, "");
        assert!(!monitor.alarm_active);
    }

    #[test]
    fn test_patient_change_clears_alarm() {
        let registry = registered(&["m1"]);
        registry.set_patient("m1", "p1");
        registry.set_alarm("m1", true);

        let applied =
            handle_patient_registration(&registry, "m1", &payload(json!({"patientID": "p2"})));
        assert_eq!(applied, Ok(Applied::Changed));
        assert!(!registry.get("m1").unwrap().alarm_active);
    }

    #[test]
    fn test_patient_unchanged_is_noop() {
        let registry = registered(&["m1"]);
        registry.set_patient("m1", "p1");
        registry.set_alarm("m1", true);

        let applied =
            handle_patient_registration(&registry, "m1", &payload(json!({"patientID": "p1"})));
        assert_eq!(applied, Ok(Applied::Unchanged));
        assert!(registry.get("m1").unwrap().alarm_active);
    }

    #[test]
    fn test_patient_registration_unknown_monitor() {
        let registry = Registry::new();
        assert_eq!(
            handle_patient_registration(&registry, "m9", &payload(json!({"patientID": "p1"}))),
            Err(Rejection::UnknownMonitor("m9".into()))
        );
    }

    #[test]
    fn test_addressed_patient_registration() {
        let registry = registered(&["m1"]);

        let applied = handle_addressed_patient_registration(
            &registry,
            &payload(json!({"monitorID": "m1", "patientID": "p7"})),
        );
        assert_eq!(applied, Ok(Applied::Changed));
        assert_eq!(registry.get("m1").unwrap().patient_id, "p7");

        assert_eq!(
            handle_addressed_patient_registration(&registry, &payload(json!({"patientID": "p7"}))),
            Err(Rejection::BadFormat(MONITOR_ID))
        );
    }

    #[test]
    fn test_alarm_state_unchanged_is_noop() {
        let registry = registered(&["m1"]);
        let before = registry.get("m1").unwrap();

        let applied = handle_alarm_state(&registry, "m1", &payload(json!({"alarm": false})));
        assert_eq!(applied, Ok(Applied::Unchanged));
        assert_eq!(registry.get("m1").unwrap(), before);
    }

    #[test]
    fn test_alarm_state_rejections() {
        let registry = registered(&["m1"]);
        assert_eq!(
            handle_alarm_state(&registry, "m2", &payload(json!({"alarm": true}))),
            Err(Rejection::UnknownMonitor("m2".into()))
        );
        assert_eq!(
            handle_alarm_state(&registry, "m1", &payload(json!({"alarm": "on"}))),
            Err(Rejection::BadFormat(ALARM))
        );
        assert!(!registry.get("m1").unwrap().alarm_active);
    }

    #[test]
    fn test_sample_forwarded_with_patient() {
        let registry = registered(&["m1"]);
        registry.set_patient("m1", "p1");
        let archive = RecordingArchive::default();

        let applied = handle_sample(
            &registry,
            &archive,
            "m1",
            SensorKind::Temperature,
            &payload(json!({"temperature": 37.5, "unit": "C", "timestamp": 120})),
        );

        assert_eq!(applied, Ok(Applied::Forwarded));
        assert_eq!(
            archive.samples(),
            vec![TelemetrySample {
                kind: SensorKind::Temperature,
                value: 37.5,
                unit: "C".into(),
                timestamp: 120.0,
                monitor_id: "m1".into(),
                patient_id: "p1".into(),
            }]
        );
    }

    #[test]
    fn test_sample_from_unregistered_monitor_not_forwarded() {
        let registry = Registry::new();
        let archive = RecordingArchive::default();

        let applied = handle_sample(
            &registry,
            &archive,
            "m1",
            SensorKind::HeartRate,
            &payload(json!({"heartRate": 80, "unit": "bpm", "timestamp": 1})),
        );

        assert_eq!(applied, Err(Rejection::UnknownMonitor("m1".into())));
        assert!(archive.samples().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sample_format_rejections() {
        let registry = registered(&["m1"]);
        let archive = RecordingArchive::default();
        let route = |value: Value| {
            handle_sample(&registry, &archive, "m1", SensorKind::HeartRate, &payload(value))
        };

        assert_eq!(
            route(json!({"heartRate": 80, "timestamp": 1})),
            Err(Rejection::BadFormat(UNIT))
        );
        assert_eq!(
            route(json!({"heartRate": 80, "unit": "bpm"})),
            Err(Rejection::BadFormat(TIMESTAMP))
        );
        assert_eq!(
            route(json!({"unit": "bpm", "timestamp": 1})),
            Err(Rejection::MissingSensorValue)
        );
        assert_eq!(
            route(json!({"heartRate": 80, "respiration": 12, "unit": "bpm", "timestamp": 1})),
            Err(Rejection::AmbiguousSensorValue)
        );
        assert_eq!(
            route(json!({"heartRate": "fast", "unit": "bpm", "timestamp": 1})),
            Err(Rejection::BadFormat("heartRate"))
        );
        assert_eq!(
            route(json!({"respiration": 12, "unit": "bpm", "timestamp": 1})),
            Err(Rejection::SensorMismatch {
                expected: SensorKind::HeartRate,
                actual: SensorKind::Respiration,
            })
        );
        assert!(archive.samples().is_empty());
    }

    #[test]
    fn test_archive_failure_is_not_a_rejection() {
        let registry = registered(&["m1"]);
        let applied = handle_sample(
            &registry,
            &FailingArchive,
            "m1",
            SensorKind::OxygenSaturation,
            &payload(json!({"oxygenSaturation": 97, "unit": "%", "timestamp": 5})),
        );
        assert_eq!(applied, Ok(Applied::Forwarded));
    }
}
