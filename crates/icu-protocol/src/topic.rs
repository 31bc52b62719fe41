//! MQTT topic grammar.
//!
//! Monitors publish on two roots:
//!
//! ```text
//! telemetry/<namespace>/<monitorId>/patient-state/<field>
//! cmd/<namespace>/<target>/<field>
//! ```
//!
//! Telemetry carries samples and alarm state echoes, the command root carries
//! registrations addressed to the collector. The collector publishes alarm
//! commands on `cmd/<namespace>/<monitorId>/patient-state/alarm-state`.

use crate::sensor::SensorKind;

/// Root segment of telemetry topics.
pub const TELEMETRY_ROOT: &str = "telemetry";

/// Root segment of command topics.
pub const COMMAND_ROOT: &str = "cmd";

/// Segment preceding the telemetry field.
pub const PATIENT_STATE: &str = "patient-state";

/// Target segment of commands addressed to the collector.
pub const COLLECTOR_TARGET: &str = "collector";

const ALARM_STATE: &str = "alarm-state";
const MONITOR_REGISTRATION: &str = "monitor-registration";
const PATIENT_REGISTRATION: &str = "patient-registration";

/// Classification of an inbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicClass<'a> {
    /// `cmd/<ns>/<target>/monitor-registration`.
    MonitorRegistration,
    /// `cmd/<ns>/<target>/patient-registration`.
    PatientRegistration,
    /// `telemetry/<ns>/<monitorId>/patient-state/alarm-state`.
    AlarmState { monitor_id: &'a str },
    /// `telemetry/<ns>/<monitorId>/patient-state/<sensor>`.
    Sample {
        monitor_id: &'a str,
        kind: SensorKind,
    },
    /// Anything the collector does not understand.
    Unknown,
}

/// Classify a topic.
///
/// Malformed topics are never an error: they classify as [`TopicClass::Unknown`].
#[must_use]
pub fn classify(topic: &str) -> TopicClass<'_> {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return TopicClass::Unknown;
    }

    match segments.as_slice() {
        [TELEMETRY_ROOT, _namespace, monitor_id, PATIENT_STATE, field] => {
            if *field == ALARM_STATE {
                TopicClass::AlarmState {
                    monitor_id: *monitor_id,
                }
            } else if let Some(kind) = SensorKind::from_topic_segment(field) {
                TopicClass::Sample {
                    monitor_id: *monitor_id,
                    kind,
                }
            } else {
                TopicClass::Unknown
            }
        }
        [COMMAND_ROOT, _namespace, _target, field] => match *field {
            MONITOR_REGISTRATION => TopicClass::MonitorRegistration,
            PATIENT_REGISTRATION => TopicClass::PatientRegistration,
            _ => TopicClass::Unknown,
        },
        _ => TopicClass::Unknown,
    }
}

/// Filter matching every telemetry topic of every monitor in a namespace.
#[must_use]
pub fn all_patient_states(namespace: &str) -> String {
    format!("{TELEMETRY_ROOT}/{namespace}/+/{PATIENT_STATE}/+")
}

/// Filter matching every command addressed to the collector.
#[must_use]
pub fn all_collector_commands(namespace: &str) -> String {
    format!("{COMMAND_ROOT}/{namespace}/{COLLECTOR_TARGET}/+")
}

/// Topic on which a monitor listens for alarm commands.
#[must_use]
pub fn alarm_command(namespace: &str, monitor_id: &str) -> String {
    format!("{COMMAND_ROOT}/{namespace}/{monitor_id}/{PATIENT_STATE}/{ALARM_STATE}")
}
