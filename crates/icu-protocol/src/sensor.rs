//! Sensor kinds carried by a vital signs monitor.
//!
//! Every kind has three spellings on the wire: the MQTT topic segment, the
//! JSON payload key and the CoAP resource path exposed by the device.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A sensor mounted on a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SensorKind {
    HeartRate,
    BloodPressure,
    Temperature,
    Respiration,
    OxygenSaturation,
}

impl SensorKind {
    /// All kinds, in the order relations are opened.
    pub const ALL: [SensorKind; 5] = [
        SensorKind::HeartRate,
        SensorKind::BloodPressure,
        SensorKind::Temperature,
        SensorKind::Respiration,
        SensorKind::OxygenSaturation,
    ];

    /// Final segment of a telemetry topic, e.g. `heart-rate`.
    #[must_use]
    pub const fn topic_segment(self) -> &'static str {
        match self {
            SensorKind::HeartRate => "heart-rate",
            SensorKind::BloodPressure => "blood-pressure",
            SensorKind::Temperature => "temperature",
            SensorKind::Respiration => "respiration",
            SensorKind::OxygenSaturation => "oxygen-saturation",
        }
    }

    /// Key holding the sampled value in a JSON payload, e.g. `heartRate`.
    #[must_use]
    pub const fn payload_key(self) -> &'static str {
        match self {
            SensorKind::HeartRate => "heartRate",
            SensorKind::BloodPressure => "bloodPressure",
            SensorKind::Temperature => "temperature",
            SensorKind::Respiration => "respiration",
            SensorKind::OxygenSaturation => "oxygenSaturation",
        }
    }

    /// Resource path exposed by a CoAP monitor, e.g. `patientState/heartRate`.
    #[must_use]
    pub const fn resource_path(self) -> &'static str {
        match self {
            SensorKind::HeartRate => "patientState/heartRate",
            SensorKind::BloodPressure => "patientState/bloodPressure",
            SensorKind::Temperature => "patientState/temperature",
            SensorKind::Respiration => "patientState/respiration",
            SensorKind::OxygenSaturation => "patientState/oxygenSaturation",
        }
    }

    /// Parse a telemetry topic segment.
    #[must_use]
    pub fn from_topic_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.topic_segment() == segment)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic_segment())
    }
}
