//! Telemetry archive boundary.
//!
//! The router hands every accepted sample to an [`ArchiveSink`]; storage is
//! the sink's business.

use icu_protocol::SensorKind;
use thiserror::Error;
use tracing::info;

/// Archive errors.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The backing store is unreachable.
    #[error("Archive unavailable: {0}")]
    Unavailable(String),

    /// The backing store refused the sample.
    #[error("Sample rejected: {0}")]
    Rejected(String),
}

/// A sample accepted from a registered monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    /// Sensor that produced the sample.
    pub kind: SensorKind,
    /// Sampled value.
    pub value: f64,
    /// Measurement unit, as reported by the device.
    pub unit: String,
    /// Device timestamp.
    pub timestamp: f64,
    /// Monitor that produced the sample.
    pub monitor_id: String,
    /// Patient attached to the monitor when the sample was accepted.
    pub patient_id: String,
}

/// Destination of accepted samples.
pub trait ArchiveSink: Send + Sync {
    /// Store a sample.
    ///
    /// # Errors
    ///
    /// Returns an error if the sample could not be stored.
    fn save(&self, sample: TelemetrySample) -> Result<(), ArchiveError>;
}

/// Archive that writes samples to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingArchive;

impl ArchiveSink for TracingArchive {
    fn save(&self, sample: TelemetrySample) -> Result<(), ArchiveError> {
        info!(
            monitor = %sample.monitor_id,
            patient = %sample.patient_id,
            sensor = %sample.kind,
            value = sample.value,
            unit = %sample.unit,
            timestamp = sample.timestamp,
            "Archived sample"
        );
        Ok(())
    }
}
