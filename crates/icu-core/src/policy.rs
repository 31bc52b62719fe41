//! Patient deterioration detection boundary.

use thiserror::Error;

/// Detection errors.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Not enough telemetry to reach a decision.
    #[error("Insufficient data for patient {0}")]
    InsufficientData(String),

    /// The detection backend failed.
    #[error("Detection failed: {0}")]
    Failed(String),
}

/// Decides whether a patient's condition warrants an alarm.
pub trait DeteriorationPolicy: Send + Sync {
    /// Check the patient attached to `monitor_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if no decision could be reached.
    fn detect(&self, monitor_id: &str, patient_id: &str) -> Result<bool, PolicyError>;
}

/// Policy that never reports a deterioration.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDeterioration;

impl DeteriorationPolicy for NoDeterioration {
    fn detect(&self, _monitor_id: &str, _patient_id: &str) -> Result<bool, PolicyError> {
        Ok(false)
    }
}
