//! Collector abstraction.
//!
//! A collector is one transport adapter: it owns a [`Registry`], keeps it
//! current from the wire, and can push an alarm command to a monitor. The
//! health check only talks to collectors through this trait.

use crate::registry::Registry;
use async_trait::async_trait;
use thiserror::Error;

/// Collector errors.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The collector is not connected.
    #[error("Collector not connected")]
    NotConnected,

    /// Start-up did not complete in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The monitor has no known endpoint to push commands to.
    #[error("No endpoint known for monitor {0}")]
    NoEndpoint(String),

    /// An address could not be resolved.
    #[error("Cannot resolve address: {0}")]
    Resolve(String),

    /// Failed to send a command.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] icu_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of an alarm dispatch that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmDispatch {
    /// The command left the collector; the alarm is now marked active.
    Sent,
    /// No such monitor; nothing was sent.
    UnknownMonitor,
}

/// A transport adapter feeding a registry.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Get the collector name (e.g., "mqtt", "coap").
    fn name(&self) -> &'static str;

    /// Get the registry this collector maintains.
    fn registry(&self) -> &Registry;

    /// Start receiving from monitors.
    async fn start(&self) -> Result<(), CollectorError>;

    /// Stop receiving and release transport resources.
    async fn stop(&self);

    /// Send a command turning on a monitor's alarm.
    ///
    /// Delivery is not acknowledged: on apparent send success the alarm is
    /// marked active locally. On failure local state is left untouched.
    async fn turn_on_alarm(&self, monitor_id: &str) -> Result<AlarmDispatch, CollectorError>;
}
