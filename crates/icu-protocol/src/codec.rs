//! JSON payload codec.
//!
//! Monitors send small JSON objects on both transports. Inbound payloads are
//! decoded into an untyped key/value [`Payload`]; the router validates the keys
//! it needs. Outbound bodies are rendered here so both transports send the
//! same bytes.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Maximum accepted payload size (monitors use 256 byte buffers).
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024;

/// A decoded JSON object.
pub type Payload = Map<String, Value>;

/// Payload key carrying the monitor identifier.
pub const MONITOR_ID: &str = "monitorID";
/// Payload key carrying the registration flag.
pub const REGISTRATION: &str = "registration";
/// Payload key carrying the patient identifier.
pub const PATIENT_ID: &str = "patientID";
/// Payload key carrying the alarm flag.
pub const ALARM: &str = "alarm";
/// Payload key carrying a sample's measurement unit.
pub const UNIT: &str = "unit";
/// Payload key carrying a sample's timestamp.
pub const TIMESTAMP: &str = "timestamp";

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload exceeds maximum size.
    #[error("Payload size {0} exceeds maximum {MAX_PAYLOAD_SIZE}")]
    PayloadTooLarge(usize),

    /// Payload is not valid UTF-8 JSON.
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is valid JSON but not an object.
    #[error("Payload is not a JSON object")]
    NotAnObject,
}

/// Decode an inbound payload.
///
/// Surrounding whitespace and trailing NUL padding are ignored, since
/// constrained devices often send fixed-size buffers.
///
/// # Errors
///
/// Returns an error if the payload is too large, is not JSON, or is not an object.
pub fn decode(data: &[u8]) -> Result<Payload, ProtocolError> {
    if data.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(data.len()));
    }

    let trimmed = trim(data);
    match serde_json::from_slice(trimmed)? {
        Value::Object(map) => Ok(map),
        _ => Err(ProtocolError::NotAnObject),
    }
}

fn trim(data: &[u8]) -> &[u8] {
    let is_padding = |b: &u8| b.is_ascii_whitespace() || *b == 0;
    let start = data.iter().position(|b| !is_padding(b)).unwrap_or(data.len());
    let end = data.iter().rposition(|b| !is_padding(b)).map_or(start, |i| i + 1);
    &data[start..end]
}

#[derive(Serialize)]
struct AlarmCommand {
    alarm: bool,
}

#[derive(Serialize)]
struct RegisteredMonitors<'a> {
    #[serde(rename = "registeredMonitors")]
    registered_monitors: &'a [String],
}

/// Body of the command that turns on a monitor's alarm.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_alarm_on() -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(&AlarmCommand { alarm: true })?)
}

/// Body of the response to a read of the registered monitors collection.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_registered_monitors(ids: &[String]) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(&RegisteredMonitors {
        registered_monitors: ids,
    })?)
}
