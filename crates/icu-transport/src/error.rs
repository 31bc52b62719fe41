//! Transport errors.

use icu_core::CollectorError;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A host name did not resolve to any address.
    #[error("Cannot resolve {0}")]
    Resolve(String),

    /// The peer did not answer in time.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// There is no open connection.
    #[error("Not connected")]
    NotConnected,

    /// The MQTT connection failed.
    #[error("MQTT connection error: {0}")]
    Mqtt(#[from] rumqttc::ConnectionError),

    /// The MQTT client could not queue a request.
    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    /// A CoAP message could not be encoded or decoded.
    #[error("CoAP message error: {0}")]
    Coap(String),

    /// The peer answered with a CoAP error code.
    #[error("Error response: {0}")]
    ErrorResponse(String),

    /// The peer reset the exchange.
    #[error("Reset by peer")]
    Reset,

    /// The peer answered but does not support observation.
    #[error("Resource not observable")]
    NotObservable,

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] icu_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<coap_lite::error::MessageError> for TransportError {
    fn from(e: coap_lite::error::MessageError) -> Self {
        Self::Coap(format!("{e:?}"))
    }
}

impl From<TransportError> for CollectorError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Resolve(host) => CollectorError::Resolve(host),
            TransportError::Timeout(what) => CollectorError::Timeout(what),
            TransportError::NotConnected => CollectorError::NotConnected,
            TransportError::Protocol(e) => CollectorError::Protocol(e),
            TransportError::Io(e) => CollectorError::Io(e),
            other => CollectorError::SendFailed(other.to_string()),
        }
    }
}
