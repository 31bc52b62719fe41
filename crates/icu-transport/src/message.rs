//! CoAP message construction.

use crate::error::TransportError;
use coap_lite::{
    CoapOption, ContentFormat, MessageClass, MessageType, Packet, RequestType, ResponseType,
};
use icu_protocol::resource::path_segments;

/// Largest datagram the collector reads.
pub const DATAGRAM_SIZE: usize = 8 * 1024;

/// Confirmable request to `path`.
#[must_use]
pub fn request(method: RequestType, path: &str, message_id: u16, token: &[u8]) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Confirmable);
    packet.header.code = MessageClass::Request(method);
    packet.header.message_id = message_id;
    packet.set_token(token.to_vec());
    for segment in path_segments(path) {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    packet
}

/// Confirmable `GET` registering an observation of `path`.
#[must_use]
pub fn observe_request(path: &str, message_id: u16, token: &[u8]) -> Packet {
    let mut packet = request(RequestType::Get, path, message_id, token);
    // An empty value encodes register (0).
    packet.add_option(CoapOption::Observe, Vec::new());
    packet
}

/// Confirmable request with a JSON body.
#[must_use]
pub fn json_request(
    method: RequestType,
    path: &str,
    message_id: u16,
    token: &[u8],
    body: Vec<u8>,
) -> Packet {
    let mut packet = request(method, path, message_id, token);
    packet.set_content_format(ContentFormat::ApplicationJSON);
    packet.payload = body;
    packet
}

/// Response to `request`.
///
/// Confirmable requests get a piggybacked acknowledgement; others get a
/// non-confirmable response under `message_id`.
#[must_use]
pub fn response(request: &Packet, status: ResponseType, message_id: u16) -> Packet {
    let mut packet = Packet::new();
    if request.header.get_type() == MessageType::Confirmable {
        packet.header.set_type(MessageType::Acknowledgement);
        packet.header.message_id = request.header.message_id;
    } else {
        packet.header.set_type(MessageType::NonConfirmable);
        packet.header.message_id = message_id;
    }
    packet.header.code = MessageClass::Response(status);
    packet.set_token(request.get_token().to_vec());
    packet
}

/// Response to `request` carrying a JSON body.
#[must_use]
pub fn json_response(request: &Packet, status: ResponseType, message_id: u16, body: Vec<u8>) -> Packet {
    let mut packet = response(request, status, message_id);
    packet.set_content_format(ContentFormat::ApplicationJSON);
    packet.payload = body;
    packet
}

/// Empty acknowledgement of a confirmable message.
#[must_use]
pub fn empty_ack(message_id: u16) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Acknowledgement);
    packet.header.code = MessageClass::Empty;
    packet.header.message_id = message_id;
    packet
}

/// `Uri-Path` of a request, segments joined by `/`.
#[must_use]
pub fn uri_path(packet: &Packet) -> String {
    packet
        .get_option(CoapOption::UriPath)
        .map(|segments| {
            segments
                .iter()
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

/// Check if a response code means success.
#[must_use]
pub fn is_success(code: MessageClass) -> bool {
    matches!(
        code,
        MessageClass::Response(
            ResponseType::Content
                | ResponseType::Valid
                | ResponseType::Changed
                | ResponseType::Created
        )
    )
}

/// Encode a packet for the wire.
///
/// # Errors
///
/// Returns an error if the packet cannot be encoded.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, TransportError> {
    Ok(packet.to_bytes()?)
}
