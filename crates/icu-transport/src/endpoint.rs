//! Address helpers shared by both collectors.
//!
//! Monitors sit on IPv4 or IPv6 networks. Wherever an address is rendered into
//! a host string or URI, IPv6 literals must be bracketed.

use crate::error::TransportError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::lookup_host;

/// Lifecycle of a collector connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not running.
    #[default]
    Stopped,
    /// Start in progress.
    Connecting,
    /// Receiving from monitors.
    Connected,
}

/// Render an address as a host literal.
///
/// ```
/// use icu_transport::endpoint::host_literal;
///
/// assert_eq!(host_literal("10.0.0.2".parse().unwrap()), "10.0.0.2");
/// assert_eq!(host_literal("fd00::2".parse().unwrap()), "[fd00::2]");
/// ```
#[must_use]
pub fn host_literal(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    }
}

/// Render a `coap://` URI for a resource on `addr`.
#[must_use]
pub fn coap_uri(addr: SocketAddr, path: &str) -> String {
    format!(
        "coap://{}:{}/{}",
        host_literal(addr.ip()),
        addr.port(),
        path.trim_start_matches('/')
    )
}

/// Wildcard local address of the same family as `peer`.
#[must_use]
pub fn unspecified_for(peer: SocketAddr) -> SocketAddr {
    match peer {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

/// Resolve a host name or literal to its first address.
///
/// # Errors
///
/// Returns an error if the lookup fails or yields nothing.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    lookup_host((bare, port))
        .await
        .map_err(|e| TransportError::Resolve(format!("{host}: {e}")))?
        .next()
        .ok_or_else(|| TransportError::Resolve(host.to_string()))
}
