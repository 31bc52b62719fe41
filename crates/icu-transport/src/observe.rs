//! CoAP observe relations.
//!
//! A relation is one observation of one resource on one monitor. It owns a
//! single UDP socket connected to the monitor, registers with a confirmable
//! `GET` carrying `Observe: 0`, then forwards every notification payload over
//! a channel to the collector's routing task. Any transport error ends that
//! relation alone: its socket is dropped and its record removed.

use crate::endpoint::unspecified_for;
use crate::error::TransportError;
use crate::message::{self, DATAGRAM_SIZE};
use bytes::Bytes;
use coap_lite::{CoapOption, MessageClass, MessageType, Packet};
use dashmap::DashMap;
use icu_core::MonitorId;
use icu_protocol::ObservedResource;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Identifier of an observe relation, also used as its token.
pub type RelationId = u64;

/// A notification received on a relation.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Relation the notification arrived on.
    pub relation_id: RelationId,
    /// Monitor that sent it.
    pub monitor_id: MonitorId,
    /// Resource it reports.
    pub resource: ObservedResource,
    /// Raw payload.
    pub payload: Bytes,
}

/// Record of a live relation.
#[derive(Debug)]
pub struct ObserveRelation {
    /// Relation identifier.
    pub id: RelationId,
    /// Observed monitor.
    pub monitor_id: MonitorId,
    /// Observed resource.
    pub resource: ObservedResource,
    /// Monitor address.
    pub endpoint: SocketAddr,
    task: Option<AbortHandle>,
}

/// Live relations of one collector.
#[derive(Debug, Default)]
pub struct RelationTable {
    relations: DashMap<RelationId, ObserveRelation>,
    // Held while relations are opened or cancelled, so a monitor's set is
    // replaced as a unit and no record is cancelled before its task is attached.
    lifecycle: Mutex<()>,
    next_id: AtomicU64,
    next_message_id: AtomicU16,
}

impl RelationTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a message id for an outgoing confirmable message.
    pub fn next_message_id(&self) -> u16 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, monitor_id: &str, resource: ObservedResource, endpoint: SocketAddr) -> RelationId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.relations.insert(
            id,
            ObserveRelation {
                id,
                monitor_id: monitor_id.to_string(),
                resource,
                endpoint,
                task: None,
            },
        );
        id
    }

    fn attach(&self, id: RelationId, task: AbortHandle) {
        // A relation that already failed is gone; its handle is dropped.
        if let Some(mut relation) = self.relations.get_mut(&id) {
            relation.task = Some(task);
        }
    }

    fn remove(&self, id: RelationId) {
        self.relations.remove(&id);
    }

    /// Get the number of live relations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Check if there are no live relations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Get the number of live relations on a monitor.
    #[must_use]
    pub fn count_for(&self, monitor_id: &str) -> usize {
        self.relations
            .iter()
            .filter(|r| r.monitor_id == monitor_id)
            .count()
    }

    /// Get the resources observed on a monitor.
    #[must_use]
    pub fn resources_for(&self, monitor_id: &str) -> Vec<ObservedResource> {
        self.relations
            .iter()
            .filter(|r| r.monitor_id == monitor_id)
            .map(|r| r.resource)
            .collect()
    }

    /// Cancel every relation on a monitor.
    pub fn cancel_monitor(&self, monitor_id: &str) -> usize {
        let _lifecycle = self.lifecycle.lock();
        self.cancel_monitor_locked(monitor_id)
    }

    fn cancel_monitor_locked(&self, monitor_id: &str) -> usize {
        let mut cancelled = 0;
        self.relations.retain(|_, relation| {
            if relation.monitor_id != monitor_id {
                return true;
            }
            if let Some(task) = &relation.task {
                task.abort();
            }
            cancelled += 1;
            false
        });
        cancelled
    }

    /// Cancel every relation.
    pub fn cancel_all(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.relations.retain(|_, relation| {
            if let Some(task) = &relation.task {
                task.abort();
            }
            false
        });
    }
}

/// Open one relation per observable resource of a monitor, cancelling the
/// relations it already has. Returns the number cancelled.
pub fn observe_monitor(
    table: &Arc<RelationTable>,
    monitor_id: &str,
    endpoint: SocketAddr,
    first_response_timeout: Duration,
    notifications: &mpsc::Sender<Notification>,
) -> usize {
    let _lifecycle = table.lifecycle.lock();
    let replaced = table.cancel_monitor_locked(monitor_id);
    for resource in ObservedResource::ALL {
        let id = table.insert(monitor_id, resource, endpoint);
        let relation = Relation {
            id,
            monitor_id: monitor_id.to_string(),
            resource,
            endpoint,
            first_response_timeout,
        };
        let task = tokio::spawn(run_relation(
            Arc::clone(table),
            relation,
            notifications.clone(),
        ));
        table.attach(id, task.abort_handle());
    }
    info!(monitor = %monitor_id, endpoint = %endpoint, replaced, "Observing monitor");
    replaced
}

struct Relation {
    id: RelationId,
    monitor_id: MonitorId,
    resource: ObservedResource,
    endpoint: SocketAddr,
    first_response_timeout: Duration,
}

async fn run_relation(
    table: Arc<RelationTable>,
    relation: Relation,
    notifications: mpsc::Sender<Notification>,
) {
    match observe(&table, &relation, &notifications).await {
        Ok(()) => debug!(
            relation = relation.id,
            monitor = %relation.monitor_id,
            resource = relation.resource.path(),
            "Relation closed"
        ),
        Err(e) => warn!(
            relation = relation.id,
            monitor = %relation.monitor_id,
            resource = relation.resource.path(),
            error = %e,
            "Relation cancelled"
        ),
    }
    table.remove(relation.id);
}

async fn observe(
    table: &RelationTable,
    relation: &Relation,
    notifications: &mpsc::Sender<Notification>,
) -> Result<(), TransportError> {
    let socket = UdpSocket::bind(unspecified_for(relation.endpoint)).await?;
    socket.connect(relation.endpoint).await?;

    let token = relation.id.to_be_bytes();
    let message_id = table.next_message_id();
    let request = message::observe_request(relation.resource.path(), message_id, &token);
    socket.send(&message::encode(&request)?).await?;
    debug!(relation = relation.id, resource = relation.resource.path(), "Sent observe request");

    let mut buf = vec![0u8; DATAGRAM_SIZE];
    let first = timeout(
        relation.first_response_timeout,
        next_response(&socket, &mut buf, &token, message_id),
    )
    .await
    .map_err(|_| TransportError::Timeout(format!("first response on {}", relation.resource.path())))??;

    let observable = first.get_option(CoapOption::Observe).is_some();
    if !forward(relation, first, notifications).await {
        return Ok(());
    }
    if !observable {
        return Err(TransportError::NotObservable);
    }

    loop {
        let packet = next_response(&socket, &mut buf, &token, message_id).await?;
        if !forward(relation, packet, notifications).await {
            return Ok(());
        }
    }
}

/// Wait for the next successful response carrying `token`.
///
/// Confirmable responses are acknowledged. Datagrams for other exchanges are
/// skipped.
async fn next_response(
    socket: &UdpSocket,
    buf: &mut [u8],
    token: &[u8],
    request_id: u16,
) -> Result<Packet, TransportError> {
    loop {
        let len = socket.recv(buf).await?;
        let packet = match Packet::from_bytes(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(error = ?e, "Skipping undecodable datagram");
                continue;
            }
        };

        let kind = packet.header.get_type();
        if kind == MessageType::Reset {
            return Err(TransportError::Reset);
        }
        if packet.header.code == MessageClass::Empty {
            // Empty ACK: the response follows separately.
            trace!(message_id = packet.header.message_id, request_id, "Empty acknowledgement");
            continue;
        }
        if packet.get_token() != token {
            trace!("Skipping response for another exchange");
            continue;
        }

        if kind == MessageType::Confirmable {
            let ack = message::empty_ack(packet.header.message_id);
            socket.send(&message::encode(&ack)?).await?;
        }

        if !message::is_success(packet.header.code) {
            return Err(TransportError::ErrorResponse(format!("{:?}", packet.header.code)));
        }
        return Ok(packet);
    }
}

/// Hand a notification to the routing task. Returns `false` once routing
/// has shut down.
async fn forward(
    relation: &Relation,
    packet: Packet,
    notifications: &mpsc::Sender<Notification>,
) -> bool {
    let notification = Notification {
        relation_id: relation.id,
        monitor_id: relation.monitor_id.clone(),
        resource: relation.resource,
        payload: Bytes::from(packet.payload),
    };
    notifications.send(notification).await.is_ok()
}
