//! CoAP collector.
//!
//! Serves the `registeredMonitors` collection. A monitor registers with a
//! `POST`; the collector answers `2.01 Created`, records the sender's address
//! as the monitor's endpoint and opens observe relations on the monitor's
//! patient, alarm, and sensor resources. Notifications come back through a
//! channel to a single routing task.

use crate::endpoint::{coap_uri, unspecified_for, ConnectionState};
use crate::error::TransportError;
use crate::exchange::{ExchangeCache, Seen, EXCHANGE_LIFETIME};
use crate::message::{self, DATAGRAM_SIZE};
use crate::observe::{observe_monitor, Notification, RelationTable};
use async_trait::async_trait;
use bytes::Bytes;
use coap_lite::{MessageClass, Packet, RequestType, ResponseType};
use icu_core::{
    router, AlarmDispatch, ArchiveSink, Collector, CollectorError, MonitorId, Registry,
};
use icu_protocol::resource::REGISTERED_MONITORS;
use icu_protocol::{codec, ObservedResource};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

/// CoAP collector configuration.
#[derive(Debug, Clone)]
pub struct CoapConfig {
    /// Address the collection resource is served on.
    pub bind_addr: SocketAddr,
    /// Time allowed for a monitor to answer an observe request.
    pub observe_timeout: Duration,
    /// Capacity of the notification channel.
    pub channel_capacity: usize,
    /// How long a request's message id is remembered for deduplication.
    pub exchange_lifetime: Duration,
}

impl Default for CoapConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 5683)),
            observe_timeout: Duration::from_secs(5),
            channel_capacity: 256,
            exchange_lifetime: EXCHANGE_LIFETIME,
        }
    }
}

struct Running {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    server: JoinHandle<()>,
    router: JoinHandle<()>,
}

/// State shared by the server loop and its request tasks.
struct Shared {
    registry: Arc<Registry>,
    relations: Arc<RelationTable>,
    exchanges: ExchangeCache,
    handlers: parking_lot::Mutex<JoinSet<()>>,
    observe_timeout: Duration,
}

/// Collector for monitors speaking CoAP.
pub struct CoapCollector {
    config: CoapConfig,
    registry: Arc<Registry>,
    archive: Arc<dyn ArchiveSink>,
    relations: Arc<RelationTable>,
    running: Mutex<Option<Running>>,
}

impl CoapCollector {
    /// Create a stopped collector.
    #[must_use]
    pub fn new(config: CoapConfig, archive: Arc<dyn ArchiveSink>) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            archive,
            relations: Arc::new(RelationTable::new()),
            running: Mutex::new(None),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &CoapConfig {
        &self.config
    }

    /// Get the address the server is bound to, once started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Get the connection state.
    pub async fn state(&self) -> ConnectionState {
        if self.running.lock().await.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Stopped
        }
    }

    /// Get the live observe relations.
    #[must_use]
    pub fn relations(&self) -> &RelationTable {
        &self.relations
    }

    /// Get the number of live observe relations on a monitor.
    #[must_use]
    pub fn relation_count(&self, monitor_id: &str) -> usize {
        self.relations.count_for(monitor_id)
    }
}

async fn serve(
    shared: Arc<Shared>,
    socket: Arc<UdpSocket>,
    notifications: mpsc::Sender<Notification>,
    sweep_every: Duration,
) {
    let mut buf = vec![0u8; DATAGRAM_SIZE];
    let mut sweep = tokio::time::interval(sweep_every);
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "CoAP receive failed");
                        continue;
                    }
                };
                let datagram = buf[..len].to_vec();
                let mut handlers = shared.handlers.lock();
                while handlers.try_join_next().is_some() {}
                handlers.spawn(handle_datagram(
                    Arc::clone(&shared),
                    Arc::clone(&socket),
                    datagram,
                    peer,
                    notifications.clone(),
                ));
            }
            _ = sweep.tick() => shared.exchanges.purge(),
        }
    }
}

async fn handle_datagram(
    shared: Arc<Shared>,
    socket: Arc<UdpSocket>,
    datagram: Vec<u8>,
    peer: SocketAddr,
    notifications: mpsc::Sender<Notification>,
) {
    let request = match Packet::from_bytes(&datagram) {
        Ok(packet) => packet,
        Err(e) => {
            debug!(peer = %peer, error = ?e, "Dropping undecodable datagram");
            return;
        }
    };
    let MessageClass::Request(method) = request.header.code else {
        debug!(peer = %peer, code = ?request.header.code, "Dropping non-request");
        return;
    };

    let request_id = request.header.message_id;
    match shared.exchanges.begin(peer, request_id) {
        Seen::New => {}
        Seen::InProgress => {
            trace!(peer = %peer, message_id = request_id, "Dropping duplicate of a request in progress");
            return;
        }
        Seen::Replay(response) => {
            debug!(peer = %peer, message_id = request_id, "Replaying response to duplicate request");
            if let Err(e) = socket.send_to(&response, peer).await {
                warn!(peer = %peer, error = %e, "Failed to send CoAP response");
            }
            return;
        }
    }

    let path = message::uri_path(&request);
    trace!(peer = %peer, method = ?method, path = %path, "CoAP request");

    let message_id = shared.relations.next_message_id();
    let mut registered = None;
    let response = if path != REGISTERED_MONITORS {
        message::response(&request, ResponseType::NotFound, message_id)
    } else {
        match method {
            RequestType::Post => match register(&shared.registry, &request.payload) {
                Ok(monitor_id) => {
                    registered = Some(monitor_id);
                    message::response(&request, ResponseType::Created, message_id)
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Rejected registration");
                    message::response(&request, ResponseType::BadRequest, message_id)
                }
            },
            RequestType::Get => match codec::encode_registered_monitors(&shared.registry.monitor_ids()) {
                Ok(body) => message::json_response(&request, ResponseType::Content, message_id, body),
                Err(e) => {
                    warn!(error = %e, "Failed to encode monitor list");
                    message::response(&request, ResponseType::InternalServerError, message_id)
                }
            },
            _ => message::response(&request, ResponseType::MethodNotAllowed, message_id),
        }
    };

    match message::encode(&response) {
        Ok(bytes) => {
            let bytes = Bytes::from(bytes);
            shared.exchanges.complete(peer, request_id, bytes.clone());
            if let Err(e) = socket.send_to(&bytes, peer).await {
                warn!(peer = %peer, error = %e, "Failed to send CoAP response");
            }
        }
        Err(e) => {
            shared.exchanges.abandon(peer, request_id);
            warn!(peer = %peer, error = %e, "Failed to encode CoAP response");
        }
    }

    if let Some(monitor_id) = registered {
        shared.registry.set_endpoint(&monitor_id, peer);
        observe_monitor(
            &shared.relations,
            &monitor_id,
            peer,
            shared.observe_timeout,
            &notifications,
        );
    }
}

#[derive(Debug, thiserror::Error)]
enum RegisterError {
    #[error(transparent)]
    Decode(#[from] icu_protocol::ProtocolError),
    #[error(transparent)]
    Rejected(#[from] icu_core::Rejection),
}

fn register(registry: &Registry, body: &[u8]) -> Result<MonitorId, RegisterError> {
    let payload = codec::decode(body)?;
    Ok(router::handle_monitor_registration(registry, &payload)?)
}

async fn route_notifications(
    registry: Arc<Registry>,
    archive: Arc<dyn ArchiveSink>,
    mut notifications: mpsc::Receiver<Notification>,
) {
    while let Some(notification) = notifications.recv().await {
        route_notification(&registry, archive.as_ref(), &notification);
    }
    debug!("Notification channel closed");
}

/// Decode a notification and route it by the resource it was observed on.
pub fn route_notification(registry: &Registry, archive: &dyn ArchiveSink, notification: &Notification) {
    let monitor_id = notification.monitor_id.as_str();
    let resource = notification.resource.path();
    let payload = match codec::decode(&notification.payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(monitor = %monitor_id, resource, error = %e, "Dropping malformed notification");
            return;
        }
    };
    trace!(monitor = %monitor_id, resource, ?payload, "Notification");

    let result = match notification.resource {
        ObservedResource::RegisteredPatient => {
            router::handle_patient_registration(registry, monitor_id, &payload)
        }
        ObservedResource::AlarmState => router::handle_alarm_state(registry, monitor_id, &payload),
        ObservedResource::Sensor(kind) => {
            router::handle_sample(registry, archive, monitor_id, kind, &payload)
        }
    };

    if let Err(rejection) = result {
        warn!(monitor = %monitor_id, resource, %rejection, "Rejected notification");
    }
}

#[async_trait]
impl Collector for CoapCollector {
    fn name(&self) -> &'static str {
        "coap"
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    async fn start(&self) -> Result<(), CollectorError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("CoAP collector already started");
            return Ok(());
        }

        let socket = UdpSocket::bind(self.config.bind_addr).await?;
        let local_addr = socket.local_addr()?;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        let shared = Arc::new(Shared {
            registry: Arc::clone(&self.registry),
            relations: Arc::clone(&self.relations),
            exchanges: ExchangeCache::new(self.config.exchange_lifetime),
            handlers: parking_lot::Mutex::new(JoinSet::new()),
            observe_timeout: self.config.observe_timeout,
        });
        let router = tokio::spawn(route_notifications(
            Arc::clone(&self.registry),
            Arc::clone(&self.archive),
            rx,
        ));
        let sweep_every = self.config.exchange_lifetime.max(Duration::from_secs(1));
        let server = tokio::spawn(serve(Arc::clone(&shared), Arc::new(socket), tx, sweep_every));

        *running = Some(Running {
            local_addr,
            shared,
            server,
            router,
        });
        info!(addr = %local_addr, "CoAP collector listening");
        Ok(())
    }

    async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.server.abort();
        let _ = running.server.await;

        // Requests already being handled finish before relations and the
        // registry are torn down.
        let mut handlers = std::mem::take(&mut *running.shared.handlers.lock());
        handlers.shutdown().await;

        self.relations.cancel_all();
        running.router.abort();
        self.registry.clear();
        info!("CoAP collector stopped");
    }

    async fn turn_on_alarm(&self, monitor_id: &str) -> Result<AlarmDispatch, CollectorError> {
        let Some(monitor) = self.registry.get(monitor_id) else {
            debug!(monitor = %monitor_id, "Alarm requested for unknown monitor");
            return Ok(AlarmDispatch::UnknownMonitor);
        };
        let Some(endpoint) = monitor.endpoint else {
            warn!(monitor = %monitor_id, "Cannot send alarm command: no endpoint");
            return Err(CollectorError::NoEndpoint(monitor_id.to_string()));
        };

        let path = ObservedResource::AlarmState.path();
        let uri = coap_uri(endpoint, path);
        if let Err(e) = send_alarm(&self.relations, endpoint, path).await {
            warn!(monitor = %monitor_id, uri = %uri, error = %e, "Failed to send alarm command");
            return Err(e.into());
        }

        self.registry.set_alarm(monitor_id, true);
        info!(monitor = %monitor_id, uri = %uri, "Sent alarm command");
        Ok(AlarmDispatch::Sent)
    }
}

async fn send_alarm(
    relations: &RelationTable,
    endpoint: SocketAddr,
    path: &str,
) -> Result<(), TransportError> {
    let message_id = relations.next_message_id();
    let request = message::json_request(
        RequestType::Put,
        path,
        message_id,
        &message_id.to_be_bytes(),
        codec::encode_alarm_on()?,
    );
    let socket = UdpSocket::bind(unspecified_for(endpoint)).await?;
    socket.send_to(&message::encode(&request)?, endpoint).await?;
    Ok(())
}
