//! MQTT collector.
//!
//! Keeps one broker connection, subscribed to every telemetry topic of the
//! namespace and to the commands addressed to the collector. Inbound publishes
//! are decoded and handed to the router from the event loop task. A lost
//! connection leaves the collector stopped; there is no automatic reconnect.

use crate::endpoint::{host_literal, resolve, ConnectionState};
use crate::error::TransportError;
use async_trait::async_trait;
use icu_core::{router, AlarmDispatch, ArchiveSink, Collector, CollectorError, Registry};
use icu_protocol::{codec, topic, TopicClass};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Time allowed for the event loop to flush a DISCONNECT on stop.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// MQTT collector configuration.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host name or address literal.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Client identifier presented to the broker.
    pub client_id: String,
    /// Topic namespace shared with the monitors.
    pub namespace: String,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// Time allowed for the broker to acknowledge the connection.
    pub connect_timeout: Duration,
    /// Capacity of the outgoing request queue.
    pub capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "collector".to_string(),
            namespace: "smartICU".to_string(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            capacity: 64,
        }
    }
}

/// Collector for monitors speaking MQTT.
pub struct MqttCollector {
    config: MqttConfig,
    registry: Arc<Registry>,
    archive: Arc<dyn ArchiveSink>,
    state: Arc<RwLock<ConnectionState>>,
    client: Arc<Mutex<Option<AsyncClient>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttCollector {
    /// Create a stopped collector.
    #[must_use]
    pub fn new(config: MqttConfig, archive: Arc<dyn ArchiveSink>) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            archive,
            state: Arc::new(RwLock::new(ConnectionState::Stopped)),
            client: Arc::new(Mutex::new(None)),
            event_loop: Mutex::new(None),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Get the connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn connect(&self) -> Result<(AsyncClient, EventLoop), TransportError> {
        let addr = resolve(&self.config.host, self.config.port).await?;
        let host = host_literal(addr.ip());
        info!(broker = %host, port = addr.port(), "Connecting to MQTT broker");

        let mut options = MqttOptions::new(&self.config.client_id, host, addr.port());
        options.set_keep_alive(self.config.keep_alive);
        let (client, mut eventloop) = AsyncClient::new(options, self.config.capacity);

        timeout(self.config.connect_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| TransportError::Timeout("CONNACK".into()))??;

        let namespace = &self.config.namespace;
        for filter in [
            topic::all_patient_states(namespace),
            topic::all_collector_commands(namespace),
        ] {
            debug!(filter = %filter, "Subscribing");
            client.subscribe(filter, QoS::AtLeastOnce).await?;
        }

        Ok((client, eventloop))
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
            debug!(code = ?ack.code, "Broker accepted the connection");
            return Ok(());
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    registry: Arc<Registry>,
    archive: Arc<dyn ArchiveSink>,
    state: Arc<RwLock<ConnectionState>>,
    client: Arc<Mutex<Option<AsyncClient>>>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                dispatch_publish(&registry, archive.as_ref(), &publish.topic, &publish.payload);
            }
            Ok(event) => trace!(?event, "MQTT event"),
            Err(e) => {
                warn!(error = %e, "MQTT connection closed");
                break;
            }
        }
    }

    *state.write().await = ConnectionState::Stopped;
    client.lock().await.take();
}

/// Decode an inbound publish and route it by topic.
///
/// Nothing here fails: malformed payloads, unknown topics and rejected
/// messages are logged and dropped.
pub fn dispatch_publish(registry: &Registry, archive: &dyn ArchiveSink, topic: &str, payload: &[u8]) {
    let payload = match codec::decode(payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(topic = %topic, error = %e, "Dropping malformed payload");
            return;
        }
    };
    trace!(topic = %topic, ?payload, "Inbound publish");

    let result = match topic::classify(topic) {
        TopicClass::MonitorRegistration => {
            router::handle_monitor_registration(registry, &payload).map(drop)
        }
        TopicClass::PatientRegistration => {
            router::handle_addressed_patient_registration(registry, &payload).map(drop)
        }
        TopicClass::AlarmState { monitor_id } => {
            router::handle_alarm_state(registry, monitor_id, &payload).map(drop)
        }
        TopicClass::Sample { monitor_id, kind } => {
            router::handle_sample(registry, archive, monitor_id, kind, &payload).map(drop)
        }
        TopicClass::Unknown => {
            debug!(topic = %topic, "Ignoring unknown topic");
            return;
        }
    };

    if let Err(rejection) = result {
        warn!(topic = %topic, %rejection, "Rejected message");
    }
}

#[async_trait]
impl Collector for MqttCollector {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    async fn start(&self) -> Result<(), CollectorError> {
        {
            let mut state = self.state.write().await;
            if *state != ConnectionState::Stopped {
                debug!(state = ?*state, "MQTT collector already started");
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }

        let (client, eventloop) = match self.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                *self.state.write().await = ConnectionState::Stopped;
                warn!(error = %e, "Failed to connect to MQTT broker");
                return Err(e.into());
            }
        };

        *self.client.lock().await = Some(client);
        *self.state.write().await = ConnectionState::Connected;
        let handle = tokio::spawn(run_event_loop(
            eventloop,
            Arc::clone(&self.registry),
            Arc::clone(&self.archive),
            Arc::clone(&self.state),
            Arc::clone(&self.client),
        ));
        *self.event_loop.lock().await = Some(handle);

        info!(namespace = %self.config.namespace, "MQTT collector started");
        Ok(())
    }

    async fn stop(&self) {
        if let Some(client) = self.client.lock().await.take() {
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "Disconnect not queued");
            }
        }

        if let Some(handle) = self.event_loop.lock().await.take() {
            let abort = handle.abort_handle();
            if timeout(DISCONNECT_GRACE, handle).await.is_err() {
                abort.abort();
            }
        }

        *self.state.write().await = ConnectionState::Stopped;
        self.registry.clear();
        info!("MQTT collector stopped");
    }

    async fn turn_on_alarm(&self, monitor_id: &str) -> Result<AlarmDispatch, CollectorError> {
        if !self.registry.contains(monitor_id) {
            debug!(monitor = %monitor_id, "Alarm requested for unknown monitor");
            return Ok(AlarmDispatch::UnknownMonitor);
        }

        let Some(client) = self.client.lock().await.clone() else {
            warn!(monitor = %monitor_id, "Cannot send alarm command: not connected");
            return Err(CollectorError::NotConnected);
        };

        let topic = topic::alarm_command(&self.config.namespace, monitor_id);
        let body = codec::encode_alarm_on()?;
        if let Err(e) = client.publish(&topic, QoS::AtLeastOnce, false, body).await {
            warn!(monitor = %monitor_id, topic = %topic, error = %e, "Failed to publish alarm command");
            return Err(TransportError::from(e).into());
        }

        self.registry.set_alarm(monitor_id, true);
        info!(monitor = %monitor_id, topic = %topic, "Sent alarm command");
        Ok(AlarmDispatch::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icu_core::{ArchiveError, Monitor, TelemetrySample};
    use icu_protocol::SensorKind;
    use std::sync::Mutex as StdMutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Default)]
    struct RecordingArchive {
        samples: StdMutex<Vec<TelemetrySample>>,
    }

    impl ArchiveSink for RecordingArchive {
        fn save(&self, sample: TelemetrySample) -> Result<(), ArchiveError> {
            self.samples.lock().unwrap().push(sample);
            Ok(())
        }
    }

    fn config(port: u16) -> MqttConfig {
        MqttConfig {
            port,
            connect_timeout: Duration::from_secs(2),
            ..MqttConfig::default()
        }
    }

    /// PUBLISH at QoS 0 with a short topic and body.
    fn publish_packet(topic: &str, payload: &str) -> Vec<u8> {
        let remaining = 2 + topic.len() + payload.len();
        assert!(remaining < 128 && topic.len() < 256);
        let mut packet = vec![0x30, remaining as u8, 0, topic.len() as u8];
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload.as_bytes());
        packet
    }

    async fn read_until(stream: &mut TcpStream, seen: &mut Vec<u8>, needle: &str) {
        let found = timeout(Duration::from_secs(2), async {
            let mut buf = [0u8; 512];
            while !String::from_utf8_lossy(seen).contains(needle) {
                let n = stream.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed the connection");
                seen.extend_from_slice(&buf[..n]);
            }
        })
        .await;
        assert!(found.is_ok(), "never saw {needle}");
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_dispatch_scenario() {
        let registry = Registry::new();
        let archive = RecordingArchive::default();

        dispatch_publish(
            &registry,
            &archive,
            "cmd/smartICU/collector/monitor-registration",
            br#"{"monitorID": "m1", "registration": true}"#,
        );
        dispatch_publish(
            &registry,
            &archive,
            "cmd/smartICU/collector/patient-registration",
            br#"{"monitorID": "m1", "patientID": "p1"}"#,
        );
        dispatch_publish(
            &registry,
            &archive,
            "telemetry/smartICU/m1/patient-state/alarm-state",
            br#"{"alarm": true}"#,
        );

        let monitor = registry.get("m1").unwrap();
        assert_eq!(monitor.patient_id, "p1");
        assert!(monitor.alarm_active);

        dispatch_publish(
            &registry,
            &archive,
            "telemetry/smartICU/m1/patient-state/blood-pressure",
            br#"{"bloodPressure": 120, "unit": "mmHg", "timestamp": 42}"#,
        );
        let samples = archive.samples.lock().unwrap().clone();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].kind, SensorKind::BloodPressure);
        assert_eq!(samples[0].patient_id, "p1");
    }

    #[test]
    fn test_dispatch_drops_bad_input() {
        let registry = Registry::new();
        let archive = RecordingArchive::default();

        dispatch_publish(
            &registry,
            &archive,
            "cmd/smartICU/collector/monitor-registration",
            b"{not json",
        );
        dispatch_publish(
            &registry,
            &archive,
            "cmd/smartICU/collector/firmware-update",
            br#"{"monitorID": "m1", "registration": true}"#,
        );
        dispatch_publish(
            &registry,
            &archive,
            "telemetry/smartICU/m9/patient-state/heart-rate",
            br#"{"heartRate": 80, "unit": "bpm", "timestamp": 1}"#,
        );

        assert!(registry.is_empty());
        assert!(archive.samples.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_alarm_needs_known_monitor_and_connection() {
        let collector = MqttCollector::new(config(1883), Arc::new(RecordingArchive::default()));

        let dispatch = collector.turn_on_alarm("m1").await.unwrap();
        assert_eq!(dispatch, AlarmDispatch::UnknownMonitor);

        collector.registry().register(Monitor::new("m1"));
        let result = collector.turn_on_alarm("m1").await;
        assert!(matches!(result, Err(CollectorError::NotConnected)));
        assert!(!collector.registry().get("m1").unwrap().alarm_active);
    }

    #[tokio::test]
    async fn test_start_fails_without_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let collector = MqttCollector::new(config(port), Arc::new(RecordingArchive::default()));
        assert!(collector.start().await.is_err());
        assert_eq!(collector.state().await, ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_broker_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0);
            assert_eq!(buf[0] >> 4, 1, "expected CONNECT");
            stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
            stream
        });

        let archive = Arc::new(RecordingArchive::default());
        let collector = MqttCollector::new(config(port), archive.clone());
        collector.start().await.unwrap();
        assert_eq!(collector.state().await, ConnectionState::Connected);

        let mut stream = broker.await.unwrap();
        let mut seen = Vec::new();
        read_until(&mut stream, &mut seen, "telemetry/smartICU/+/patient-state/+").await;
        read_until(&mut stream, &mut seen, "cmd/smartICU/collector/+").await;

        stream
            .write_all(&publish_packet(
                "cmd/smartICU/collector/monitor-registration",
                r#"{"monitorID":"m1","registration":true}"#,
            ))
            .await
            .unwrap();
        stream
            .write_all(&publish_packet(
                "telemetry/smartICU/m1/patient-state/heart-rate",
                r#"{"heartRate":80,"unit":"bpm","timestamp":1}"#,
            ))
            .await
            .unwrap();
        eventually(|| archive.samples.lock().unwrap().len() == 1).await;
        assert!(collector.registry().contains("m1"));

        let dispatch = collector.turn_on_alarm("m1").await.unwrap();
        assert_eq!(dispatch, AlarmDispatch::Sent);
        assert!(collector.registry().get("m1").unwrap().alarm_active);
        read_until(&mut stream, &mut seen, "cmd/smartICU/m1/patient-state/alarm-state").await;

        drop(stream);
        for _ in 0..200 {
            if collector.state().await == ConnectionState::Stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(collector.state().await, ConnectionState::Stopped);
        assert!(matches!(
            collector.turn_on_alarm("m1").await,
            Err(CollectorError::NotConnected)
        ));

        collector.stop().await;
    }
}
