//! Synchronous device client over a background MQTT network thread.

use rumqttc::{
    Client, ConnAck, Connection, ConnectReturnCode, Event, MqttOptions, Outgoing, Packet, QoS,
};
use sn_protocol::{topic, Configuration, Revision};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::messages::{AcknowledgmentMessage, LogMessage, MeasurementMessage};
use crate::tracker::{PublishTracker, POLL_INTERVAL};
use crate::ClientError;

/// Called on the network thread when a configuration message arrives.
pub type ConfigurationCallback = Box<dyn Fn(&Configuration) + Send + Sync>;
/// Called on the network thread when a publish is confirmed.
pub type PublishCallback = Box<dyn Fn(u64) + Send + Sync>;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Connection settings for [`DeviceClient::connect`].
pub struct ClientConfig {
    /// Host of the MQTT broker.
    pub host: String,
    /// Port of the MQTT broker.
    pub port: u16,
    /// Broker username.
    pub identifier: String,
    /// Broker password.
    pub password: String,
    /// Identifier embedded in every topic. Required for publishing and for
    /// receiving configurations.
    pub sensor_identifier: Option<String>,
    /// Whether to subscribe to this sensor's configuration topic.
    pub receive_configurations: bool,
    /// How long to wait for the broker's CONNACK before giving up.
    pub connection_timeout: Duration,
    /// Observer invoked with each received configuration.
    pub on_configuration: Option<ConfigurationCallback>,
    /// Observer invoked with each confirmed publish handle.
    pub on_publish: Option<PublishCallback>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 1883,
            identifier: String::new(),
            password: String::new(),
            sensor_identifier: None,
            receive_configurations: true,
            connection_timeout: Duration::from_secs(8),
            on_configuration: None,
            on_publish: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State written by the network thread and read by the caller. The mutex is
/// held only for field reads/writes, never across I/O.
#[derive(Debug, Default)]
struct SharedSlot {
    /// CONNACK return code from the most recent connection attempt.
    connect_code: Option<ConnectReturnCode>,
    /// Most recently received configuration message.
    latest_configuration: Option<Configuration>,
    /// Revision the caller reports having applied; used as the default
    /// revision stamp for logs and measurements.
    current_revision: Option<Revision>,
}

type Slot = Arc<Mutex<SharedSlot>>;

fn lock(slot: &Slot) -> MutexGuard<'_, SharedSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Callbacks {
    on_configuration: Option<ConfigurationCallback>,
    on_publish: Option<PublishCallback>,
}

// ---------------------------------------------------------------------------
// DeviceClient
// ---------------------------------------------------------------------------

/// Device-side handle to the broker connection.
///
/// Owns the current configuration revision and the latest received
/// configuration; exposes typed publish operations for logs, measurements,
/// and acknowledgments.
pub struct DeviceClient {
    client: Client,
    tracker: PublishTracker,
    slot: Slot,
    /// Serializes handle registration with request submission so packet ids
    /// bind to handles in the right order.
    submit: Mutex<()>,
    sensor_identifier: Option<String>,
    receive_configurations: bool,
    shutdown: Arc<AtomicBool>,
    network_thread: Option<JoinHandle<()>>,
}

impl DeviceClient {
    /// Connect to the broker and wait (blocking, 100 ms poll) for the
    /// CONNACK, up to `connection_timeout`.
    ///
    /// Broker refusals (bad protocol, bad client id, server unavailable,
    /// bad credentials, not authorised) and timeouts both surface as
    /// [`ClientError::Connection`] with a human-readable reason.
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        if config.receive_configurations && config.sensor_identifier.is_none() {
            return Err(ClientError::Config(
                "a sensor identifier is required to receive configurations".to_owned(),
            ));
        }

        let client_id = config
            .sensor_identifier
            .clone()
            .unwrap_or_else(|| format!("sn-device-{}", std::process::id()));
        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_credentials(&config.identifier, &config.password);
        options.set_keep_alive(Duration::from_secs(60));

        let (client, connection) = Client::new(options, 64);
        let tracker = PublishTracker::new();
        let slot: Slot = Arc::new(Mutex::new(SharedSlot::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let configuration_topic = config
            .sensor_identifier
            .as_deref()
            .filter(|_| config.receive_configurations)
            .map(topic::configurations);
        let context = NetworkContext {
            client: client.clone(),
            tracker: tracker.clone(),
            slot: Arc::clone(&slot),
            callbacks: Callbacks {
                on_configuration: config.on_configuration,
                on_publish: config.on_publish,
            },
            configuration_topic,
        };
        let network_thread = spawn_network_thread(connection, context, Arc::clone(&shutdown));

        if let Err(e) = await_connack(&slot, config.connection_timeout) {
            // Leave the thread to wind down on its own; joining could block
            // behind a TCP retry.
            shutdown.store(true, Ordering::Relaxed);
            let _ = client.disconnect();
            return Err(ClientError::Connection(format!(
                "could not connect to MQTT broker at {}:{} ({e})",
                config.host, config.port
            )));
        }

        Ok(Self {
            client,
            tracker,
            slot,
            submit: Mutex::new(()),
            sensor_identifier: config.sensor_identifier,
            receive_configurations: config.receive_configurations,
            shutdown,
            network_thread: Some(network_thread),
        })
    }

    /// Publish a batch of log messages. Returns the tracking handle.
    pub fn publish_logs(&self, messages: Vec<LogMessage>) -> Result<u64, ClientError> {
        let (sensor_id, revision, now) = self.stamping()?;
        if messages.is_empty() {
            return Err(ClientError::EmptyBatch);
        }
        let batch: Vec<_> = messages
            .into_iter()
            .map(|m| m.into_envelope(revision, now))
            .collect();
        self.publish_batch(topic::logs(&sensor_id), serde_json::to_vec(&batch)?)
    }

    /// Publish a batch of measurement messages. Returns the tracking handle.
    pub fn publish_measurements(
        &self,
        messages: Vec<MeasurementMessage>,
    ) -> Result<u64, ClientError> {
        let (sensor_id, revision, now) = self.stamping()?;
        if messages.is_empty() {
            return Err(ClientError::EmptyBatch);
        }
        let batch: Vec<_> = messages
            .into_iter()
            .map(|m| m.into_envelope(revision, now))
            .collect();
        self.publish_batch(topic::measurements(&sensor_id), serde_json::to_vec(&batch)?)
    }

    /// Publish a batch of acknowledgment messages. Returns the tracking
    /// handle.
    pub fn publish_acknowledgments(
        &self,
        messages: Vec<AcknowledgmentMessage>,
    ) -> Result<u64, ClientError> {
        let (sensor_id, _, now) = self.stamping()?;
        if messages.is_empty() {
            return Err(ClientError::EmptyBatch);
        }
        let batch: Vec<_> = messages
            .into_iter()
            .map(|m| m.into_envelope(now))
            .collect();
        self.publish_batch(
            topic::acknowledgments(&sensor_id),
            serde_json::to_vec(&batch)?,
        )
    }

    /// True iff the broker has confirmed this publish.
    pub fn is_confirmed(&self, handle: u64) -> bool {
        self.tracker.is_confirmed(handle)
    }

    /// Number of publishes not yet confirmed.
    pub fn active_count(&self) -> usize {
        self.tracker.active_count()
    }

    /// Block until every publish is confirmed, or fail with
    /// [`ClientError::Timeout`]. A timeout only stops the wait; submitted
    /// messages are never retracted.
    pub fn wait_for_all(&self, timeout: Duration) -> Result<(), ClientError> {
        self.tracker.wait_for_all(timeout)
    }

    /// The latest received configuration, if any. Always `None` when the
    /// client was configured without `receive_configurations`.
    pub fn latest_configuration(&self) -> Option<Configuration> {
        if !self.receive_configurations {
            return None;
        }
        lock(&self.slot).latest_configuration.clone()
    }

    /// Report the configuration revision this device has applied. Used as
    /// the default revision stamp for subsequent logs and measurements.
    /// Receiving a configuration never advances this on its own: a device
    /// only ever reports revisions, it does not assume them.
    pub fn set_current_revision(&self, revision: Revision) {
        lock(&self.slot).current_revision = Some(revision);
    }

    pub fn current_revision(&self) -> Option<Revision> {
        lock(&self.slot).current_revision
    }

    /// Disconnect from the broker and stop the network thread.
    pub fn disconnect(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.client.disconnect();
        if let Some(handle) = self.network_thread.take() {
            let _ = handle.join();
        }
    }

    fn stamping(&self) -> Result<(String, Option<Revision>, f64), ClientError> {
        let sensor_id = self.sensor_identifier.clone().ok_or_else(|| {
            ClientError::Config("a sensor identifier is required to publish".to_owned())
        })?;
        Ok((sensor_id, self.current_revision(), unix_now()))
    }

    fn publish_batch(&self, topic: String, payload: Vec<u8>) -> Result<u64, ClientError> {
        let _guard = self.submit.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = self.tracker.register();
        if let Err(e) = self
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload)
        {
            self.tracker.abandon(handle);
            return Err(e.into());
        }
        Ok(handle)
    }
}

// ---------------------------------------------------------------------------
// Connect wait
// ---------------------------------------------------------------------------

fn refusal_reason(code: ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Success => "success",
        ConnectReturnCode::RefusedProtocolVersion => "incorrect protocol version",
        ConnectReturnCode::BadClientId => "invalid client id",
        ConnectReturnCode::ServiceUnavailable => "service unavailable",
        ConnectReturnCode::BadUserNamePassword => "bad username or password",
        ConnectReturnCode::NotAuthorized => "not authorised",
    }
}

/// Poll the shared slot for the CONNACK return code.
fn await_connack(slot: &Slot, timeout: Duration) -> Result<(), ClientError> {
    let started = Instant::now();
    loop {
        if let Some(code) = lock(slot).connect_code {
            if code == ConnectReturnCode::Success {
                return Ok(());
            }
            return Err(ClientError::Connection(refusal_reason(code).to_owned()));
        }
        if started.elapsed() > timeout {
            return Err(ClientError::Timeout(
                "timed out while connecting".to_owned(),
            ));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

// ---------------------------------------------------------------------------
// Network thread
// ---------------------------------------------------------------------------

struct NetworkContext {
    client: Client,
    tracker: PublishTracker,
    slot: Slot,
    callbacks: Callbacks,
    /// `Some` when subscribed to configuration messages.
    configuration_topic: Option<String>,
}

fn spawn_network_thread(
    mut connection: Connection,
    context: NetworkContext,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            match event {
                Ok(event) => handle_event(&event, &context),
                Err(e) => {
                    warn!(error = %e, "MQTT connection error");
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        }
        debug!("network thread stopped");
    })
}

fn handle_event(event: &Event, context: &NetworkContext) {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => handle_connack(ack, context),
        Event::Outgoing(Outgoing::Publish(packet_id)) => {
            context.tracker.assign_packet_id(*packet_id);
        }
        Event::Incoming(Packet::PubAck(ack)) => {
            if let Some(handle) = context.tracker.confirm(ack.pkid) {
                if let Some(on_publish) = &context.callbacks.on_publish {
                    on_publish(handle);
                }
            }
        }
        Event::Incoming(Packet::Publish(publish)) => {
            let is_configuration = context
                .configuration_topic
                .as_deref()
                .is_some_and(|t| t == publish.topic);
            if is_configuration {
                handle_configuration(&publish.payload, context);
            }
        }
        _ => {}
    }
}

fn handle_connack(ack: &ConnAck, context: &NetworkContext) {
    lock(&context.slot).connect_code = Some(ack.code);
    if ack.code != ConnectReturnCode::Success {
        return;
    }
    info!("connected to MQTT broker");
    // Subscribe (and re-subscribe after reconnects) to this sensor's
    // configuration topic.
    if let Some(topic) = &context.configuration_topic {
        if let Err(e) = context.client.subscribe(topic, QoS::AtLeastOnce) {
            warn!(topic, error = %e, "failed to subscribe to configuration topic");
        }
    }
}

/// Configuration messages are best-effort informational: anything that does
/// not decode into a revision + configuration pair is discarded silently.
fn handle_configuration(payload: &[u8], context: &NetworkContext) {
    let Some(configuration) = Configuration::decode(payload) else {
        return;
    };
    debug!(revision = configuration.revision, "received configuration");
    lock(&context.slot).latest_configuration = Some(configuration.clone());
    if let Some(on_configuration) = &context.callbacks.on_configuration {
        on_configuration(&configuration);
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{PubAck, Publish};
    use std::sync::atomic::AtomicUsize;

    fn test_context(configuration_topic: Option<String>) -> (NetworkContext, Client) {
        let options = MqttOptions::new("test", "localhost", 1883);
        let (client, _connection) = Client::new(options, 8);
        let context = NetworkContext {
            client: client.clone(),
            tracker: PublishTracker::new(),
            slot: Arc::new(Mutex::new(SharedSlot::default())),
            callbacks: Callbacks {
                on_configuration: None,
                on_publish: None,
            },
            configuration_topic,
        };
        (context, client)
    }

    #[test]
    fn await_connack_maps_refusal_codes() {
        let slot: Slot = Arc::new(Mutex::new(SharedSlot::default()));
        lock(&slot).connect_code = Some(ConnectReturnCode::NotAuthorized);
        let err = await_connack(&slot, Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("not authorised"));
    }

    #[test]
    fn await_connack_times_out_within_poll_granularity() {
        let slot: Slot = Arc::new(Mutex::new(SharedSlot::default()));
        let timeout = Duration::from_millis(300);
        let started = Instant::now();
        let err = await_connack(&slot, timeout).unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, ClientError::Timeout(_)));
        assert!(elapsed >= timeout);
        assert!(elapsed <= timeout + POLL_INTERVAL + Duration::from_millis(100));
    }

    #[test]
    fn await_connack_succeeds_once_code_arrives() {
        let slot: Slot = Arc::new(Mutex::new(SharedSlot::default()));
        let background = Arc::clone(&slot);
        let setter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            lock(&background).connect_code = Some(ConnectReturnCode::Success);
        });
        await_connack(&slot, Duration::from_secs(5)).unwrap();
        setter.join().unwrap();
    }

    #[test]
    fn puback_confirms_tracked_publish() {
        let (context, _client) = test_context(None);
        let handle = context.tracker.register();
        handle_event(&Event::Outgoing(Outgoing::Publish(3)), &context);
        assert!(!context.tracker.is_confirmed(handle));
        handle_event(
            &Event::Incoming(Packet::PubAck(PubAck { pkid: 3 })),
            &context,
        );
        assert!(context.tracker.is_confirmed(handle));
    }

    #[test]
    fn configuration_message_updates_latest_slot() {
        let (context, _client) = test_context(Some("configurations/s1".to_owned()));
        let publish = Publish::new(
            "configurations/s1",
            QoS::AtLeastOnce,
            br#"{"revision": 2, "configuration": {"rate": 5}}"#.to_vec(),
        );
        handle_event(&Event::Incoming(Packet::Publish(publish)), &context);
        let latest = lock(&context.slot).latest_configuration.clone().unwrap();
        assert_eq!(latest.revision, 2);
    }

    #[test]
    fn undecodable_configuration_is_discarded_silently() {
        let (context, _client) = test_context(Some("configurations/s1".to_owned()));
        for junk in [&b"not json"[..], br#"{"revision": "2"}"#, b"[]"] {
            let publish = Publish::new("configurations/s1", QoS::AtLeastOnce, junk.to_vec());
            handle_event(&Event::Incoming(Packet::Publish(publish)), &context);
        }
        assert!(lock(&context.slot).latest_configuration.is_none());
    }

    #[test]
    fn configuration_on_other_topic_is_ignored() {
        let (mut context, _client) = test_context(Some("configurations/s1".to_owned()));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        context.callbacks.on_configuration =
            Some(Box::new(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            }));
        let publish = Publish::new(
            "configurations/other",
            QoS::AtLeastOnce,
            br#"{"revision": 2, "configuration": {}}"#.to_vec(),
        );
        handle_event(&Event::Incoming(Packet::Publish(publish)), &context);
        assert!(lock(&context.slot).latest_configuration.is_none());
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }
}
