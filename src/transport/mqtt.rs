//! rumqttc-backed transport.
//!
//! A background network thread drives the rumqttc event loop and translates what it
//! sees into `RelayEvent`s:
//! - `ConnAck` -> `SessionUp`
//! - a session ending for any reason -> `SessionDown`
//! - `PubAck` -> `PublishAcked`, with the broker packet id mapped back to the `PublishId`
//!   handed out by `publish`
//! - incoming `Publish` -> `Message`
//!
//! The thread never reconnects on its own. After a session ends it waits for the next
//! `connect()` call, so the retry delay stays with the dispatcher's timers.

use anyhow::{anyhow, Result};
use rumqttc::v5::{Client, Connection, Event, Incoming, MqttOptions};
use rumqttc::Outgoing;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{BrokerEndpoint, QoS, TlsMaterials, Transport};
use crate::event::{EventSender, PublishId, RelayEvent};

/// Outgoing request capacity of the rumqttc client. A full queue rejects publishes.
const REQUEST_QUEUE_CAPACITY: usize = 10;

/// Everything needed to open a broker session.
#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub endpoint: BrokerEndpoint,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub tls: TlsMaterials,
}

impl MqttSettings {
    fn options(&self) -> Result<MqttOptions> {
        let mut options =
            MqttOptions::new(&self.client_id, &self.endpoint.host, self.endpoint.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_start(true);
        if let Some(user) = &self.username {
            options.set_credentials(user, self.password.clone().unwrap_or_default());
        }
        options.set_transport(self.tls.wire(&self.endpoint)?);
        Ok(options)
    }
}

enum NetCommand {
    Connect,
    Stop,
}

/// Pairs broker packet ids with the `PublishId`s handed out by `publish`.
///
/// rumqttc reports `Outgoing::Publish(pkid)` in the order publishes were queued, so
/// ids waiting for a packet id form a FIFO.
#[derive(Debug, Default)]
pub(crate) struct AckTracker {
    awaiting_pkid: VecDeque<PublishId>,
    in_flight: HashMap<u16, PublishId>,
}

impl AckTracker {
    pub(crate) fn queued(&mut self, id: PublishId) {
        self.awaiting_pkid.push_back(id);
    }

    /// Undo `queued` for a publish the client refused.
    pub(crate) fn withdraw(&mut self, id: PublishId) {
        if self.awaiting_pkid.back() == Some(&id) {
            self.awaiting_pkid.pop_back();
        }
    }

    /// A queued publish went out with `pkid`. QoS 0 publishes (pkid 0) are never
    /// acknowledged by the broker, so they complete on send.
    pub(crate) fn sent(&mut self, pkid: u16) -> Option<PublishId> {
        let id = self.awaiting_pkid.pop_front()?;
        if pkid == 0 {
            return Some(id);
        }
        self.in_flight.insert(pkid, id);
        None
    }

    pub(crate) fn acked(&mut self, pkid: u16) -> Option<PublishId> {
        self.in_flight.remove(&pkid)
    }

    pub(crate) fn reset(&mut self) {
        self.awaiting_pkid.clear();
        self.in_flight.clear();
    }
}

struct Shared {
    connected: AtomicBool,
    stopping: AtomicBool,
    tracker: Mutex<AckTracker>,
}

pub struct MqttTransport {
    client: Client,
    commands: mpsc::Sender<NetCommand>,
    shared: Arc<Shared>,
    next_id: u32,
    handle: Option<JoinHandle<()>>,
}

impl MqttTransport {
    /// Build the client and start the (idle) network thread.
    pub fn start(settings: &MqttSettings, events: EventSender) -> Result<Self> {
        let (client, connection) = Client::new(settings.options()?, REQUEST_QUEUE_CAPACITY);
        let (commands, command_rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            tracker: Mutex::new(AckTracker::default()),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("mqtt-net".to_string())
            .spawn(move || run_network(connection, command_rx, thread_shared, events))?;
        log::info!(
            "MQTT transport ready for {} (TLS: {}, auth: {})",
            settings.endpoint,
            settings.endpoint.use_tls,
            settings.username.is_some()
        );
        Ok(Self {
            client,
            commands,
            shared,
            next_id: 0,
            handle: Some(handle),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Disconnect from the broker and join the network thread.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.shared.stopping.store(true, Ordering::SeqCst);
        let _ = self.commands.send(NetCommand::Stop);
        if let Err(e) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect request not queued: {}", e);
        }
        handle
            .join()
            .map_err(|_| anyhow!("MQTT network thread panicked"))?;
        Ok(())
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("MQTT transport shutdown failed: {}", e);
        }
    }
}

impl Transport for MqttTransport {
    fn connect(&mut self) -> Result<()> {
        self.commands
            .send(NetCommand::Connect)
            .map_err(|_| anyhow!("MQTT network thread is gone"))
    }

    fn publish(&mut self, topic: &str, qos: QoS, payload: &[u8]) -> Result<PublishId> {
        if !self.is_connected() {
            return Err(anyhow!("MQTT session not connected"));
        }
        let mut tracker = self
            .shared
            .tracker
            .lock()
            .map_err(|_| anyhow!("MQTT ack tracker poisoned"))?;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let id = PublishId(self.next_id);
        // Queue the id before the request so the network thread cannot see the
        // outgoing publish first.
        tracker.queued(id);
        match self.client.try_publish(topic, qos, false, payload.to_vec()) {
            Ok(()) => Ok(id),
            Err(e) => {
                tracker.withdraw(id);
                Err(anyhow!("MQTT publish rejected: {}", e))
            }
        }
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()> {
        self.client
            .try_subscribe(topic, qos)
            .map_err(|e| anyhow!("MQTT subscribe to {} rejected: {}", topic, e))
    }
}

fn run_network(
    mut connection: Connection,
    commands: mpsc::Receiver<NetCommand>,
    shared: Arc<Shared>,
    events: EventSender,
) {
    loop {
        match commands.recv() {
            Ok(NetCommand::Connect) => {}
            Ok(NetCommand::Stop) | Err(_) => return,
        }
        log::info!("Connecting to MQTT broker...");
        let reason = drive_session(&mut connection, &shared, &events);
        shared.connected.store(false, Ordering::SeqCst);
        if let Ok(mut tracker) = shared.tracker.lock() {
            tracker.reset();
        }
        if shared.stopping.load(Ordering::SeqCst) {
            return;
        }
        // Connect requests that piled up during the session are stale.
        loop {
            match commands.try_recv() {
                Ok(NetCommand::Connect) => continue,
                Ok(NetCommand::Stop) | Err(mpsc::TryRecvError::Disconnected) => return,
                Err(mpsc::TryRecvError::Empty) => break,
            }
        }
        if events.send(RelayEvent::SessionDown { reason }).is_err() {
            return;
        }
    }
}

/// Poll one session until it ends; returns why it ended.
fn drive_session(connection: &mut Connection, shared: &Shared, events: &EventSender) -> String {
    for notification in connection.iter() {
        let event = match notification {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                shared.connected.store(true, Ordering::SeqCst);
                Some(RelayEvent::SessionUp)
            }
            Ok(Event::Incoming(Incoming::PubAck(ack))) => shared
                .tracker
                .lock()
                .ok()
                .and_then(|mut tracker| tracker.acked(ack.pkid))
                .map(RelayEvent::PublishAcked),
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                match std::str::from_utf8(&publish.topic) {
                    Ok(topic) => Some(RelayEvent::Message {
                        topic: topic.to_string(),
                        payload: publish.payload.to_vec(),
                    }),
                    Err(e) => {
                        log::warn!("Skipping publish with invalid topic: {}", e);
                        None
                    }
                }
            }
            Ok(Event::Incoming(Incoming::Disconnect(_))) => {
                return "broker sent disconnect".to_string();
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => shared
                .tracker
                .lock()
                .ok()
                .and_then(|mut tracker| tracker.sent(pkid))
                .map(RelayEvent::PublishAcked),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                return "client disconnect".to_string();
            }
            Ok(_) => None,
            Err(e) => {
                log::warn!("MQTT connection error: {}", e);
                return e.to_string();
            }
        };
        if let Some(event) = event {
            if events.send(event).is_err() {
                return "dispatcher gone".to_string();
            }
        }
    }
    "connection closed".to_string()
}
