//! In-process transport.
//!
//! Records every publish and subscription instead of sending them anywhere. With an
//! `EventSender` attached it also plays broker: `connect` answers with `SessionUp` and
//! each accepted publish is acknowledged, which lets `relayd --dry-run` exercise the
//! whole relay without a network.

use anyhow::{anyhow, Result};
use std::collections::BTreeSet;

use super::{QoS, Transport};
use crate::event::{EventSender, PublishId, RelayEvent};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedMessage {
    pub id: PublishId,
    pub topic: String,
    pub qos: QoS,
    pub payload: Vec<u8>,
}

#[derive(Default)]
pub struct MemoryTransport {
    published: Vec<PublishedMessage>,
    subscriptions: Vec<(String, QoS)>,
    connect_calls: u32,
    publish_calls: u32,
    next_id: u32,
    rejected_calls: BTreeSet<u32>,
    offline: bool,
    loopback: Option<EventSender>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer connects and publishes with events on `events`.
    pub fn with_loopback(events: EventSender) -> Self {
        Self {
            loopback: Some(events),
            ..Self::default()
        }
    }

    /// Reject the `call`-th publish call (0-based, counting rejected calls too).
    pub fn reject_publish_call(&mut self, call: u32) {
        self.rejected_calls.insert(call);
    }

    /// While offline every publish is rejected.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn published(&self) -> &[PublishedMessage] {
        &self.published
    }

    pub fn published_topics(&self) -> Vec<&str> {
        self.published.iter().map(|m| m.topic.as_str()).collect()
    }

    pub fn last_publish_id(&self) -> Option<PublishId> {
        self.published.last().map(|m| m.id)
    }

    pub fn subscriptions(&self) -> &[(String, QoS)] {
        &self.subscriptions
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls
    }

    pub fn publish_calls(&self) -> u32 {
        self.publish_calls
    }

    fn notify(&self, event: RelayEvent) {
        if let Some(tx) = &self.loopback {
            if tx.send(event).is_err() {
                log::debug!("memory transport: dispatcher gone, event dropped");
            }
        }
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self) -> Result<()> {
        self.connect_calls += 1;
        self.offline = false;
        self.notify(RelayEvent::SessionUp);
        Ok(())
    }

    fn publish(&mut self, topic: &str, qos: QoS, payload: &[u8]) -> Result<PublishId> {
        let call = self.publish_calls;
        self.publish_calls += 1;
        if self.offline {
            return Err(anyhow!("memory transport offline"));
        }
        if self.rejected_calls.remove(&call) {
            return Err(anyhow!("memory transport queue full"));
        }
        self.next_id += 1;
        let id = PublishId(self.next_id);
        self.published.push(PublishedMessage {
            id,
            topic: topic.to_string(),
            qos,
            payload: payload.to_vec(),
        });
        self.notify(RelayEvent::PublishAcked(id));
        Ok(id)
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()> {
        self.subscriptions.push((topic.to_string(), qos));
        Ok(())
    }
}
