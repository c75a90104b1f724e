//! Transport layer: the broker session the relay publishes chunks through.
//!
//! `Transport` is the seam between the dispatcher and the wire. Requests
//! (`connect`, `publish`, `subscribe`) are synchronous calls that only queue work;
//! their outcomes (`SessionUp`, `SessionDown`, `PublishAcked`, `Message`) come back
//! later as `RelayEvent`s.
//!
//! - `mqtt`: rumqttc v5 client with a background network thread
//! - `memory`: in-process transport that records publishes (tests, dry runs)
//! - `endpoint`: broker addresses and TLS materials

pub mod memory;
pub mod mqtt;
mod endpoint;

use anyhow::Result;

use crate::event::PublishId;

pub use memory::{MemoryTransport, PublishedMessage};
pub use mqtt::{MqttSettings, MqttTransport};
pub use rumqttc::v5::mqttbytes::QoS;
pub use endpoint::{BrokerEndpoint, TlsFiles, TlsMaterials};

pub trait Transport {
    /// Begin (or retry) session establishment. Completion arrives as `SessionUp`.
    fn connect(&mut self) -> Result<()>;

    /// Queue one publish. `Err` means the transport refused it synchronously
    /// (not connected, or its outgoing queue is full).
    fn publish(&mut self, topic: &str, qos: QoS, payload: &[u8]) -> Result<PublishId>;

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()>;
}
