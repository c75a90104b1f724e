//! Frame Relay
//!
//! Streams camera frames to an MQTT broker in size-bounded chunks, one frame at a
//! time, paced by broker acknowledgments.
//!
//! # Architecture
//!
//! A single-threaded `Dispatcher` owns all relay state. Background threads (the MQTT
//! network loop and the link probe) only send `RelayEvent`s over a channel; retries
//! and chunk pacing are deadlines in a `TimerQueue`. The daemon loop is:
//!
//! 1. Wait for an event, at most until the next timer deadline.
//! 2. `Dispatcher::dispatch` the event.
//! 3. `Dispatcher::fire_due` every expired timer.
//!
//! # Module Structure
//!
//! - `frame`: Frame ownership and chunk slicing
//! - `capture`: Capture sources (stub sensor, JPEG directory, HTTP snapshot)
//! - `transport`: Broker session (rumqttc MQTT, in-memory recorder)
//! - `link`: Broker reachability probe
//! - `transfer`: Frame transfer state machine
//! - `lifecycle`: Link/session coordinator
//! - `sensor`: Sensor configuration and config messages
//! - `timer`, `event`, `topic`: Dispatcher plumbing and the wire topic scheme
//! - `config`: File and environment configuration for `relayd`

pub mod capture;
pub mod config;
pub mod dispatcher;
pub mod event;
pub mod frame;
pub mod lifecycle;
pub mod link;
pub mod sensor;
pub mod timer;
pub mod topic;
pub mod transfer;
pub mod transport;

pub use capture::{
    CaptureSource, CaptureStats, ConfiguredSource, DirCaptureSource, StubCapture,
    StubCaptureSource, MAX_FRAME_BYTES,
};
#[cfg(feature = "capture-http")]
pub use capture::HttpCaptureSource;
pub use config::RelayConfig;
pub use dispatcher::{Dispatcher, HealthSnapshot};
pub use event::{EventReceiver, EventSender, PublishId, RelayEvent};
pub use frame::{Chunk, Frame, DEFAULT_CHUNK_SIZE};
pub use lifecycle::{ConnectionCoordinator, Directive, RetryDelays};
pub use link::{Link, LoopbackLink, ProbeLink};
pub use sensor::{ConfigChange, ConfigOutcome, FrameSize, SensorConfig};
pub use timer::{TimerKind, TimerQueue};
pub use topic::{chunk_topic, parse_chunk_topic, ChunkTopic, CHUNK_TOPIC_FILTER, CONFIG_TOPIC};
pub use transfer::{
    AckPolicy, TransferIo, TransferMachine, TransferSettings, TransferState, TransferStats,
};
pub use transport::{MemoryTransport, MqttSettings, MqttTransport, QoS, Transport};
