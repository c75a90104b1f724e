//! Events delivered to the dispatcher.
//!
//! Background threads (MQTT network loop, link probe) never touch relay state; they
//! only send `RelayEvent`s over an `EventSender`.

use std::sync::mpsc;

/// Transport handle for one publish, echoed back in its acknowledgment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublishId(pub u32);

impl std::fmt::Display for PublishId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEvent {
    LinkUp,
    LinkDown,
    SessionUp,
    SessionDown { reason: String },
    PublishAcked(PublishId),
    Message { topic: String, payload: Vec<u8> },
    Shutdown,
}

pub type EventSender = mpsc::Sender<RelayEvent>;
pub type EventReceiver = mpsc::Receiver<RelayEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::channel()
}
