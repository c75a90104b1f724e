//! Network reachability of the broker host.
//!
//! `ProbeLink::connect` opens a TCP connection to the broker address on a short-lived
//! background thread and reports the result as `LinkUp` or `LinkDown`. The probe
//! socket is dropped immediately; the MQTT session opens its own.
//!
//! A probe runs at boot, on every `LinkRetry`, and before every session retry, so a
//! network that disappears while the link is believed up is reported as `LinkDown`
//! on the next session retry.

use anyhow::{anyhow, Context, Result};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::event::{EventSender, RelayEvent};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub trait Link {
    /// Begin (or retry) bringing the link up. The outcome arrives as
    /// `LinkUp` or `LinkDown`.
    fn connect(&mut self) -> Result<()>;
}

pub struct ProbeLink {
    addr: String,
    events: EventSender,
    timeout: Duration,
}

impl ProbeLink {
    /// `addr` is a `host:port` string as produced by `BrokerEndpoint::authority`.
    pub fn new(addr: impl Into<String>, events: EventSender) -> Self {
        Self {
            addr: addr.into(),
            events,
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Link for ProbeLink {
    fn connect(&mut self) -> Result<()> {
        let addr = self.addr.clone();
        let events = self.events.clone();
        let timeout = self.timeout;
        std::thread::Builder::new()
            .name("link-probe".to_string())
            .spawn(move || {
                let event = match probe(&addr, timeout) {
                    Ok(peer) => {
                        log::info!("Link up: {} reachable at {}", addr, peer);
                        RelayEvent::LinkUp
                    }
                    Err(e) => {
                        log::warn!("Link down: {:#}", e);
                        RelayEvent::LinkDown
                    }
                };
                if events.send(event).is_err() {
                    log::debug!("link probe finished after dispatcher exit");
                }
            })
            .context("failed to spawn link probe thread")?;
        Ok(())
    }
}

/// A link that is always up. Used with the in-memory transport for dry runs.
pub struct LoopbackLink {
    events: EventSender,
}

impl LoopbackLink {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

impl Link for LoopbackLink {
    fn connect(&mut self) -> Result<()> {
        self.events
            .send(RelayEvent::LinkUp)
            .map_err(|_| anyhow!("event channel closed"))
    }
}

/// Try every resolved address in order; return the first that accepts.
fn probe(addr: &str, timeout: Duration) -> Result<SocketAddr> {
    let candidates: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {}", addr))?
        .collect();
    let mut last_err = None;
    for candidate in candidates {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(_) => return Ok(candidate),
            Err(e) => last_err = Some(e),
        }
    }
    match last_err {
        Some(e) => Err(anyhow!("{} unreachable: {}", addr, e)),
        None => Err(anyhow!("{} resolved to no addresses", addr)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn reachable_listener_reports_link_up() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let (tx, rx) = crate::event::channel();
        let mut link = ProbeLink::new(addr, tx);
        link.connect().expect("spawn");
        let event = rx.recv_timeout(Duration::from_secs(10)).expect("event");
        assert_eq!(event, RelayEvent::LinkUp);
    }

    #[test]
    fn loopback_link_is_immediately_up() {
        let (tx, rx) = crate::event::channel();
        LoopbackLink::new(tx).connect().expect("connect");
        assert_eq!(rx.try_recv().unwrap(), RelayEvent::LinkUp);
    }

    #[test]
    fn closed_port_reports_link_down() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        drop(listener);
        let (tx, rx) = crate::event::channel();
        let mut link = ProbeLink::new(addr, tx).with_timeout(Duration::from_millis(500));
        link.connect().expect("spawn");
        let event = rx.recv_timeout(Duration::from_secs(10)).expect("event");
        assert_eq!(event, RelayEvent::LinkDown);
    }
}
