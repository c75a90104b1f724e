//! Single-threaded event dispatcher.
//!
//! The dispatcher owns every piece of mutable relay state: the capture source, the
//! transport, the link, the sensor configuration, the coordinator, the transfer machine
//! and the timer queue. Background threads only feed it `RelayEvent`s; all transitions
//! happen inside `dispatch` and `fire_due` on the caller's thread.

use std::time::Instant;

use crate::capture::{CaptureSource, CaptureStats};
use crate::event::RelayEvent;
use crate::lifecycle::{ConnectionCoordinator, Directive, RetryDelays};
use crate::link::Link;
use crate::sensor::{ConfigOutcome, SensorConfig};
use crate::timer::{TimerKind, TimerQueue};
use crate::topic::CONFIG_TOPIC;
use crate::transfer::{
    TransferIo, TransferMachine, TransferSettings, TransferState, TransferStats,
};
use crate::transport::{QoS, Transport};

/// Point-in-time view for the periodic health log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub state: TransferState,
    pub link_up: bool,
    pub session_up: bool,
    pub sensor: SensorConfig,
    pub transfer: TransferStats,
    pub capture: CaptureStats,
}

impl std::fmt::Display for HealthSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "state={:?} link={} session={} frames_completed={} frames_aborted={} \
             capture_failures={} chunks_offered={} sensor={}/q{}",
            self.state,
            if self.link_up { "up" } else { "down" },
            if self.session_up { "up" } else { "down" },
            self.transfer.frames_completed,
            self.transfer.frames_aborted,
            self.transfer.capture_failures,
            self.transfer.chunks_offered,
            self.sensor.frame_size,
            self.sensor.quality
        )
    }
}

pub struct Dispatcher<C, T, L> {
    capture: C,
    transport: T,
    link: L,
    sensor: SensorConfig,
    coordinator: ConnectionCoordinator,
    transfer: TransferMachine,
    timers: TimerQueue,
    running: bool,
}

impl<C, T, L> Dispatcher<C, T, L>
where
    C: CaptureSource,
    T: Transport,
    L: Link,
{
    /// Build a dispatcher. The sensor configuration is pushed to the capture source
    /// before anything is acquired.
    pub fn new(
        mut capture: C,
        transport: T,
        link: L,
        sensor: SensorConfig,
        settings: TransferSettings,
        delays: RetryDelays,
        now: Instant,
    ) -> Self {
        capture.apply_configuration(&sensor);
        Self {
            capture,
            transport,
            link,
            sensor,
            coordinator: ConnectionCoordinator::new(delays),
            transfer: TransferMachine::new(settings, now),
            timers: TimerQueue::new(),
            running: true,
        }
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn sensor(&self) -> &SensorConfig {
        &self.sensor
    }

    pub fn coordinator(&self) -> &ConnectionCoordinator {
        &self.coordinator
    }

    pub fn transfer(&self) -> &TransferMachine {
        &self.transfer
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            state: self.transfer.state(),
            link_up: self.coordinator.link_up(),
            session_up: self.coordinator.session_up(),
            sensor: self.sensor,
            transfer: self.transfer.stats().clone(),
            capture: self.capture.stats(),
        }
    }

    /// Bring the link up.
    pub fn boot(&mut self, now: Instant) {
        let directives = self.coordinator.on_boot();
        self.apply(directives, now);
    }

    /// Handle one event. Returns `false` once the relay has shut down.
    pub fn dispatch(&mut self, event: RelayEvent, now: Instant) -> bool {
        if !self.running {
            return false;
        }
        match event {
            RelayEvent::LinkUp => {
                let directives = self.coordinator.on_link_up();
                self.apply(directives, now);
            }
            RelayEvent::LinkDown => {
                let directives = self.coordinator.on_link_down();
                self.apply(directives, now);
            }
            RelayEvent::SessionUp => {
                let directives = self.coordinator.on_session_up();
                self.apply(directives, now);
            }
            RelayEvent::SessionDown { reason } => {
                let directives = self.coordinator.on_session_down(&reason);
                self.apply(directives, now);
            }
            RelayEvent::PublishAcked(id) => {
                let (transfer, mut io) = self.io(now);
                transfer.on_publish_acked(id, &mut io);
            }
            RelayEvent::Message { topic, payload } => self.on_message(&topic, &payload),
            RelayEvent::Shutdown => {
                log::info!("shutting down relay");
                let (transfer, mut io) = self.io(now);
                transfer.shutdown(&mut io);
                self.running = false;
            }
        }
        self.running
    }

    /// Run the timers due at `now`, earliest first. Returns how many fired.
    ///
    /// Each kind fires at most once per call. A timer re-armed by this pass waits
    /// for the next one, so the caller gets back to its event channel in between.
    pub fn fire_due(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        for kind in self.timers.due(now) {
            if !self.running {
                break;
            }
            if !self.timers.take_if_due(kind, now) {
                continue;
            }
            fired += 1;
            self.on_timer(kind, now);
        }
        fired
    }

    fn on_timer(&mut self, kind: TimerKind, now: Instant) {
        match kind {
            TimerKind::LinkRetry => {
                let directives = self.coordinator.on_link_retry();
                self.apply(directives, now);
            }
            TimerKind::SessionRetry => {
                let directives = self.coordinator.on_session_retry();
                self.apply(directives, now);
            }
            TimerKind::ChunkPacing => {
                let (transfer, mut io) = self.io(now);
                transfer.on_pacing_tick(&mut io);
            }
            TimerKind::CaptureRetry | TimerKind::NextFrame => {
                if self.coordinator.may_start_transfer() {
                    let (transfer, mut io) = self.io(now);
                    transfer.start_transfer(&mut io);
                } else {
                    log::debug!("{:?} fired with session down; waiting for session", kind);
                }
            }
        }
    }

    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        if topic != CONFIG_TOPIC {
            log::debug!("ignoring message on {}", topic);
            return;
        }
        if let ConfigOutcome::Applied(_) = self.sensor.apply_message(payload) {
            self.capture.apply_configuration(&self.sensor);
        }
    }

    fn apply(&mut self, directives: Vec<Directive>, now: Instant) {
        for directive in directives {
            match directive {
                Directive::ConnectLink => {
                    if let Err(e) = self.link.connect() {
                        log::warn!("link connect failed: {:#}", e);
                        let delay = self.coordinator_delays().link;
                        self.timers.schedule(TimerKind::LinkRetry, now, delay);
                    }
                }
                Directive::ConnectSession => {
                    if let Err(e) = self.transport.connect() {
                        log::warn!("session connect failed: {:#}", e);
                        let delay = self.coordinator_delays().session;
                        self.timers.schedule(TimerKind::SessionRetry, now, delay);
                    }
                }
                Directive::SubscribeConfig => {
                    if let Err(e) = self.transport.subscribe(CONFIG_TOPIC, QoS::AtLeastOnce) {
                        log::warn!("config subscription failed: {:#}", e);
                    }
                }
                Directive::StartTransfer => {
                    let (transfer, mut io) = self.io(now);
                    transfer.start_transfer(&mut io);
                }
                Directive::AbortTransfer => {
                    let (transfer, mut io) = self.io(now);
                    transfer.mark_session_lost(&mut io);
                }
                Directive::Schedule(kind, delay) => self.timers.schedule(kind, now, delay),
                Directive::Cancel(kind) => {
                    self.timers.cancel(kind);
                }
            }
        }
    }

    fn coordinator_delays(&self) -> RetryDelays {
        self.coordinator.delays()
    }

    fn io(&mut self, now: Instant) -> (&mut TransferMachine, TransferIo<'_>) {
        (
            &mut self.transfer,
            TransferIo {
                capture: &mut self.capture,
                transport: &mut self.transport,
                timers: &mut self.timers,
                now,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{StubCapture, StubCaptureSource};
    use crate::transport::MemoryTransport;
    use anyhow::Result;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingLink {
        connects: u32,
    }

    impl Link for CountingLink {
        fn connect(&mut self) -> Result<()> {
            self.connects += 1;
            Ok(())
        }
    }

    fn dispatcher(
        script: Vec<StubCapture>,
    ) -> Dispatcher<StubCaptureSource, MemoryTransport, CountingLink> {
        Dispatcher::new(
            StubCaptureSource::with_script(script),
            MemoryTransport::new(),
            CountingLink::default(),
            SensorConfig::default(),
            TransferSettings::default(),
            RetryDelays::default(),
            Instant::now(),
        )
    }

    #[test]
    fn boot_and_session_start_first_frame() {
        let now = Instant::now();
        let mut d = dispatcher(vec![StubCapture::Frame(100)]);
        d.boot(now);
        assert_eq!(d.link().connects, 1);
        d.dispatch(RelayEvent::LinkUp, now);
        assert_eq!(d.transport().connect_calls(), 1);
        d.dispatch(RelayEvent::SessionUp, now);
        assert_eq!(
            d.transport().subscriptions(),
            &[(CONFIG_TOPIC.to_string(), QoS::AtLeastOnce)]
        );
        assert_eq!(d.transport().published().len(), 1);
    }

    #[test]
    fn timer_start_is_suppressed_without_session() {
        let now = Instant::now();
        let mut d = dispatcher(vec![StubCapture::Fail]);
        d.dispatch(RelayEvent::LinkUp, now);
        d.dispatch(RelayEvent::SessionUp, now);
        assert!(d.timers().is_pending(TimerKind::CaptureRetry));
        d.dispatch(
            RelayEvent::SessionDown {
                reason: "test".to_string(),
            },
            now,
        );
        let later = now + Duration::from_secs(3);
        d.fire_due(later);
        assert_eq!(d.capture().stats().frames_acquired, 0);
        assert_eq!(d.link().connects, 1);
        d.dispatch(RelayEvent::LinkUp, later);
        assert_eq!(d.transport().connect_calls(), 2);
    }

    #[test]
    fn zero_delay_retry_fires_once_per_pass() {
        let now = Instant::now();
        let settings = TransferSettings {
            capture_retry_delay: Duration::ZERO,
            ..TransferSettings::default()
        };
        let mut d = Dispatcher::new(
            StubCaptureSource::with_script(vec![StubCapture::Fail; 50]),
            MemoryTransport::new(),
            CountingLink::default(),
            SensorConfig::default(),
            settings,
            RetryDelays::default(),
            now,
        );
        d.dispatch(RelayEvent::LinkUp, now);
        d.dispatch(RelayEvent::SessionUp, now);
        assert_eq!(d.transfer().stats().capture_failures, 1);

        assert_eq!(d.fire_due(now), 1);
        assert_eq!(d.transfer().stats().capture_failures, 2);
        assert_eq!(d.fire_due(now), 1);
        assert_eq!(d.transfer().stats().capture_failures, 3);
        assert!(d.timers().is_pending(TimerKind::CaptureRetry));
    }

    #[test]
    fn config_message_reaches_capture_source() {
        let now = Instant::now();
        let mut d = dispatcher(Vec::new());
        d.dispatch(
            RelayEvent::Message {
                topic: CONFIG_TOPIC.to_string(),
                payload: b"quality=10".to_vec(),
            },
            now,
        );
        assert_eq!(d.sensor().quality, 10);
        assert_eq!(d.capture().configuration().quality, 10);

        d.dispatch(
            RelayEvent::Message {
                topic: "esp32-cam/other".to_string(),
                payload: b"quality=20".to_vec(),
            },
            now,
        );
        assert_eq!(d.sensor().quality, 10);
    }

    #[test]
    fn shutdown_releases_frame_and_stops() {
        let now = Instant::now();
        let mut d = dispatcher(vec![StubCapture::Frame(10_000)]);
        d.dispatch(RelayEvent::SessionUp, now);
        assert!(d.capture().stats().checked_out);
        assert!(!d.dispatch(RelayEvent::Shutdown, now));
        assert!(!d.capture().stats().checked_out);
        assert!(!d.dispatch(RelayEvent::SessionUp, now));
    }
}
