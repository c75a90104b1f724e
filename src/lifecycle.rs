//! Connection lifecycle coordinator.
//!
//! Tracks whether the link (network reachability) and the broker session are up and
//! turns each transition into a list of `Directive`s for the dispatcher. The
//! coordinator performs no I/O itself.

use std::time::Duration;

use crate::timer::TimerKind;

pub const DEFAULT_LINK_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_SESSION_RETRY_DELAY: Duration = Duration::from_secs(2);

/// An action the dispatcher carries out on the coordinator's behalf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Directive {
    ConnectLink,
    ConnectSession,
    SubscribeConfig,
    StartTransfer,
    /// The session is gone: drop the in-flight frame.
    AbortTransfer,
    Schedule(TimerKind, Duration),
    Cancel(TimerKind),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDelays {
    pub link: Duration,
    pub session: Duration,
}

impl Default for RetryDelays {
    fn default() -> Self {
        Self {
            link: DEFAULT_LINK_RETRY_DELAY,
            session: DEFAULT_SESSION_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnectionCoordinator {
    delays: RetryDelays,
    link_up: bool,
    session_up: bool,
}

impl ConnectionCoordinator {
    pub fn new(delays: RetryDelays) -> Self {
        Self {
            delays,
            link_up: false,
            session_up: false,
        }
    }

    pub fn delays(&self) -> RetryDelays {
        self.delays
    }

    pub fn link_up(&self) -> bool {
        self.link_up
    }

    pub fn session_up(&self) -> bool {
        self.session_up
    }

    /// Timer-driven transfer starts only make sense with a live session.
    pub fn may_start_transfer(&self) -> bool {
        self.session_up
    }

    pub fn on_boot(&mut self) -> Vec<Directive> {
        vec![Directive::ConnectLink]
    }

    pub fn on_link_up(&mut self) -> Vec<Directive> {
        self.link_up = true;
        log::info!("link established");
        if self.session_up {
            return vec![Directive::Cancel(TimerKind::LinkRetry)];
        }
        vec![
            Directive::Cancel(TimerKind::LinkRetry),
            Directive::ConnectSession,
        ]
    }

    /// The transfer is left alone; its next publish fails if the session went too.
    pub fn on_link_down(&mut self) -> Vec<Directive> {
        self.link_up = false;
        log::warn!(
            "link lost, retrying in {} ms",
            self.delays.link.as_millis()
        );
        vec![
            Directive::Cancel(TimerKind::SessionRetry),
            Directive::Schedule(TimerKind::LinkRetry, self.delays.link),
        ]
    }

    pub fn on_session_up(&mut self) -> Vec<Directive> {
        self.session_up = true;
        log::info!("broker session established");
        vec![
            Directive::Cancel(TimerKind::SessionRetry),
            Directive::SubscribeConfig,
            Directive::StartTransfer,
        ]
    }

    pub fn on_session_down(&mut self, reason: &str) -> Vec<Directive> {
        self.session_up = false;
        let mut directives = vec![Directive::AbortTransfer];
        if self.link_up {
            log::warn!(
                "broker session lost ({}), retrying in {} ms",
                reason,
                self.delays.session.as_millis()
            );
            directives.push(Directive::Schedule(
                TimerKind::SessionRetry,
                self.delays.session,
            ));
        } else {
            log::warn!("broker session lost ({}) with link down", reason);
        }
        directives
    }

    pub fn on_link_retry(&mut self) -> Vec<Directive> {
        vec![Directive::ConnectLink]
    }

    /// Re-check the link before reopening the session. `LinkUp` opens the session;
    /// `LinkDown` hands the retry over to `LinkRetry`.
    pub fn on_session_retry(&mut self) -> Vec<Directive> {
        if !self.link_up || self.session_up {
            return Vec::new();
        }
        vec![Directive::ConnectLink]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_connects_link_then_session() {
        let mut c = ConnectionCoordinator::default();
        assert_eq!(c.on_boot(), vec![Directive::ConnectLink]);
        assert!(c.on_link_up().contains(&Directive::ConnectSession));
        assert!(c.link_up());
        assert!(!c.may_start_transfer());
    }

    #[test]
    fn session_up_subscribes_before_starting() {
        let mut c = ConnectionCoordinator::default();
        c.on_link_up();
        let directives = c.on_session_up();
        let subscribe = directives
            .iter()
            .position(|d| *d == Directive::SubscribeConfig)
            .expect("subscribe");
        let start = directives
            .iter()
            .position(|d| *d == Directive::StartTransfer)
            .expect("start");
        assert!(subscribe < start);
        assert!(c.may_start_transfer());
    }

    #[test]
    fn link_loss_cancels_session_retry_and_schedules_link_retry() {
        let mut c = ConnectionCoordinator::default();
        c.on_link_up();
        assert_eq!(
            c.on_link_down(),
            vec![
                Directive::Cancel(TimerKind::SessionRetry),
                Directive::Schedule(TimerKind::LinkRetry, DEFAULT_LINK_RETRY_DELAY),
            ]
        );
        assert!(!c.link_up());
    }

    #[test]
    fn session_loss_aborts_and_retries_only_with_link() {
        let mut c = ConnectionCoordinator::default();
        c.on_link_up();
        c.on_session_up();
        assert_eq!(
            c.on_session_down("keep alive timeout"),
            vec![
                Directive::AbortTransfer,
                Directive::Schedule(TimerKind::SessionRetry, DEFAULT_SESSION_RETRY_DELAY),
            ]
        );

        c.on_link_down();
        assert_eq!(
            c.on_session_down("network unreachable"),
            vec![Directive::AbortTransfer]
        );
        assert!(c.on_session_retry().is_empty());
    }

    #[test]
    fn session_retry_reprobes_the_link() {
        let mut c = ConnectionCoordinator::default();
        c.on_link_up();
        c.on_session_up();
        c.on_session_down("connection reset");
        assert_eq!(c.on_session_retry(), vec![Directive::ConnectLink]);

        assert!(c.on_link_up().contains(&Directive::ConnectSession));

        c.on_session_down("connection reset");
        c.on_link_down();
        assert!(c.on_session_retry().is_empty());
        assert!(!c.link_up());
    }

    #[test]
    fn custom_delays_are_used() {
        let delays = RetryDelays {
            link: Duration::from_millis(250),
            session: Duration::from_secs(7),
        };
        let mut c = ConnectionCoordinator::new(delays);
        assert!(c
            .on_link_down()
            .contains(&Directive::Schedule(TimerKind::LinkRetry, delays.link)));
    }

    #[test]
    fn link_up_with_live_session_does_not_reconnect() {
        let mut c = ConnectionCoordinator::default();
        c.on_link_up();
        c.on_session_up();
        assert_eq!(c.on_link_up(), vec![Directive::Cancel(TimerKind::LinkRetry)]);
    }
}
