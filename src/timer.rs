//! Deferred re-entry for the dispatcher.
//!
//! Each `TimerKind` owns one independent deadline slot. Scheduling a kind replaces only
//! that kind's pending deadline, so link retries, session retries, chunk pacing,
//! capture retries and the next-frame delay never cancel each other.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    LinkRetry,
    SessionRetry,
    ChunkPacing,
    CaptureRetry,
    NextFrame,
}

impl TimerKind {
    pub const ALL: [TimerKind; 5] = [
        TimerKind::LinkRetry,
        TimerKind::SessionRetry,
        TimerKind::ChunkPacing,
        TimerKind::CaptureRetry,
        TimerKind::NextFrame,
    ];

    fn slot(self) -> usize {
        match self {
            Self::LinkRetry => 0,
            Self::SessionRetry => 1,
            Self::ChunkPacing => 2,
            Self::CaptureRetry => 3,
            Self::NextFrame => 4,
        }
    }
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    deadlines: [Option<Instant>; 5],
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire `delay` after `now`, replacing any pending deadline of that kind.
    pub fn schedule(&mut self, kind: TimerKind, now: Instant, delay: Duration) {
        self.deadlines[kind.slot()] = Some(now + delay);
    }

    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.deadlines[kind.slot()].take().is_some()
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.deadlines[kind.slot()].is_some()
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.deadlines[kind.slot()]
    }

    /// Earliest pending deadline across all kinds.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Disarm and return the earliest timer whose deadline is at or before `now`.
    ///
    /// Ties resolve in `TimerKind::ALL` order.
    pub fn pop_expired(&mut self, now: Instant) -> Option<TimerKind> {
        let kind = TimerKind::ALL
            .into_iter()
            .filter_map(|kind| self.deadline(kind).map(|at| (at, kind)))
            .filter(|(at, _)| *at <= now)
            .min_by_key(|(at, kind)| (*at, kind.slot()))
            .map(|(_, kind)| kind)?;
        self.cancel(kind);
        Some(kind)
    }

    /// Kinds due at `now`, earliest deadline first. Nothing is disarmed.
    pub fn due(&self, now: Instant) -> Vec<TimerKind> {
        let mut due: Vec<(Instant, TimerKind)> = TimerKind::ALL
            .into_iter()
            .filter_map(|kind| self.deadline(kind).map(|at| (at, kind)))
            .filter(|(at, _)| *at <= now)
            .collect();
        due.sort_by_key(|(at, kind)| (*at, kind.slot()));
        due.into_iter().map(|(_, kind)| kind).collect()
    }

    /// Disarm `kind` if it is still due at `now`.
    pub fn take_if_due(&mut self, kind: TimerKind, now: Instant) -> bool {
        match self.deadline(kind) {
            Some(at) if at <= now => self.cancel(kind),
            _ => false,
        }
    }
}
