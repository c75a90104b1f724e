//! Frame transfer state machine.
//!
//! Owns at most one captured `Frame` and walks it through
//! `Idle -> Capturing -> Transmitting -> Completing -> Idle`, with `Aborting` reachable
//! from `Capturing` and `Transmitting`. One chunk is outstanding at a time; the next
//! one is only offered after the transport acknowledges the previous publish, and even
//! then through a zero-delay `ChunkPacing` timer rather than a direct call.
//!
//! Every successful `acquire` is paired with exactly one `release`:
//! - completion
//! - synchronous publish rejection
//! - session loss
//! - shutdown
//!
//! The machine never blocks and never owns I/O handles. Each call borrows them through
//! a `TransferIo` supplied by the dispatcher.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::capture::CaptureSource;
use crate::event::PublishId;
use crate::frame::{next_frame_id, Frame, DEFAULT_CHUNK_SIZE};
use crate::timer::{TimerKind, TimerQueue};
use crate::topic::chunk_topic;
use crate::transport::{QoS, Transport};

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_CAPTURE_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Capturing,
    Transmitting,
    Completing,
    Aborting,
}

/// How an acknowledgment is matched to the outstanding chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Any acknowledgment received while a chunk is outstanding advances the transfer.
    #[default]
    InOrder,
    /// Only the acknowledgment carrying the outstanding publish's id advances it.
    Tracked,
}

impl FromStr for AckPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in_order" | "in-order" | "inorder" => Ok(Self::InOrder),
            "tracked" => Ok(Self::Tracked),
            other => Err(anyhow!(
                "unknown ack policy '{}'; expected in_order or tracked",
                other
            )),
        }
    }
}

impl fmt::Display for AckPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InOrder => f.write_str("in_order"),
            Self::Tracked => f.write_str("tracked"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferSettings {
    pub chunk_size: usize,
    pub ack_policy: AckPolicy,
    /// Delay between a completed frame and the next capture.
    pub frame_interval: Duration,
    pub capture_retry_delay: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            ack_policy: AckPolicy::default(),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            capture_retry_delay: DEFAULT_CAPTURE_RETRY_DELAY,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub frames_completed: u64,
    pub frames_aborted: u64,
    pub capture_failures: u64,
    pub chunks_offered: u64,
}

/// The frame currently being transmitted.
#[derive(Debug)]
pub struct TransferSession {
    frame: Frame,
    next_chunk_index: u32,
    total_chunks: u32,
    in_progress: bool,
    outstanding: Option<PublishId>,
}

impl TransferSession {
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn next_chunk_index(&self) -> u32 {
        self.next_chunk_index
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn outstanding(&self) -> Option<PublishId> {
        self.outstanding
    }
}

/// Handles borrowed for one transfer step.
pub struct TransferIo<'a> {
    pub capture: &'a mut dyn CaptureSource,
    pub transport: &'a mut dyn Transport,
    pub timers: &'a mut TimerQueue,
    pub now: Instant,
}

pub struct TransferMachine {
    settings: TransferSettings,
    state: TransferState,
    session: Option<TransferSession>,
    frame_id: u32,
    booted: Instant,
    stats: TransferStats,
}

impl TransferMachine {
    /// `booted` anchors the uptime that frame ids are derived from.
    pub fn new(settings: TransferSettings, booted: Instant) -> Self {
        Self {
            settings,
            state: TransferState::Idle,
            session: None,
            frame_id: 0,
            booted,
            stats: TransferStats::default(),
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == TransferState::Idle
    }

    pub fn session(&self) -> Option<&TransferSession> {
        self.session.as_ref()
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Id the next captured frame will carry.
    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    fn enter(&mut self, next: TransferState) {
        log::debug!("transfer: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Capture a frame and offer its first chunk. Ignored unless `Idle`.
    pub fn start_transfer(&mut self, io: &mut TransferIo<'_>) {
        if self.state != TransferState::Idle {
            log::debug!("transfer start ignored in state {:?}", self.state);
            return;
        }
        self.enter(TransferState::Capturing);

        let mut frame = match io.capture.acquire() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("capture failed: {:#}", e);
                self.capture_failed(io);
                return;
            }
        };
        let total_chunks = frame.total_chunks(self.settings.chunk_size);
        if total_chunks == 0 {
            log::warn!("capture returned an empty frame");
            io.capture.release(frame);
            self.capture_failed(io);
            return;
        }

        frame.set_frame_id(self.frame_id);
        log::info!(
            "frame {}: {} bytes in {} chunks",
            frame.frame_id(),
            frame.total_bytes(),
            total_chunks
        );
        self.session = Some(TransferSession {
            frame,
            next_chunk_index: 0,
            total_chunks,
            in_progress: true,
            outstanding: None,
        });
        self.enter(TransferState::Transmitting);
        self.emit_next_chunk(io);
    }

    fn capture_failed(&mut self, io: &mut TransferIo<'_>) {
        self.stats.capture_failures += 1;
        io.timers.schedule(
            TimerKind::CaptureRetry,
            io.now,
            self.settings.capture_retry_delay,
        );
        self.enter(TransferState::Idle);
    }

    /// Publish the chunk at `next_chunk_index`. A synchronous rejection aborts the frame
    /// and schedules a fresh attempt after `frame_interval`.
    pub fn emit_next_chunk(&mut self, io: &mut TransferIo<'_>) {
        if self.state != TransferState::Transmitting {
            log::debug!("chunk emission skipped in state {:?}", self.state);
            return;
        }
        let chunk_size = self.settings.chunk_size;
        let rejected = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            if !session.in_progress || session.outstanding.is_some() {
                log::debug!("chunk emission skipped: session idle or chunk outstanding");
                return;
            }
            let index = session.next_chunk_index;
            let Some(chunk) = session.frame.chunk(index, chunk_size) else {
                return;
            };
            let topic = chunk_topic(session.frame.frame_id(), index, session.total_chunks);
            let result = io.transport.publish(&topic, QoS::AtLeastOnce, chunk.bytes);
            session.next_chunk_index += 1;
            self.stats.chunks_offered += 1;
            match result {
                Ok(id) => {
                    log::debug!("{} ({} bytes) published as {}", topic, chunk.len(), id);
                    session.outstanding = Some(id);
                    None
                }
                Err(e) => Some(format!("publish of {} rejected: {:#}", topic, e)),
            }
        };
        if let Some(reason) = rejected {
            self.abort(io, &reason);
            // The session may still be up with a saturated queue; try a fresh frame later.
            io.timers
                .schedule(TimerKind::NextFrame, io.now, self.settings.frame_interval);
        }
    }

    /// Advance on an acknowledgment. Stray and (under `Tracked`) foreign acks are ignored.
    pub fn on_publish_acked(&mut self, id: PublishId, io: &mut TransferIo<'_>) {
        let policy = self.settings.ack_policy;
        let finished = {
            let Some(session) = self.session.as_mut() else {
                log::debug!("stray ack {} with no transfer", id);
                return;
            };
            if self.state != TransferState::Transmitting || !session.in_progress {
                log::debug!("stray ack {} outside transmission", id);
                return;
            }
            let Some(outstanding) = session.outstanding else {
                log::debug!("stray ack {} with no chunk outstanding", id);
                return;
            };
            if policy == AckPolicy::Tracked && id != outstanding {
                log::debug!("ack {} does not match outstanding {}", id, outstanding);
                return;
            }
            session.outstanding = None;
            session.next_chunk_index >= session.total_chunks
        };
        if finished {
            self.enter(TransferState::Completing);
            self.complete(io);
        } else {
            io.timers
                .schedule(TimerKind::ChunkPacing, io.now, Duration::ZERO);
        }
    }

    /// `ChunkPacing` fired.
    pub fn on_pacing_tick(&mut self, io: &mut TransferIo<'_>) {
        self.emit_next_chunk(io);
    }

    fn complete(&mut self, io: &mut TransferIo<'_>) {
        if let Some(session) = self.session.take() {
            let frame_id = session.frame.frame_id();
            io.capture.release(session.frame);
            self.stats.frames_completed += 1;
            self.advance_frame_id(io.now);
            log::info!("frame {} sent ({} chunks)", frame_id, session.total_chunks);
        }
        self.enter(TransferState::Idle);
        io.timers
            .schedule(TimerKind::NextFrame, io.now, self.settings.frame_interval);
    }

    /// Drop the current frame, if any. No retry is scheduled.
    pub fn abort(&mut self, io: &mut TransferIo<'_>, reason: &str) {
        if self.session.is_none() && self.state == TransferState::Idle {
            return;
        }
        self.enter(TransferState::Aborting);
        if let Some(session) = self.session.take() {
            log::warn!(
                "frame {} aborted after {}/{} chunks: {}",
                session.frame.frame_id(),
                session.next_chunk_index,
                session.total_chunks,
                reason
            );
            io.capture.release(session.frame);
            self.stats.frames_aborted += 1;
            self.advance_frame_id(io.now);
        }
        io.timers.cancel(TimerKind::ChunkPacing);
        self.enter(TransferState::Idle);
    }

    /// The broker session dropped: nothing more may be sent for this frame.
    pub fn mark_session_lost(&mut self, io: &mut TransferIo<'_>) {
        if let Some(session) = self.session.as_mut() {
            session.in_progress = false;
        }
        self.abort(io, "session lost");
    }

    pub fn shutdown(&mut self, io: &mut TransferIo<'_>) {
        self.abort(io, "shutdown");
    }

    fn advance_frame_id(&mut self, now: Instant) {
        let uptime = now.saturating_duration_since(self.booted);
        self.frame_id = next_frame_id(self.frame_id, uptime);
    }
}
