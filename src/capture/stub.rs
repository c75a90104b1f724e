//! Stub sensor.
//!
//! Produces synthetic JPEG-shaped buffers (SOI marker, deterministic body, EOI marker)
//! whose size follows the current resolution and quality, the way a real sensor's
//! output grows with resolution and shrinks as the quality number rises. Tests can
//! script exact frame sizes and capture failures.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use super::{BufferSlot, CaptureSource, CaptureStats};
use crate::frame::Frame;
use crate::sensor::SensorConfig;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const MIN_SYNTHETIC_BYTES: usize = 64;

/// One scripted capture outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StubCapture {
    /// A frame of exactly this many bytes.
    Frame(usize),
    /// No frame ready.
    Fail,
}

pub struct StubCaptureSource {
    name: String,
    config: SensorConfig,
    script: VecDeque<StubCapture>,
    slot: BufferSlot,
    frame_count: u64,
    spare: Option<Vec<u8>>,
}

impl Default for StubCaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StubCaptureSource {
    pub fn new() -> Self {
        Self::named("stub://sensor")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: SensorConfig::default(),
            script: VecDeque::new(),
            slot: BufferSlot::default(),
            frame_count: 0,
            spare: None,
        }
    }

    /// Scripted outcomes are consumed first; synthetic frames follow once exhausted.
    pub fn with_script(script: impl IntoIterator<Item = StubCapture>) -> Self {
        let mut source = Self::new();
        source.script = script.into_iter().collect();
        source
    }

    pub fn push_script(&mut self, outcome: StubCapture) {
        self.script.push_back(outcome);
    }

    /// The settings the next synthetic frame will be produced with.
    pub fn configuration(&self) -> SensorConfig {
        self.config
    }

    fn next_len(&mut self) -> Option<usize> {
        match self.script.pop_front() {
            Some(StubCapture::Frame(len)) => Some(len),
            Some(StubCapture::Fail) => None,
            None => Some(synthetic_jpeg_len(&self.config)),
        }
    }

    fn fill(&mut self, len: usize) -> Vec<u8> {
        let mut data = self.spare.take().unwrap_or_default();
        data.clear();
        data.reserve(len);
        let seed = self.frame_count;
        data.extend((0..len).map(|i| ((i as u64).wrapping_mul(31).wrapping_add(seed) % 251) as u8));
        if len >= JPEG_SOI.len() + JPEG_EOI.len() {
            data[..2].copy_from_slice(&JPEG_SOI);
            data[len - 2..].copy_from_slice(&JPEG_EOI);
        }
        data
    }
}

impl CaptureSource for StubCaptureSource {
    fn acquire(&mut self) -> Result<Frame> {
        self.slot.ensure_free()?;
        let Some(len) = self.next_len() else {
            self.slot.record_failure();
            return Err(anyhow!("{}: no frame ready", self.name));
        };
        self.frame_count += 1;
        let data = self.fill(len);
        self.slot.check_out();
        Ok(Frame::new(0, data))
    }

    fn release(&mut self, frame: Frame) {
        self.slot.check_in();
        self.spare = Some(frame.into_bytes());
    }

    fn apply_configuration(&mut self, config: &SensorConfig) {
        self.config = *config;
        log::debug!(
            "{}: sensor set to {} quality={}",
            self.name,
            config.frame_size,
            config.quality
        );
    }

    fn stats(&self) -> CaptureStats {
        self.slot.stats(&self.name)
    }
}

/// Approximate JPEG size for a resolution and quality.
pub fn synthetic_jpeg_len(config: &SensorConfig) -> usize {
    let (width, height) = config.frame_size.dimensions();
    let raw = width as usize * height as usize * 3;
    let ratio = 8 + 2 * config.quality as usize;
    (raw / ratio).max(MIN_SYNTHETIC_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::FrameSize;

    #[test]
    fn scripted_outcomes_come_first() {
        let mut source =
            StubCaptureSource::with_script([StubCapture::Fail, StubCapture::Frame(10_000)]);
        assert!(source.acquire().is_err());
        let frame = source.acquire().expect("scripted frame");
        assert_eq!(frame.total_bytes(), 10_000);
        source.release(frame);
        assert_eq!(source.stats().capture_failures, 1);
    }

    #[test]
    fn synthetic_frames_look_like_jpeg() {
        let mut source = StubCaptureSource::new();
        let frame = source.acquire().expect("frame");
        let first = frame.chunk(0, 4096).expect("chunk");
        assert_eq!(&first.bytes[..2], &JPEG_SOI);
        source.release(frame);
    }

    #[test]
    fn size_follows_resolution_and_quality() {
        let small = SensorConfig {
            quality: 10,
            frame_size: FrameSize::Qvga,
        };
        let large = SensorConfig {
            quality: 10,
            frame_size: FrameSize::Xga,
        };
        let coarse = SensorConfig {
            quality: 60,
            frame_size: FrameSize::Xga,
        };
        assert!(synthetic_jpeg_len(&small) < synthetic_jpeg_len(&large));
        assert!(synthetic_jpeg_len(&coarse) < synthetic_jpeg_len(&large));
    }

    #[test]
    fn configuration_only_affects_later_frames() {
        let mut source = StubCaptureSource::new();
        let frame = source.acquire().expect("frame");
        let held_len = frame.total_bytes();

        source.apply_configuration(&SensorConfig {
            quality: 63,
            frame_size: FrameSize::Qqvga,
        });
        assert_eq!(frame.total_bytes(), held_len);
        source.release(frame);

        let next = source.acquire().expect("next frame");
        assert!(next.total_bytes() < held_len);
        source.release(next);
    }

    #[test]
    fn single_buffer_is_enforced() {
        let mut source = StubCaptureSource::new();
        let frame = source.acquire().expect("frame");
        let err = source.acquire().unwrap_err();
        assert!(err.to_string().contains("checked out"));
        source.release(frame);
        assert!(source.acquire().is_ok());
    }
}
