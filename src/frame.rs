//! Captured frame ownership and chunk slicing.
//!
//! - `Frame`: one capture result. Bytes are private and the type is not `Clone`.
//! - `Chunk`: a borrowed view into a frame buffer, never a copy.
//!
//! A `Frame` travels from a `CaptureSource` to the transfer state machine and back
//! again through `CaptureSource::release`, which takes it by value. A frame that has
//! been handed back cannot be handed back a second time:
//!
//! ```compile_fail
//! use frame_relay::{CaptureSource, StubCaptureSource};
//!
//! let mut source = StubCaptureSource::new();
//! let frame = source.acquire().unwrap();
//! source.release(frame);
//! source.release(frame);
//! ```
//!
//! Nor can it be duplicated to smuggle a second owner past the single-buffer rule:
//!
//! ```compile_fail
//! use frame_relay::{CaptureSource, StubCaptureSource};
//!
//! let mut source = StubCaptureSource::new();
//! let frame = source.acquire().unwrap();
//! let _copy = frame.clone();
//! ```

use std::time::Duration;

/// Default chunk payload size in bytes. Receivers doing reassembly must agree on it.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Uptime milliseconds per frame id step.
const FRAME_ID_UPTIME_DIVISOR_MS: u128 = 512;

// ----------------------------------------------------------------------------
// Frame: exclusively owned capture buffer
// ----------------------------------------------------------------------------

/// One captured frame.
///
/// There is no `Clone` and no owned-bytes accessor; chunks borrow from the buffer.
#[derive(Debug)]
pub struct Frame {
    frame_id: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Create a frame. Called by capture sources.
    pub fn new(frame_id: u32, data: Vec<u8>) -> Self {
        Self { frame_id, data }
    }

    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    /// Relabel the frame. The transfer machine stamps its own id on every acquisition.
    pub(crate) fn set_frame_id(&mut self, frame_id: u32) {
        self.frame_id = frame_id;
    }

    pub fn total_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of chunks this frame splits into at `chunk_size`.
    pub fn total_chunks(&self, chunk_size: usize) -> u32 {
        total_chunks(self.data.len(), chunk_size)
    }

    /// Borrow chunk `index`, or `None` when the index is past the end.
    pub fn chunk(&self, index: u32, chunk_size: usize) -> Option<Chunk<'_>> {
        let (offset, length) = chunk_bounds(self.data.len(), chunk_size, index)?;
        Some(Chunk {
            index,
            offset,
            bytes: &self.data[offset..offset + length],
        })
    }

    /// Iterate every chunk in index order.
    pub fn chunks(&self, chunk_size: usize) -> impl Iterator<Item = Chunk<'_>> {
        (0..self.total_chunks(chunk_size)).filter_map(move |index| self.chunk(index, chunk_size))
    }

    /// Consume the frame and hand the buffer back to the source that produced it.
    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

// ----------------------------------------------------------------------------
// Chunk: borrowed transmission unit
// ----------------------------------------------------------------------------

/// A contiguous slice of a frame, transmitted as one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub index: u32,
    pub offset: usize,
    pub bytes: &'a [u8],
}

impl Chunk<'_> {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// `ceil(total_bytes / chunk_size)`. A zero chunk size yields zero chunks.
pub fn total_chunks(total_bytes: usize, chunk_size: usize) -> u32 {
    if chunk_size == 0 {
        return 0;
    }
    total_bytes.div_ceil(chunk_size) as u32
}

/// `(offset, length)` of chunk `index`, or `None` past the last chunk.
pub fn chunk_bounds(total_bytes: usize, chunk_size: usize, index: u32) -> Option<(usize, usize)> {
    if index >= total_chunks(total_bytes, chunk_size) {
        return None;
    }
    let offset = index as usize * chunk_size;
    let length = chunk_size.min(total_bytes - offset);
    Some((offset, length))
}

/// Frame id for a given device uptime (512 ms steps, wraps at `u32::MAX`).
pub fn frame_id_from_uptime(uptime: Duration) -> u32 {
    (uptime.as_millis() / FRAME_ID_UPTIME_DIVISOR_MS) as u32
}

/// Next frame id: derived from uptime, but never a repeat of `previous`.
pub fn next_frame_id(previous: u32, uptime: Duration) -> u32 {
    let derived = frame_id_from_uptime(uptime);
    if derived > previous {
        derived
    } else {
        previous.wrapping_add(1)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
