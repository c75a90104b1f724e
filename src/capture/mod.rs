//! Capture sources.
//!
//! This module provides the sources the relay pulls frames from:
//! - Stub sensor (`stub://`): synthetic JPEG-shaped buffers, scripted outcomes for tests
//! - Directory of JPEG files (`dir:///path`)
//! - HTTP snapshot endpoint of an ESP32-style camera (`http://`, feature: capture-http)
//!
//! Every source holds at most one buffer checked out at a time. `acquire` fails while a
//! frame is outstanding and `release` takes the frame back by value, so the transfer
//! machine cannot hold two frames or hand one back twice.
//!
//! Sources MUST NOT:
//! - Apply a configuration change to a frame that has already been acquired
//! - Retain a reference to a frame after handing it out

pub mod dir;
#[cfg(feature = "capture-http")]
pub mod http;
pub mod stub;

use anyhow::{anyhow, Result};

use crate::frame::Frame;
use crate::sensor::SensorConfig;

pub use dir::DirCaptureSource;
#[cfg(feature = "capture-http")]
pub use http::HttpCaptureSource;
pub use stub::{StubCapture, StubCaptureSource};

/// Hard cap on a single captured frame.
pub const MAX_FRAME_BYTES: usize = 5 * 1024 * 1024;

/// A producer of camera frames with single-buffer capacity.
pub trait CaptureSource {
    /// Check out one frame. Fails when no frame is ready or a frame is already out.
    fn acquire(&mut self) -> Result<Frame>;

    /// Return a frame obtained from `acquire`.
    fn release(&mut self, frame: Frame);

    /// Sensor settings for subsequent `acquire` calls.
    fn apply_configuration(&mut self, config: &SensorConfig);

    fn stats(&self) -> CaptureStats;
}

/// Statistics for a capture source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_acquired: u64,
    pub frames_released: u64,
    pub capture_failures: u64,
    pub checked_out: bool,
    pub source: String,
}

/// Single-buffer bookkeeping shared by every source.
#[derive(Debug, Default)]
pub(crate) struct BufferSlot {
    checked_out: bool,
    acquired: u64,
    released: u64,
    failures: u64,
}

impl BufferSlot {
    pub(crate) fn ensure_free(&self) -> Result<()> {
        if self.checked_out {
            return Err(anyhow!("capture buffer already checked out"));
        }
        Ok(())
    }

    pub(crate) fn check_out(&mut self) {
        self.checked_out = true;
        self.acquired += 1;
    }

    pub(crate) fn check_in(&mut self) {
        if !self.checked_out {
            log::warn!("capture buffer returned while none was checked out");
        }
        self.checked_out = false;
        self.released += 1;
    }

    pub(crate) fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub(crate) fn stats(&self, source: &str) -> CaptureStats {
        CaptureStats {
            frames_acquired: self.acquired,
            frames_released: self.released,
            capture_failures: self.failures,
            checked_out: self.checked_out,
            source: source.to_string(),
        }
    }
}

/// A capture source selected from a source URI.
///
/// Supported: `stub://<name>`, `dir:///path/to/jpegs`, `http(s)://host/capture`
/// (the last requires the capture-http feature).
pub struct ConfiguredSource {
    backend: SourceBackend,
}

enum SourceBackend {
    Stub(StubCaptureSource),
    Dir(DirCaptureSource),
    #[cfg(feature = "capture-http")]
    Http(HttpCaptureSource),
}

impl ConfiguredSource {
    pub fn open(uri: &str, sensor: &SensorConfig) -> Result<Self> {
        validate_source_uri(uri)?;
        let backend = if uri.starts_with("stub://") {
            SourceBackend::Stub(StubCaptureSource::named(uri))
        } else if let Some(path) = uri.strip_prefix("dir://") {
            SourceBackend::Dir(DirCaptureSource::open(path)?)
        } else {
            Self::open_http(uri)?
        };
        let mut source = Self { backend };
        source.apply_configuration(sensor);
        log::info!("capture source ready: {}", uri);
        Ok(source)
    }

    #[cfg(feature = "capture-http")]
    fn open_http(uri: &str) -> Result<SourceBackend> {
        Ok(SourceBackend::Http(HttpCaptureSource::new(uri)?))
    }

    #[cfg(not(feature = "capture-http"))]
    fn open_http(uri: &str) -> Result<SourceBackend> {
        Err(anyhow!(
            "source {} requires the capture-http feature",
            uri
        ))
    }

    fn inner(&self) -> &dyn CaptureSource {
        match &self.backend {
            SourceBackend::Stub(source) => source,
            SourceBackend::Dir(source) => source,
            #[cfg(feature = "capture-http")]
            SourceBackend::Http(source) => source,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn CaptureSource {
        match &mut self.backend {
            SourceBackend::Stub(source) => source,
            SourceBackend::Dir(source) => source,
            #[cfg(feature = "capture-http")]
            SourceBackend::Http(source) => source,
        }
    }
}

impl CaptureSource for ConfiguredSource {
    fn acquire(&mut self) -> Result<Frame> {
        self.inner_mut().acquire()
    }

    fn release(&mut self, frame: Frame) {
        self.inner_mut().release(frame)
    }

    fn apply_configuration(&mut self, config: &SensorConfig) {
        self.inner_mut().apply_configuration(config)
    }

    fn stats(&self) -> CaptureStats {
        self.inner().stats()
    }
}

/// Check that `uri` names a supported source scheme.
pub fn validate_source_uri(uri: &str) -> Result<()> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(anyhow!("capture source must not be empty"));
    }
    let Some((scheme, rest)) = uri.split_once("://") else {
        return Err(anyhow!(
            "capture source '{}' has no scheme; expected stub://, dir:// or http(s)://",
            uri
        ));
    };
    match scheme {
        "stub" => Ok(()),
        "dir" if !rest.is_empty() => Ok(()),
        "dir" => Err(anyhow!("dir:// source needs a directory path")),
        "http" | "https" => Ok(()),
        other => Err(anyhow!(
            "unsupported capture source scheme '{}'; expected stub, dir or http(s)",
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_uri_validation() {
        assert!(validate_source_uri("stub://front").is_ok());
        assert!(validate_source_uri("dir:///var/lib/frames").is_ok());
        assert!(validate_source_uri("http://192.168.4.1/capture").is_ok());
        assert!(validate_source_uri("dir://").is_err());
        assert!(validate_source_uri("rtsp://camera").is_err());
        assert!(validate_source_uri("/var/lib/frames").is_err());
        assert!(validate_source_uri("  ").is_err());
    }

    #[test]
    fn configured_stub_source_delegates() {
        let mut source =
            ConfiguredSource::open("stub://test", &SensorConfig::default()).expect("open");
        let frame = source.acquire().expect("frame");
        assert!(source.acquire().is_err());
        source.release(frame);
        let stats = source.stats();
        assert_eq!(stats.frames_acquired, 1);
        assert_eq!(stats.frames_released, 1);
        assert!(!stats.checked_out);
    }

    #[test]
    fn buffer_slot_rejects_second_checkout() {
        let mut slot = BufferSlot::default();
        assert!(slot.ensure_free().is_ok());
        slot.check_out();
        assert!(slot.ensure_free().is_err());
        slot.check_in();
        assert!(slot.ensure_free().is_ok());
        assert_eq!(slot.stats("x").frames_released, 1);
    }
}
