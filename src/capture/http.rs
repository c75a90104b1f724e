//! HTTP snapshot capture source.
//!
//! Fetches one JPEG per acquisition from a camera's snapshot endpoint (for example an
//! ESP32 camera web server's `/capture`). The current sensor configuration travels as
//! `framesize` and `quality` query parameters, so a change only shows up in the next
//! snapshot requested.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use url::Url;

use super::dir::check_jpeg;
use super::{BufferSlot, CaptureSource, CaptureStats, MAX_FRAME_BYTES};
use crate::frame::Frame;
use crate::sensor::SensorConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpCaptureSource {
    base: Url,
    agent: ureq::Agent,
    config: SensorConfig,
    slot: BufferSlot,
}

impl HttpCaptureSource {
    pub fn new(url: &str) -> Result<Self> {
        let base = Url::parse(url).context("parse capture url")?;
        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported capture scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Ok(Self {
            base,
            agent,
            config: SensorConfig::default(),
            slot: BufferSlot::default(),
        })
    }

    /// Snapshot URL for the current configuration.
    pub fn snapshot_url(&self) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("framesize", self.config.frame_size.name())
            .append_pair("quality", &self.config.quality.to_string());
        url
    }

    fn fetch(&self) -> Result<Vec<u8>> {
        let url = self.snapshot_url();
        let response = self
            .agent
            .get(url.as_str())
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.base))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_FRAME_BYTES as u64 + 1)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        check_jpeg(&bytes)?;
        if image::guess_format(&bytes).ok() != Some(image::ImageFormat::Jpeg) {
            return Err(anyhow!("snapshot from {} is not a jpeg", self.base));
        }
        Ok(bytes)
    }
}

impl CaptureSource for HttpCaptureSource {
    fn acquire(&mut self) -> Result<Frame> {
        self.slot.ensure_free()?;
        match self.fetch() {
            Ok(bytes) => {
                self.slot.check_out();
                Ok(Frame::new(0, bytes))
            }
            Err(e) => {
                self.slot.record_failure();
                Err(e)
            }
        }
    }

    fn release(&mut self, frame: Frame) {
        self.slot.check_in();
        drop(frame);
    }

    fn apply_configuration(&mut self, config: &SensorConfig) {
        self.config = *config;
    }

    fn stats(&self) -> CaptureStats {
        self.slot.stats(self.base.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::FrameSize;

    #[test]
    fn snapshot_url_carries_sensor_settings() {
        let mut source = HttpCaptureSource::new("http://192.168.4.1/capture").unwrap();
        source.apply_configuration(&SensorConfig {
            quality: 12,
            frame_size: FrameSize::Vga,
        });
        assert_eq!(
            source.snapshot_url().as_str(),
            "http://192.168.4.1/capture?framesize=VGA&quality=12"
        );
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(HttpCaptureSource::new("udp://192.168.4.1:5000").is_err());
    }
}
