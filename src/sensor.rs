//! Sensor configuration and the `key=value` config message handler.
//!
//! Config messages mutate `SensorConfig` immediately. Capture sources only read it when
//! the next frame is acquired, so a frame already in flight keeps its bytes and its
//! chunk boundaries.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_QUALITY: u8 = 63;
pub const DEFAULT_QUALITY: u8 = 4;

/// Named sensor resolutions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FrameSize {
    Qqvga,
    Qvga,
    Vga,
    #[default]
    Svga,
    Xga,
}

impl FrameSize {
    pub const ALL: [FrameSize; 5] = [
        FrameSize::Qqvga,
        FrameSize::Qvga,
        FrameSize::Vga,
        FrameSize::Svga,
        FrameSize::Xga,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Qqvga => "QQVGA",
            Self::Qvga => "QVGA",
            Self::Vga => "VGA",
            Self::Svga => "SVGA",
            Self::Xga => "XGA",
        }
    }

    /// (width, height) in pixels.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Qqvga => (160, 120),
            Self::Qvga => (320, 240),
            Self::Vga => (640, 480),
            Self::Svga => (800, 600),
            Self::Xga => (1024, 768),
        }
    }
}

impl FromStr for FrameSize {
    type Err = anyhow::Error;

    /// Accepts the bare name (`VGA`) and the sensor driver spelling (`FRAMESIZE_VGA`).
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let name = trimmed.strip_prefix("FRAMESIZE_").unwrap_or(trimmed);
        FrameSize::ALL
            .into_iter()
            .find(|size| size.name() == name)
            .ok_or_else(|| anyhow!("unknown frame_size '{}'", s))
    }
}

impl TryFrom<String> for FrameSize {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FrameSize> for String {
    fn from(value: FrameSize) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Process-wide sensor settings, read by capture sources at acquisition time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorConfig {
    /// JPEG quality, 0 (best) to 63 (worst).
    pub quality: u8,
    pub frame_size: FrameSize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            frame_size: FrameSize::default(),
        }
    }
}

/// A change that was applied to `SensorConfig`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigChange {
    Quality { from: u8, to: u8 },
    FrameSize { from: FrameSize, to: FrameSize },
}

/// Result of handling one config message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigOutcome {
    Applied(ConfigChange),
    /// Well-formed and valid, but equal to the current value.
    Unchanged,
    Ignored(String),
}

impl SensorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.quality > MAX_QUALITY {
            return Err(anyhow!(
                "quality must be between 0 and {}, got {}",
                MAX_QUALITY,
                self.quality
            ));
        }
        Ok(())
    }

    /// Apply a raw `key=value` config payload. Invalid input leaves the config untouched.
    pub fn apply_message(&mut self, payload: &[u8]) -> ConfigOutcome {
        let outcome = match std::str::from_utf8(payload) {
            Ok(text) => self.apply_text(text),
            Err(_) => ConfigOutcome::Ignored("config payload is not utf-8".to_string()),
        };
        match &outcome {
            ConfigOutcome::Applied(change) => log::info!("sensor config applied: {:?}", change),
            ConfigOutcome::Unchanged => log::debug!("sensor config unchanged"),
            ConfigOutcome::Ignored(reason) => log::warn!("config message ignored: {}", reason),
        }
        outcome
    }

    fn apply_text(&mut self, text: &str) -> ConfigOutcome {
        let text = text.trim();
        let Some((key, value)) = text.split_once('=') else {
            return ConfigOutcome::Ignored(format!("expected key=value, got '{}'", text));
        };
        match key.trim() {
            "quality" => match parse_quality(value) {
                Ok(quality) if quality == self.quality => ConfigOutcome::Unchanged,
                Ok(quality) => {
                    let from = self.quality;
                    self.quality = quality;
                    ConfigOutcome::Applied(ConfigChange::Quality { from, to: quality })
                }
                Err(e) => ConfigOutcome::Ignored(e.to_string()),
            },
            "frame_size" => match value.parse::<FrameSize>() {
                Ok(size) if size == self.frame_size => ConfigOutcome::Unchanged,
                Ok(size) => {
                    let from = self.frame_size;
                    self.frame_size = size;
                    ConfigOutcome::Applied(ConfigChange::FrameSize { from, to: size })
                }
                Err(e) => ConfigOutcome::Ignored(e.to_string()),
            },
            other => ConfigOutcome::Ignored(format!("unknown config key '{}'", other)),
        }
    }
}

fn parse_quality(value: &str) -> Result<u8> {
    let value = value.trim();
    let quality: u32 = value
        .parse()
        .map_err(|_| anyhow!("quality '{}' is not a decimal integer", value))?;
    if quality > MAX_QUALITY as u32 {
        return Err(anyhow!(
            "quality {} outside 0..={}",
            quality,
            MAX_QUALITY
        ));
    }
    Ok(quality as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_in_range_is_applied() {
        let mut cfg = SensorConfig::default();
        let outcome = cfg.apply_message(b"quality=10");
        assert_eq!(
            outcome,
            ConfigOutcome::Applied(ConfigChange::Quality { from: 4, to: 10 })
        );
        assert_eq!(cfg.quality, 10);
    }

    #[test]
    fn quality_out_of_range_is_ignored() {
        let mut cfg = SensorConfig::default();
        assert!(matches!(
            cfg.apply_message(b"quality=99"),
            ConfigOutcome::Ignored(_)
        ));
        assert!(matches!(
            cfg.apply_message(b"quality=-1"),
            ConfigOutcome::Ignored(_)
        ));
        assert!(matches!(
            cfg.apply_message(b"quality=ten"),
            ConfigOutcome::Ignored(_)
        ));
        assert_eq!(cfg.quality, DEFAULT_QUALITY);
    }

    #[test]
    fn quality_bounds_are_inclusive() {
        let mut cfg = SensorConfig::default();
        cfg.apply_message(b"quality=63");
        assert_eq!(cfg.quality, 63);
        cfg.apply_message(b"quality=0");
        assert_eq!(cfg.quality, 0);
    }

    #[test]
    fn frame_size_known_name_is_applied() {
        let mut cfg = SensorConfig {
            quality: 4,
            frame_size: FrameSize::Vga,
        };
        cfg.apply_message(b"frame_size=SVGA");
        assert_eq!(cfg.frame_size, FrameSize::Svga);
        cfg.apply_message(b"frame_size=FRAMESIZE_QVGA\n");
        assert_eq!(cfg.frame_size, FrameSize::Qvga);
    }

    #[test]
    fn frame_size_unknown_name_is_ignored() {
        let mut cfg = SensorConfig::default();
        assert!(matches!(
            cfg.apply_message(b"frame_size=FOO"),
            ConfigOutcome::Ignored(_)
        ));
        assert_eq!(cfg.frame_size, FrameSize::Svga);
    }

    #[test]
    fn malformed_and_unknown_keys_are_ignored() {
        let mut cfg = SensorConfig::default();
        let before = cfg;
        let payloads: [&[u8]; 5] = [
            b"quality",
            b"",
            b"brightness=2",
            b"=10",
            &[0xff, 0xfe, b'=', b'1'],
        ];
        for payload in payloads {
            assert!(matches!(
                cfg.apply_message(payload),
                ConfigOutcome::Ignored(_)
            ));
        }
        assert_eq!(cfg, before);
    }

    #[test]
    fn same_value_reports_unchanged() {
        let mut cfg = SensorConfig::default();
        assert_eq!(cfg.apply_message(b"quality=4"), ConfigOutcome::Unchanged);
        assert_eq!(
            cfg.apply_message(b"frame_size=SVGA"),
            ConfigOutcome::Unchanged
        );
    }

    #[test]
    fn frame_size_round_trips_through_serde() {
        let json = serde_json::to_string(&FrameSize::Xga).unwrap();
        assert_eq!(json, "\"XGA\"");
        let parsed: FrameSize = serde_json::from_str("\"QQVGA\"").unwrap();
        assert_eq!(parsed, FrameSize::Qqvga);
        assert!(serde_json::from_str::<FrameSize>("\"HD\"").is_err());
    }
}
