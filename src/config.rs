use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::validate_source_uri;
use crate::lifecycle::RetryDelays;
use crate::sensor::{FrameSize, SensorConfig};
use crate::transfer::{AckPolicy, TransferSettings};
use crate::transport::{BrokerEndpoint, MqttSettings, TlsFiles};

const DEFAULT_BROKER: &str = "mqtt://localhost:1883";
const DEFAULT_CLIENT_ID: &str = "frame-relay";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_SOURCE: &str = "stub://sensor";

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    mqtt: Option<MqttConfigFile>,
    transfer: Option<TransferConfigFile>,
    retry: Option<RetryConfigFile>,
    sensor: Option<SensorConfigFile>,
    source: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    keep_alive_secs: Option<u64>,
    use_tls: Option<bool>,
    tls_ca_path: Option<PathBuf>,
    tls_client_cert_path: Option<PathBuf>,
    tls_client_key_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct TransferConfigFile {
    chunk_size: Option<usize>,
    ack_policy: Option<AckPolicy>,
    frame_interval_ms: Option<u64>,
    capture_retry_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RetryConfigFile {
    link_ms: Option<u64>,
    session_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SensorConfigFile {
    quality: Option<u8>,
    frame_size: Option<FrameSize>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub mqtt: MqttConfig,
    pub transfer: TransferSettings,
    pub retry: RetryDelays,
    pub sensor: SensorConfig,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub use_tls: bool,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_client_cert_path: Option<PathBuf>,
    pub tls_client_key_path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        // An empty file section set always converts.
        Self::from_file(RelayConfigFile::default())
    }
}

impl RelayConfig {
    /// Load from `FRAME_RELAY_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FRAME_RELAY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit config file in place of `FRAME_RELAY_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Self {
        let mqtt_file = file.mqtt.unwrap_or_default();
        let mqtt = MqttConfig {
            broker: mqtt_file
                .broker
                .unwrap_or_else(|| DEFAULT_BROKER.to_string()),
            client_id: mqtt_file
                .client_id
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            username: mqtt_file.username,
            password: mqtt_file.password,
            keep_alive: Duration::from_secs(
                mqtt_file.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
            ),
            use_tls: mqtt_file.use_tls.unwrap_or(false),
            tls_ca_path: mqtt_file.tls_ca_path,
            tls_client_cert_path: mqtt_file.tls_client_cert_path,
            tls_client_key_path: mqtt_file.tls_client_key_path,
        };

        let defaults = TransferSettings::default();
        let transfer_file = file.transfer.unwrap_or_default();
        let transfer = TransferSettings {
            chunk_size: transfer_file.chunk_size.unwrap_or(defaults.chunk_size),
            ack_policy: transfer_file.ack_policy.unwrap_or(defaults.ack_policy),
            frame_interval: transfer_file
                .frame_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.frame_interval),
            capture_retry_delay: transfer_file
                .capture_retry_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.capture_retry_delay),
        };

        let default_retry = RetryDelays::default();
        let retry = file
            .retry
            .map(|retry| RetryDelays {
                link: retry
                    .link_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default_retry.link),
                session: retry
                    .session_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default_retry.session),
            })
            .unwrap_or(default_retry);

        let default_sensor = SensorConfig::default();
        let sensor = file
            .sensor
            .map(|sensor| SensorConfig {
                quality: sensor.quality.unwrap_or(default_sensor.quality),
                frame_size: sensor.frame_size.unwrap_or(default_sensor.frame_size),
            })
            .unwrap_or(default_sensor);

        Self {
            mqtt,
            transfer,
            retry,
            sensor,
            source: file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(broker) = std::env::var("FRAME_RELAY_BROKER") {
            if !broker.trim().is_empty() {
                self.mqtt.broker = broker;
            }
        }
        if let Ok(client_id) = std::env::var("FRAME_RELAY_CLIENT_ID") {
            if !client_id.trim().is_empty() {
                self.mqtt.client_id = client_id;
            }
        }
        if let Ok(source) = std::env::var("FRAME_RELAY_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source;
            }
        }
        if let Ok(chunk_size) = std::env::var("FRAME_RELAY_CHUNK_SIZE") {
            self.transfer.chunk_size = chunk_size.trim().parse().map_err(|_| {
                anyhow!("FRAME_RELAY_CHUNK_SIZE must be an integer number of bytes")
            })?;
        }
        if let Ok(policy) = std::env::var("FRAME_RELAY_ACK_POLICY") {
            self.transfer.ack_policy = policy.parse()?;
        }
        if let Ok(user) = std::env::var("MQTT_USERNAME") {
            if !user.trim().is_empty() {
                self.mqtt.username = Some(user);
            }
        }
        if let Ok(pass) = std::env::var("MQTT_PASSWORD") {
            self.mqtt.password = Some(pass);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0 {
            return Err(anyhow!("chunk_size must be greater than zero"));
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(anyhow!("MQTT client_id must not be empty"));
        }
        for (name, delay) in [
            ("transfer.frame_interval_ms", self.transfer.frame_interval),
            ("transfer.capture_retry_ms", self.transfer.capture_retry_delay),
            ("retry.link_ms", self.retry.link),
            ("retry.session_ms", self.retry.session),
        ] {
            if delay.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        self.sensor.validate()?;
        self.endpoint()?;
        validate_source_uri(&self.source)?;
        Ok(())
    }

    pub fn endpoint(&self) -> Result<BrokerEndpoint> {
        BrokerEndpoint::parse(&self.mqtt.broker, self.mqtt.use_tls)
    }

    pub fn tls_files(&self) -> TlsFiles {
        TlsFiles {
            ca: self.mqtt.tls_ca_path.clone(),
            client_cert: self.mqtt.tls_client_cert_path.clone(),
            client_key: self.mqtt.tls_client_key_path.clone(),
        }
    }

    /// Resolve the endpoint and read TLS materials from disk.
    pub fn mqtt_settings(&self) -> Result<MqttSettings> {
        let tls = self.tls_files().read()?;
        Ok(MqttSettings {
            endpoint: self.endpoint()?,
            client_id: self.mqtt.client_id.clone(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            keep_alive: self.mqtt.keep_alive,
            tls,
        })
    }
}

/// TOML when the extension is `.toml`, JSON otherwise.
fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
