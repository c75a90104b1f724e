//! config_publish - send sensor settings to a running relay.
//!
//! Publishes `key=value` messages (`quality=10`, `frame_size=VGA`) to
//! `esp32-cam/config` at QoS 1 and waits for the broker to acknowledge each one.
//! Settings come from the command line, or from stdin one per line when none are
//! given (`exit` or end of input stops).

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use frame_relay::event::EventReceiver;
use frame_relay::transport::{BrokerEndpoint, TlsFiles};
use frame_relay::{
    ConfigOutcome, MqttSettings, MqttTransport, PublishId, QoS, RelayEvent, SensorConfig,
    Transport, CONFIG_TOPIC,
};

#[path = "../ui.rs"]
mod ui;

const ACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish key=value sensor settings to a frame relay")]
struct Args {
    /// Settings to publish, e.g. quality=10 frame_size=VGA.
    settings: Vec<String>,

    /// MQTT broker address.
    #[arg(long, env = "FRAME_RELAY_BROKER", default_value = "mqtt://localhost:1883")]
    broker: String,

    /// MQTT client identifier.
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "frame-relay-config")]
    client_id: String,

    /// MQTT username for authentication.
    #[arg(long, env = "MQTT_USERNAME")]
    username: Option<String>,

    /// MQTT password for authentication.
    #[arg(long, env = "MQTT_PASSWORD")]
    password: Option<String>,

    /// Enable TLS for MQTT (implied by mqtts:// brokers).
    #[arg(long, env = "MQTT_USE_TLS")]
    use_tls: bool,

    /// Path to a PEM-encoded CA certificate to trust for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    tls_ca_path: Option<PathBuf>,

    /// Path to a PEM-encoded client certificate for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_CERT_PATH")]
    tls_client_cert_path: Option<PathBuf>,

    /// Path to a PEM-encoded client private key for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_KEY_PATH")]
    tls_client_key_path: Option<PathBuf>,

    /// Publish settings the relay would ignore instead of refusing them.
    #[arg(long)]
    force: bool,

    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto, value_name = "MODE")]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::detect(args.ui);

    for setting in &args.settings {
        check_setting(setting, args.force)?;
    }

    let settings = MqttSettings {
        endpoint: BrokerEndpoint::parse(&args.broker, args.use_tls)?,
        client_id: args.client_id.clone(),
        username: args.username.clone(),
        password: args.password.clone(),
        keep_alive: Duration::from_secs(60),
        tls: TlsFiles {
            ca: args.tls_ca_path.clone(),
            client_cert: args.tls_client_cert_path.clone(),
            client_key: args.tls_client_key_path.clone(),
        }
        .read()?,
    };

    let (tx, rx) = frame_relay::event::channel();
    let mut transport = {
        let mut stage = ui.stage("Connect to MQTT broker");
        stage.set_detail(settings.endpoint.authority());
        let mut transport = MqttTransport::start(&settings, tx)?;
        transport.connect()?;
        wait_for_session(&rx)?;
        stage.done();
        transport
    };

    if args.settings.is_empty() {
        eprintln!("Type settings like quality=10 or frame_size=VGA; 'exit' to quit.");
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = line?;
            let setting = line.trim();
            if setting.is_empty() {
                continue;
            }
            if setting.eq_ignore_ascii_case("exit") {
                break;
            }
            if let Err(e) = check_setting(setting, args.force) {
                eprintln!("{}", e);
                continue;
            }
            publish_setting(&mut transport, &rx, setting)?;
        }
    } else {
        let stage = ui.stage("Publish settings");
        for setting in &args.settings {
            publish_setting(&mut transport, &rx, setting)?;
        }
        stage.done();
    }

    transport.shutdown()
}

/// Refuse anything the relay would ignore, unless forced.
fn check_setting(setting: &str, force: bool) -> Result<()> {
    if !setting.contains('=') {
        return Err(anyhow!("invalid setting '{}': use key=value", setting));
    }
    let mut probe = SensorConfig::default();
    if let ConfigOutcome::Ignored(reason) = probe.apply_message(setting.as_bytes()) {
        if force {
            log::warn!("publishing '{}' anyway: {}", setting, reason);
            return Ok(());
        }
        return Err(anyhow!(
            "relay would ignore '{}': {} (use --force to send it anyway)",
            setting,
            reason
        ));
    }
    Ok(())
}

fn publish_setting(
    transport: &mut MqttTransport,
    rx: &EventReceiver,
    setting: &str,
) -> Result<()> {
    let id = transport.publish(CONFIG_TOPIC, QoS::AtLeastOnce, setting.as_bytes())?;
    wait_for_ack(rx, id)?;
    log::info!("published {} -> {}", setting, CONFIG_TOPIC);
    Ok(())
}

fn wait_for_session(rx: &EventReceiver) -> Result<()> {
    let deadline = Instant::now() + ACK_TIMEOUT;
    loop {
        match next_event(rx, deadline)? {
            RelayEvent::SessionUp => return Ok(()),
            RelayEvent::SessionDown { reason } => {
                return Err(anyhow!("MQTT connection failed: {}", reason))
            }
            _ => {}
        }
    }
}

fn wait_for_ack(rx: &EventReceiver, id: PublishId) -> Result<()> {
    let deadline = Instant::now() + ACK_TIMEOUT;
    loop {
        match next_event(rx, deadline)? {
            RelayEvent::PublishAcked(acked) if acked == id => return Ok(()),
            RelayEvent::SessionDown { reason } => {
                return Err(anyhow!("MQTT session lost before ack: {}", reason))
            }
            _ => {}
        }
    }
}

fn next_event(rx: &EventReceiver, deadline: Instant) -> Result<RelayEvent> {
    let timeout = deadline.saturating_duration_since(Instant::now());
    rx.recv_timeout(timeout)
        .map_err(|_| anyhow!("timed out waiting for the MQTT broker"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_are_checked_like_the_relay_does() {
        assert!(check_setting("quality=10", false).is_ok());
        assert!(check_setting("frame_size=FRAMESIZE_VGA", false).is_ok());
        assert!(check_setting("quality", false).is_err());
        assert!(check_setting("quality=99", false).is_err());
        assert!(check_setting("quality=99", true).is_ok());
        assert!(check_setting("quality", true).is_err());
    }
}
