//! relayd - chunked camera frame relay daemon
//!
//! This daemon:
//! 1. Loads configuration (file, environment, flags)
//! 2. Opens the capture source and applies the sensor configuration
//! 3. Probes the broker link and opens the MQTT session
//! 4. Streams one frame at a time as `esp32-cam/jpeg/{frame_id}/{chunk}/{total}` chunks
//! 5. Applies `key=value` messages from `esp32-cam/config` to subsequent captures
//!
//! `--dry-run` swaps the broker for an in-memory loopback so the whole relay can be
//! exercised without a network.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use frame_relay::{
    CaptureSource, ConfiguredSource, Dispatcher, EventReceiver, Link, LoopbackLink,
    MemoryTransport, MqttTransport, ProbeLink, RelayConfig, RelayEvent, Transport,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay camera frames to MQTT in chunks")]
struct Args {
    /// Config file (TOML when it ends in .toml, JSON otherwise).
    #[arg(long, env = "FRAME_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// MQTT broker address (overrides config and FRAME_RELAY_BROKER).
    #[arg(long)]
    broker: Option<String>,

    /// Capture source: stub://name, dir:///path or http://camera/capture.
    #[arg(long)]
    source: Option<String>,

    /// Publish into an in-memory loopback instead of a broker.
    #[arg(long)]
    dry_run: bool,

    /// Seconds between health log lines.
    #[arg(long, env = "FRAME_RELAY_HEALTH_SECS", default_value_t = 60)]
    health_interval_secs: u64,

    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto, value_name = "MODE")]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::detect(args.ui);

    let cfg = {
        let stage = ui.stage("Load configuration");
        let mut cfg = RelayConfig::load_from(args.config.as_deref())?;
        if let Some(broker) = &args.broker {
            cfg.mqtt.broker = broker.clone();
        }
        if let Some(source) = &args.source {
            cfg.source = source.clone();
        }
        cfg.validate()?;
        stage.done();
        cfg
    };

    let capture = {
        let mut stage = ui.stage("Open capture source");
        stage.set_detail(cfg.source.clone());
        let capture = ConfiguredSource::open(&cfg.source, &cfg.sensor)?;
        stage.done();
        capture
    };

    let (tx, rx) = frame_relay::event::channel();
    let shutdown_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(RelayEvent::Shutdown);
    })
    .context("error setting Ctrl-C handler")?;

    let health_interval = Duration::from_secs(args.health_interval_secs.max(1));
    let now = Instant::now();

    if args.dry_run {
        log::warn!("dry run: chunks go to an in-memory loopback, not a broker");
        let transport = MemoryTransport::with_loopback(tx.clone());
        let link = LoopbackLink::new(tx);
        let dispatcher = Dispatcher::new(
            capture,
            transport,
            link,
            cfg.sensor,
            cfg.transfer.clone(),
            cfg.retry,
            now,
        );
        return run(dispatcher, rx, health_interval);
    }

    let (transport, link) = {
        let mut stage = ui.stage("Start MQTT transport");
        let settings = cfg.mqtt_settings()?;
        stage.set_detail(settings.endpoint.authority());
        let link = ProbeLink::new(settings.endpoint.authority(), tx.clone());
        let transport = MqttTransport::start(&settings, tx)?;
        stage.done();
        (transport, link)
    };
    log::info!(
        "relaying as {} (chunk size {} bytes, ack policy {})",
        cfg.mqtt.client_id,
        cfg.transfer.chunk_size,
        cfg.transfer.ack_policy
    );
    let dispatcher = Dispatcher::new(
        capture,
        transport,
        link,
        cfg.sensor,
        cfg.transfer.clone(),
        cfg.retry,
        now,
    );
    run(dispatcher, rx, health_interval)
}

fn run<C, T, L>(
    mut dispatcher: Dispatcher<C, T, L>,
    rx: EventReceiver,
    health_interval: Duration,
) -> Result<()>
where
    C: CaptureSource,
    T: Transport,
    L: Link,
{
    let mut next_health = Instant::now() + health_interval;
    dispatcher.boot(Instant::now());

    while dispatcher.is_running() {
        let wait_until = dispatcher
            .next_deadline()
            .map_or(next_health, |deadline| deadline.min(next_health));
        match rx.recv_timeout(wait_until.saturating_duration_since(Instant::now())) {
            Ok(event) => {
                dispatcher.dispatch(event, Instant::now());
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("event channel closed, stopping");
                dispatcher.dispatch(RelayEvent::Shutdown, Instant::now());
            }
        }

        let now = Instant::now();
        dispatcher.fire_due(now);
        if now >= next_health {
            log::info!("health: {}", dispatcher.health());
            next_health = now + health_interval;
        }
    }

    log::info!("relay stopped: {}", dispatcher.health());
    Ok(())
}
