use std::sync::Mutex;
use std::time::Duration;

use frame_relay::{AckPolicy, FrameSize, RelayConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FRAME_RELAY_CONFIG",
        "FRAME_RELAY_BROKER",
        "FRAME_RELAY_CLIENT_ID",
        "FRAME_RELAY_SOURCE",
        "FRAME_RELAY_CHUNK_SIZE",
        "FRAME_RELAY_ACK_POLICY",
        "MQTT_USERNAME",
        "MQTT_PASSWORD",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_toml_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
source = "stub://bench"

[mqtt]
broker = "mqtts://broker.local:8883"
client_id = "cam-7"
keep_alive_secs = 30

[transfer]
chunk_size = 2048
ack_policy = "tracked"
frame_interval_ms = 500

[retry]
link_ms = 1500

[sensor]
quality = 12
frame_size = "VGA"
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("FRAME_RELAY_CONFIG", file.path());
    std::env::set_var("FRAME_RELAY_CHUNK_SIZE", "1024");
    std::env::set_var("MQTT_USERNAME", "mqtt_admin");

    let cfg = RelayConfig::load().expect("load config");

    assert_eq!(cfg.source, "stub://bench");
    assert_eq!(cfg.mqtt.client_id, "cam-7");
    assert_eq!(cfg.mqtt.keep_alive, Duration::from_secs(30));
    assert_eq!(cfg.mqtt.username.as_deref(), Some("mqtt_admin"));
    let endpoint = cfg.endpoint().expect("endpoint");
    assert_eq!(endpoint.host, "broker.local");
    assert_eq!(endpoint.port, 8883);
    assert!(endpoint.use_tls);
    assert_eq!(cfg.transfer.chunk_size, 1024);
    assert_eq!(cfg.transfer.ack_policy, AckPolicy::Tracked);
    assert_eq!(cfg.transfer.frame_interval, Duration::from_millis(500));
    assert_eq!(cfg.transfer.capture_retry_delay, Duration::from_secs(2));
    assert_eq!(cfg.retry.link, Duration::from_millis(1500));
    assert_eq!(cfg.retry.session, Duration::from_secs(2));
    assert_eq!(cfg.sensor.quality, 12);
    assert_eq!(cfg.sensor.frame_size, FrameSize::Vga);

    clear_env();
}

#[test]
fn loads_json_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    let json = r#"{
        "mqtt": { "broker": "10.0.0.5:1884" },
        "sensor": { "frame_size": "FRAMESIZE_QVGA" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    let cfg = RelayConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.endpoint().unwrap().port, 1884);
    assert_eq!(cfg.sensor.frame_size, FrameSize::Qvga);
    assert_eq!(cfg.sensor.quality, 4);
    assert_eq!(cfg.transfer.chunk_size, 4096);
    assert_eq!(cfg.source, "stub://sensor");
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FRAME_RELAY_CHUNK_SIZE", "0");
    assert!(RelayConfig::load().is_err());
    clear_env();

    std::env::set_var("FRAME_RELAY_ACK_POLICY", "whenever");
    assert!(RelayConfig::load().is_err());
    clear_env();

    std::env::set_var("FRAME_RELAY_SOURCE", "rtsp://camera");
    assert!(RelayConfig::load().is_err());
    clear_env();

    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "sensor": { "quality": 64 } }"#)
        .expect("write config");
    assert!(RelayConfig::load_from(Some(file.path())).is_err());
}

#[test]
fn rejects_zero_retry_delays() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for (section, key) in [
        ("transfer", "capture_retry_ms"),
        ("transfer", "frame_interval_ms"),
        ("retry", "link_ms"),
        ("retry", "session_ms"),
    ] {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp config");
        let toml = format!("[{}]\n{} = 0\n", section, key);
        std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

        let err = RelayConfig::load_from(Some(file.path())).expect_err(key);
        assert!(err.to_string().contains(key), "{}: {}", key, err);
    }

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, b"[transfer]\ncapture_retry_ms = 1\n")
        .expect("write config");
    let cfg = RelayConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.transfer.capture_retry_delay, Duration::from_millis(1));
}
