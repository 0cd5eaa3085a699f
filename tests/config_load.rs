use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use facegate::config::{ActuatorKind, FacegateConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FACEGATE_CONFIG",
        "FACEGATE_MQTT_BROKER",
        "FACEGATE_MQTT_TOPIC",
        "FACEGATE_MQTT_USERNAME",
        "FACEGATE_MQTT_PASSWORD",
        "FACEGATE_VISION_URL",
        "FACEGATE_MIN_CONFIDENCE",
        "FACEGATE_WORKERS",
        "FACEGATE_ACTUATOR",
        "FACEGATE_AUDIT_CSV",
        "FACEGATE_AUDIT_DB",
        "FACEGATE_REPLAY_DIR",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, body: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, body.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = FacegateConfig::load().expect("load defaults");

    assert_eq!(cfg.mqtt.broker, "127.0.0.1:1883");
    assert_eq!(cfg.mqtt.topic, "home/server");
    assert!(cfg.mqtt.client_id.starts_with("facegate-"));
    assert_eq!(cfg.vision.url, "http://127.0.0.1:80/v1/");
    assert!((cfg.vision.min_confidence - 0.6).abs() < f32::EPSILON);
    assert_eq!(cfg.pipeline.workers, 5);
    assert_eq!((cfg.pipeline.width, cfg.pipeline.height), (640, 480));
    assert_eq!(cfg.pipeline.shutdown_grace, Duration::from_secs(3));
    assert_eq!(cfg.actuator.kind, ActuatorKind::None);
    assert_eq!(
        cfg.audit.csv_path,
        Some(PathBuf::from("recognition_logs.csv"))
    );
    assert!(cfg.audit.db_path.is_none());
    assert_eq!(
        cfg.artifacts.latest_frame,
        Some(PathBuf::from("latest_frame.jpg"))
    );
    assert!(cfg.replay.is_none());

    clear_env();
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "mqtt": {
                "broker": "mqtts://broker.lan:8883",
                "topic": "camera/front",
                "client_id": "gate-1"
            },
            "vision": {
                "url": "http://vision.lan:5000/v1/",
                "min_confidence": 0.75
            },
            "pipeline": {
                "workers": 3,
                "queue_capacity": 8
            },
            "actuator": {
                "kind": "command",
                "engage_command": ["ssh", "pi@door", "led on"],
                "disengage_command": ["ssh", "pi@door", "led off"],
                "retries": 2
            },
            "audit": {
                "db_path": "audit.db"
            }
        }"#,
    );

    std::env::set_var("FACEGATE_CONFIG", file.path());
    std::env::set_var("FACEGATE_MQTT_TOPIC", "camera/back");
    std::env::set_var("FACEGATE_WORKERS", "7");
    std::env::set_var("FACEGATE_AUDIT_CSV", "off");

    let cfg = FacegateConfig::load().expect("load config");

    assert_eq!(cfg.mqtt.broker, "mqtts://broker.lan:8883");
    assert_eq!(cfg.mqtt.topic, "camera/back");
    assert_eq!(cfg.mqtt.client_id, "gate-1");
    assert_eq!(cfg.vision.url, "http://vision.lan:5000/v1/");
    assert!((cfg.vision.min_confidence - 0.75).abs() < f32::EPSILON);
    assert_eq!(cfg.pipeline.workers, 7);
    assert_eq!(cfg.pipeline.queue_capacity, 8);
    assert_eq!(cfg.actuator.kind, ActuatorKind::Command);
    assert_eq!(cfg.actuator.retries, 2);
    assert_eq!(cfg.actuator.engage_command.len(), 3);
    assert!(cfg.audit.csv_path.is_none());
    assert_eq!(cfg.audit.db_path, Some(PathBuf::from("audit.db")));

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".toml",
        r#"
[mqtt]
broker = "10.0.0.2:1883"

[actuator]
kind = "mqtt"
topic = "home/door/lock"
retain = false

[replay]
dir = "/srv/frames"
fps = 2
looped = true
"#,
    );
    std::env::set_var("FACEGATE_CONFIG", file.path());

    let cfg = FacegateConfig::load().expect("load toml config");

    assert_eq!(cfg.mqtt.broker, "10.0.0.2:1883");
    assert_eq!(cfg.actuator.kind, ActuatorKind::Mqtt);
    assert_eq!(cfg.actuator.topic, "home/door/lock");
    assert!(!cfg.actuator.retain);
    let replay = cfg.replay.expect("replay settings");
    assert_eq!(replay.dir, PathBuf::from("/srv/frames"));
    assert_eq!(replay.fps, 2);
    assert!(replay.looped);

    clear_env();
}

#[test]
fn unknown_fields_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(".json", r#"{ "pipeline": { "wokers": 3 } }"#);
    std::env::set_var("FACEGATE_CONFIG", file.path());

    assert!(FacegateConfig::load().is_err());

    clear_env();
}

#[test]
fn invalid_values_fail_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FACEGATE_MIN_CONFIDENCE", "1.5");
    assert!(FacegateConfig::load().is_err());
    clear_env();

    std::env::set_var("FACEGATE_WORKERS", "0");
    assert!(FacegateConfig::load().is_err());
    clear_env();

    std::env::set_var("FACEGATE_ACTUATOR", "command");
    let err = FacegateConfig::load().unwrap_err();
    assert!(err.to_string().contains("engage_command"));
    clear_env();

    std::env::set_var("FACEGATE_ACTUATOR", "relay");
    assert!(FacegateConfig::load().is_err());
    clear_env();

    std::env::set_var("FACEGATE_MQTT_BROKER", "mqtt://:1883");
    assert!(FacegateConfig::load().is_err());
    clear_env();
}
