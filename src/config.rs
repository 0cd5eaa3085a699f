use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::artifact::DEFAULT_JPEG_QUALITY;
use crate::frame::{CANONICAL_HEIGHT, CANONICAL_WIDTH};
use crate::ingest::mqtt::DEFAULT_FRAME_TOPIC;
use crate::pipeline::dispatcher::{
    DispatcherConfig, DEFAULT_MIN_CONFIDENCE, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS,
};
use crate::transport::{random_client_id, MqttSettings, TlsMaterials};
use crate::vision::VisionClientConfig;

const DEFAULT_MQTT_BROKER: &str = "127.0.0.1:1883";
const DEFAULT_MQTT_CLIENT_ID: &str = "facegate";
const DEFAULT_MQTT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_VISION_URL: &str = "http://127.0.0.1:80/v1/";
const DEFAULT_VISION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_POLL_MS: u64 = 10;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 3_000;
const DEFAULT_ACTUATOR_RETRIES: u32 = 1;
const DEFAULT_ACTUATOR_TOPIC: &str = "home/door/led";
const DEFAULT_ENGAGE_PAYLOAD: &str = "on";
const DEFAULT_DISENGAGE_PAYLOAD: &str = "off";
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_AUDIT_CSV: &str = "recognition_logs.csv";
const DEFAULT_LATEST_FRAME: &str = "latest_frame.jpg";
const DEFAULT_DISPLAY_INTERVAL_MS: u64 = 100;
const DEFAULT_REPLAY_FPS: u32 = 5;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FacegateConfigFile {
    mqtt: Option<MqttConfigFile>,
    vision: Option<VisionConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    actuator: Option<ActuatorConfigFile>,
    audit: Option<AuditConfigFile>,
    artifacts: Option<ArtifactConfigFile>,
    replay: Option<ReplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MqttConfigFile {
    broker: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    tls: Option<bool>,
    ca_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
    keep_alive_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct VisionConfigFile {
    url: Option<String>,
    timeout_ms: Option<u64>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    width: Option<u32>,
    height: Option<u32>,
    poll_ms: Option<u64>,
    jpeg_quality: Option<u8>,
    shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ActuatorConfigFile {
    kind: Option<String>,
    retries: Option<u32>,
    topic: Option<String>,
    engage_payload: Option<String>,
    disengage_payload: Option<String>,
    retain: Option<bool>,
    engage_command: Option<Vec<String>>,
    disengage_command: Option<Vec<String>>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AuditConfigFile {
    csv_path: Option<PathBuf>,
    db_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ArtifactConfigFile {
    latest_frame: Option<PathBuf>,
    preview: Option<PathBuf>,
    display_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ReplayConfigFile {
    dir: Option<PathBuf>,
    fps: Option<u32>,
    looped: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct FacegateConfig {
    pub mqtt: MqttConfig,
    pub vision: VisionSettings,
    pub pipeline: PipelineSettings,
    pub actuator: ActuatorSettings,
    pub audit: AuditSettings,
    pub artifacts: ArtifactSettings,
    /// Replay frames from a directory instead of subscribing to MQTT.
    pub replay: Option<ReplaySettings>,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub ca_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    pub keep_alive: Duration,
}

#[derive(Debug, Clone)]
pub struct VisionSettings {
    pub url: String,
    pub timeout: Duration,
    pub min_confidence: f32,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub width: u32,
    pub height: u32,
    pub poll_interval: Duration,
    pub jpeg_quality: u8,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorKind {
    None,
    Mqtt,
    Command,
}

impl FromStr for ActuatorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "dry-run" | "dry_run" => Ok(Self::None),
            "mqtt" => Ok(Self::Mqtt),
            "command" | "ssh" => Ok(Self::Command),
            other => Err(anyhow!(
                "unknown actuator kind '{}'; expected none, mqtt or command",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActuatorSettings {
    pub kind: ActuatorKind,
    pub retries: u32,
    pub topic: String,
    pub engage_payload: String,
    pub disengage_payload: String,
    pub retain: bool,
    pub engage_command: Vec<String>,
    pub disengage_command: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AuditSettings {
    pub csv_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    pub latest_frame: Option<PathBuf>,
    pub preview: Option<PathBuf>,
    pub display_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ReplaySettings {
    pub dir: PathBuf,
    pub fps: u32,
    pub looped: bool,
}

impl FacegateConfig {
    /// File named by `FACEGATE_CONFIG` (if any), then environment overrides,
    /// then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FACEGATE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FacegateConfigFile) -> Result<Self> {
        let mqtt = file.mqtt.unwrap_or_default();
        let vision = file.vision.unwrap_or_default();
        let pipeline = file.pipeline.unwrap_or_default();
        let actuator = file.actuator.unwrap_or_default();
        let audit = file.audit.unwrap_or_default();
        let artifacts = file.artifacts.unwrap_or_default();
        let actuator_kind = match actuator.kind.as_deref() {
            Some(kind) => kind.parse()?,
            None => ActuatorKind::None,
        };

        Ok(Self {
            mqtt: MqttConfig {
                broker: mqtt
                    .broker
                    .unwrap_or_else(|| DEFAULT_MQTT_BROKER.to_string()),
                topic: mqtt
                    .topic
                    .unwrap_or_else(|| DEFAULT_FRAME_TOPIC.to_string()),
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| random_client_id(DEFAULT_MQTT_CLIENT_ID)),
                username: mqtt.username,
                password: mqtt.password,
                tls: mqtt.tls.unwrap_or(false),
                ca_path: mqtt.ca_path,
                client_cert_path: mqtt.client_cert_path,
                client_key_path: mqtt.client_key_path,
                keep_alive: Duration::from_secs(
                    mqtt.keep_alive_secs.unwrap_or(DEFAULT_MQTT_KEEP_ALIVE_SECS),
                ),
            },
            vision: VisionSettings {
                url: vision.url.unwrap_or_else(|| DEFAULT_VISION_URL.to_string()),
                timeout: Duration::from_millis(
                    vision.timeout_ms.unwrap_or(DEFAULT_VISION_TIMEOUT_MS),
                ),
                min_confidence: vision.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
            },
            pipeline: PipelineSettings {
                workers: pipeline.workers.unwrap_or(DEFAULT_WORKERS),
                queue_capacity: pipeline.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
                width: pipeline.width.unwrap_or(CANONICAL_WIDTH),
                height: pipeline.height.unwrap_or(CANONICAL_HEIGHT),
                poll_interval: Duration::from_millis(pipeline.poll_ms.unwrap_or(DEFAULT_POLL_MS)),
                jpeg_quality: pipeline.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                shutdown_grace: Duration::from_millis(
                    pipeline
                        .shutdown_grace_ms
                        .unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS),
                ),
            },
            actuator: ActuatorSettings {
                kind: actuator_kind,
                retries: actuator.retries.unwrap_or(DEFAULT_ACTUATOR_RETRIES),
                topic: actuator
                    .topic
                    .unwrap_or_else(|| DEFAULT_ACTUATOR_TOPIC.to_string()),
                engage_payload: actuator
                    .engage_payload
                    .unwrap_or_else(|| DEFAULT_ENGAGE_PAYLOAD.to_string()),
                disengage_payload: actuator
                    .disengage_payload
                    .unwrap_or_else(|| DEFAULT_DISENGAGE_PAYLOAD.to_string()),
                retain: actuator.retain.unwrap_or(true),
                engage_command: actuator.engage_command.unwrap_or_default(),
                disengage_command: actuator.disengage_command.unwrap_or_default(),
                timeout: Duration::from_millis(
                    actuator.timeout_ms.unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS),
                ),
            },
            audit: AuditSettings {
                csv_path: Some(
                    audit
                        .csv_path
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIT_CSV)),
                ),
                db_path: audit.db_path,
            },
            artifacts: ArtifactSettings {
                latest_frame: Some(
                    artifacts
                        .latest_frame
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_LATEST_FRAME)),
                ),
                preview: artifacts.preview,
                display_interval: Duration::from_millis(
                    artifacts
                        .display_interval_ms
                        .unwrap_or(DEFAULT_DISPLAY_INTERVAL_MS),
                ),
            },
            replay: file.replay.and_then(|replay| {
                replay.dir.map(|dir| ReplaySettings {
                    dir,
                    fps: replay.fps.unwrap_or(DEFAULT_REPLAY_FPS),
                    looped: replay.looped.unwrap_or(false),
                })
            }),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(broker) = env_nonempty("FACEGATE_MQTT_BROKER") {
            self.mqtt.broker = broker;
        }
        if let Some(topic) = env_nonempty("FACEGATE_MQTT_TOPIC") {
            self.mqtt.topic = topic;
        }
        if let Some(username) = env_nonempty("FACEGATE_MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var("FACEGATE_MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some(url) = env_nonempty("FACEGATE_VISION_URL") {
            self.vision.url = url;
        }
        if let Some(value) = env_nonempty("FACEGATE_MIN_CONFIDENCE") {
            self.vision.min_confidence = value
                .parse()
                .map_err(|_| anyhow!("FACEGATE_MIN_CONFIDENCE must be a number"))?;
        }
        if let Some(value) = env_nonempty("FACEGATE_WORKERS") {
            self.pipeline.workers = value
                .parse()
                .map_err(|_| anyhow!("FACEGATE_WORKERS must be a positive integer"))?;
        }
        if let Some(kind) = env_nonempty("FACEGATE_ACTUATOR") {
            self.actuator.kind = kind.parse()?;
        }
        if let Some(path) = env_nonempty("FACEGATE_AUDIT_CSV") {
            self.audit.csv_path = disabled_or_path(&path);
        }
        if let Some(path) = env_nonempty("FACEGATE_AUDIT_DB") {
            self.audit.db_path = disabled_or_path(&path);
        }
        if let Some(dir) = env_nonempty("FACEGATE_REPLAY_DIR") {
            let replay = self.replay.get_or_insert_with(|| ReplaySettings {
                dir: PathBuf::new(),
                fps: DEFAULT_REPLAY_FPS,
                looped: false,
            });
            replay.dir = PathBuf::from(dir);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.vision.min_confidence) {
            return Err(anyhow!(
                "min_confidence must be between 0 and 1, got {}",
                self.vision.min_confidence
            ));
        }
        if self.pipeline.workers == 0 {
            return Err(anyhow!("pipeline workers must be greater than zero"));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(anyhow!("pipeline queue capacity must be greater than zero"));
        }
        if self.pipeline.width == 0 || self.pipeline.height == 0 {
            return Err(anyhow!("frame width and height must be greater than zero"));
        }
        if self.pipeline.poll_interval.is_zero() {
            return Err(anyhow!("pipeline poll interval must be greater than zero"));
        }
        if self.vision.timeout.is_zero() {
            return Err(anyhow!("vision timeout must be greater than zero"));
        }
        if self.mqtt.topic.trim().is_empty() {
            return Err(anyhow!("mqtt topic must not be empty"));
        }
        crate::transport::parse_mqtt_endpoint(&self.mqtt.broker, self.mqtt.tls)
            .context("mqtt broker")?;
        match self.actuator.kind {
            ActuatorKind::Command => {
                if self.actuator.engage_command.is_empty()
                    || self.actuator.disengage_command.is_empty()
                {
                    return Err(anyhow!(
                        "command actuator requires engage_command and disengage_command"
                    ));
                }
            }
            ActuatorKind::Mqtt => {
                if self.actuator.topic.trim().is_empty() {
                    return Err(anyhow!("mqtt actuator requires a topic"));
                }
            }
            ActuatorKind::None => {}
        }
        if let Some(replay) = &self.replay {
            if replay.fps == 0 {
                return Err(anyhow!("replay fps must be greater than zero"));
            }
        }
        Ok(())
    }
}

impl MqttConfig {
    /// Connection settings with TLS material loaded from disk.
    pub fn settings(&self) -> Result<MqttSettings> {
        let tls = TlsMaterials::load(
            self.ca_path.as_deref(),
            self.client_cert_path.as_deref(),
            self.client_key_path.as_deref(),
        )?;
        Ok(MqttSettings {
            broker: self.broker.clone(),
            force_tls: self.tls,
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            tls,
            keep_alive: self.keep_alive,
        })
    }
}

impl VisionSettings {
    pub fn client_config(&self) -> VisionClientConfig {
        VisionClientConfig {
            base_url: self.url.clone(),
            timeout: self.timeout,
        }
    }
}

impl PipelineSettings {
    pub fn dispatcher_config(&self, min_confidence: f32) -> DispatcherConfig {
        DispatcherConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            min_confidence,
        }
    }
}

fn read_config_file(path: &Path) -> Result<FacegateConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

// "off" / "none" disables an optional output path.
fn disabled_or_path(value: &str) -> Option<PathBuf> {
    match value.trim() {
        "off" | "none" => None,
        path => Some(PathBuf::from(path)),
    }
}
