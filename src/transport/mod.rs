//! MQTT connection plumbing shared by frame ingest and the MQTT actuator.

mod tls;

pub use tls::{parse_mqtt_endpoint, MqttEndpoint, TlsMaterials};

use anyhow::Result;
use rand::RngCore;
use rumqttc::{Client, Connection, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Wait before reconnecting after a broker connection error.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Base64 JPEG frames are far larger than the rumqttc default packet limit.
const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub broker: String,
    pub force_tls: bool,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: TlsMaterials,
    pub keep_alive: Duration,
}

impl MqttSettings {
    pub fn endpoint(&self) -> Result<MqttEndpoint> {
        parse_mqtt_endpoint(&self.broker, self.force_tls)
    }

    /// Same broker, different client id.
    pub fn with_client_id(&self, client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..self.clone()
        }
    }
}

/// `<prefix>-<8 hex chars>`, so several daemons can share one broker.
pub fn random_client_id(prefix: &str) -> String {
    let mut suffix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("{}-{}", prefix, hex::encode(suffix))
}

/// Create a client and its connection. The connection is lazy: nothing touches
/// the network until the connection is polled.
pub fn connect_mqtt(settings: &MqttSettings) -> Result<(Client, Connection)> {
    let endpoint = settings.endpoint()?;
    if !endpoint.is_loopback() && !endpoint.use_tls && settings.username.is_some() {
        log::warn!(
            "MQTT credentials for {} are sent without TLS",
            settings.broker
        );
    }

    let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
    options.set_keep_alive(settings.keep_alive);
    options.set_clean_session(true);
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
    if let Some(user) = settings.username.as_deref() {
        options.set_credentials(user, settings.password.clone().unwrap_or_default());
    }
    options.set_transport(endpoint.transport(&settings.tls)?);

    let (client, connection) = Client::new(options, 10);
    log::info!(
        "MQTT client {} -> {}:{} (TLS: {}, auth: {})",
        settings.client_id,
        endpoint.host,
        endpoint.port,
        endpoint.use_tls,
        settings.username.is_some()
    );
    Ok((client, connection))
}

/// Sleep up to `total`, returning early once `stop` is set.
pub fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(100)));
    }
}
