use anyhow::{Context, Result};
use rumqttc::{Event, Packet, QoS, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::FrameSource;
use crate::transport::{connect_mqtt, sleep_unless_stopped, MqttSettings, RECONNECT_DELAY};

pub const DEFAULT_FRAME_TOPIC: &str = "home/server";

// Upper bound on how long a stop request goes unnoticed.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct MqttIngestConfig {
    pub mqtt: MqttSettings,
    pub topic: String,
}

/// Subscribes to the frame topic and feeds every payload to a `FrameSource`.
///
/// Runs on its own thread and reconnects after `RECONNECT_DELAY` whenever the
/// broker connection fails.
pub struct MqttIngest {
    handle: JoinHandle<()>,
}

impl MqttIngest {
    pub fn spawn(
        config: MqttIngestConfig,
        source: Arc<FrameSource>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        let handle = std::thread::Builder::new()
            .name("ingest-mqtt".to_string())
            .spawn(move || run(&config, &source, &stop))
            .context("spawn MQTT ingest thread")?;
        Ok(Self { handle })
    }

    /// Wait for the ingest thread. Returns promptly once the stop flag is set.
    pub fn join(self) {
        if self.handle.join().is_err() {
            log::error!("MQTT ingest thread panicked");
        }
    }
}

fn run(config: &MqttIngestConfig, source: &FrameSource, stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        let (client, mut connection) = match connect_mqtt(&config.mqtt) {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("MQTT ingest setup failed: {:#}", e);
                sleep_unless_stopped(stop, RECONNECT_DELAY);
                continue;
            }
        };
        if let Err(e) = client.subscribe(config.topic.as_str(), QoS::AtMostOnce) {
            log::error!("MQTT subscribe to {} failed: {}", config.topic, e);
            sleep_unless_stopped(stop, RECONNECT_DELAY);
            continue;
        }

        loop {
            if stop.load(Ordering::SeqCst) {
                if let Err(e) = client.disconnect() {
                    log::debug!("MQTT ingest disconnect: {}", e);
                }
                return;
            }
            match connection.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    if let Err(e) = source.ingest(&publish.payload) {
                        log::debug!("dropped frame payload on {}: {:#}", publish.topic, e);
                    }
                }
                Ok(Ok(Event::Incoming(Packet::SubAck(_)))) => {
                    log::info!("subscribed to {}", config.topic);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    log::error!("MQTT connection error: {}. Reconnecting...", e);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("MQTT connection closed. Reconnecting...");
                    break;
                }
            }
        }
        sleep_unless_stopped(stop, RECONNECT_DELAY);
    }
}
