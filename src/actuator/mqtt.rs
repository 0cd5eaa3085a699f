use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rumqttc::{Client, ConnectReturnCode, Connection, Event, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{ActuatorCommand, CommandChannel};
use crate::transport::{connect_mqtt, sleep_unless_stopped, MqttSettings, RECONNECT_DELAY};

// Packet ids seen by the connection thread but not yet claimed by `send`.
const PKID_BACKLOG: usize = 16;

#[derive(Clone, Debug)]
pub struct MqttChannelConfig {
    pub mqtt: MqttSettings,
    pub topic: String,
    pub engage_payload: String,
    pub disengage_payload: String,
    pub retain: bool,
    /// How long `send` waits for the broker's PUBACK.
    pub ack_timeout: Duration,
}

/// Publishes engage/disengage payloads on a topic watched by the device.
///
/// A command only counts as sent once the broker acknowledged it (QoS 1).
/// While the broker is unreachable `send` fails immediately instead of
/// queueing the command for a later reconnect.
pub struct MqttChannel {
    client: Client,
    topic: String,
    engage_payload: Vec<u8>,
    disengage_payload: Vec<u8>,
    retain: bool,
    ack_timeout: Duration,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    published: Receiver<u16>,
    acked: Receiver<u16>,
}

struct Link {
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    published: Sender<u16>,
    acked: Sender<u16>,
}

impl MqttChannel {
    pub fn connect(config: MqttChannelConfig) -> Result<Self> {
        let (client, connection) = connect_mqtt(&config.mqtt)?;
        let connected = Arc::new(AtomicBool::new(false));
        let closing = Arc::new(AtomicBool::new(false));
        let (published_tx, published) = crossbeam_channel::bounded(PKID_BACKLOG);
        let (acked_tx, acked) = crossbeam_channel::bounded(PKID_BACKLOG);

        let link = Link {
            connected: Arc::clone(&connected),
            closing: Arc::clone(&closing),
            published: published_tx,
            acked: acked_tx,
        };
        std::thread::Builder::new()
            .name("actuator-mqtt".to_string())
            .spawn(move || drive(connection, link))
            .context("spawn actuator MQTT thread")?;

        let deadline = Instant::now() + config.ack_timeout;
        while !connected.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        if !connected.load(Ordering::SeqCst) {
            log::warn!(
                "actuator broker {} not reachable yet; commands fail until it is",
                config.mqtt.broker
            );
        }

        Ok(Self {
            client,
            topic: config.topic,
            engage_payload: config.engage_payload.into_bytes(),
            disengage_payload: config.disengage_payload.into_bytes(),
            retain: config.retain,
            ack_timeout: config.ack_timeout,
            connected,
            closing,
            published,
            acked,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// Polling the connection is what actually moves published packets onto the
// wire; rumqttc reconnects on the next poll after an error.
fn drive(mut connection: Connection, link: Link) {
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let accepted = ack.code == ConnectReturnCode::Success;
                link.connected.store(accepted, Ordering::SeqCst);
                if accepted {
                    log::info!("actuator MQTT connected");
                } else {
                    log::warn!("actuator MQTT connection refused: {:?}", ack.code);
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                let _ = link.acked.try_send(ack.pkid);
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                let _ = link.published.try_send(pkid);
            }
            Ok(_) => {}
            Err(e) => {
                link.connected.store(false, Ordering::SeqCst);
                if link.closing.load(Ordering::SeqCst) {
                    break;
                }
                log::warn!("actuator MQTT connection error: {}. Reconnecting...", e);
                sleep_unless_stopped(&link.closing, RECONNECT_DELAY);
            }
        }
    }
    link.connected.store(false, Ordering::SeqCst);
}

/// Wait for the next outgoing publish and then for the PUBACK carrying its
/// packet id. Acks for other packets are skipped.
fn wait_for_ack(
    published: &Receiver<u16>,
    acked: &Receiver<u16>,
    deadline: Instant,
) -> Result<u16> {
    let pkid =
        recv_before(published, deadline).context("publish was not written to the broker")?;
    loop {
        let id = recv_before(acked, deadline)
            .with_context(|| format!("no PUBACK for packet {}", pkid))?;
        if id == pkid {
            return Ok(pkid);
        }
        log::debug!("actuator MQTT: ignoring PUBACK {} while waiting for {}", id, pkid);
    }
}

fn recv_before(rx: &Receiver<u16>, deadline: Instant) -> Result<u16> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok(id) => Ok(id),
        Err(RecvTimeoutError::Timeout) => Err(anyhow!("timed out")),
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("connection thread exited")),
    }
}

impl CommandChannel for MqttChannel {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn send(&mut self, command: ActuatorCommand) -> Result<()> {
        if !self.is_connected() {
            return Err(anyhow!("{} not sent: actuator broker is not connected", command));
        }
        let payload = match command {
            ActuatorCommand::Engage => self.engage_payload.clone(),
            ActuatorCommand::Disengage => self.disengage_payload.clone(),
        };

        // Leftovers belong to earlier commands that already timed out.
        while self.published.try_recv().is_ok() {}
        while self.acked.try_recv().is_ok() {}

        let deadline = Instant::now() + self.ack_timeout;
        self.client
            .try_publish(self.topic.as_str(), QoS::AtLeastOnce, self.retain, payload)
            .with_context(|| format!("publish {} to {}", command, self.topic))?;
        let pkid = wait_for_ack(&self.published, &self.acked, deadline)
            .with_context(|| format!("{} on {}", command, self.topic))?;
        log::debug!("actuator MQTT {} acknowledged (packet {})", command, pkid);
        Ok(())
    }
}

impl Drop for MqttChannel {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect() {
            log::debug!("actuator MQTT disconnect: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{ActuatorController, ActuatorState};
    use crate::transport::TlsMaterials;

    fn config(broker: &str, ack_timeout: Duration) -> MqttChannelConfig {
        MqttChannelConfig {
            mqtt: MqttSettings {
                broker: broker.to_string(),
                force_tls: false,
                client_id: "facegate-actuator-test".to_string(),
                username: None,
                password: None,
                tls: TlsMaterials::default(),
                keep_alive: Duration::from_secs(30),
            },
            topic: "home/door".to_string(),
            engage_payload: "engage".to_string(),
            disengage_payload: "disengage".to_string(),
            retain: true,
            ack_timeout,
        }
    }

    #[test]
    fn unreachable_broker_fails_commands_and_leaves_state_unknown() {
        let channel = MqttChannel::connect(config("127.0.0.1:1", Duration::from_millis(200)))
            .expect("client setup does not touch the network");
        assert!(!channel.is_connected());

        let controller = ActuatorController::new(Box::new(channel), 1);
        let started = Instant::now();
        let err = controller.engage().unwrap_err();

        assert!(format!("{:#}", err).contains("not connected"));
        assert_eq!(controller.state(), ActuatorState::Unknown);
        assert_eq!(controller.stats().failures, 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn ack_wait_matches_the_published_packet_id() {
        let (published_tx, published) = crossbeam_channel::bounded(PKID_BACKLOG);
        let (acked_tx, acked) = crossbeam_channel::bounded(PKID_BACKLOG);
        published_tx.send(7).unwrap();
        acked_tx.send(3).unwrap();
        acked_tx.send(7).unwrap();

        let deadline = Instant::now() + Duration::from_millis(200);
        assert_eq!(wait_for_ack(&published, &acked, deadline).unwrap(), 7);
    }

    #[test]
    fn missing_ack_times_out() {
        let (published_tx, published) = crossbeam_channel::bounded(PKID_BACKLOG);
        let (acked_tx, acked) = crossbeam_channel::bounded::<u16>(PKID_BACKLOG);
        published_tx.send(9).unwrap();
        acked_tx.send(4).unwrap();

        let deadline = Instant::now() + Duration::from_millis(100);
        let err = wait_for_ack(&published, &acked, deadline).unwrap_err();
        assert!(format!("{:#}", err).contains("no PUBACK for packet 9"));
    }

    #[test]
    fn publish_never_written_is_an_error() {
        let (_published_tx, published) = crossbeam_channel::bounded::<u16>(PKID_BACKLOG);
        let (_acked_tx, acked) = crossbeam_channel::bounded::<u16>(PKID_BACKLOG);
        let deadline = Instant::now() + Duration::from_millis(50);
        let err = wait_for_ack(&published, &acked, deadline).unwrap_err();
        assert!(format!("{:#}", err).contains("not written"));
    }
}
