//! Broker address parsing and TLS material loading.
//!
//! Accepted broker forms:
//! - `host:port` (plain TCP unless TLS is forced)
//! - `mqtt://host:port`, `tcp://host:port` (plain TCP)
//! - `mqtts://host:port`, `ssl://host:port` (TLS)
//! - `[ipv6]:port`

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::path::Path;

/// PEM material for TLS connections to the broker.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    /// CA certificate. `None` uses the default root store.
    pub ca: Option<Vec<u8>>,
    /// Client certificate and key for mutual TLS.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(
        ca_path: Option<&Path>,
        client_cert_path: Option<&Path>,
        client_key_path: Option<&Path>,
    ) -> Result<Self> {
        let ca = ca_path
            .map(|path| {
                std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))
            })
            .transpose()?;

        let client_auth = match (client_cert_path, client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!("failed to read MQTT client cert '{}'", cert_path.display())
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!("failed to read MQTT client key '{}'", key_path.display())
                })?;
                Some((cert, key))
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(anyhow!("MQTT TLS client certificate provided without key"))
            }
            (None, Some(_)) => {
                return Err(anyhow!("MQTT TLS client key provided without certificate"))
            }
        };

        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl MqttEndpoint {
    pub fn is_loopback(&self) -> bool {
        if self.host == "localhost" {
            return true;
        }
        self.host
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }

    /// Build the rumqttc transport for this endpoint.
    pub fn transport(&self, tls: &TlsMaterials) -> Result<Transport> {
        if !self.use_tls {
            if tls.is_configured() {
                return Err(anyhow!(
                    "MQTT TLS materials provided but TLS is disabled (use mqtts:// or enable tls)"
                ));
            }
            return Ok(Transport::tcp());
        }
        if !tls.is_configured() {
            return Ok(Transport::tls_with_default_config());
        }
        let ca = tls.ca.clone().ok_or_else(|| {
            anyhow!("MQTT TLS CA certificate is required when providing client certificates")
        })?;
        Ok(Transport::tls(ca, tls.client_auth.clone(), None))
    }
}

pub fn parse_mqtt_endpoint(addr: &str, force_tls: bool) -> Result<MqttEndpoint> {
    let mut use_tls = force_tls;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest.trim_end_matches('/');
    }

    let (host, port) = split_host_port(remainder)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        return Ok((host.to_string(), parse_port(port, addr)?));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    Ok((host.to_string(), parse_port(port, addr)?))
}

fn parse_port(port: &str, addr: &str) -> Result<u16> {
    port.parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn plain_host_port() {
        let ep = parse_mqtt_endpoint("192.168.1.20:1883", false).unwrap();
        assert_eq!(
            ep,
            MqttEndpoint {
                host: "192.168.1.20".to_string(),
                port: 1883,
                use_tls: false
            }
        );
        assert!(!ep.is_loopback());
    }

    #[test]
    fn schemes_select_tls() {
        assert!(parse_mqtt_endpoint("mqtts://broker:8883", false).unwrap().use_tls);
        assert!(parse_mqtt_endpoint("ssl://broker:8883", false).unwrap().use_tls);
        assert!(!parse_mqtt_endpoint("tcp://broker:1883", false).unwrap().use_tls);
        assert!(parse_mqtt_endpoint("broker:8883", true).unwrap().use_tls);
        assert!(parse_mqtt_endpoint("ws://broker:80", false).is_err());
    }

    #[test]
    fn bracketed_ipv6() {
        let ep = parse_mqtt_endpoint("mqtt://[::1]:1883/", false).unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, 1883);
        assert!(ep.is_loopback());
    }

    #[test]
    fn missing_or_bad_port_is_rejected() {
        assert!(parse_mqtt_endpoint("broker", false).is_err());
        assert!(parse_mqtt_endpoint("broker:http", false).is_err());
        assert!(parse_mqtt_endpoint(":1883", false).is_err());
    }

    #[test]
    fn materials_on_plain_endpoint_are_rejected() {
        let ep = parse_mqtt_endpoint("localhost:1883", false).unwrap();
        let tls = TlsMaterials {
            ca: Some(b"pem".to_vec()),
            client_auth: None,
        };
        assert!(ep.transport(&tls).is_err());
        assert!(ep.transport(&TlsMaterials::default()).is_ok());
    }

    #[test]
    fn client_cert_requires_key() {
        let cert = PathBuf::from("/nonexistent/cert.pem");
        let err = TlsMaterials::load(None, Some(cert.as_path()), None).unwrap_err();
        assert!(err.to_string().contains("without key"));
    }
}
