//! MQTT connection settings and state
//!
//! Pure functions turning a connection descriptor into `rumqttc` options,
//! plus the connection state machine and reconnect backoff schedule.

use crate::error::{ClientError, ClientResult};
use crate::protocol::ConnectionDescriptor;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;

/// Connection state of the MQTT event loop
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Reconnect attempt count
    Reconnecting(u32),
}

/// Reconnection backoff schedule
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delays in milliseconds for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let millis = self
            .backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay);
        Duration::from_millis(millis)
    }
}

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Build `rumqttc` options from an `mqtt://` or `mqtts://` descriptor.
///
/// Recognised query keys: `client_id`, `keep_alive` (seconds).
pub fn configure_mqtt_options(descriptor: &ConnectionDescriptor) -> ClientResult<MqttOptions> {
    let tls = descriptor.scheme_protocol() == "mqtts" || descriptor.has_scheme_extension("ssl");
    let host = descriptor.host().unwrap_or("localhost");
    let port = descriptor
        .port()
        .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

    let client_id = descriptor
        .query_param("client_id")
        .map(str::to_string)
        .unwrap_or_else(|| format!("courier-{}", uuid::Uuid::new_v4().simple()));

    let keep_alive = match descriptor.query_param("keep_alive") {
        Some(raw) => raw.parse::<u64>().map_err(|_| {
            ClientError::invalid_connection_string(
                descriptor.dsn(),
                format!("keep_alive must be a number of seconds, got {raw}"),
            )
        })?,
        None => 60,
    };

    let mut mqtt_options = MqttOptions::new(client_id, host, port);
    if tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }
    if let Some(user) = descriptor.user() {
        mqtt_options.set_credentials(user, descriptor.password().unwrap_or_default());
    }
    mqtt_options.set_keep_alive(Duration::from_secs(keep_alive));
    mqtt_options.set_max_packet_size(Some(256 * 1024));

    Ok(mqtt_options)
}
