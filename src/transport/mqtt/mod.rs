//! MQTT broker context built on `rumqttc` (MQTT v5)
//!
//! - [`connection`] - descriptor to `MqttOptions`, connection state, backoff
//! - [`message_handler`] - transport message to publish mapping, event routing
//! - [`client`] - the I/O side: event loop supervisor and [`RumqttcContext`]

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::RumqttcContext;
pub use connection::{configure_mqtt_options, ConnectionState, ReconnectConfig};
pub use message_handler::{EventRoute, MessageHandler};
