//! Broker-side plumbing
//!
//! Connection settings derived from connection strings, the RabbitMQ
//! management API client, and the `rumqttc`-backed MQTT context. AMQP and
//! STOMP contexts are supplied by the embedding application through
//! [`crate::driver::AmqpContext`] and [`crate::driver::StompContext`].

pub mod amqp;
pub mod management;
pub mod mqtt;
pub mod stomp;

pub use amqp::AmqpConnectionConfig;
pub use management::{ManagementConfig, StompManagementClient};
pub use mqtt::RumqttcContext;
pub use stomp::StompConnectionConfig;
