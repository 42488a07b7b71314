//! Courier - transport-agnostic messaging client
//!
//! Application code publishes messages to logical topics and commands; the
//! client picks a broker driver from a connection string and maps those
//! names onto the broker's own addressing.
//!
//! # Overview
//!
//! - Connection string parsing and driver selection ([`protocol::dsn`], [`driver::factory`])
//! - Broker drivers for AMQP, RabbitMQ, STOMP, MQTT and an in-process broker
//! - A producer with an ordered send pipeline of extensions ([`client`])
//! - A consumer loop with idle and receive timeouts ([`consumption`])
//!
//! # Quick Start
//!
//! ```rust
//! use courier::config::ClientConfig;
//! use courier::driver::{BrokerConnection, DriverFactory, MemoryBroker};
//! use courier::meta::QueueMetaRegistry;
//! use courier::{Message, Producer};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = Arc::new(ClientConfig::default());
//! let meta = Arc::new(QueueMetaRegistry::new(config.clone()));
//! let connection = BrokerConnection::Memory(Arc::new(MemoryBroker::new()));
//!
//! let driver = DriverFactory::new()
//!     .create(&connection, "memory:", config, meta)
//!     .unwrap();
//! driver.setup_broker().await.unwrap();
//!
//! let producer = Producer::new(driver);
//! producer
//!     .send_event("user.created", Message::new(r#"{"id":1}"#))
//!     .await
//!     .unwrap();
//! # });
//! ```

pub mod client;
pub mod config;
pub mod consumption;
pub mod driver;
pub mod error;
pub mod meta;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use client::{Extension, PreSend, Producer};
pub use config::{ClientConfig, ConfigError, CourierConfig};
pub use consumption::{Processor, QueueConsumer, Verdict};
pub use driver::{BrokerConnection, Driver, DriverFactory};
pub use error::{ClientError, ClientResult};
pub use protocol::*;
