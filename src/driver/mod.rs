//! Broker driver abstraction
//!
//! A driver binds one broker connection, the shared [`ClientConfig`] and the
//! [`QueueMetaRegistry`], and translates logical topics, commands and queues
//! into broker-native addresses. The producer and consumer only ever talk to
//! the [`Driver`] trait.
//!
//! Broker connections are handed in as a [`BrokerConnection`], a closed set of
//! capability-tagged context handles. The factory checks the tag before it
//! constructs a driver, so a driver never receives a connection it cannot use.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::meta::QueueMetaRegistry;
use crate::protocol::{Body, Destination, Message, MessagePriority};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod amqp;
pub mod factory;
pub mod memory;
pub mod mqtt;
pub mod registry;
pub mod stomp;

pub use amqp::{AmqpContext, AmqpDriver, AmqpExchange, AmqpQueue, ExchangeKind};
pub use factory::{DriverBuilder, DriverFactory};
pub use memory::{MemoryBroker, MemoryDriver};
pub use mqtt::{MqttContext, MqttDriver};
pub use registry::{DriverId, DriverRegistry, RegistryEntry};
pub use stomp::{StompContext, StompDriver};

/// Capability a broker connection provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Amqp,
    Stomp,
    Mqtt,
    Memory,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Amqp => "amqp",
            Capability::Stomp => "stomp",
            Capability::Mqtt => "mqtt",
            Capability::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// A live broker connection, tagged with the capability it implements
#[derive(Clone)]
pub enum BrokerConnection {
    Amqp(Arc<dyn AmqpContext>),
    Stomp(Arc<dyn StompContext>),
    Mqtt(Arc<dyn MqttContext>),
    Memory(Arc<MemoryBroker>),
}

impl BrokerConnection {
    pub fn capability(&self) -> Capability {
        match self {
            BrokerConnection::Amqp(_) => Capability::Amqp,
            BrokerConnection::Stomp(_) => Capability::Stomp,
            BrokerConnection::Mqtt(_) => Capability::Mqtt,
            BrokerConnection::Memory(_) => Capability::Memory,
        }
    }

    fn incompatible(&self, required: Capability) -> ClientError {
        ClientError::IncompatibleConnectionFactory {
            required,
            actual: self.capability(),
        }
    }

    pub fn amqp(&self) -> ClientResult<Arc<dyn AmqpContext>> {
        match self {
            BrokerConnection::Amqp(context) => Ok(context.clone()),
            _ => Err(self.incompatible(Capability::Amqp)),
        }
    }

    pub fn stomp(&self) -> ClientResult<Arc<dyn StompContext>> {
        match self {
            BrokerConnection::Stomp(context) => Ok(context.clone()),
            _ => Err(self.incompatible(Capability::Stomp)),
        }
    }

    pub fn mqtt(&self) -> ClientResult<Arc<dyn MqttContext>> {
        match self {
            BrokerConnection::Mqtt(context) => Ok(context.clone()),
            _ => Err(self.incompatible(Capability::Mqtt)),
        }
    }

    pub fn memory(&self) -> ClientResult<Arc<MemoryBroker>> {
        match self {
            BrokerConnection::Memory(broker) => Ok(broker.clone()),
            _ => Err(self.incompatible(Capability::Memory)),
        }
    }
}

impl fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BrokerConnection({})", self.capability())
    }
}

/// Well-known transport header names
pub mod headers {
    pub const CONTENT_TYPE: &str = "content_type";
    pub const MESSAGE_ID: &str = "message_id";
    pub const CORRELATION_ID: &str = "correlation_id";
    pub const REPLY_TO: &str = "reply_to";
    pub const TIMESTAMP: &str = "timestamp";
    pub const EXPIRATION: &str = "expiration";
    pub const PRIORITY: &str = "priority";
    pub const DELAY: &str = "x-delay";
}

/// Broker-native message shape exchanged with contexts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportMessage {
    pub body: String,
    pub headers: BTreeMap<String, String>,
    pub properties: BTreeMap<String, String>,
    pub redelivered: bool,
}

impl TransportMessage {
    /// Base conversion shared by all drivers; the body must already be text
    pub fn from_client(message: &Message) -> ClientResult<Self> {
        let body = match &message.body {
            Body::Text(text) => text.clone(),
            other => {
                return Err(ClientError::invalid_body(format!(
                    "The message's body must be a string before transmission. Got: {}",
                    other.type_name()
                )))
            }
        };

        let mut headers: BTreeMap<String, String> = message
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let optional = [
            (headers::CONTENT_TYPE, message.content_type.clone()),
            (headers::MESSAGE_ID, message.message_id.clone()),
            (headers::CORRELATION_ID, message.correlation_id.clone()),
            (headers::REPLY_TO, message.reply_to.clone()),
            (headers::TIMESTAMP, message.timestamp.map(|t| t.to_string())),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                headers.insert(key.to_string(), value);
            }
        }

        Ok(Self {
            body,
            headers,
            properties: message
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            redelivered: false,
        })
    }

    /// Reverse of [`TransportMessage::from_client`]
    pub fn into_client(self) -> Message {
        let mut headers = self.headers;
        let content_type = headers.remove(headers::CONTENT_TYPE);
        let message_id = headers.remove(headers::MESSAGE_ID);
        let correlation_id = headers.remove(headers::CORRELATION_ID);
        let reply_to = headers.remove(headers::REPLY_TO);
        let timestamp = headers
            .remove(headers::TIMESTAMP)
            .and_then(|t| t.parse().ok());
        let expire = headers
            .remove(headers::EXPIRATION)
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis);
        let priority = headers
            .remove(headers::PRIORITY)
            .and_then(|p| p.parse().ok())
            .and_then(priority_from_level);
        let delay = headers
            .remove(headers::DELAY)
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis);

        Message {
            body: Body::Text(self.body),
            content_type,
            message_id,
            correlation_id,
            reply_to,
            timestamp,
            expire,
            delay,
            priority,
            headers: headers.into_iter().collect(),
            properties: self.properties.into_iter().collect(),
            redelivered: self.redelivered,
        }
    }
}

/// Map a client priority onto the 0..=4 broker scale
pub fn priority_level(priority: MessagePriority) -> u8 {
    match priority {
        MessagePriority::VeryLow => 0,
        MessagePriority::Low => 1,
        MessagePriority::Normal => 2,
        MessagePriority::High => 3,
        MessagePriority::VeryHigh => 4,
    }
}

pub fn priority_from_level(level: u8) -> Option<MessagePriority> {
    match level {
        0 => Some(MessagePriority::VeryLow),
        1 => Some(MessagePriority::Low),
        2 => Some(MessagePriority::Normal),
        3 => Some(MessagePriority::High),
        4 => Some(MessagePriority::VeryHigh),
        _ => None,
    }
}

/// Message pulled from a broker context, with the tag used to settle it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub tag: String,
    pub message: TransportMessage,
}

/// Message handed to the consumer, with enough context to settle it
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message: Message,
    /// Client queue name the message was received from
    pub queue: String,
    /// Broker address the message was received from
    pub address: String,
    pub tag: String,
}

/// Uniform broker contract used by the producer and the consumer loop
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registry identity of this driver
    fn id(&self) -> DriverId;

    fn config(&self) -> &ClientConfig;

    fn queue_meta(&self) -> &QueueMetaRegistry;

    /// Broker address of a client queue
    fn queue_address(&self, queue_name: &str) -> ClientResult<String>;

    /// Publish a topic message onto the router destination
    async fn send_to_router(&self, message: &Message) -> ClientResult<()>;

    /// Publish a message to the processor queue named in its properties
    async fn send_to_processor(&self, message: &Message) -> ClientResult<()>;

    /// Map a logical destination onto the broker and transmit
    async fn send(&self, destination: &Destination, message: &Message) -> ClientResult<()> {
        match destination {
            Destination::Topic(_) => self.send_to_router(message).await,
            Destination::Command(_) => self.send_to_processor(message).await,
        }
    }

    /// Poll a client queue once; `Ok(None)` when the timeout elapses empty
    async fn receive(&self, queue_name: &str, timeout: Duration)
        -> ClientResult<Option<Delivery>>;

    async fn acknowledge(&self, delivery: &Delivery) -> ClientResult<()>;

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> ClientResult<()>;

    /// Idempotently provision router and processor destinations
    async fn setup_broker(&self) -> ClientResult<()>;
}

/// Queue name a processor-bound message targets
pub(crate) fn processor_queue_name(message: &Message) -> ClientResult<&str> {
    use crate::protocol::properties;

    if message.property(properties::PROCESSOR_NAME).is_none() {
        return Err(ClientError::MissingProperty("Processor name".to_string()));
    }
    message
        .property(properties::PROCESSOR_QUEUE_NAME)
        .ok_or_else(|| ClientError::MissingProperty("Queue name".to_string()))
}

/// Reject topic messages that were never stamped with their topic
pub(crate) fn require_topic(message: &Message) -> ClientResult<&str> {
    message
        .property(crate::protocol::properties::TOPIC_NAME)
        .ok_or_else(|| ClientError::MissingProperty("Topic name".to_string()))
}

/// Build the consumer-facing delivery from a context message
pub(crate) fn into_delivery(queue: &str, address: &str, inbound: InboundMessage) -> Delivery {
    Delivery {
        message: inbound.message.into_client(),
        queue: queue.to_string(),
        address: address.to_string(),
        tag: inbound.tag,
    }
}
