//! AMQP driver
//!
//! Topic messages go to a durable fanout exchange named after the router
//! topic; the router queue is bound to it. Processor messages go through the
//! default exchange with the queue name as routing key.
//!
//! The RabbitMQ flavor adds priority queues (`x-max-priority = 4`) and
//! delayed delivery through the delayed-message exchange plugin.

use super::{
    headers, into_delivery, priority_level, processor_queue_name, require_topic, Delivery, Driver,
    DriverId, InboundMessage, TransportMessage,
};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::meta::QueueMetaRegistry;
use crate::protocol::Message;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// AMQP exchange types used by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
    /// `x-delayed-message` from the RabbitMQ delayed message plugin
    DelayedMessage,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::DelayedMessage => "x-delayed-message",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmqpExchange {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub arguments: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmqpQueue {
    pub name: String,
    pub durable: bool,
    pub arguments: BTreeMap<String, Value>,
}

/// Primitives an AMQP client library must provide
#[async_trait]
pub trait AmqpContext: Send + Sync {
    async fn declare_exchange(&self, exchange: &AmqpExchange) -> ClientResult<()>;

    async fn declare_queue(&self, queue: &AmqpQueue) -> ClientResult<()>;

    async fn bind(&self, exchange: &str, queue: &str, routing_key: &str) -> ClientResult<()>;

    /// Publish; an empty exchange name means the default exchange
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &TransportMessage,
    ) -> ClientResult<()>;

    /// Fetch one message, waiting at most `timeout`
    async fn basic_get(&self, queue: &str, timeout: Duration)
        -> ClientResult<Option<InboundMessage>>;

    async fn ack(&self, tag: &str) -> ClientResult<()>;

    async fn reject(&self, tag: &str, requeue: bool) -> ClientResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Plain,
    RabbitMq,
}

/// AMQP driver over an injected [`AmqpContext`]
pub struct AmqpDriver {
    context: Arc<dyn AmqpContext>,
    config: Arc<ClientConfig>,
    meta: Arc<QueueMetaRegistry>,
    flavor: Flavor,
}

impl AmqpDriver {
    /// Generic AMQP 0.9.1 driver
    pub fn new(
        context: Arc<dyn AmqpContext>,
        config: Arc<ClientConfig>,
        meta: Arc<QueueMetaRegistry>,
    ) -> Self {
        Self {
            context,
            config,
            meta,
            flavor: Flavor::Plain,
        }
    }

    /// RabbitMQ driver with priorities and delayed delivery
    pub fn rabbitmq(
        context: Arc<dyn AmqpContext>,
        config: Arc<ClientConfig>,
        meta: Arc<QueueMetaRegistry>,
    ) -> Self {
        Self {
            flavor: Flavor::RabbitMq,
            ..Self::new(context, config, meta)
        }
    }

    fn driver_name(&self) -> &'static str {
        match self.flavor {
            Flavor::Plain => "amqp",
            Flavor::RabbitMq => "rabbitmq_amqp",
        }
    }

    fn delayed_exchange_name(address: &str) -> String {
        format!("{address}.delayed")
    }

    fn queue_definition(&self, name: String) -> AmqpQueue {
        let mut arguments = BTreeMap::new();
        if self.flavor == Flavor::RabbitMq {
            arguments.insert("x-max-priority".to_string(), json!(4));
        }
        AmqpQueue {
            name,
            durable: true,
            arguments,
        }
    }

    /// Driver-specific transport message: expiration, priority, persistence
    pub fn create_transport_message(&self, message: &Message) -> ClientResult<TransportMessage> {
        let mut transport = TransportMessage::from_client(message)?;
        transport
            .headers
            .insert("delivery_mode".to_string(), "2".to_string());

        if let Some(expire) = message.expire {
            transport
                .headers
                .insert(headers::EXPIRATION.to_string(), expire.as_millis().to_string());
        }

        if let Some(priority) = message.priority {
            match self.flavor {
                Flavor::RabbitMq => {
                    transport.headers.insert(
                        headers::PRIORITY.to_string(),
                        priority_level(priority).to_string(),
                    );
                }
                Flavor::Plain => {
                    debug!(priority = priority.as_str(), "AMQP driver ignores message priority");
                }
            }
        }

        if let Some(delay) = message.delay {
            match self.flavor {
                Flavor::RabbitMq => {
                    transport
                        .headers
                        .insert(headers::DELAY.to_string(), delay.as_millis().to_string());
                }
                Flavor::Plain => {
                    return Err(ClientError::unsupported(
                        self.driver_name(),
                        "message delaying",
                    ));
                }
            }
        }

        Ok(transport)
    }
}

#[async_trait]
impl Driver for AmqpDriver {
    fn id(&self) -> DriverId {
        match self.flavor {
            Flavor::Plain => DriverId::AMQP,
            Flavor::RabbitMq => DriverId::RABBITMQ_AMQP,
        }
    }

    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn queue_meta(&self) -> &QueueMetaRegistry {
        &self.meta
    }

    fn queue_address(&self, queue_name: &str) -> ClientResult<String> {
        Ok(self.meta.queue_meta(queue_name)?.transport_name)
    }

    async fn send_to_router(&self, message: &Message) -> ClientResult<()> {
        let topic = require_topic(message)?;
        if message.delay.is_some() {
            return Err(ClientError::unsupported(
                self.driver_name(),
                "delayed topic messages",
            ));
        }

        let exchange = self.config.router_topic_transport_name();
        let transport = self.create_transport_message(message)?;
        debug!(topic = %topic, exchange = %exchange, "Publishing to router exchange");
        self.context.publish(&exchange, "", &transport).await
    }

    async fn send_to_processor(&self, message: &Message) -> ClientResult<()> {
        let queue = processor_queue_name(message)?;
        let address = self.queue_address(queue)?;
        let transport = self.create_transport_message(message)?;

        if message.delay.is_some() {
            let exchange = Self::delayed_exchange_name(&address);
            debug!(queue = %address, exchange = %exchange, "Publishing delayed message");
            return self.context.publish(&exchange, &address, &transport).await;
        }

        debug!(queue = %address, "Publishing to processor queue");
        self.context.publish("", &address, &transport).await
    }

    async fn receive(
        &self,
        queue_name: &str,
        timeout: Duration,
    ) -> ClientResult<Option<Delivery>> {
        let address = self.queue_address(queue_name)?;
        let inbound = self.context.basic_get(&address, timeout).await?;
        Ok(inbound.map(|inbound| into_delivery(queue_name, &address, inbound)))
    }

    async fn acknowledge(&self, delivery: &Delivery) -> ClientResult<()> {
        self.context.ack(&delivery.tag).await
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> ClientResult<()> {
        self.context.reject(&delivery.tag, requeue).await
    }

    async fn setup_broker(&self) -> ClientResult<()> {
        let router_exchange = self.config.router_topic_transport_name();
        let router_queue = self.config.router_queue_transport_name();

        info!(
            driver = %self.id(),
            exchange = %router_exchange,
            queue = %router_queue,
            "Declaring router topic and queue"
        );
        self.context
            .declare_exchange(&AmqpExchange {
                name: router_exchange.clone(),
                kind: ExchangeKind::Fanout,
                durable: true,
                arguments: BTreeMap::new(),
            })
            .await?;
        self.context
            .declare_queue(&self.queue_definition(router_queue.clone()))
            .await?;
        self.context
            .bind(&router_exchange, &router_queue, &router_queue)
            .await?;

        for meta in self.meta.queues_meta() {
            debug!(queue = %meta.transport_name, "Declaring processor queue");
            self.context
                .declare_queue(&self.queue_definition(meta.transport_name.clone()))
                .await?;

            if self.flavor == Flavor::RabbitMq {
                let exchange = Self::delayed_exchange_name(&meta.transport_name);
                let mut arguments = BTreeMap::new();
                arguments.insert("x-delayed-type".to_string(), json!("direct"));
                self.context
                    .declare_exchange(&AmqpExchange {
                        name: exchange.clone(),
                        kind: ExchangeKind::DelayedMessage,
                        durable: true,
                        arguments,
                    })
                    .await?;
                self.context
                    .bind(&exchange, &meta.transport_name, &meta.transport_name)
                    .await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{properties, MessagePriority};
    use crate::testing::mocks::{AmqpCall, MockAmqpContext};

    fn driver(rabbitmq: bool) -> (AmqpDriver, Arc<MockAmqpContext>) {
        let context = Arc::new(MockAmqpContext::new());
        let config = Arc::new(ClientConfig::default());
        let meta = Arc::new(
            QueueMetaRegistry::builder(config.clone())
                .add_processor("work", "resize")
                .build(),
        );
        let driver = if rabbitmq {
            AmqpDriver::rabbitmq(context.clone(), config, meta)
        } else {
            AmqpDriver::new(context.clone(), config, meta)
        };
        (driver, context)
    }

    fn processor_message() -> Message {
        Message::new("body")
            .with_property(properties::PROCESSOR_NAME, "resize")
            .with_property(properties::PROCESSOR_QUEUE_NAME, "work")
    }

    #[tokio::test]
    async fn test_router_message_goes_to_fanout_exchange() {
        let (driver, context) = driver(false);
        let message = Message::new("body").with_property(properties::TOPIC_NAME, "image.uploaded");

        driver.send_to_router(&message).await.unwrap();

        let published = context.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "courier.router");
        assert_eq!(published[0].1, "");
        assert_eq!(published[0].2.headers["delivery_mode"], "2");
    }

    #[tokio::test]
    async fn test_router_message_requires_topic() {
        let (driver, context) = driver(false);
        let result = driver.send_to_router(&Message::new("body")).await;
        assert!(matches!(result, Err(ClientError::MissingProperty(_))));
        assert!(context.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_processor_message_uses_default_exchange() {
        let (driver, context) = driver(false);
        driver.send_to_processor(&processor_message()).await.unwrap();

        let published = context.published().await;
        assert_eq!(published[0].0, "");
        assert_eq!(published[0].1, "courier.app.work");
    }

    #[tokio::test]
    async fn test_plain_amqp_rejects_delay() {
        let (driver, context) = driver(false);
        let message = processor_message().with_delay(Duration::from_secs(3));
        let result = driver.send_to_processor(&message).await;
        assert!(matches!(result, Err(ClientError::Unsupported { .. })));
        assert!(context.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_rabbitmq_delay_uses_delayed_exchange() {
        let (driver, context) = driver(true);
        let message = processor_message()
            .with_delay(Duration::from_secs(3))
            .with_priority(MessagePriority::High)
            .with_expire(Duration::from_millis(1500));
        driver.send_to_processor(&message).await.unwrap();

        let published = context.published().await;
        assert_eq!(published[0].0, "courier.app.work.delayed");
        assert_eq!(published[0].1, "courier.app.work");
        let headers = &published[0].2.headers;
        assert_eq!(headers["x-delay"], "3000");
        assert_eq!(headers["priority"], "3");
        assert_eq!(headers["expiration"], "1500");
    }

    #[tokio::test]
    async fn test_setup_broker_declares_topology() {
        let (driver, context) = driver(true);
        driver.setup_broker().await.unwrap();

        let calls = context.calls().await;
        assert!(calls.contains(&AmqpCall::DeclareExchange(
            "courier.router".to_string(),
            "fanout".to_string()
        )));
        assert!(calls.contains(&AmqpCall::DeclareQueue("courier.app.default".to_string())));
        assert!(calls.contains(&AmqpCall::DeclareQueue("courier.app.work".to_string())));
        assert!(calls.contains(&AmqpCall::Bind(
            "courier.router".to_string(),
            "courier.app.default".to_string()
        )));
        assert!(calls.contains(&AmqpCall::DeclareExchange(
            "courier.app.work.delayed".to_string(),
            "x-delayed-message".to_string()
        )));
    }

    #[tokio::test]
    async fn test_receive_and_settle() {
        let (driver, context) = driver(false);
        context
            .push_inbound(
                "courier.app.work",
                TransportMessage {
                    body: "hello".to_string(),
                    ..Default::default()
                },
            )
            .await;

        let delivery = driver
            .receive("work", Duration::from_millis(10))
            .await
            .unwrap()
            .expect("message should be available");
        assert_eq!(delivery.message.body_text(), Some("hello"));
        assert_eq!(delivery.queue, "work");
        assert_eq!(delivery.address, "courier.app.work");

        driver.acknowledge(&delivery).await.unwrap();
        driver.reject(&delivery, true).await.unwrap();
        let calls = context.calls().await;
        assert!(calls.contains(&AmqpCall::Ack(delivery.tag.clone())));
        assert!(calls.contains(&AmqpCall::Reject(delivery.tag.clone(), true)));

        assert!(driver
            .receive("work", Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_queue_fails() {
        let (driver, _) = driver(false);
        let result = driver.receive("missing", Duration::from_millis(1)).await;
        assert!(matches!(result, Err(ClientError::QueueMetaNotFound(_))));
    }
}
