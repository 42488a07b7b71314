//! STOMP driver
//!
//! Generic STOMP brokers have no fanout primitive, so both router and
//! processor messages are sent to `/queue/<name>` destinations. The RabbitMQ
//! flavor addresses exchanges and queues directly (`/exchange/..`,
//! `/amq/queue/..`) and provisions them through the management API.

use super::{
    headers, into_delivery, priority_level, processor_queue_name, require_topic, Delivery, Driver,
    DriverId, InboundMessage, TransportMessage,
};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::meta::QueueMetaRegistry;
use crate::protocol::Message;
use crate::transport::management::StompManagementClient;
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Primitives a STOMP client library must provide
#[async_trait]
pub trait StompContext: Send + Sync {
    async fn send(&self, destination: &str, message: &TransportMessage) -> ClientResult<()>;

    /// Subscribe if needed and wait at most `timeout` for one frame
    async fn receive(
        &self,
        destination: &str,
        timeout: Duration,
    ) -> ClientResult<Option<InboundMessage>>;

    async fn ack(&self, tag: &str) -> ClientResult<()>;

    async fn nack(&self, tag: &str, requeue: bool) -> ClientResult<()>;
}

/// STOMP driver over an injected [`StompContext`]
pub struct StompDriver {
    context: Arc<dyn StompContext>,
    config: Arc<ClientConfig>,
    meta: Arc<QueueMetaRegistry>,
    management: Option<StompManagementClient>,
}

impl StompDriver {
    pub fn new(
        context: Arc<dyn StompContext>,
        config: Arc<ClientConfig>,
        meta: Arc<QueueMetaRegistry>,
    ) -> Self {
        Self {
            context,
            config,
            meta,
            management: None,
        }
    }

    /// RabbitMQ flavor; topology is provisioned through `management`
    pub fn rabbitmq(
        context: Arc<dyn StompContext>,
        config: Arc<ClientConfig>,
        meta: Arc<QueueMetaRegistry>,
        management: StompManagementClient,
    ) -> Self {
        Self {
            management: Some(management),
            ..Self::new(context, config, meta)
        }
    }

    fn is_rabbitmq(&self) -> bool {
        self.management.is_some()
    }

    fn driver_name(&self) -> &'static str {
        if self.is_rabbitmq() {
            "rabbitmq_stomp"
        } else {
            "stomp"
        }
    }

    fn queue_destination(&self, address: &str) -> String {
        if self.is_rabbitmq() {
            format!("/amq/queue/{address}")
        } else {
            format!("/queue/{address}")
        }
    }

    fn router_destination(&self) -> String {
        if self.is_rabbitmq() {
            format!("/exchange/{}", self.config.router_topic_transport_name())
        } else {
            format!("/queue/{}", self.config.router_queue_transport_name())
        }
    }

    /// Driver-specific transport message with durable STOMP headers
    pub fn create_transport_message(&self, message: &Message) -> ClientResult<TransportMessage> {
        let mut transport = TransportMessage::from_client(message)?;
        for (key, value) in [
            ("durable", "true"),
            ("auto-delete", "false"),
            ("exclusive", "false"),
            ("persistent", "true"),
        ] {
            transport.headers.insert(key.to_string(), value.to_string());
        }

        if let Some(expire) = message.expire {
            transport
                .headers
                .insert(headers::EXPIRATION.to_string(), expire.as_millis().to_string());
        }

        if let Some(priority) = message.priority {
            if !self.is_rabbitmq() {
                return Err(ClientError::unsupported(self.driver_name(), "message priority"));
            }
            transport.headers.insert(
                headers::PRIORITY.to_string(),
                priority_level(priority).to_string(),
            );
        }

        if let Some(delay) = message.delay {
            if !self.is_rabbitmq() {
                return Err(ClientError::unsupported(self.driver_name(), "message delaying"));
            }
            transport
                .headers
                .insert(headers::DELAY.to_string(), delay.as_millis().to_string());
        }

        Ok(transport)
    }
}

#[async_trait]
impl Driver for StompDriver {
    fn id(&self) -> DriverId {
        if self.is_rabbitmq() {
            DriverId::RABBITMQ_STOMP
        } else {
            DriverId::STOMP
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
        require_topic(message)?;
        if message.delay.is_some() {
            return Err(ClientError::unsupported(
                self.driver_name(),
                "delayed topic messages",
            ));
        }
        let destination = self.router_destination();
        let transport = self.create_transport_message(message)?;
        debug!(destination = %destination, "Sending STOMP frame to router");
        self.context.send(&destination, &transport).await
    }

    async fn send_to_processor(&self, message: &Message) -> ClientResult<()> {
        let queue = processor_queue_name(message)?;
        let address = self.queue_address(queue)?;
        let transport = self.create_transport_message(message)?;

        let destination = if message.delay.is_some() {
            format!("/exchange/{address}.delayed/{address}")
        } else {
            self.queue_destination(&address)
        };
        debug!(destination = %destination, "Sending STOMP frame to processor queue");
        self.context.send(&destination, &transport).await
    }

    async fn receive(
        &self,
        queue_name: &str,
        timeout: Duration,
    ) -> ClientResult<Option<Delivery>> {
        let address = self.queue_address(queue_name)?;
        let destination = self.queue_destination(&address);
        let inbound = self.context.receive(&destination, timeout).await?;
        Ok(inbound.map(|inbound| into_delivery(queue_name, &address, inbound)))
    }

    async fn acknowledge(&self, delivery: &Delivery) -> ClientResult<()> {
        self.context.ack(&delivery.tag).await
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> ClientResult<()> {
        self.context.nack(&delivery.tag, requeue).await
    }

    async fn setup_broker(&self) -> ClientResult<()> {
        let Some(management) = &self.management else {
            debug!("Generic STOMP brokers create destinations on first use");
            return Ok(());
        };

        let router_topic = self.config.router_topic_transport_name();
        let router_queue = self.config.router_queue_transport_name();
        let mut queue_arguments = BTreeMap::new();
        queue_arguments.insert("x-max-priority".to_string(), json!(4));

        info!(
            exchange = %router_topic,
            queue = %router_queue,
            "Declaring router topic and queue via management API"
        );
        management
            .declare_exchange(&router_topic, "fanout", BTreeMap::new())
            .await?;
        management
            .declare_queue(&router_queue, queue_arguments.clone())
            .await?;
        management
            .bind(&router_topic, &router_queue, &router_queue)
            .await?;

        for meta in self.meta.queues_meta() {
            let delayed = format!("{}.delayed", meta.transport_name);
            let mut delayed_arguments = BTreeMap::new();
            delayed_arguments.insert("x-delayed-type".to_string(), json!("direct"));

            management
                .declare_queue(&meta.transport_name, queue_arguments.clone())
                .await?;
            management
                .declare_exchange(&delayed, "x-delayed-message", delayed_arguments)
                .await?;
            management
                .bind(&delayed, &meta.transport_name, &meta.transport_name)
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{properties, MessagePriority};
    use crate::testing::mocks::MockStompContext;
    use crate::transport::management::ManagementConfig;

    fn driver(rabbitmq: bool) -> (StompDriver, Arc<MockStompContext>) {
        let context = Arc::new(MockStompContext::new());
        let config = Arc::new(ClientConfig::default());
        let meta = Arc::new(
            QueueMetaRegistry::builder(config.clone())
                .add_processor("work", "resize")
                .build(),
        );
        let driver = if rabbitmq {
            let management = StompManagementClient::new(ManagementConfig::default()).unwrap();
            StompDriver::rabbitmq(context.clone(), config, meta, management)
        } else {
            StompDriver::new(context.clone(), config, meta)
        };
        (driver, context)
    }

    fn processor_message() -> Message {
        Message::new("body")
            .with_property(properties::PROCESSOR_NAME, "resize")
            .with_property(properties::PROCESSOR_QUEUE_NAME, "work")
    }

    #[tokio::test]
    async fn test_generic_destinations() {
        let (driver, context) = driver(false);
        let topic = Message::new("t").with_property(properties::TOPIC_NAME, "image.uploaded");
        driver.send_to_router(&topic).await.unwrap();
        driver.send_to_processor(&processor_message()).await.unwrap();

        let sent = context.sent().await;
        assert_eq!(sent[0].0, "/queue/courier.app.default");
        assert_eq!(sent[1].0, "/queue/courier.app.work");
        assert_eq!(sent[1].1.headers["persistent"], "true");
        assert_eq!(sent[1].1.headers["durable"], "true");
    }

    #[tokio::test]
    async fn test_rabbitmq_destinations() {
        let (driver, context) = driver(true);
        let topic = Message::new("t").with_property(properties::TOPIC_NAME, "image.uploaded");
        driver.send_to_router(&topic).await.unwrap();
        driver
            .send_to_processor(&processor_message().with_priority(MessagePriority::Low))
            .await
            .unwrap();
        driver
            .send_to_processor(&processor_message().with_delay(Duration::from_millis(250)))
            .await
            .unwrap();

        let sent = context.sent().await;
        assert_eq!(sent[0].0, "/exchange/courier.router");
        assert_eq!(sent[1].0, "/amq/queue/courier.app.work");
        assert_eq!(sent[1].1.headers["priority"], "1");
        assert_eq!(sent[2].0, "/exchange/courier.app.work.delayed/courier.app.work");
        assert_eq!(sent[2].1.headers["x-delay"], "250");
    }

    #[tokio::test]
    async fn test_generic_stomp_rejects_delay_and_priority() {
        let (driver, context) = driver(false);
        let delayed = processor_message().with_delay(Duration::from_secs(1));
        let prioritized = processor_message().with_priority(MessagePriority::High);
        assert!(matches!(
            driver.send_to_processor(&delayed).await,
            Err(ClientError::Unsupported { .. })
        ));
        assert!(matches!(
            driver.send_to_processor(&prioritized).await,
            Err(ClientError::Unsupported { .. })
        ));
        assert!(context.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_generic_setup_is_noop() {
        let (driver, context) = driver(false);
        driver.setup_broker().await.unwrap();
        assert!(context.sent().await.is_empty());
        assert_eq!(driver.id(), DriverId::STOMP);
    }

    #[tokio::test]
    async fn test_receive_uses_queue_destination() {
        let (driver, context) = driver(true);
        context
            .push_inbound(
                "/amq/queue/courier.app.work",
                TransportMessage {
                    body: "payload".to_string(),
                    ..Default::default()
                },
            )
            .await;

        let delivery = driver
            .receive("work", Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.message.body_text(), Some("payload"));
        driver.reject(&delivery, false).await.unwrap();
        assert_eq!(context.nacked().await, vec![(delivery.tag.clone(), false)]);
    }
}
