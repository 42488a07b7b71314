//! MQTT driver
//!
//! Every client queue maps onto an MQTT topic named after its transport
//! name. Router messages go to the router queue's topic. MQTT has no
//! negative acknowledgement, so a requeue is a republish flagged as
//! redelivered.

use super::{
    headers, into_delivery, processor_queue_name, require_topic, Delivery, Driver, DriverId,
    InboundMessage, TransportMessage,
};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::meta::QueueMetaRegistry;
use crate::protocol::Message;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Primitives an MQTT client must provide
#[async_trait]
pub trait MqttContext: Send + Sync {
    async fn publish(&self, topic: &str, message: &TransportMessage) -> ClientResult<()>;

    async fn subscribe(&self, topic: &str) -> ClientResult<()>;

    /// Wait at most `timeout` for a message on a subscribed topic
    async fn receive(&self, topic: &str, timeout: Duration)
        -> ClientResult<Option<InboundMessage>>;

    async fn ack(&self, tag: &str) -> ClientResult<()>;
}

pub struct MqttDriver {
    context: Arc<dyn MqttContext>,
    config: Arc<ClientConfig>,
    meta: Arc<QueueMetaRegistry>,
}

impl MqttDriver {
    pub fn new(
        context: Arc<dyn MqttContext>,
        config: Arc<ClientConfig>,
        meta: Arc<QueueMetaRegistry>,
    ) -> Self {
        Self {
            context,
            config,
            meta,
        }
    }

    fn create_transport_message(&self, message: &Message) -> ClientResult<TransportMessage> {
        if message.delay.is_some() {
            return Err(ClientError::unsupported("mqtt", "message delaying"));
        }
        transport_message(message)
    }
}

/// Expiration rides along as a header; the context maps it to the v5 expiry interval
fn transport_message(message: &Message) -> ClientResult<TransportMessage> {
    let mut transport = TransportMessage::from_client(message)?;
    if let Some(expire) = message.expire {
        transport
            .headers
            .insert(headers::EXPIRATION.to_string(), expire.as_millis().to_string());
    }
    Ok(transport)
}

#[async_trait]
impl Driver for MqttDriver {
    fn id(&self) -> DriverId {
        DriverId::MQTT
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
        let topic = self.config.router_queue_transport_name();
        let transport = self.create_transport_message(message)?;
        debug!(topic = %topic, "Publishing to router topic");
        self.context.publish(&topic, &transport).await
    }

    async fn send_to_processor(&self, message: &Message) -> ClientResult<()> {
        let queue = processor_queue_name(message)?;
        let topic = self.queue_address(queue)?;
        let transport = self.create_transport_message(message)?;
        debug!(topic = %topic, "Publishing to processor topic");
        self.context.publish(&topic, &transport).await
    }

    async fn receive(
        &self,
        queue_name: &str,
        timeout: Duration,
    ) -> ClientResult<Option<Delivery>> {
        let topic = self.queue_address(queue_name)?;
        let inbound = self.context.receive(&topic, timeout).await?;
        Ok(inbound.map(|inbound| into_delivery(queue_name, &topic, inbound)))
    }

    async fn acknowledge(&self, delivery: &Delivery) -> ClientResult<()> {
        self.context.ack(&delivery.tag).await
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> ClientResult<()> {
        self.context.ack(&delivery.tag).await?;
        if requeue {
            let mut transport = transport_message(&delivery.message)?;
            transport.redelivered = true;
            debug!(topic = %delivery.address, "Republishing rejected message");
            self.context.publish(&delivery.address, &transport).await?;
        }
        Ok(())
    }

    async fn setup_broker(&self) -> ClientResult<()> {
        let router = self.config.router_queue_transport_name();
        info!(topic = %router, "Subscribing to router and processor topics");
        self.context.subscribe(&router).await?;
        for meta in self.meta.queues_meta() {
            if meta.transport_name != router {
                self.context.subscribe(&meta.transport_name).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::properties;
    use crate::testing::mocks::MockMqttContext;

    fn driver() -> (MqttDriver, Arc<MockMqttContext>) {
        let context = Arc::new(MockMqttContext::new());
        let config = Arc::new(ClientConfig::default());
        let meta = Arc::new(
            QueueMetaRegistry::builder(config.clone())
                .add_processor("work", "resize")
                .build(),
        );
        (MqttDriver::new(context.clone(), config, meta), context)
    }

    #[tokio::test]
    async fn test_topics_follow_queue_names() {
        let (driver, context) = driver();
        let event = Message::new("e").with_property(properties::TOPIC_NAME, "image.uploaded");
        let command = Message::new("c")
            .with_property(properties::PROCESSOR_NAME, "resize")
            .with_property(properties::PROCESSOR_QUEUE_NAME, "work");
        driver.send_to_router(&event).await.unwrap();
        driver.send_to_processor(&command).await.unwrap();

        let published = context.published().await;
        assert_eq!(published[0].0, "courier.app.default");
        assert_eq!(published[1].0, "courier.app.work");
    }

    #[tokio::test]
    async fn test_setup_subscribes_each_topic_once() {
        let (driver, context) = driver();
        driver.setup_broker().await.unwrap();
        assert_eq!(
            context.subscriptions().await,
            vec!["courier.app.default", "courier.app.work"]
        );
    }

    #[tokio::test]
    async fn test_requeue_republishes() {
        let (driver, context) = driver();
        context
            .push_inbound(
                "courier.app.work",
                TransportMessage {
                    body: "again".to_string(),
                    ..Default::default()
                },
            )
            .await;
        let delivery = driver
            .receive("work", Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();

        driver.reject(&delivery, true).await.unwrap();
        let published = context.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "courier.app.work");
        assert!(published[0].1.redelivered);
    }

    #[tokio::test]
    async fn test_expiration_reaches_published_headers() {
        let (driver, context) = driver();
        let command = Message::new("c")
            .with_property(properties::PROCESSOR_NAME, "resize")
            .with_property(properties::PROCESSOR_QUEUE_NAME, "work")
            .with_expire(Duration::from_secs(5));
        driver.send_to_processor(&command).await.unwrap();

        let published = context.published().await;
        assert_eq!(published[0].1.headers[headers::EXPIRATION], "5000");
    }

    #[tokio::test]
    async fn test_requeue_keeps_expiration() {
        let (driver, context) = driver();
        let mut inbound = TransportMessage {
            body: "again".to_string(),
            ..Default::default()
        };
        inbound
            .headers
            .insert(headers::EXPIRATION.to_string(), "1500".to_string());
        context.push_inbound("courier.app.work", inbound).await;
        let delivery = driver
            .receive("work", Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();

        driver.reject(&delivery, true).await.unwrap();
        let published = context.published().await;
        assert_eq!(published[0].1.headers[headers::EXPIRATION], "1500");
    }

    #[tokio::test]
    async fn test_delay_unsupported() {
        let (driver, _) = driver();
        let message = Message::new("c")
            .with_property(properties::PROCESSOR_NAME, "resize")
            .with_property(properties::PROCESSOR_QUEUE_NAME, "work")
            .with_delay(Duration::from_secs(1));
        assert!(matches!(
            driver.send_to_processor(&message).await,
            Err(ClientError::Unsupported { .. })
        ));
    }
}
