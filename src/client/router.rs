//! Router processor
//!
//! Consumes topic messages from the router queue and fans each one out to
//! every `(processor, queue)` route subscribed to its topic.

use crate::consumption::{Processor, Verdict};
use crate::driver::Driver;
use crate::error::ClientResult;
use crate::protocol::{properties, Message};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RouterProcessor {
    driver: Arc<dyn Driver>,
}

impl RouterProcessor {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl Processor for RouterProcessor {
    async fn process(&self, message: &Message) -> ClientResult<Verdict> {
        let Some(topic) = message.property(properties::TOPIC_NAME) else {
            warn!(
                message_id = message.message_id.as_deref().unwrap_or_default(),
                "Router received a message without a topic"
            );
            return Ok(Verdict::Reject);
        };

        let routes = self.driver.queue_meta().topic_routes(topic);
        if routes.is_empty() {
            debug!(topic = %topic, "No subscribers for topic");
        }

        for (processor, queue) in routes {
            let mut copy = message.clone();
            copy.redelivered = false;
            copy.set_property(properties::PROCESSOR_NAME, processor.as_str());
            copy.set_property(properties::PROCESSOR_QUEUE_NAME, queue.as_str());
            debug!(topic = %topic, processor = %processor, queue = %queue, "Routing topic message");
            self.driver.send_to_processor(&copy).await?;
        }

        Ok(Verdict::Ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::RecordingDriver;

    #[tokio::test]
    async fn test_fans_out_to_every_route() {
        let driver = Arc::new(RecordingDriver::with_meta(|builder| {
            builder
                .add_processor("images", "resize")
                .add_processor("images", "thumbnail")
                .subscribe("images", "image.uploaded")
                .subscribe("audit", "image.uploaded")
        }));
        let router = RouterProcessor::new(driver.clone());
        let message = Message::new("{}").with_property(properties::TOPIC_NAME, "image.uploaded");

        assert_eq!(router.process(&message).await.unwrap(), Verdict::Ack);

        let sent = driver.processor_messages().await;
        let routes: Vec<(&str, &str)> = sent
            .iter()
            .map(|m| {
                (
                    m.property(properties::PROCESSOR_NAME).unwrap(),
                    m.property(properties::PROCESSOR_QUEUE_NAME).unwrap(),
                )
            })
            .collect();
        assert_eq!(
            routes,
            vec![
                ("image.uploaded", "audit"),
                ("resize", "images"),
                ("thumbnail", "images"),
            ]
        );
    }

    #[tokio::test]
    async fn test_rejects_message_without_topic() {
        let driver = Arc::new(RecordingDriver::new());
        let router = RouterProcessor::new(driver.clone());
        assert_eq!(router.process(&Message::new("x")).await.unwrap(), Verdict::Reject);
        assert!(driver.processor_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribed_topic_is_acked() {
        let driver = Arc::new(RecordingDriver::new());
        let router = RouterProcessor::new(driver.clone());
        let message = Message::new("x").with_property(properties::TOPIC_NAME, "nobody.listens");
        assert_eq!(router.process(&message).await.unwrap(), Verdict::Ack);
        assert!(driver.processor_messages().await.is_empty());
    }
}
