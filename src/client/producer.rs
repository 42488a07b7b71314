//! Producer and send pipeline

use super::extensions::PrepareBodyExtension;
use super::{Extension, PreSend};
use crate::driver::Driver;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{properties, Destination, Message};
use std::sync::Arc;
use tracing::{debug, warn, Instrument};

/// Publishes messages to topics and commands through a driver
#[derive(Clone)]
pub struct Producer {
    driver: Arc<dyn Driver>,
    extensions: Vec<Arc<dyn Extension>>,
}

impl Producer {
    /// Producer with body normalization as the only extension
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            extensions: vec![Arc::new(PrepareBodyExtension::new())],
        }
    }

    /// Append an extension; it runs after every previously added one
    pub fn with_extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn extension_names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    /// Send to a topic or a command
    pub async fn send(&self, destination: &Destination, message: Message) -> ClientResult<()> {
        match destination {
            Destination::Topic(topic) => self.send_event(topic, message).await,
            Destination::Command(command) => self.send_command(command, message).await,
        }
    }

    /// Fan-out send: every queue subscribed to `topic` gets a copy
    pub async fn send_event(&self, topic: &str, mut message: Message) -> ClientResult<()> {
        let destination = Destination::topic(topic);
        let span = crate::send_span!(destination = %destination);
        async {
            self.run_pipeline(&destination, &mut message)?;

            if message.property(properties::PROCESSOR_NAME).is_some() {
                return Err(ClientError::invalid_body(format!(
                    "The {} property must not be set on topic messages",
                    properties::PROCESSOR_NAME
                )));
            }
            message.set_property(properties::TOPIC_NAME, topic);

            self.transmit(&destination, message).await
        }
        .instrument(span)
        .await
    }

    /// Point-to-point send handled by exactly one processor
    pub async fn send_command(&self, command: &str, mut message: Message) -> ClientResult<()> {
        let destination = Destination::command(command);
        let span = crate::send_span!(destination = %destination);
        async {
            self.run_pipeline(&destination, &mut message)?;

            message.set_property(properties::COMMAND_NAME, command);
            if message.property(properties::PROCESSOR_NAME).is_none() {
                message.set_property(properties::PROCESSOR_NAME, command);
            }
            if message.property(properties::PROCESSOR_QUEUE_NAME).is_none() {
                let queue = self.command_queue(command);
                message.set_property(properties::PROCESSOR_QUEUE_NAME, queue);
            }

            self.transmit(&destination, message).await
        }
        .instrument(span)
        .await
    }

    /// Re-send a received message to the processor queue it came from
    pub async fn redeliver(&self, mut message: Message) -> ClientResult<()> {
        let processor = message
            .property(properties::PROCESSOR_NAME)
            .ok_or_else(|| ClientError::MissingProperty("Processor name".to_string()))?
            .to_string();
        let destination = Destination::command(processor);
        let span = crate::send_span!(destination = %destination, redelivery = true);
        async {
            self.run_pipeline(&destination, &mut message)?;
            self.transmit(&destination, message).await
        }
        .instrument(span)
        .await
    }

    /// Queue hosting `command`: the first queue listing it as a processor,
    /// otherwise the default processor queue
    fn command_queue(&self, command: &str) -> String {
        self.driver
            .queue_meta()
            .queues_meta()
            .into_iter()
            .find(|meta| meta.processors.iter().any(|p| p == command))
            .map(|meta| meta.client_name)
            .unwrap_or_else(|| self.driver.config().default_processor_queue.clone())
    }

    fn run_pipeline(&self, destination: &Destination, message: &mut Message) -> ClientResult<()> {
        for extension in &self.extensions {
            let mut context = PreSend::new(destination, message, self);
            if let Err(e) = extension.on_pre_send(&mut context) {
                warn!(extension = extension.name(), error = %e, "Send pipeline aborted");
                return Err(e);
            }
        }
        Ok(())
    }

    async fn transmit(&self, destination: &Destination, mut message: Message) -> ClientResult<()> {
        if message.body_text().is_none() {
            return Err(ClientError::invalid_body(format!(
                "The message's body must be a string before transmission. Got: {}",
                message.body.type_name()
            )));
        }
        if message.message_id.is_none() {
            message.message_id = Some(uuid::Uuid::new_v4().to_string());
        }
        if message.timestamp.is_none() {
            message.timestamp = Some(chrono::Utc::now().timestamp());
        }

        if destination.is_topic() {
            self.driver.send_to_router(&message).await?;
        } else {
            self.driver.send_to_processor(&message).await?;
        }
        debug!(
            message_id = message.message_id.as_deref().unwrap_or_default(),
            driver = %self.driver.id(),
            "Message sent"
        );

        for extension in &self.extensions {
            extension.on_post_send(destination, &message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Body, OpaqueObject};
    use crate::testing::mocks::RecordingDriver;
    use std::sync::Mutex;

    fn producer() -> (Producer, Arc<RecordingDriver>) {
        let driver = Arc::new(RecordingDriver::new());
        (Producer::new(driver.clone()), driver)
    }

    #[tokio::test]
    async fn test_event_is_stamped_and_routed() {
        let (producer, driver) = producer();
        producer
            .send_event("user.created", Message::new("hi"))
            .await
            .unwrap();

        let sent = driver.router_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].property(properties::TOPIC_NAME), Some("user.created"));
        assert_eq!(sent[0].content_type.as_deref(), Some("text/plain"));
        assert!(sent[0].message_id.is_some());
        assert!(sent[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn test_command_defaults_processor_and_queue() {
        let (producer, driver) = producer();
        producer
            .send(&Destination::command("resize"), Message::new("img"))
            .await
            .unwrap();

        let sent = driver.processor_messages().await;
        assert_eq!(sent[0].property(properties::COMMAND_NAME), Some("resize"));
        assert_eq!(sent[0].property(properties::PROCESSOR_NAME), Some("resize"));
        assert_eq!(sent[0].property(properties::PROCESSOR_QUEUE_NAME), Some("default"));
    }

    #[tokio::test]
    async fn test_command_uses_queue_listing_the_processor() {
        let driver = Arc::new(RecordingDriver::with_meta(|builder| {
            builder.add_processor("images", "resize")
        }));
        let producer = Producer::new(driver.clone());
        producer.send_command("resize", Message::new("img")).await.unwrap();

        let sent = driver.processor_messages().await;
        assert_eq!(sent[0].property(properties::PROCESSOR_QUEUE_NAME), Some("images"));
    }

    #[tokio::test]
    async fn test_event_must_not_carry_processor() {
        let (producer, driver) = producer();
        let message = Message::new("x").with_property(properties::PROCESSOR_NAME, "p");
        assert!(producer.send_event("t", message).await.is_err());
        assert!(driver.router_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_failure_prevents_transmission() {
        let (producer, driver) = producer();
        let message = Message::new(Body::object(OpaqueObject::new("Socket")));
        let result = producer.send_event("t", message).await;
        assert!(matches!(result, Err(ClientError::InvalidBody { .. })));
        assert!(driver.router_messages().await.is_empty());
    }

    struct Recorder(Mutex<Vec<String>>);

    impl Extension for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_pre_send(&self, context: &mut PreSend<'_>) -> ClientResult<()> {
            // Body normalization has already run
            let body = context.message.body_text().unwrap_or("<not text>").to_string();
            self.0.lock().unwrap().push(format!("pre:{body}"));
            Ok(())
        }

        fn on_post_send(&self, destination: &Destination, _message: &Message) {
            self.0.lock().unwrap().push(format!("post:{destination}"));
        }
    }

    #[tokio::test]
    async fn test_extensions_run_in_order() {
        let (producer, _driver) = producer();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let producer = producer.with_extension(recorder.clone());
        assert_eq!(producer.extension_names(), vec!["prepare_body", "recorder"]);

        producer.send_event("t", Message::new(5)).await.unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec!["pre:5", "post:topic:t"]);
    }

    struct ContextRecorder(Mutex<Vec<String>>);

    impl Extension for ContextRecorder {
        fn name(&self) -> &str {
            "context"
        }

        fn on_pre_send(&self, context: &mut PreSend<'_>) -> ClientResult<()> {
            let seen = format!(
                "{}:{}:{}",
                context.driver().id(),
                context.producer().extension_names().join(","),
                context.destination()
            );
            self.0.lock().unwrap().push(seen);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_extension_sees_producer_and_driver() {
        let (producer, _driver) = producer();
        let context = Arc::new(ContextRecorder(Mutex::new(Vec::new())));
        let producer = producer.with_extension(context.clone());

        producer.send_command("resize", Message::new("x")).await.unwrap();
        assert_eq!(
            *context.0.lock().unwrap(),
            vec!["memory:prepare_body,context:command:resize"]
        );
    }

    #[tokio::test]
    async fn test_redeliver_requires_processor() {
        let (producer, driver) = producer();
        assert!(matches!(
            producer.redeliver(Message::new("x")).await,
            Err(ClientError::MissingProperty(_))
        ));

        let message = Message::new("x")
            .with_property(properties::PROCESSOR_NAME, "p")
            .with_property(properties::PROCESSOR_QUEUE_NAME, "default");
        producer.redeliver(message).await.unwrap();
        assert_eq!(driver.processor_messages().await.len(), 1);
    }
}
