//! In-process broker and its driver
//!
//! `MemoryBroker` keeps FIFO queues behind a tokio mutex and wakes blocked
//! receivers through a [`Notify`]. Delivered messages stay unacknowledged
//! until they are acked or rejected; a requeued message goes back to the
//! tail of its queue flagged as redelivered.

use super::{
    into_delivery, processor_queue_name, require_topic, Delivery, Driver, DriverId,
    InboundMessage, TransportMessage,
};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::meta::QueueMetaRegistry;
use crate::protocol::Message;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<TransportMessage>>,
    unacked: HashMap<String, (String, TransportMessage)>,
}

/// In-process broker used by `memory:`/`null:` connections and tests
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
    next_tag: AtomicU64,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the queue if it does not exist yet
    pub async fn declare_queue(&self, queue: &str) {
        let mut state = self.state.lock().await;
        state.queues.entry(queue.to_string()).or_default();
    }

    pub async fn publish(&self, queue: &str, message: TransportMessage) {
        {
            let mut state = self.state.lock().await;
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(message);
        }
        self.notify.notify_waiters();
    }

    async fn pop(&self, queue: &str) -> Option<InboundMessage> {
        let mut state = self.state.lock().await;
        let message = state.queues.get_mut(queue)?.pop_front()?;
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed).to_string();
        state
            .unacked
            .insert(tag.clone(), (queue.to_string(), message.clone()));
        Some(InboundMessage { tag, message })
    }

    /// Wait up to `timeout` for a message on `queue`
    pub async fn receive(&self, queue: &str, timeout: Duration) -> Option<InboundMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.pop(queue).await {
                return Some(message);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    pub async fn ack(&self, tag: &str) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state
            .unacked
            .remove(tag)
            .map(|_| ())
            .ok_or_else(|| ClientError::broker_io(format!("Unknown delivery tag {tag}")))
    }

    pub async fn reject(&self, tag: &str, requeue: bool) -> ClientResult<()> {
        let (queue, mut message) = {
            let mut state = self.state.lock().await;
            state
                .unacked
                .remove(tag)
                .ok_or_else(|| ClientError::broker_io(format!("Unknown delivery tag {tag}")))?
        };
        if requeue {
            message.redelivered = true;
            self.publish(&queue, message).await;
        }
        Ok(())
    }

    /// Messages waiting in a queue, not counting unacknowledged ones
    pub async fn queue_len(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(queue).map_or(0, VecDeque::len)
    }

    pub async fn unacked_len(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    pub async fn queue_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.queues.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Driver over a [`MemoryBroker`]; router messages land on the router queue
pub struct MemoryDriver {
    broker: Arc<MemoryBroker>,
    config: Arc<ClientConfig>,
    meta: Arc<QueueMetaRegistry>,
}

impl MemoryDriver {
    pub fn new(
        broker: Arc<MemoryBroker>,
        config: Arc<ClientConfig>,
        meta: Arc<QueueMetaRegistry>,
    ) -> Self {
        Self {
            broker,
            config,
            meta,
        }
    }

    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn id(&self) -> DriverId {
        DriverId::MEMORY
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
        let address = self.config.router_queue_transport_name();
        let transport = TransportMessage::from_client(message)?;
        debug!(queue = %address, "Publishing to router queue");
        self.broker.publish(&address, transport).await;
        Ok(())
    }

    async fn send_to_processor(&self, message: &Message) -> ClientResult<()> {
        let queue = processor_queue_name(message)?;
        let address = self.queue_address(queue)?;
        let transport = TransportMessage::from_client(message)?;

        if let Some(delay) = message.delay {
            debug!(queue = %address, delay_ms = delay.as_millis() as u64, "Scheduling delayed message");
            let broker = self.broker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                broker.publish(&address, transport).await;
            });
            return Ok(());
        }

        debug!(queue = %address, "Publishing to processor queue");
        self.broker.publish(&address, transport).await;
        Ok(())
    }

    async fn receive(
        &self,
        queue_name: &str,
        timeout: Duration,
    ) -> ClientResult<Option<Delivery>> {
        let address = self.queue_address(queue_name)?;
        let inbound = self.broker.receive(&address, timeout).await;
        Ok(inbound.map(|inbound| into_delivery(queue_name, &address, inbound)))
    }

    async fn acknowledge(&self, delivery: &Delivery) -> ClientResult<()> {
        self.broker.ack(&delivery.tag).await
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> ClientResult<()> {
        self.broker.reject(&delivery.tag, requeue).await
    }

    async fn setup_broker(&self) -> ClientResult<()> {
        let router_queue = self.config.router_queue_transport_name();
        info!(queue = %router_queue, "Declaring in-memory router queue");
        self.broker.declare_queue(&router_queue).await;
        for meta in self.meta.queues_meta() {
            self.broker.declare_queue(&meta.transport_name).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::properties;

    fn text(body: &str) -> TransportMessage {
        TransportMessage {
            body: body.to_string(),
            ..Default::default()
        }
    }

    fn driver() -> MemoryDriver {
        let config = Arc::new(ClientConfig::default());
        let meta = Arc::new(
            QueueMetaRegistry::builder(config.clone())
                .add_processor("work", "resize")
                .build(),
        );
        MemoryDriver::new(Arc::new(MemoryBroker::new()), config, meta)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let broker = MemoryBroker::new();
        broker.publish("q", text("one")).await;
        broker.publish("q", text("two")).await;

        let first = broker.receive("q", Duration::from_millis(5)).await.unwrap();
        let second = broker.receive("q", Duration::from_millis(5)).await.unwrap();
        assert_eq!(first.message.body, "one");
        assert_eq!(second.message.body, "two");
        assert_ne!(first.tag, second.tag);
    }

    #[tokio::test]
    async fn test_receive_times_out_empty() {
        let broker = MemoryBroker::new();
        let start = std::time::Instant::now();
        assert!(broker.receive("q", Duration::from_millis(20)).await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_blocked_receive_wakes_on_publish() {
        let broker = Arc::new(MemoryBroker::new());
        let receiver = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.receive("q", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.publish("q", text("late")).await;

        let received = receiver.await.unwrap().unwrap();
        assert_eq!(received.message.body, "late");
    }

    #[tokio::test]
    async fn test_requeue_marks_redelivered() {
        let broker = MemoryBroker::new();
        broker.publish("q", text("retry")).await;
        let first = broker.receive("q", Duration::from_millis(5)).await.unwrap();
        assert!(!first.message.redelivered);

        broker.reject(&first.tag, true).await.unwrap();
        let again = broker.receive("q", Duration::from_millis(5)).await.unwrap();
        assert!(again.message.redelivered);

        broker.reject(&again.tag, false).await.unwrap();
        assert_eq!(broker.queue_len("q").await, 0);
        assert_eq!(broker.unacked_len().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_tag_is_broker_error() {
        let broker = MemoryBroker::new();
        assert!(broker.ack("42").await.unwrap_err().is_broker_io());
    }

    #[tokio::test]
    async fn test_driver_routes_topic_messages_to_router_queue() {
        let driver = driver();
        let message = Message::new("hi").with_property(properties::TOPIC_NAME, "greeting");
        driver.send_to_router(&message).await.unwrap();
        assert_eq!(driver.broker().queue_len("courier.app.default").await, 1);
    }

    #[tokio::test]
    async fn test_delayed_processor_message_arrives_later() {
        let driver = driver();
        let message = Message::new("later")
            .with_property(properties::PROCESSOR_NAME, "resize")
            .with_property(properties::PROCESSOR_QUEUE_NAME, "work")
            .with_delay(Duration::from_millis(30));
        driver.send_to_processor(&message).await.unwrap();
        assert_eq!(driver.broker().queue_len("courier.app.work").await, 0);

        let delivery = driver
            .receive("work", Duration::from_secs(2))
            .await
            .unwrap()
            .expect("delayed message should arrive");
        assert_eq!(delivery.message.body_text(), Some("later"));
    }

    #[tokio::test]
    async fn test_setup_broker_declares_queues() {
        let driver = driver();
        driver.setup_broker().await.unwrap();
        driver.setup_broker().await.unwrap();
        assert_eq!(
            driver.broker().queue_names().await,
            vec!["courier.app.default", "courier.app.work"]
        );
    }
}
