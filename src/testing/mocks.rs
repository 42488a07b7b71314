//! Mock implementations for testing
//!
//! Recording broker contexts, a recording [`Driver`] and a scripted
//! [`Processor`], so drivers, the producer and the consumer can be exercised
//! without a running broker.

use crate::config::ClientConfig;
use crate::consumption::{Processor, Verdict};
use crate::driver::{
    AmqpContext, AmqpExchange, AmqpQueue, Delivery, Driver, DriverId, InboundMessage,
    MqttContext, StompContext, TransportMessage,
};
use crate::error::{ClientError, ClientResult};
use crate::meta::{QueueMetaRegistry, QueueMetaRegistryBuilder};
use crate::protocol::Message;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Per-address queues of inbound messages, handed out with fresh tags
#[derive(Debug, Default)]
struct Inbox {
    queues: Mutex<HashMap<String, VecDeque<TransportMessage>>>,
    next_tag: AtomicU64,
}

impl Inbox {
    async fn push(&self, address: &str, message: TransportMessage) {
        self.queues
            .lock()
            .await
            .entry(address.to_string())
            .or_default()
            .push_back(message);
    }

    async fn pop(&self, address: &str) -> Option<InboundMessage> {
        let message = self.queues.lock().await.get_mut(address)?.pop_front()?;
        let tag = format!("tag-{}", self.next_tag.fetch_add(1, Ordering::Relaxed));
        Some(InboundMessage { tag, message })
    }
}

fn mock_failure(operation: &str) -> ClientError {
    ClientError::broker_io(format!("Mock {operation} failure"))
}

/// Recorded AMQP context call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmqpCall {
    /// Exchange name and kind
    DeclareExchange(String, String),
    DeclareQueue(String),
    /// Exchange and queue
    Bind(String, String),
    Ack(String),
    Reject(String, bool),
}

pub type PublishedAmqpMessage = (String, String, TransportMessage);

/// Mock AMQP context
#[derive(Debug, Default)]
pub struct MockAmqpContext {
    calls: Arc<Mutex<Vec<AmqpCall>>>,
    published: Arc<Mutex<Vec<PublishedAmqpMessage>>>,
    inbox: Inbox,
    pub should_fail: bool,
}

impl MockAmqpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<AmqpCall> {
        self.calls.lock().await.clone()
    }

    /// `(exchange, routing key, message)` triples in publish order
    pub async fn published(&self) -> Vec<PublishedAmqpMessage> {
        self.published.lock().await.clone()
    }

    /// Make a message available to `basic_get` on `queue`
    pub async fn push_inbound(&self, queue: &str, message: TransportMessage) {
        self.inbox.push(queue, message).await;
    }

    async fn record(&self, call: AmqpCall) -> ClientResult<()> {
        if self.should_fail {
            return Err(mock_failure("amqp"));
        }
        self.calls.lock().await.push(call);
        Ok(())
    }
}

#[async_trait]
impl AmqpContext for MockAmqpContext {
    async fn declare_exchange(&self, exchange: &AmqpExchange) -> ClientResult<()> {
        self.record(AmqpCall::DeclareExchange(
            exchange.name.clone(),
            exchange.kind.as_str().to_string(),
        ))
        .await
    }

    async fn declare_queue(&self, queue: &AmqpQueue) -> ClientResult<()> {
        self.record(AmqpCall::DeclareQueue(queue.name.clone())).await
    }

    async fn bind(&self, exchange: &str, queue: &str, _routing_key: &str) -> ClientResult<()> {
        self.record(AmqpCall::Bind(exchange.to_string(), queue.to_string()))
            .await
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &TransportMessage,
    ) -> ClientResult<()> {
        if self.should_fail {
            return Err(mock_failure("publish"));
        }
        self.published.lock().await.push((
            exchange.to_string(),
            routing_key.to_string(),
            message.clone(),
        ));
        Ok(())
    }

    async fn basic_get(
        &self,
        queue: &str,
        _timeout: Duration,
    ) -> ClientResult<Option<InboundMessage>> {
        if self.should_fail {
            return Err(mock_failure("receive"));
        }
        Ok(self.inbox.pop(queue).await)
    }

    async fn ack(&self, tag: &str) -> ClientResult<()> {
        self.record(AmqpCall::Ack(tag.to_string())).await
    }

    async fn reject(&self, tag: &str, requeue: bool) -> ClientResult<()> {
        self.record(AmqpCall::Reject(tag.to_string(), requeue)).await
    }
}

/// Mock STOMP context
#[derive(Debug, Default)]
pub struct MockStompContext {
    sent: Arc<Mutex<Vec<(String, TransportMessage)>>>,
    acked: Arc<Mutex<Vec<String>>>,
    nacked: Arc<Mutex<Vec<(String, bool)>>>,
    inbox: Inbox,
    pub should_fail: bool,
}

impl MockStompContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// `(destination, message)` pairs in send order
    pub async fn sent(&self) -> Vec<(String, TransportMessage)> {
        self.sent.lock().await.clone()
    }

    pub async fn acked(&self) -> Vec<String> {
        self.acked.lock().await.clone()
    }

    pub async fn nacked(&self) -> Vec<(String, bool)> {
        self.nacked.lock().await.clone()
    }

    pub async fn push_inbound(&self, destination: &str, message: TransportMessage) {
        self.inbox.push(destination, message).await;
    }
}

#[async_trait]
impl StompContext for MockStompContext {
    async fn send(&self, destination: &str, message: &TransportMessage) -> ClientResult<()> {
        if self.should_fail {
            return Err(mock_failure("send"));
        }
        self.sent
            .lock()
            .await
            .push((destination.to_string(), message.clone()));
        Ok(())
    }

    async fn receive(
        &self,
        destination: &str,
        _timeout: Duration,
    ) -> ClientResult<Option<InboundMessage>> {
        if self.should_fail {
            return Err(mock_failure("receive"));
        }
        Ok(self.inbox.pop(destination).await)
    }

    async fn ack(&self, tag: &str) -> ClientResult<()> {
        self.acked.lock().await.push(tag.to_string());
        Ok(())
    }

    async fn nack(&self, tag: &str, requeue: bool) -> ClientResult<()> {
        self.nacked.lock().await.push((tag.to_string(), requeue));
        Ok(())
    }
}

/// Mock MQTT context
#[derive(Debug, Default)]
pub struct MockMqttContext {
    published: Arc<Mutex<Vec<(String, TransportMessage)>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    inbox: Inbox,
    pub should_fail: bool,
}

impl MockMqttContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub async fn published(&self) -> Vec<(String, TransportMessage)> {
        self.published.lock().await.clone()
    }

    /// Subscribed topics in subscription order
    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn push_inbound(&self, topic: &str, message: TransportMessage) {
        self.inbox.push(topic, message).await;
    }
}

#[async_trait]
impl MqttContext for MockMqttContext {
    async fn publish(&self, topic: &str, message: &TransportMessage) -> ClientResult<()> {
        if self.should_fail {
            return Err(mock_failure("publish"));
        }
        self.published
            .lock()
            .await
            .push((topic.to_string(), message.clone()));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> ClientResult<()> {
        if self.should_fail {
            return Err(mock_failure("subscribe"));
        }
        self.subscriptions.lock().await.push(topic.to_string());
        Ok(())
    }

    async fn receive(
        &self,
        topic: &str,
        _timeout: Duration,
    ) -> ClientResult<Option<InboundMessage>> {
        if self.should_fail {
            return Err(mock_failure("receive"));
        }
        Ok(self.inbox.pop(topic).await)
    }

    async fn ack(&self, _tag: &str) -> ClientResult<()> {
        Ok(())
    }
}

/// Driver that records what the producer hands it
pub struct RecordingDriver {
    config: Arc<ClientConfig>,
    meta: Arc<QueueMetaRegistry>,
    router_messages: Arc<Mutex<Vec<Message>>>,
    processor_messages: Arc<Mutex<Vec<Message>>>,
    settled: Arc<Mutex<Vec<(String, Verdict)>>>,
    pub should_fail: bool,
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self::with_meta(|builder| builder)
    }
}

impl RecordingDriver {
    /// Default naming, only the built-in queues registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Default naming with extra queue metadata
    pub fn with_meta<F>(configure: F) -> Self
    where
        F: FnOnce(QueueMetaRegistryBuilder) -> QueueMetaRegistryBuilder,
    {
        let config = Arc::new(ClientConfig::default());
        let meta = Arc::new(configure(QueueMetaRegistry::builder(config.clone())).build());
        Self {
            config,
            meta,
            router_messages: Arc::new(Mutex::new(Vec::new())),
            processor_messages: Arc::new(Mutex::new(Vec::new())),
            settled: Arc::new(Mutex::new(Vec::new())),
            should_fail: false,
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub async fn router_messages(&self) -> Vec<Message> {
        self.router_messages.lock().await.clone()
    }

    pub async fn processor_messages(&self) -> Vec<Message> {
        self.processor_messages.lock().await.clone()
    }

    /// `(tag, verdict)` for every settled delivery
    pub async fn settled(&self) -> Vec<(String, Verdict)> {
        self.settled.lock().await.clone()
    }
}

#[async_trait]
impl Driver for RecordingDriver {
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
        if self.should_fail {
            return Err(mock_failure("send"));
        }
        self.router_messages.lock().await.push(message.clone());
        Ok(())
    }

    async fn send_to_processor(&self, message: &Message) -> ClientResult<()> {
        if self.should_fail {
            return Err(mock_failure("send"));
        }
        self.processor_messages.lock().await.push(message.clone());
        Ok(())
    }

    async fn receive(
        &self,
        queue_name: &str,
        _timeout: Duration,
    ) -> ClientResult<Option<Delivery>> {
        self.queue_address(queue_name)?;
        Ok(None)
    }

    async fn acknowledge(&self, delivery: &Delivery) -> ClientResult<()> {
        self.settled
            .lock()
            .await
            .push((delivery.tag.clone(), Verdict::Ack));
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> ClientResult<()> {
        let verdict = if requeue {
            Verdict::Requeue
        } else {
            Verdict::Reject
        };
        self.settled.lock().await.push((delivery.tag.clone(), verdict));
        Ok(())
    }

    async fn setup_broker(&self) -> ClientResult<()> {
        Ok(())
    }
}

/// Processor returning scripted verdicts, then acking everything
#[derive(Debug, Default)]
pub struct ScriptedProcessor {
    verdicts: Mutex<VecDeque<Verdict>>,
    received: Arc<Mutex<Vec<Message>>>,
    pub should_fail: bool,
}

impl ScriptedProcessor {
    pub fn new<I: IntoIterator<Item = Verdict>>(verdicts: I) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn acking() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub async fn received(&self) -> Vec<Message> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl Processor for ScriptedProcessor {
    async fn process(&self, message: &Message) -> ClientResult<Verdict> {
        self.received.lock().await.push(message.clone());
        if self.should_fail {
            return Err(ClientError::processor("Mock processor failure"));
        }
        Ok(self
            .verdicts
            .lock()
            .await
            .pop_front()
            .unwrap_or(Verdict::Ack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ExchangeKind;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_mock_amqp_context_records_calls() {
        let context = MockAmqpContext::new();
        let exchange = AmqpExchange {
            name: "courier.router".to_string(),
            kind: ExchangeKind::Fanout,
            durable: true,
            arguments: BTreeMap::new(),
        };
        context.declare_exchange(&exchange).await.unwrap();
        context.ack("t1").await.unwrap();

        assert_eq!(
            context.calls().await,
            vec![
                AmqpCall::DeclareExchange("courier.router".to_string(), "fanout".to_string()),
                AmqpCall::Ack("t1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_mock_contexts_fail_on_demand() {
        let message = TransportMessage::default();
        assert!(MockAmqpContext::with_failure()
            .publish("", "q", &message)
            .await
            .is_err());
        assert!(MockStompContext::with_failure()
            .send("/queue/q", &message)
            .await
            .is_err());
        assert!(MockMqttContext::with_failure()
            .publish("q", &message)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_inbox_hands_out_unique_tags() {
        let context = MockStompContext::new();
        context.push_inbound("/queue/q", TransportMessage::default()).await;
        context.push_inbound("/queue/q", TransportMessage::default()).await;

        let first = context
            .receive("/queue/q", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        let second = context
            .receive("/queue/q", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(first.tag, second.tag);
        assert!(context
            .receive("/queue/q", Duration::ZERO)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_scripted_processor() {
        let processor = ScriptedProcessor::new([Verdict::Requeue]);
        let message = Message::new("x");
        assert_eq!(processor.process(&message).await.unwrap(), Verdict::Requeue);
        assert_eq!(processor.process(&message).await.unwrap(), Verdict::Ack);
        assert_eq!(processor.received().await.len(), 2);

        let failing = ScriptedProcessor::with_failure();
        assert!(failing.process(&message).await.is_err());
    }

    #[tokio::test]
    async fn test_recording_driver_failure() {
        let driver = RecordingDriver::with_failure();
        assert!(driver.send_to_router(&Message::new("x")).await.is_err());
        assert!(driver.router_messages().await.is_empty());
    }
}
