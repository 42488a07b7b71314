//! Queue consumer loop
//!
//! Polls the bound queues through the [`Driver`], dispatches each delivery to
//! its processor and settles it according to the returned [`Verdict`]. The
//! loop stops when accumulated idle time exceeds the idle timeout or when
//! the shutdown flag flips.

use super::processor::{Processor, ProcessorRegistry, Verdict};
use crate::client::{Producer, RouterProcessor};
use crate::driver::{Delivery, Driver};
use crate::error::ClientResult;
use crate::protocol::properties;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Consumer loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    IdleWait,
    Receiving,
    Processing,
    Stopped,
}

/// Why [`QueueConsumer::consume`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    IdleTimeout,
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::IdleTimeout => f.write_str("idle timeout"),
            StopReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

pub struct QueueConsumer {
    driver: Arc<dyn Driver>,
    processors: ProcessorRegistry,
    fallback: Option<Arc<dyn Processor>>,
    queues: Vec<String>,
    idle_timeout: Option<Duration>,
    receive_timeout: Duration,
    redelivery: Option<Producer>,
    shutdown: Option<watch::Receiver<bool>>,
    state: ConsumerState,
}

impl QueueConsumer {
    /// Consumer over `driver`; the router processor is registered under the
    /// configured router processor name unless `processors` already has one
    pub fn new(driver: Arc<dyn Driver>, processors: ProcessorRegistry) -> Self {
        let router_name = driver.config().router_processor.clone();
        let processors = if processors.get(&router_name).is_some() {
            processors
        } else {
            processors.add(router_name, Arc::new(RouterProcessor::new(driver.clone())))
        };

        Self {
            driver,
            processors,
            fallback: None,
            queues: Vec::new(),
            idle_timeout: None,
            receive_timeout: Duration::from_millis(100),
            redelivery: None,
            shutdown: None,
            state: ConsumerState::IdleWait,
        }
    }

    /// Add a client queue to poll
    pub fn bind<S: Into<String>>(mut self, queue: S) -> Self {
        let queue = queue.into();
        if !self.queues.contains(&queue) {
            self.queues.push(queue);
        }
        self
    }

    /// `None` or zero keeps the loop running until shutdown
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    /// Processor for messages naming a processor that is not registered
    pub fn with_fallback(mut self, processor: Arc<dyn Processor>) -> Self {
        self.fallback = Some(processor);
        self
    }

    /// Re-send redelivered messages through `producer` instead of processing them
    pub fn with_redelivery(mut self, producer: Producer) -> Self {
        self.redelivery = Some(producer);
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Queues polled by [`QueueConsumer::consume`]; every registered queue when none were bound
    pub fn queues(&self) -> Vec<String> {
        if !self.queues.is_empty() {
            return self.queues.clone();
        }
        self.driver
            .queue_meta()
            .queues_meta()
            .into_iter()
            .map(|meta| meta.client_name)
            .collect()
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run until the idle timeout or the shutdown flag stops the loop.
    ///
    /// Driver and processor errors stop the loop and are returned.
    pub async fn consume(&mut self) -> ClientResult<StopReason> {
        let queues = self.queues();
        info!(
            queues = ?queues,
            driver = %self.driver.id(),
            receive_timeout_ms = self.receive_timeout.as_millis() as u64,
            idle_timeout_ms = self.idle_timeout.map(|t| t.as_millis() as u64),
            "Consumer started"
        );

        let result = self.run(&queues).await;
        self.state = ConsumerState::Stopped;
        match &result {
            Ok(reason) => info!(reason = %reason, "Consumer stopped"),
            Err(e) => error!(error = %e, "Consumer failed"),
        }
        result
    }

    async fn run(&mut self, queues: &[String]) -> ClientResult<StopReason> {
        let mut idle = Duration::ZERO;

        loop {
            if self.shutdown_requested() {
                return Ok(StopReason::Shutdown);
            }

            let cycle_started = Instant::now();
            let mut received = false;
            self.state = ConsumerState::Receiving;

            for queue in queues {
                if let Some(delivery) = self.driver.receive(queue, self.receive_timeout).await? {
                    received = true;
                    self.state = ConsumerState::Processing;
                    self.handle(delivery).await?;
                    self.state = ConsumerState::Receiving;
                }
            }

            if received {
                idle = Duration::ZERO;
                continue;
            }

            // An empty cycle always costs at least one receive timeout
            self.state = ConsumerState::IdleWait;
            let remaining = self.receive_timeout.saturating_sub(cycle_started.elapsed());
            if !remaining.is_zero() {
                self.idle_wait(remaining).await;
            }
            idle += cycle_started.elapsed();

            if let Some(limit) = self.idle_timeout {
                if idle > limit {
                    debug!(idle_ms = idle.as_millis() as u64, "Idle timeout exceeded");
                    return Ok(StopReason::IdleTimeout);
                }
            }
        }
    }

    async fn idle_wait(&mut self, duration: Duration) {
        match self.shutdown.as_mut() {
            Some(rx) => {
                let _ = tokio::time::timeout(duration, rx.changed()).await;
            }
            None => tokio::time::sleep(duration).await,
        }
    }

    fn resolve_processor(&self, delivery: &Delivery) -> Option<Arc<dyn Processor>> {
        let message = &delivery.message;
        let name = match message.property(properties::PROCESSOR_NAME) {
            Some(name) => name,
            None if message.property(properties::TOPIC_NAME).is_some() => {
                self.driver.config().router_processor.as_str()
            }
            None => return None,
        };
        self.processors.get(name).or_else(|| self.fallback.clone())
    }

    async fn handle(&self, delivery: Delivery) -> ClientResult<()> {
        let span = crate::consume_span!(
            queue = %delivery.queue,
            message_id = delivery.message.message_id.as_deref().unwrap_or_default()
        );

        async {
            // Router messages carry no processor name and are routed again instead
            let redeliverable = delivery.message.redelivered
                && delivery.message.property(properties::PROCESSOR_NAME).is_some();
            if let (true, Some(producer)) = (redeliverable, &self.redelivery) {
                debug!("Redelivering with delay");
                if let Err(e) = producer.redeliver(delivery.message.clone()).await {
                    error!(error = %e, "Redelivery failed, requeueing");
                    self.driver.reject(&delivery, true).await?;
                    return Err(e);
                }
                return self.driver.reject(&delivery, false).await;
            }

            let Some(processor) = self.resolve_processor(&delivery) else {
                warn!(
                    processor = delivery.message.property(properties::PROCESSOR_NAME),
                    "No processor for message, rejecting"
                );
                return self.driver.reject(&delivery, false).await;
            };

            let verdict = match processor.process(&delivery.message).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    error!(error = %e, "Processor failed, requeueing");
                    self.driver.reject(&delivery, true).await?;
                    return Err(e);
                }
            };

            match verdict {
                Verdict::Ack => self.driver.acknowledge(&delivery).await?,
                Verdict::Reject => self.driver.reject(&delivery, false).await?,
                Verdict::Requeue => self.driver.reject(&delivery, true).await?,
            }
            info!(verdict = %verdict, "Message processed");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
