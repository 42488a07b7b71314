//! Processor contract for the consumer loop

use crate::error::ClientResult;
use crate::protocol::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What the consumer should do with a processed message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Processed; remove from the queue
    Ack,
    /// Drop without redelivery
    Reject,
    /// Put back for another attempt
    Requeue,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verdict::Ack => "ack",
            Verdict::Reject => "reject",
            Verdict::Requeue => "requeue",
        };
        f.write_str(name)
    }
}

/// Message handler bound to a queue
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, message: &Message) -> ClientResult<Verdict>;
}

/// Named processors, looked up by the processor name property
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<S: Into<String>>(mut self, name: S, processor: Arc<dyn Processor>) -> Self {
        self.processors.insert(name.into(), processor);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.names())
            .finish()
    }
}

/// Adapts an async closure into a [`Processor`]
pub struct FnProcessor<F> {
    handler: F,
}

impl<F> FnProcessor<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ClientResult<Verdict>> + Send,
{
    async fn process(&self, message: &Message) -> ClientResult<Verdict> {
        (self.handler)(message.clone()).await
    }
}
