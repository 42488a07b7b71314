//! Consumer side of the client

pub mod consumer;
pub mod processor;

pub use consumer::{ConsumerState, QueueConsumer, StopReason};
pub use processor::{FnProcessor, Processor, ProcessorRegistry, Verdict};
