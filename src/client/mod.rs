//! Producer side of the client
//!
//! The [`Producer`] threads every outbound message through an ordered list of
//! [`Extension`]s before handing it to the driver. Body normalization is
//! always first; further extensions run in registration order.

use crate::driver::Driver;
use crate::error::ClientResult;
use crate::protocol::{Destination, Message};

pub mod extensions;
pub mod producer;
pub mod router;

pub use extensions::{DelayRedeliveredExtension, PrepareBodyExtension};
pub use producer::Producer;
pub use router::RouterProcessor;

/// State handed to each extension before transmission
pub struct PreSend<'a> {
    destination: &'a Destination,
    pub message: &'a mut Message,
    producer: &'a Producer,
}

impl<'a> PreSend<'a> {
    pub fn new(destination: &'a Destination, message: &'a mut Message, producer: &'a Producer) -> Self {
        Self {
            destination,
            message,
            producer,
        }
    }

    pub fn destination(&self) -> &Destination {
        self.destination
    }

    /// Producer running the pipeline
    pub fn producer(&self) -> &Producer {
        self.producer
    }

    pub fn driver(&self) -> &dyn Driver {
        self.producer.driver().as_ref()
    }
}

/// A send pipeline stage
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    /// Inspect or rewrite the message; an error aborts the send
    fn on_pre_send(&self, context: &mut PreSend<'_>) -> ClientResult<()>;

    /// Called after the driver accepted the message
    fn on_post_send(&self, _destination: &Destination, _message: &Message) {}
}
