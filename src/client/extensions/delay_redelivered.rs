//! Redelivery delay
//!
//! Stamps a fixed delay on messages flagged as redelivered. Honouring the
//! delay is up to the driver and broker.

use crate::client::{Extension, PreSend};
use crate::error::ClientResult;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct DelayRedeliveredExtension {
    delay: Duration,
}

impl DelayRedeliveredExtension {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Extension for DelayRedeliveredExtension {
    fn name(&self) -> &str {
        "delay_redelivered"
    }

    fn on_pre_send(&self, context: &mut PreSend<'_>) -> ClientResult<()> {
        if !context.message.redelivered {
            return Ok(());
        }

        debug!(
            destination = %context.destination(),
            delay_ms = self.delay.as_millis() as u64,
            "Delaying redelivered message"
        );
        context.message.delay = Some(self.delay);
        Ok(())
    }
}
