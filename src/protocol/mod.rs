//! Connection strings and the client message model
//!
//! This module holds the broker-independent data types shared by the
//! driver layer, the producer pipeline and the consumer loop.

pub mod dsn;
pub mod message;

pub use dsn::ConnectionDescriptor;
pub use message::*;
