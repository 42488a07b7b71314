//! Built-in send pipeline extensions

pub mod delay_redelivered;
pub mod prepare_body;

pub use delay_redelivered::DelayRedeliveredExtension;
pub use prepare_body::PrepareBodyExtension;
