//! Testing utilities and mock implementations
//!
//! Mock broker contexts and drivers for exercising the client without a
//! running broker.

pub mod mocks;

pub use mocks::*;
