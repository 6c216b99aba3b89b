//! Testing utilities and mock implementations
//!
//! Lets the adapter's lifecycle be exercised without a running MQTT broker.

pub mod mocks;

pub use mocks::*;
