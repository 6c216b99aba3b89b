//! Observability for the MQTT adapter
//!
//! Structured logging with tracing; span macros for MQTT and lifecycle work.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span};
