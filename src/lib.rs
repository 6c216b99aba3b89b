//! MQTT client adapter
//!
//! Keeps one logical connection to an MQTT broker, tracks its lifecycle and
//! routes every inbound message to the listeners whose topic filter matches.
//! Framing, TLS, keep-alive and retransmission are left to rumqttc.
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_adapter::transport::mqtt::matches;
//!
//! assert!(matches("sensors/+/temperature", "sensors/kitchen/temperature"));
//! assert!(matches("sensors/#", "sensors"));
//! assert!(!matches("#", "$SYS/broker/uptime"));
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod testing;
pub mod transport;

pub use config::{AdapterConfig, ConfigError, MqttConfig};
pub use error::{AdapterError, AdapterResult};
pub use transport::mqtt::{ConnectionState, MqttClient, MqttError};
pub use transport::{BrokerClient, BrokerConnector, BrokerError, BrokerEvent};
