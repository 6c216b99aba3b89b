//! MQTT client adapter
//!
//! Pure logic is kept apart from I/O so most of it can be tested without a
//! broker:
//!
//! - [`topic`] - topic filter parsing and wildcard matching
//! - [`listeners`] - ordered listener registry
//! - [`connection`] - connection state, broker events, errors and option building
//! - [`lifecycle`] - pure connection state transitions
//! - [`dispatcher`] - delivery of inbound messages to listeners
//! - [`message_handler`] - translation of rumqttc events
//! - [`rumqttc_broker`] - rumqttc-backed broker client
//! - [`client`] - the [`MqttClient`] coordinator
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_adapter::config::MqttConfig;
//! use mqtt_adapter::transport::mqtt::MqttClient;
//!
//! # tokio_test::block_on(async {
//! let client: MqttClient = MqttClient::default();
//! client
//!     .subscribe("home/+/temperature", |topic: &str, payload: &[u8]| {
//!         println!("{topic}: {}", String::from_utf8_lossy(payload));
//!     })
//!     .await?;
//! client.begin(MqttConfig::new("localhost", "home/heater/status")).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod lifecycle;
pub mod listeners;
pub mod message_handler;
pub mod rumqttc_broker;
pub mod topic;

// Re-export public types for convenience
pub use client::MqttClient;
pub use connection::{
    BrokerEvent, ConnectionState, DisconnectReason, ErrorKind, MqttError, OFFLINE_PAYLOAD,
    ONLINE_PAYLOAD,
};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use lifecycle::{LifecycleEvent, LifecycleMonitor};
pub use listeners::{ConnectCallback, Listener, ListenerRegistry, MessageCallback};
pub use message_handler::{EventRoute, MessageHandler};
pub use rumqttc_broker::{RumqttcBroker, RumqttcConnector};
pub use topic::{matches, validate_topic, Segment, TopicError, TopicFilter};
