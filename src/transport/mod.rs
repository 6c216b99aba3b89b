//! Transport layer
//!
//! The adapter never talks to the network itself. Everything below the
//! connection state machine goes through a [`BrokerClient`], and every
//! lifecycle or message event travels back as a [`BrokerEvent`] over a single
//! channel handed to the [`BrokerConnector`] when the client is built.

use crate::config::MqttConfig;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::connection::BrokerEvent;
pub use rumqttc::v5::mqttbytes::QoS;

/// Errors reported by a broker client implementation
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Outgoing request queue is full")]
    QueueFull,
    #[error("Invalid TLS material: {0}")]
    Tls(String),
}

/// Capability offered by the underlying MQTT library.
///
/// Implementations own framing, keep-alive, retransmission and their own
/// reconnect policy. They report what happens through the event channel they
/// were built with.
#[async_trait::async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Start connecting; completion is reported as [`BrokerEvent::Connected`]
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Disconnect and stop the event source
    async fn disconnect(&self) -> Result<(), BrokerError>;

    /// Publish, waiting for room in the outgoing queue
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError>;

    /// Enqueue a publish without waiting; fails when the queue is full
    fn try_publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError>;

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BrokerError>;

    async fn unsubscribe(&self, filter: &str) -> Result<(), BrokerError>;
}

/// Builds one broker client per `begin`
pub trait BrokerConnector: Send + Sync + 'static {
    type Client: BrokerClient;

    fn build(
        &self,
        config: &MqttConfig,
        events: mpsc::Sender<BrokerEvent>,
    ) -> Result<Self::Client, BrokerError>;
}

/// Default transport backed by rumqttc
pub type MqttTransport = mqtt::RumqttcConnector;
