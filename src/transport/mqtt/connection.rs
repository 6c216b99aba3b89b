//! Connection state, collaborator events and option building
//!
//! This module holds the plain data shared by the state machine and the
//! rumqttc collaborator: connection states, inbound events, disconnect
//! reasons, and the mapping from [`MqttConfig`] to rumqttc options.

use super::topic::TopicError;
use crate::config::{MqttConfig, MIN_KEEP_ALIVE_SECS};
use crate::transport::BrokerError;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Retained payload announced on the will topic once connected
pub const ONLINE_PAYLOAD: &str = "online";
/// Retained payload announced on shutdown and registered as last will
pub const OFFLINE_PAYLOAD: &str = "offline";

/// Connection state of the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or shut down
    Disabled,
    /// Waiting for the broker to accept the connection
    Connecting,
    /// Connected and ready for operations
    Connected,
    /// Connection lost; the collaborator will retry
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disabled => "disabled",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Coarse category of a collaborator error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// TCP/TLS level failure
    Transport,
    /// Broker refused or violated the protocol
    Protocol,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Why the collaborator lost (or never got) its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    TcpDisconnected,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    MalformedCredentials,
    NotAuthorized,
    /// The broker sent a DISCONNECT packet
    BrokerInitiated,
    Unknown,
}

impl DisconnectReason {
    /// Human readable description, used as the last error
    pub fn description(&self) -> &'static str {
        match self {
            DisconnectReason::TcpDisconnected => "TCP disconnected",
            DisconnectReason::UnacceptableProtocolVersion => "Unacceptable protocol version",
            DisconnectReason::IdentifierRejected => "ID rejected",
            DisconnectReason::ServerUnavailable => "Server unavailable",
            DisconnectReason::MalformedCredentials => "Malformed credentials",
            DisconnectReason::NotAuthorized => "Not authorized",
            DisconnectReason::BrokerInitiated => "Disconnected by broker",
            DisconnectReason::Unknown => "Unknown error",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DisconnectReason::TcpDisconnected => ErrorKind::Transport,
            DisconnectReason::UnacceptableProtocolVersion
            | DisconnectReason::IdentifierRejected
            | DisconnectReason::ServerUnavailable
            | DisconnectReason::MalformedCredentials
            | DisconnectReason::NotAuthorized
            | DisconnectReason::BrokerInitiated => ErrorKind::Protocol,
            DisconnectReason::Unknown => ErrorKind::Unknown,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Typed events delivered by a broker client into the adapter
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// A (re)connection attempt is about to start
    BeforeConnect,
    /// The broker accepted the connection
    Connected { session_present: bool },
    Disconnected { reason: DisconnectReason },
    /// Does not change state by itself
    Error { kind: ErrorKind, detail: String },
    /// Inbound publish. `index` and `total` describe the chunk position for
    /// clients that deliver large messages in parts.
    Message {
        topic: String,
        payload: Bytes,
        index: usize,
        total: usize,
    },
}

impl BrokerEvent {
    /// Convenience constructor for a complete, single-chunk message
    pub fn message(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let total = payload.len();
        BrokerEvent::Message {
            topic: topic.into(),
            payload,
            index: 0,
            total,
        }
    }
}

/// Errors returned by the adapter's public operations
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid topic filter: {0}")]
    InvalidFilter(#[source] TopicError),
    #[error("Invalid topic: {0}")]
    InvalidTopic(#[source] TopicError),
    #[error("Client has been shut down and cannot be reused")]
    Terminated,
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Map the adapter configuration onto rumqttc options
pub fn configure_mqtt_options(config: &MqttConfig) -> Result<MqttOptions, BrokerError> {
    let mut mqtt_options = MqttOptions::new(config.client_id.clone(), &config.server, config.port);

    if config.secured {
        let transport = match &config.server_cert {
            Some(pem) => {
                if pem.trim().is_empty() {
                    return Err(BrokerError::Tls("server certificate is empty".to_string()));
                }
                RumqttcTransport::tls(pem.as_bytes().to_vec(), None, None)
            }
            None => RumqttcTransport::tls_with_default_config(),
        };
        mqtt_options.set_transport(transport);
    }

    if let Some(username) = &config.username {
        let password = config.resolve_password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    // set_keep_alive asserts on short intervals
    if config.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
        return Err(BrokerError::ConnectionFailed(format!(
            "keep-alive of {}s is below the {MIN_KEEP_ALIVE_SECS}s minimum",
            config.keep_alive_secs
        )));
    }
    mqtt_options.set_keep_alive(Duration::from_secs(u64::from(config.keep_alive_secs)));
    mqtt_options.set_clean_start(config.clean_session);

    // The broker announces us offline if we vanish without calling end()
    let will = LastWill::new(
        &config.will_topic,
        OFFLINE_PAYLOAD,
        QoS::ExactlyOnce,
        true,
        None,
    );
    mqtt_options.set_last_will(will);

    Ok(mqtt_options)
}
