//! Pure translation of rumqttc events into adapter events
//!
//! The rumqttc event loop reports packets and connection errors in its own
//! vocabulary. This module turns them into [`BrokerEvent`]s and classifies
//! connection errors into a coarse [`ErrorKind`] plus a [`DisconnectReason`].

use super::connection::{BrokerEvent, DisconnectReason, ErrorKind};
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::{ConnectionError, Event};

/// Pure routing decisions for rumqttc events
pub struct MessageHandler;

impl MessageHandler {
    /// Route rumqttc event to the matching adapter-level route
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    session_present: connack.session_present,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                },
                Packet::Disconnect(disconnect) => EventRoute::Disconnected {
                    detail: format!("{:?}", disconnect.reason_code),
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    return_codes: format!("{:?}", suback.return_codes),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Classify an event loop error for `last_error` and the disconnect event
    pub fn classify_connection_error(error: &ConnectionError) -> (ErrorKind, DisconnectReason) {
        match error {
            ConnectionError::ConnectionRefused(code) => {
                (ErrorKind::Protocol, Self::reason_from_connack(*code))
            }
            ConnectionError::Io(_) => (ErrorKind::Transport, DisconnectReason::TcpDisconnected),
            ConnectionError::MqttState(_) => (ErrorKind::Protocol, DisconnectReason::Unknown),
            _ => (ErrorKind::Unknown, DisconnectReason::Unknown),
        }
    }

    /// Map a refused CONNACK code onto a disconnect reason
    pub fn reason_from_connack(code: ConnectReturnCode) -> DisconnectReason {
        match code {
            ConnectReturnCode::UnsupportedProtocolVersion => {
                DisconnectReason::UnacceptableProtocolVersion
            }
            ConnectReturnCode::ClientIdentifierNotValid => DisconnectReason::IdentifierRejected,
            ConnectReturnCode::ServerUnavailable | ConnectReturnCode::ServerBusy => {
                DisconnectReason::ServerUnavailable
            }
            ConnectReturnCode::BadUserNamePassword => DisconnectReason::MalformedCredentials,
            ConnectReturnCode::NotAuthorized | ConnectReturnCode::Banned => {
                DisconnectReason::NotAuthorized
            }
            _ => DisconnectReason::Unknown,
        }
    }
}

/// Routing decisions for rumqttc events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged { session_present: bool },
    /// Message received on a subscribed topic
    MessageReceived {
        topic: String,
        payload: bytes::Bytes,
    },
    /// Broker sent DISCONNECT
    Disconnected { detail: String },
    /// Subscription confirmed with return codes
    SubscriptionConfirmed { packet_id: u16, return_codes: String },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

impl EventRoute {
    /// The adapter event this route produces, if any
    pub fn into_broker_event(self) -> Option<BrokerEvent> {
        match self {
            EventRoute::ConnectionAcknowledged { session_present } => {
                Some(BrokerEvent::Connected { session_present })
            }
            EventRoute::MessageReceived { topic, payload } => {
                Some(BrokerEvent::message(topic, payload))
            }
            EventRoute::Disconnected { .. } => Some(BrokerEvent::Disconnected {
                reason: DisconnectReason::BrokerInitiated,
            }),
            EventRoute::SubscriptionConfirmed { .. }
            | EventRoute::InfrastructureEvent(_)
            | EventRoute::OutgoingEvent => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, Disconnect, DisconnectReasonCode, Publish};
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: true,
            code: ConnectReturnCode::Success,
            properties: None,
        }));

        let route = MessageHandler::route_mqtt_event(&connack);
        assert!(matches!(
            route,
            EventRoute::ConnectionAcknowledged {
                session_present: true
            }
        ));
        assert_eq!(
            route.into_broker_event(),
            Some(BrokerEvent::Connected {
                session_present: true
            })
        );
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: Bytes::from("home/kitchen/temp"),
            pkid: 0,
            payload: Bytes::from("21.5"),
            properties: None,
        }));

        let event = MessageHandler::route_mqtt_event(&publish).into_broker_event();
        assert_eq!(event, Some(BrokerEvent::message("home/kitchen/temp", "21.5")));
    }

    #[test]
    fn test_route_disconnect() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));

        assert_eq!(
            MessageHandler::route_mqtt_event(&disconnect).into_broker_event(),
            Some(BrokerEvent::Disconnected {
                reason: DisconnectReason::BrokerInitiated
            })
        );
    }

    #[test]
    fn test_infrastructure_events_are_not_forwarded() {
        let ping = Event::Incoming(Packet::PingResp(rumqttc::v5::mqttbytes::v5::PingResp));
        let route = MessageHandler::route_mqtt_event(&ping);
        assert!(matches!(route, EventRoute::InfrastructureEvent(_)));
        assert!(route.into_broker_event().is_none());
    }

    #[test]
    fn test_reason_from_connack() {
        assert_eq!(
            MessageHandler::reason_from_connack(ConnectReturnCode::NotAuthorized),
            DisconnectReason::NotAuthorized
        );
        assert_eq!(
            MessageHandler::reason_from_connack(ConnectReturnCode::BadUserNamePassword),
            DisconnectReason::MalformedCredentials
        );
        assert_eq!(
            MessageHandler::reason_from_connack(ConnectReturnCode::ClientIdentifierNotValid),
            DisconnectReason::IdentifierRejected
        );
        assert_eq!(
            MessageHandler::reason_from_connack(ConnectReturnCode::UnsupportedProtocolVersion),
            DisconnectReason::UnacceptableProtocolVersion
        );
        assert_eq!(
            MessageHandler::reason_from_connack(ConnectReturnCode::ServerUnavailable),
            DisconnectReason::ServerUnavailable
        );
        assert_eq!(
            MessageHandler::reason_from_connack(ConnectReturnCode::UnspecifiedError),
            DisconnectReason::Unknown
        );
    }

    #[test]
    fn test_classify_io_error() {
        let error = ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert_eq!(
            MessageHandler::classify_connection_error(&error),
            (ErrorKind::Transport, DisconnectReason::TcpDisconnected)
        );

        let refused = ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
        assert_eq!(
            MessageHandler::classify_connection_error(&refused),
            (ErrorKind::Protocol, DisconnectReason::NotAuthorized)
        );
    }
}
