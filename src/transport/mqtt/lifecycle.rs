//! Pure connection lifecycle rules
//!
//! Every transition of the adapter goes through [`LifecycleMonitor::next_state`],
//! which decides from the current state and an event whether the state
//! changes. Events that do not apply to the current state are ignored, which
//! keeps `begin`/`end` idempotent and makes stale collaborator events harmless.

use super::connection::{ConnectionState, ErrorKind};
use tracing::{info, warn};

/// Inputs of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Local `begin` with a valid configuration
    Begin,
    /// Collaborator starts a (re)connection attempt
    BeforeConnect,
    /// Collaborator reports an accepted connection
    Connected,
    /// Collaborator reports a lost or failed connection
    Disconnected,
    /// Local `end`
    End,
}

/// Pure lifecycle decisions
pub struct LifecycleMonitor;

impl LifecycleMonitor {
    /// Next state for `event`, or `None` when the event is ignored in `current`
    pub fn next_state(
        current: ConnectionState,
        event: LifecycleEvent,
    ) -> Option<ConnectionState> {
        use ConnectionState::*;

        match (current, event) {
            (Disabled, LifecycleEvent::Begin) => Some(Connecting),
            (Disconnected, LifecycleEvent::BeforeConnect) => Some(Connecting),
            (Connecting | Disconnected, LifecycleEvent::Connected) => Some(Connected),
            (Connecting | Connected, LifecycleEvent::Disconnected) => Some(Disconnected),
            (Connecting | Connected | Disconnected, LifecycleEvent::End) => Some(Disabled),
            _ => None,
        }
    }

    /// True when `from -> to` enters `Connected` and must trigger the
    /// presence announcement, subscription replay and connect callback
    pub fn enters_connected(from: ConnectionState, to: ConnectionState) -> bool {
        from != ConnectionState::Connected && to == ConnectionState::Connected
    }

    /// Check if connection state allows publishing
    pub fn can_publish(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Check if connection state allows forwarding (un)subscribe requests
    pub fn can_subscribe(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Format a collaborator error for `last_error`
    pub fn describe_error(kind: ErrorKind, detail: &str) -> String {
        match kind {
            ErrorKind::Transport => format!("Transport error: {detail}"),
            ErrorKind::Protocol => format!("Protocol error: {detail}"),
            ErrorKind::Unknown => format!("Unknown error: {detail}"),
        }
    }

    pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
        match (from, to) {
            (ConnectionState::Disabled, ConnectionState::Connecting) => {
                info!("MQTT enabled, connecting");
            }
            (ConnectionState::Disconnected, ConnectionState::Connecting) => {
                info!("MQTT reconnecting");
            }
            (_, ConnectionState::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected) => {
                warn!("MQTT connection lost");
            }
            (ConnectionState::Connecting, ConnectionState::Disconnected) => {
                warn!("MQTT connection attempt failed");
            }
            (_, ConnectionState::Disabled) => {
                info!("MQTT disabled");
            }
            _ => {
                tracing::debug!(target: "mqtt_transport", %from, %to, "MQTT state change");
            }
        }
    }
}
