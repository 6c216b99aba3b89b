//! Impure coordination for the MQTT adapter
//!
//! [`MqttClient`] composes the topic matcher, the listener registry, the
//! lifecycle rules and the dispatcher around one broker client. Every event
//! from the broker client enters through [`MqttClient::handle_event`]; a
//! single ingress task feeds it from the channel the client was built with.
//!
//! The ingress task never awaits the broker client. Presence announcement and
//! subscription replay run on their own task, because broker requests only
//! drain while the broker client's event pump is free to deliver events.

use super::connection::{BrokerEvent, ConnectionState, MqttError, OFFLINE_PAYLOAD, ONLINE_PAYLOAD};
use super::dispatcher::Dispatcher;
use super::lifecycle::{LifecycleEvent, LifecycleMonitor};
use super::listeners::{ConnectCallback, ListenerRegistry};
use super::topic::{validate_topic, TopicFilter};
use crate::config::MqttConfig;
use crate::transport::{BrokerClient, BrokerConnector, MqttTransport, QoS};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Collaborator and configuration owned between `begin` and `end`
struct Session<B> {
    broker: Arc<B>,
    config: MqttConfig,
    shutdown_tx: watch::Sender<bool>,
}

struct Inner<C: BrokerConnector> {
    connector: C,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Option<Session<C::Client>>>,
    registry: Mutex<ListenerRegistry>,
    on_connect: Mutex<Option<ConnectCallback>>,
    last_error: Mutex<Option<String>>,
    async_mode: AtomicBool,
    /// Set once the current broker client reached `Connected`
    ever_connected: AtomicBool,
    /// Set by `end`; the client is not reusable afterwards
    terminated: AtomicBool,
    /// Presence and replay task of the latest connection
    replay: Mutex<Option<JoinHandle<()>>>,
}

/// MQTT client adapter: connection lifecycle plus topic-based message routing
///
/// Cloning is cheap and every clone drives the same connection.
pub struct MqttClient<C: BrokerConnector = MqttTransport> {
    inner: Arc<Inner<C>>,
}

impl<C: BrokerConnector> Clone for MqttClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Default for MqttClient<MqttTransport> {
    fn default() -> Self {
        Self::new(MqttTransport::default())
    }
}

impl<C: BrokerConnector> MqttClient<C> {
    pub fn new(connector: C) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disabled);
        Self {
            inner: Arc::new(Inner {
                connector,
                state_tx,
                session: Mutex::new(None),
                registry: Mutex::new(ListenerRegistry::new()),
                on_connect: Mutex::new(None),
                last_error: Mutex::new(None),
                async_mode: AtomicBool::new(false),
                ever_connected: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                replay: Mutex::new(None),
            }),
        }
    }

    /// Validate `config`, build the broker client and start connecting.
    ///
    /// A no-op unless the client is `Disabled`. An invalid configuration
    /// leaves the client `Disabled` and is recorded as the last error.
    pub async fn begin(&self, mut config: MqttConfig) -> Result<(), MqttError> {
        let inner = &self.inner;
        if inner.terminated.load(Ordering::SeqCst) {
            warn!("begin() called after end(), ignoring");
            return Err(MqttError::Terminated);
        }
        if inner.state() != ConnectionState::Disabled {
            debug!(target: "mqtt_transport", state = %inner.state(), "MQTT already enabled");
            return Ok(());
        }

        if config.client_id.is_empty() {
            config.client_id = MqttConfig::generate_client_id();
        }

        if let Err(e) = config.validate() {
            let message = e.to_string();
            error!(error = %message, "MQTT disabled: invalid configuration");
            inner.record_error(message.clone());
            return Err(MqttError::InvalidConfig(message));
        }

        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
        let broker = match inner.connector.build(&config, events_tx) {
            Ok(broker) => Arc::new(broker),
            Err(e) => {
                error!(error = %e, "Failed to create MQTT client");
                inner.record_error(e.to_string());
                return Err(e.into());
            }
        };

        // Lost a race with a concurrent begin()
        if inner.apply(LifecycleEvent::Begin).is_none() {
            return Ok(());
        }

        info!(
            server = %config.server,
            port = config.port,
            secured = config.secured,
            client_id = %config.client_id,
            will_topic = %config.will_topic,
            "Connecting to MQTT server"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        inner.ever_connected.store(false, Ordering::SeqCst);
        *inner.session.lock() = Some(Session {
            broker: broker.clone(),
            config,
            shutdown_tx,
        });

        tokio::spawn(Inner::run_ingress(
            Arc::downgrade(inner),
            events_rx,
            shutdown_rx,
        ));

        if let Err(e) = broker.connect().await {
            error!(error = %e, "Failed to start MQTT connection");
            inner.record_error(e.to_string());
            if let Some(session) = inner.session.lock().take() {
                let _ = session.shutdown_tx.send(true);
            }
            inner.apply(LifecycleEvent::End);
            return Err(e.into());
        }
        Ok(())
    }

    /// Announce `offline`, disconnect and tear down the broker client.
    ///
    /// A no-op when already `Disabled`. The ingress task is signalled and
    /// detached, never joined, so this is safe to call from any task.
    pub async fn end(&self) -> Result<(), MqttError> {
        let inner = &self.inner;
        if inner.apply(LifecycleEvent::End).is_none() {
            debug!(target: "mqtt_transport", "MQTT already disabled");
            return Ok(());
        }
        inner.terminated.store(true, Ordering::SeqCst);

        let session = inner.session.lock().take();
        let Some(session) = session else {
            return Ok(());
        };
        let _ = session.shutdown_tx.send(true);
        inner.stop_replay().await;

        if let Err(e) = session
            .broker
            .publish(
                &session.config.will_topic,
                Bytes::from_static(OFFLINE_PAYLOAD.as_bytes()),
                QoS::AtMostOnce,
                true,
            )
            .await
        {
            warn!(error = %e, topic = %session.config.will_topic, "Failed to announce offline");
        }

        if let Err(e) = session.broker.disconnect().await {
            warn!(error = %e, "MQTT disconnect failed");
        }
        info!("MQTT client disconnected");
        Ok(())
    }

    /// Publish at QoS 0. Fails unless the client is `Connected`.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        retain: bool,
    ) -> Result<(), MqttError> {
        let inner = &self.inner;
        if inner.terminated.load(Ordering::SeqCst) {
            return Err(MqttError::Terminated);
        }
        validate_topic(topic).map_err(MqttError::InvalidTopic)?;

        let state = inner.state();
        if !LifecycleMonitor::can_publish(state) {
            warn!(topic, %state, "Publish rejected: not connected");
            return Err(MqttError::NotConnected { state });
        }
        let broker = inner.broker().ok_or(MqttError::NotConnected { state })?;

        let payload = payload.into();
        debug!(target: "mqtt_transport", topic, bytes = payload.len(), retain, "Publishing");
        if inner.async_mode.load(Ordering::SeqCst) {
            broker.try_publish(topic, payload, QoS::AtMostOnce, retain)?;
        } else {
            broker.publish(topic, payload, QoS::AtMostOnce, retain).await?;
        }
        Ok(())
    }

    /// Register `callback` for messages matching `filter`.
    ///
    /// The listener is kept across reconnects; the broker subscription is
    /// issued now when connected, otherwise on the next connection.
    pub async fn subscribe<F>(&self, filter: &str, callback: F) -> Result<(), MqttError>
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        let inner = &self.inner;
        if inner.terminated.load(Ordering::SeqCst) {
            return Err(MqttError::Terminated);
        }
        let parsed = TopicFilter::parse(filter).map_err(MqttError::InvalidFilter)?;
        inner.registry.lock().add(parsed, Arc::new(callback));

        let state = inner.state();
        if !LifecycleMonitor::can_subscribe(state) {
            debug!(target: "mqtt_transport", filter, %state, "Subscription deferred until connected");
            return Ok(());
        }
        if let Some(broker) = inner.broker() {
            debug!(target: "mqtt_transport", filter, "Subscribing");
            broker.subscribe(filter, QoS::AtMostOnce).await?;
        }
        Ok(())
    }

    /// Remove every listener registered with exactly `filter`
    pub async fn unsubscribe(&self, filter: &str) -> Result<(), MqttError> {
        let inner = &self.inner;
        if inner.terminated.load(Ordering::SeqCst) {
            return Err(MqttError::Terminated);
        }
        let removed = inner.registry.lock().remove_all(filter);
        debug!(target: "mqtt_transport", filter, removed, "Unsubscribing");

        if !LifecycleMonitor::can_subscribe(inner.state()) {
            return Ok(());
        }
        if let Some(broker) = inner.broker() {
            broker.unsubscribe(filter).await?;
        }
        Ok(())
    }

    /// Set the callback run on every transition into `Connected`, replacing
    /// any previous one
    pub fn on_connect<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.on_connect.lock() = Some(Arc::new(callback));
    }

    /// Route application publishes through the non-blocking enqueue path
    pub fn set_async(&self, enabled: bool) {
        self.inner.async_mode.store(enabled, Ordering::SeqCst);
    }

    pub fn is_async(&self) -> bool {
        self.inner.async_mode.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state() != ConnectionState::Disabled
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Description of the most recent error, if any
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /// Configuration snapshot taken by `begin`, while enabled
    pub fn config(&self) -> Option<MqttConfig> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|session| session.config.clone())
    }

    /// Filters currently registered, in registration order
    pub fn filters(&self) -> Vec<String> {
        self.inner.registry.lock().filters()
    }

    /// Watch connection state changes
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Wait until the client is `Connected`
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), MqttError> {
        Self::wait_for_connection_confirmation(self.state_changes(), timeout).await
    }

    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let waited = tokio::time::timeout(timeout, async {
            loop {
                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disabled => return Err(MqttError::NotConnected { state }),
                    ConnectionState::Connecting | ConnectionState::Disconnected => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::NotConnected { state });
                }
            }
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Err(MqttError::NotConnected {
                state: *state_rx.borrow(),
            }),
        }
    }

    /// Apply one broker client event. Normally fed by the ingress task.
    ///
    /// Entering `Connected` starts the presence announcement and subscription
    /// replay in the background; the connect callback fires once it is done.
    pub async fn handle_event(&self, event: BrokerEvent) {
        self.inner.handle_event(event).await;
    }
}

impl<C: BrokerConnector> Inner<C> {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn broker(&self) -> Option<Arc<C::Client>> {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.broker.clone())
    }

    fn record_error(&self, message: String) {
        *self.last_error.lock() = Some(message);
    }

    /// Apply a lifecycle event atomically; returns the transition taken
    fn apply(&self, event: LifecycleEvent) -> Option<(ConnectionState, ConnectionState)> {
        let mut transition = None;
        self.state_tx.send_if_modified(|state| {
            match LifecycleMonitor::next_state(*state, event) {
                Some(next) => {
                    transition = Some((*state, next));
                    *state = next;
                    true
                }
                None => false,
            }
        });
        if let Some((from, to)) = transition {
            LifecycleMonitor::log_state_transition(from, to);
        }
        transition
    }

    async fn run_ingress(
        inner: Weak<Self>,
        mut events_rx: mpsc::Receiver<BrokerEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let Some(inner) = inner.upgrade() else { break };
                    inner.handle_event(event).await;
                }
            }
        }
        debug!(target: "mqtt_transport", "MQTT ingress stopped");
    }

    async fn handle_event(self: &Arc<Self>, event: BrokerEvent) {
        // Stale events from a torn down broker client
        if self.state() == ConnectionState::Disabled {
            debug!(target: "mqtt_transport", ?event, "Ignoring event while disabled");
            return;
        }

        match event {
            BrokerEvent::BeforeConnect => {
                self.apply(LifecycleEvent::BeforeConnect);
            }
            BrokerEvent::Connected { session_present } => {
                if let Some((from, to)) = self.apply(LifecycleEvent::Connected) {
                    if LifecycleMonitor::enters_connected(from, to) {
                        self.spawn_replay(session_present);
                    }
                }
            }
            BrokerEvent::Disconnected { reason } => {
                self.apply(LifecycleEvent::Disconnected);
                warn!(%reason, kind = %reason.kind(), "Disconnected from MQTT");
                self.record_error(reason.description().to_string());
            }
            BrokerEvent::Error { kind, detail } => {
                let message = LifecycleMonitor::describe_error(kind, &detail);
                warn!(%kind, error = %message, "MQTT client error");
                self.record_error(message);
            }
            BrokerEvent::Message {
                topic,
                payload,
                index,
                total,
            } => {
                if !self.ever_connected.load(Ordering::SeqCst) {
                    debug!(target: "mqtt_transport", topic = %topic, "Dropping message received before first connection");
                    return;
                }
                debug!(
                    target: "mqtt_transport",
                    topic = %topic,
                    index,
                    total,
                    "Received MQTT message"
                );
                Dispatcher::dispatch(&self.registry, &topic, &payload);
            }
        }
    }

    /// Start presence announcement, subscription replay and connect callback
    fn spawn_replay(self: &Arc<Self>, session_present: bool) {
        self.ever_connected.store(true, Ordering::SeqCst);

        let (broker, will_topic) = {
            let session = self.session.lock();
            match session.as_ref() {
                Some(session) => (session.broker.clone(), session.config.will_topic.clone()),
                None => return,
            }
        };

        let mut filters = self.registry.lock().filters();
        // Duplicate registrations share one broker subscription
        let mut seen = std::collections::HashSet::new();
        filters.retain(|filter| seen.insert(filter.clone()));

        info!(session_present, "Connected to MQTT");
        let replay = Self::announce_and_replay(Arc::downgrade(self), broker, will_topic, filters);
        let handle = tokio::spawn(replay.instrument(crate::mqtt_span!(operation = "replay")));

        // A replay left over from an earlier connection is stale
        if let Some(previous) = self.replay.lock().replace(handle) {
            previous.abort();
        }
    }

    async fn announce_and_replay(
        inner: Weak<Self>,
        broker: Arc<C::Client>,
        will_topic: String,
        filters: Vec<String>,
    ) {
        if let Err(e) = broker
            .publish(
                &will_topic,
                Bytes::from_static(ONLINE_PAYLOAD.as_bytes()),
                QoS::AtMostOnce,
                true,
            )
            .await
        {
            warn!(error = %e, topic = %will_topic, "Failed to announce online");
        }

        debug!(target: "mqtt_transport", count = filters.len(), "Re-subscribing to topics");
        for filter in &filters {
            if let Err(e) = broker.subscribe(filter, QoS::AtMostOnce).await {
                error!(filter = %filter, error = %e, "Failed to re-subscribe");
            } else {
                debug!(target: "mqtt_transport", filter = %filter, "Re-subscribed");
            }
        }

        let Some(inner) = inner.upgrade() else { return };
        let callback = inner.on_connect.lock().clone();
        if let Some(callback) = callback {
            Dispatcher::notify_connected(&callback);
        }
    }

    /// Abort the replay task and wait until it has stopped
    async fn stop_replay(&self) {
        let handle = self.replay.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl<C: BrokerConnector> Drop for Inner<C> {
    fn drop(&mut self) {
        // Async teardown is not possible here; call end() for the offline announcement
        if let Some(session) = self.session.get_mut().take() {
            let _ = session.shutdown_tx.send(true);
        }
        if let Some(replay) = self.replay.get_mut().take() {
            replay.abort();
        }
    }
}
