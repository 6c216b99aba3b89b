//! rumqttc-backed broker client
//!
//! Owns the rumqttc `AsyncClient` and drives its `EventLoop` from a pump task.
//! The pump translates every event into a [`BrokerEvent`] and owns the retry
//! policy: after a connection error it waits `reconnect_interval_secs`, reports
//! `BeforeConnect` and polls again, which makes rumqttc reconnect.

use super::connection::{configure_mqtt_options, BrokerEvent};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttConfig;
use crate::transport::{BrokerClient, BrokerConnector, BrokerError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, ClientError, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the rumqttc request queue
const REQUEST_CAPACITY: usize = 10;
/// How long `disconnect` waits for the pump before aborting it
const PUMP_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Builds [`RumqttcBroker`] instances
#[derive(Debug, Default, Clone, Copy)]
pub struct RumqttcConnector;

impl BrokerConnector for RumqttcConnector {
    type Client = RumqttcBroker;

    fn build(
        &self,
        config: &MqttConfig,
        events: mpsc::Sender<BrokerEvent>,
    ) -> Result<Self::Client, BrokerError> {
        let mqtt_options = configure_mqtt_options(config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(RumqttcBroker {
            client,
            event_loop: Mutex::new(Some(event_loop)),
            events,
            reconnect_interval: Duration::from_secs(config.reconnect_interval_secs),
            shutdown_tx,
            disconnecting: Arc::new(AtomicBool::new(false)),
            pump_handle: Mutex::new(None),
        })
    }
}

/// One rumqttc connection and the task polling it
pub struct RumqttcBroker {
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    events: mpsc::Sender<BrokerEvent>,
    reconnect_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    disconnecting: Arc<AtomicBool>,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RumqttcBroker {
    async fn run_pump(
        mut event_loop: EventLoop,
        events: mpsc::Sender<BrokerEvent>,
        reconnect_interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
        disconnecting: Arc<AtomicBool>,
    ) {
        info!("Starting MQTT event pump");
        if events.send(BrokerEvent::BeforeConnect).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                // Shutdown has priority over pending network events
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event pump");
                        break;
                    }
                }

                polled = event_loop.poll() => {
                    let event = match polled {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            Self::log_route(&route);
                            route.into_broker_event()
                        }
                        Err(e) => {
                            if disconnecting.load(Ordering::SeqCst) {
                                debug!(target: "mqtt_transport", error = %e, "Event loop closed after disconnect");
                                break;
                            }

                            let (kind, reason) = MessageHandler::classify_connection_error(&e);
                            error!(error = %e, %kind, %reason, "MQTT event loop error");

                            let reported = events
                                .send(BrokerEvent::Error { kind, detail: e.to_string() })
                                .await
                                .is_ok()
                                && events
                                    .send(BrokerEvent::Disconnected { reason })
                                    .await
                                    .is_ok();
                            if !reported {
                                break;
                            }

                            info!(
                                delay_secs = reconnect_interval.as_secs(),
                                "Waiting before reconnection attempt"
                            );
                            if !Self::interruptible_sleep(shutdown_rx.clone(), reconnect_interval).await {
                                break;
                            }
                            Some(BrokerEvent::BeforeConnect)
                        }
                    };

                    if let Some(event) = event {
                        if events.send(event).await.is_err() {
                            debug!(target: "mqtt_transport", "Event receiver dropped, stopping pump");
                            break;
                        }
                    }
                }
            }
        }
        info!("MQTT event pump stopped");
    }

    fn log_route(route: &EventRoute) {
        match route {
            EventRoute::SubscriptionConfirmed {
                packet_id,
                return_codes,
            } => {
                debug!(target: "mqtt_transport", packet_id, return_codes = %return_codes, "Subscription confirmed");
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
            }
            EventRoute::Disconnected { detail } => {
                warn!(detail = %detail, "Broker sent DISCONNECT");
            }
            _ => {}
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn map_publish_error(error: ClientError) -> BrokerError {
        match error {
            ClientError::TryRequest(_) => BrokerError::QueueFull,
            other => BrokerError::PublishFailed(Box::new(other)),
        }
    }
}

#[async_trait]
impl BrokerClient for RumqttcBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let event_loop = self
            .event_loop
            .lock()
            .take()
            .ok_or_else(|| BrokerError::ConnectionFailed("Event loop already started".to_string()))?;

        let pump = Self::run_pump(
            event_loop,
            self.events.clone(),
            self.reconnect_interval,
            self.shutdown_tx.subscribe(),
            self.disconnecting.clone(),
        );
        let handle = tokio::spawn(pump.instrument(crate::mqtt_span!(operation = "event_pump")));
        *self.pump_handle.lock() = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.disconnecting.store(true, Ordering::SeqCst);

        let request = self.client.disconnect().await;
        if let Err(e) = &request {
            warn!(error = %e, "Failed to queue DISCONNECT");
        }

        let handle = self.pump_handle.lock().take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            match tokio::time::timeout(PUMP_SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => info!("Event pump shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Event pump ended with error: {}", e),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Event pump didn't shut down gracefully, forcing abort");
                    let _ = self.shutdown_tx.send(true);
                    abort.abort();
                }
            }
        }

        request.map_err(|e| BrokerError::ConnectionFailed(e.to_string()))
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(Self::map_publish_error)
    }

    fn try_publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError> {
        self.client
            .try_publish(topic, qos, retain, payload)
            .map_err(Self::map_publish_error)
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BrokerError> {
        self.client
            .subscribe(filter, qos)
            .await
            .map_err(|e| BrokerError::SubscriptionFailed(Box::new(e)))
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), BrokerError> {
        self.client
            .unsubscribe(filter)
            .await
            .map_err(|e| BrokerError::SubscriptionFailed(Box::new(e)))
    }
}

impl Drop for RumqttcBroker {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.pump_handle.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mqtt::connection::DisconnectReason;

    fn test_config() -> MqttConfig {
        MqttConfig {
            client_id: "pump-test".to_string(),
            // Nothing listens here; connection attempts fail fast
            port: 1,
            reconnect_interval_secs: 60,
            ..MqttConfig::new("127.0.0.1", "devices/pump/status")
        }
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        assert!(RumqttcBroker::interruptible_sleep(shutdown_rx, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        assert!(!RumqttcBroker::interruptible_sleep(shutdown_rx, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_connect_twice_fails() {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let broker = RumqttcConnector.build(&test_config(), events_tx).unwrap();

        broker.connect().await.unwrap();
        assert!(matches!(
            broker.connect().await,
            Err(BrokerError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_pump_reports_refused_connection() {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let broker = RumqttcConnector.build(&test_config(), events_tx).unwrap();
        broker.connect().await.unwrap();

        assert_eq!(events_rx.recv().await, Some(BrokerEvent::BeforeConnect));
        let error = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .unwrap();
        assert!(matches!(error, Some(BrokerEvent::Error { .. })));
        assert_eq!(
            events_rx.recv().await,
            Some(BrokerEvent::Disconnected {
                reason: DisconnectReason::TcpDisconnected
            })
        );
    }

    #[test]
    fn test_build_rejects_empty_certificate() {
        let (events_tx, _events_rx) = mpsc::channel(1);
        let config = MqttConfig {
            secured: true,
            server_cert: Some(String::new()),
            ..test_config()
        };
        assert!(matches!(
            RumqttcConnector.build(&config, events_tx),
            Err(BrokerError::Tls(_))
        ));
    }
}
