//! Mock broker client for testing
//!
//! [`MockConnector`] builds [`MockBroker`]s that record every outbound call and
//! keep the event sender, so tests can inject [`BrokerEvent`]s at the same
//! ingress the real broker client uses.

use crate::config::MqttConfig;
use crate::transport::{BrokerClient, BrokerConnector, BrokerError, BrokerEvent, QoS};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// One call made on a [`MockBroker`]
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerCall {
    Connect,
    Disconnect,
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
        /// Went through the non-blocking enqueue path
        queued: bool,
    },
    Subscribe {
        filter: String,
        qos: QoS,
    },
    Unsubscribe {
        filter: String,
    },
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<BrokerCall>,
    events: Option<mpsc::Sender<BrokerEvent>>,
    builds: usize,
    last_config: Option<MqttConfig>,
    fail_builds: bool,
    fail_connect: bool,
    fail_publishes: bool,
    queue_full: bool,
    retained_per_subscribe: usize,
}

/// Builds mock broker clients sharing one recorded state
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call recorded so far, in order
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// `(topic, payload, retain)` of every publish attempt
    pub fn publishes(&self) -> Vec<(String, Bytes, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BrokerCall::Publish {
                    topic,
                    payload,
                    retain,
                    ..
                } => Some((topic, payload, retain)),
                _ => None,
            })
            .collect()
    }

    /// Filters of every subscribe call, in order
    pub fn subscriptions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BrokerCall::Subscribe { filter, .. } => Some(filter),
                _ => None,
            })
            .collect()
    }

    pub fn build_count(&self) -> usize {
        self.state.lock().builds
    }

    /// Configuration passed to the most recent build
    pub fn last_config(&self) -> Option<MqttConfig> {
        self.state.lock().last_config.clone()
    }

    pub fn fail_builds(&self, fail: bool) {
        self.state.lock().fail_builds = fail;
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state.lock().fail_publishes = fail;
    }

    /// Make `try_publish` report a full queue
    pub fn queue_full(&self, full: bool) {
        self.state.lock().queue_full = full;
    }

    /// Answer every subscribe with `count` retained messages, delivered through
    /// the ingress before the subscribe call returns, like a broker client
    /// whose requests only drain while its events are consumed
    pub fn retained_per_subscribe(&self, count: usize) {
        self.state.lock().retained_per_subscribe = count;
    }

    /// Inject an event at the adapter's ingress. Returns false if nothing listens.
    pub async fn emit(&self, event: BrokerEvent) -> bool {
        let sender = self.state.lock().events.clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// True once the adapter's ingress has gone away
    pub fn events_closed(&self) -> bool {
        self.state
            .lock()
            .events
            .as_ref()
            .map_or(true, |sender| sender.is_closed())
    }

    /// Poll `condition` until it holds, for at most one second
    pub async fn wait_until<F>(&self, condition: F) -> bool
    where
        F: Fn(&Self) -> bool,
    {
        let poll = async {
            while !condition(self) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(1), poll)
            .await
            .is_ok()
    }
}

impl BrokerConnector for MockConnector {
    type Client = MockBroker;

    fn build(
        &self,
        config: &MqttConfig,
        events: mpsc::Sender<BrokerEvent>,
    ) -> Result<Self::Client, BrokerError> {
        let mut state = self.state.lock();
        if state.fail_builds {
            return Err(BrokerError::ConnectionFailed(
                "mock build failure".to_string(),
            ));
        }
        state.builds += 1;
        state.events = Some(events);
        state.last_config = Some(config.clone());
        Ok(MockBroker {
            state: self.state.clone(),
        })
    }
}

/// Broker client that records calls instead of talking to a network
#[derive(Debug)]
pub struct MockBroker {
    state: Arc<Mutex<MockState>>,
}

impl MockBroker {
    fn record_publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
        queued: bool,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.calls.push(BrokerCall::Publish {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
            queued,
        });
        if state.fail_publishes {
            return Err(BrokerError::PublishFailed("mock publish failure".into()));
        }
        if queued && state.queue_full {
            return Err(BrokerError::QueueFull);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.calls.push(BrokerCall::Connect);
        if state.fail_connect {
            return Err(BrokerError::ConnectionFailed(
                "mock connect failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.state.lock().calls.push(BrokerCall::Disconnect);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError> {
        self.record_publish(topic, payload, qos, retain, false)
    }

    fn try_publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError> {
        self.record_publish(topic, payload, qos, retain, true)
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BrokerError> {
        let (events, retained) = {
            let mut state = self.state.lock();
            state.calls.push(BrokerCall::Subscribe {
                filter: filter.to_string(),
                qos,
            });
            (state.events.clone(), state.retained_per_subscribe)
        };

        if let Some(events) = events {
            let topic = filter.replace(['+', '#'], "retained");
            for i in 0..retained {
                let event = BrokerEvent::message(topic.clone(), i.to_string());
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), BrokerError> {
        self.state.lock().calls.push(BrokerCall::Unsubscribe {
            filter: filter.to_string(),
        });
        Ok(())
    }
}
