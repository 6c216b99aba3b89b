//! Inbound message dispatch
//!
//! Matching callbacks are collected under the registry lock and invoked after
//! it is released, so a listener may register or remove listeners from inside
//! its callback. A panicking listener is contained and does not prevent
//! delivery to the listeners registered after it.

use super::listeners::{ConnectCallback, ListenerRegistry};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error};

/// Outcome of dispatching one message
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners whose filter matched the topic
    pub matched: usize,
    /// Matched listeners whose callback panicked
    pub failed: usize,
}

pub struct Dispatcher;

impl Dispatcher {
    /// Deliver `(topic, payload)` to every matching listener in registration order
    pub fn dispatch(
        registry: &Mutex<ListenerRegistry>,
        topic: &str,
        payload: &[u8],
    ) -> DispatchReport {
        let callbacks = registry.lock().matching(topic);
        let mut report = DispatchReport {
            matched: callbacks.len(),
            failed: 0,
        };

        if callbacks.is_empty() {
            debug!(target: "mqtt_transport", topic, "No listener for message");
            return report;
        }

        for callback in callbacks {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(topic, payload)));
            if outcome.is_err() {
                report.failed += 1;
                error!(topic, "Message listener panicked");
            }
        }

        debug!(
            target: "mqtt_transport",
            topic,
            bytes = payload.len(),
            matched = report.matched,
            "Dispatched message"
        );
        report
    }

    /// Run the connect callback, containing a panic. Returns false if it panicked.
    pub fn notify_connected(callback: &ConnectCallback) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| callback())) {
            Ok(()) => true,
            Err(_) => {
                error!("Connect callback panicked");
                false
            }
        }
    }
}
