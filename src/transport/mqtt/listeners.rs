//! Ordered registry of message listeners
//!
//! The registry is plain data: the client guards it with a single mutex and
//! takes snapshots for dispatch and re-subscription so no callback ever runs
//! while the lock is held.

use super::topic::TopicFilter;
use std::fmt;
use std::sync::Arc;

/// Callback invoked with `(topic, payload)` for every matching inbound message
pub type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Callback invoked on every transition into `Connected`
pub type ConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// A registered (filter, callback) pair
#[derive(Clone)]
pub struct Listener {
    pub filter: TopicFilter,
    pub callback: MessageCallback,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("filter", &self.filter.as_str())
            .finish_non_exhaustive()
    }
}

/// Listeners in registration order
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    listeners: Vec<Listener>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener; the same filter may be registered any number of times
    pub fn add(&mut self, filter: TopicFilter, callback: MessageCallback) {
        self.listeners.push(Listener { filter, callback });
    }

    /// Remove every listener registered with exactly this filter string.
    /// Returns how many were removed.
    pub fn remove_all(&mut self, filter: &str) -> usize {
        let before = self.listeners.len();
        self.listeners
            .retain(|listener| listener.filter.as_str() != filter);
        before - self.listeners.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Listener> {
        self.listeners.iter()
    }

    /// Filters in registration order, duplicates included
    pub fn filters(&self) -> Vec<String> {
        self.listeners
            .iter()
            .map(|listener| listener.filter.as_str().to_string())
            .collect()
    }

    /// Callbacks of every listener whose filter matches `topic`, in order
    pub fn matching(&self, topic: &str) -> Vec<MessageCallback> {
        self.listeners
            .iter()
            .filter(|listener| listener.filter.matches(topic))
            .map(|listener| listener.callback.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn filter(raw: &str) -> TopicFilter {
        TopicFilter::parse(raw).unwrap()
    }

    fn recording_callback(log: &Arc<Mutex<Vec<String>>>, name: &str) -> MessageCallback {
        let log = log.clone();
        let name = name.to_string();
        Arc::new(move |topic: &str, _payload: &[u8]| {
            log.lock().push(format!("{name}:{topic}"));
        })
    }

    #[test]
    fn test_add_preserves_order_and_duplicates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        registry.add(filter("a/b"), recording_callback(&log, "first"));
        registry.add(filter("a/+"), recording_callback(&log, "second"));
        registry.add(filter("a/b"), recording_callback(&log, "third"));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.filters(), vec!["a/b", "a/+", "a/b"]);
    }

    #[test]
    fn test_remove_all_is_exact_string_match() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        registry.add(filter("a/b"), recording_callback(&log, "one"));
        registry.add(filter("a/+"), recording_callback(&log, "two"));
        registry.add(filter("a/b"), recording_callback(&log, "three"));

        // "a/+" semantically covers "a/b" but is a different string
        assert_eq!(registry.remove_all("a/b"), 2);
        assert_eq!(registry.filters(), vec!["a/+"]);

        assert_eq!(registry.remove_all("not/registered"), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_matching_returns_callbacks_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        registry.add(filter("home/#"), recording_callback(&log, "all"));
        registry.add(filter("office/+"), recording_callback(&log, "office"));
        registry.add(filter("home/+/temp"), recording_callback(&log, "temp"));

        for callback in registry.matching("home/kitchen/temp") {
            callback("home/kitchen/temp", b"21");
        }

        assert_eq!(
            *log.lock(),
            vec!["all:home/kitchen/temp", "temp:home/kitchen/temp"]
        );
    }

    #[test]
    fn test_empty_registry() {
        let registry = ListenerRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.matching("anything").is_empty());
        assert_eq!(registry.iter().count(), 0);
    }
}
