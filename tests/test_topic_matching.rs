//! Topic filter matching through the public API
//!
//! Covers the routing table an application relies on: which filters receive
//! which topics, including the `$` reserved namespace and invalid filters.

use mqtt_adapter::transport::mqtt::{matches, ListenerRegistry, TopicFilter};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

#[test]
fn test_matching_table() {
    let cases = [
        // (filter, topic, expected)
        ("a/+/c", "a/b/c", true),
        ("a/+/c", "a/b/x/c", false),
        ("a/+", "a/", true),
        ("+", "a", true),
        ("+/+", "/a", true),
        ("a/#", "a", true),
        ("a/#", "a/b/c", true),
        ("#", "a/b/c", true),
        ("#", "$SYS/x", false),
        ("+/x", "$SYS/x", false),
        ("$SYS/#", "$SYS/x", true),
        ("$SYS/+", "$SYS/x", true),
        ("$SYS/#", "SYS/x", false),
        ("sport/tennis/+", "sport/tennis/player1", true),
        ("sport/tennis/+", "sport/tennis/player1/ranking", false),
        ("sport/+", "sport", false),
        ("sport+", "sport1", false),
        ("sport/#/ranking", "sport/x/ranking", false),
        ("a/b#", "a/b", false),
        ("a/b", "a/b/", false),
        ("a/b", "a", false),
        ("", "a", false),
        ("a", "", false),
        ("a/+", "a/+", false),
        ("#", "a/#", false),
    ];

    for (filter, topic, expected) in cases {
        assert_eq!(
            matches(filter, topic),
            expected,
            "matches({filter:?}, {topic:?})"
        );
    }
}

#[test]
fn test_wildcard_free_filters_are_reflexive() {
    for topic in ["a", "a/b", "/", "a//b", "$SYS/broker/load", "home/kitchen/temp"] {
        assert!(matches(topic, topic), "{topic:?} should match itself");
    }
}

#[test]
fn test_registry_routes_to_exactly_matching_listeners() {
    let mut registry = ListenerRegistry::new();
    let filters = ["home/+/temp", "home/#", "garden/#", "home/kitchen/temp", "+/+"];
    for filter in filters {
        registry.add(
            TopicFilter::parse(filter).unwrap(),
            Arc::new(|_: &str, _: &[u8]| {}),
        );
    }

    let topic = "home/kitchen/temp";
    let expected: Vec<&str> = filters
        .iter()
        .copied()
        .filter(|filter| matches(filter, topic))
        .collect();

    assert_eq!(expected, vec!["home/+/temp", "home/#", "home/kitchen/temp"]);
    assert_eq!(registry.matching(topic).len(), expected.len());
    assert_eq!(registry.matching("home/kitchen").len(), 2);
    assert!(registry.matching("office/desk/lamp").is_empty());
}

const FILTER_POOL: [&str; 9] = [
    "a/b", "a/+", "a/#", "#", "+/b", "+/+", "$SYS/#", "a/b/c", "+",
];

#[derive(Debug, Clone)]
enum RegistryOp {
    Add(usize),
    RemoveAll(usize),
}

fn registry_op() -> impl Strategy<Value = RegistryOp> {
    prop_oneof![
        3 => (0..FILTER_POOL.len()).prop_map(RegistryOp::Add),
        1 => (0..FILTER_POOL.len()).prop_map(RegistryOp::RemoveAll),
    ]
}

fn topic() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "$SYS", ""]), 1..4)
        .prop_map(|levels| levels.join("/"))
}

proptest! {
    #[test]
    fn test_registry_invokes_exactly_registered_matching_listeners(
        ops in prop::collection::vec(registry_op(), 0..24),
        topics in prop::collection::vec(topic(), 1..6),
    ) {
        let mut registry = ListenerRegistry::new();
        // Model: (listener id, filter) in registration order
        let mut model: Vec<(usize, &str)> = Vec::new();
        let invoked = Arc::new(Mutex::new(Vec::new()));

        for (id, op) in ops.iter().enumerate() {
            match *op {
                RegistryOp::Add(index) => {
                    let filter = FILTER_POOL[index];
                    let sink = invoked.clone();
                    registry.add(
                        TopicFilter::parse(filter).unwrap(),
                        Arc::new(move |_: &str, _: &[u8]| sink.lock().unwrap().push(id)),
                    );
                    model.push((id, filter));
                }
                RegistryOp::RemoveAll(index) => {
                    let filter = FILTER_POOL[index];
                    let expected = model.iter().filter(|(_, f)| *f == filter).count();
                    prop_assert_eq!(registry.remove_all(filter), expected);
                    model.retain(|(_, f)| *f != filter);
                }
            }
        }
        prop_assert_eq!(registry.len(), model.len());

        for topic in &topics {
            invoked.lock().unwrap().clear();
            for callback in registry.matching(topic) {
                callback(topic.as_str(), b"".as_slice());
            }
            let expected: Vec<usize> = model
                .iter()
                .filter(|(_, filter)| matches(filter, topic))
                .map(|(id, _)| *id)
                .collect();
            prop_assert_eq!(&*invoked.lock().unwrap(), &expected, "topic {:?}", topic);
        }
    }
}
