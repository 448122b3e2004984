//! Core view trait and event subscription capability set.

use event_store::RecordedEvent;
use serde::{Serialize, de::DeserializeOwned};

use crate::Result;
use crate::locator::ViewLocator;

/// The set of event variants a view subscribes to, as an explicit tagged
/// union.
///
/// Implementations are typically an enum with one variant per handled event
/// type, decoded by matching on the record's `event_type` and deserializing
/// its payload. The capability set is resolved statically, once, not per
/// delivered event.
pub trait EventSubscription: Sized + Send {
    /// Event type names covered by this subscription.
    fn event_types() -> &'static [&'static str];

    /// Decodes a recorded event into a subscribed variant.
    ///
    /// Returns `Ok(None)` when the event type is not in the capability set;
    /// a decode failure for a subscribed type is an error, not a skip.
    fn decode(record: &RecordedEvent) -> Result<Option<Self>>;
}

/// A denormalized projection over the event stream.
///
/// One `View` type produces many [`ViewInstance`](crate::ViewInstance)s,
/// keyed by the ids its locator derives from each event. The view state
/// itself must be serializable so any [`ViewStore`](crate::ViewStore) can
/// persist it.
pub trait View:
    Clone + Default + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Tagged union of the event variants this view handles.
    type Event: EventSubscription;

    /// Stable name for this view type, used for manager lookup and logs.
    fn name() -> &'static str;

    /// The locator strategy mapping events to view instance ids.
    fn locator() -> ViewLocator;

    /// Whether an apply failure freezes only the affected instance
    /// (`failed = true`) instead of halting the whole manager.
    fn isolates_instance_failures() -> bool {
        false
    }

    /// Applies one subscribed event to this instance's state.
    ///
    /// Called strictly in increasing global sequence order, and never twice
    /// for the same `record.global_seq` on the same instance.
    fn apply(&mut self, event: &Self::Event, record: &RecordedEvent) -> Result<()>;
}

/// Returns true when the view subscribes to the record's event type.
///
/// Evaluated before locating: an event with no applicable handler is
/// skipped entirely rather than producing an empty id set.
pub fn is_relevant<V: View>(record: &RecordedEvent) -> bool {
    V::Event::event_types().contains(&record.event_type.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{AggregateId, BatchId};
    use serde::Deserialize;

    #[derive(Debug)]
    enum TestEvent {
        Incremented { by: u64 },
    }

    impl EventSubscription for TestEvent {
        fn event_types() -> &'static [&'static str] {
            &["Incremented"]
        }

        fn decode(record: &RecordedEvent) -> Result<Option<Self>> {
            match record.event_type.as_str() {
                "Incremented" => {
                    #[derive(Deserialize)]
                    struct Payload {
                        by: u64,
                    }
                    let payload: Payload = serde_json::from_value(record.payload.clone())?;
                    Ok(Some(TestEvent::Incremented { by: payload.by }))
                }
                _ => Ok(None),
            }
        }
    }

    fn record(event_type: &str, payload: serde_json::Value) -> RecordedEvent {
        RecordedEvent {
            global_seq: 0,
            local_seq: 0,
            aggregate_id: AggregateId::new("x"),
            batch_id: BatchId::new(),
            timestamp: chrono::Utc::now(),
            event_type: event_type.to_string(),
            payload,
        }
    }

    #[test]
    fn decode_subscribed_event() {
        let decoded = TestEvent::decode(&record("Incremented", serde_json::json!({"by": 3})))
            .unwrap()
            .unwrap();
        let TestEvent::Incremented { by } = decoded;
        assert_eq!(by, 3);
    }

    #[test]
    fn decode_unsubscribed_event_is_none() {
        let decoded = TestEvent::decode(&record("SomethingElse", serde_json::json!({}))).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn decode_failure_for_subscribed_type_is_error() {
        let result = TestEvent::decode(&record("Incremented", serde_json::json!({"wrong": 1})));
        assert!(result.is_err());
    }
}
