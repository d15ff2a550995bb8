//! Events: the unit of change recorded by every commit.
//!
//! An event is a `(name, payload)` pair. `batch` is the one structural
//! variant: an ordered list of events applied as a single atomic unit. On the
//! wire (inside a commit) a batch is stored as
//! `("batch", {"events": [{"name": .., "payload": ..}, ..]})`.

mod builtin;
mod error;
mod registry;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::storage::{Commit, INIT_EVENT, MERGE_EVENT};

pub use error::{EventError, EventResult};
pub use registry::{EventHandler, EventRegistry};

/// reserved name of the batch variant
pub const BATCH_EVENT: &str = "batch";

/// names no handler may claim
pub const RESERVED_EVENTS: [&str; 2] = [BATCH_EVENT, MERGE_EVENT];

/// A single change to an object, or an atomic batch of them.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Op { name: String, payload: Value },
    Batch(Vec<Event>),
}

/// `{name, payload}` as stored and as read from event files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub name: String,
    #[serde(default = "empty_payload")]
    pub payload: Value,
}

fn empty_payload() -> Value {
    Value::Object(Default::default())
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Event::Op {
            name: name.into(),
            payload,
        }
    }

    pub fn batch(events: Vec<Event>) -> Self {
        Event::Batch(events)
    }

    /// the recorded event name
    pub fn name(&self) -> &str {
        match self {
            Event::Op { name, .. } => name,
            Event::Batch(_) => BATCH_EVENT,
        }
    }

    /// number of leaf operations
    pub fn len(&self) -> usize {
        match self {
            Event::Op { .. } => 1,
            Event::Batch(events) => events.iter().map(Event::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// true if this event or any event nested in it is `init`
    pub fn contains_init(&self) -> bool {
        self.flatten().iter().any(|(name, _)| *name == INIT_EVENT)
    }

    /// leaf operations in application order
    pub fn flatten(&self) -> Vec<(&str, &Value)> {
        let mut out = Vec::new();
        self.collect_ops(&mut out);
        out
    }

    fn collect_ops<'a>(&'a self, out: &mut Vec<(&'a str, &'a Value)>) {
        match self {
            Event::Op { name, payload } => out.push((name, payload)),
            Event::Batch(events) => events.iter().for_each(|e| e.collect_ops(out)),
        }
    }

    /// encode as the `(name, payload)` pair stored in a commit
    pub fn to_wire(&self) -> (String, Value) {
        match self {
            Event::Op { name, payload } => (name.clone(), payload.clone()),
            Event::Batch(events) => {
                let items: Vec<Value> = events.iter().map(Event::to_wire_value).collect();
                (BATCH_EVENT.to_string(), json!({ "events": items }))
            }
        }
    }

    fn to_wire_value(&self) -> Value {
        let (name, payload) = self.to_wire();
        json!({ "name": name, "payload": payload })
    }

    /// decode a stored `(name, payload)` pair
    pub fn from_wire(name: &str, payload: &Value) -> EventResult<Self> {
        if name != BATCH_EVENT {
            return Ok(Event::new(name, payload.clone()));
        }
        let items = payload
            .get("events")
            .and_then(Value::as_array)
            .ok_or_else(|| EventError::MalformedBatch("payload has no 'events' list".to_string()))?;
        let events = items
            .iter()
            .map(|item| {
                let wire: WireEvent = serde_json::from_value(item.clone())
                    .map_err(|e| EventError::MalformedBatch(e.to_string()))?;
                Event::from_wire(&wire.name, &wire.payload)
            })
            .collect::<EventResult<Vec<_>>>()?;
        Ok(Event::Batch(events))
    }

    /// the event a commit records; merge commits record none
    pub fn from_commit(commit: &Commit) -> EventResult<Option<Self>> {
        if commit.event_name == MERGE_EVENT {
            return Ok(None);
        }
        Event::from_wire(&commit.event_name, &commit.event_payload).map(Some)
    }
}

impl From<WireEvent> for Event {
    fn from(wire: WireEvent) -> Self {
        Event::new(wire.name, wire.payload)
    }
}

impl Serialize for Event {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireEvent::deserialize(deserializer)?;
        Event::from_wire(&wire.name, &wire.payload).map_err(serde::de::Error::custom)
    }
}
