//! The versioned object: an ordered list of records plus a metadata map.
//!
//! A `State` is what the content store holds as a snapshot blob and what the
//! event dispatcher mutates. Its id is the hash of its canonical encoding, so
//! two identical states always share one blob.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::storage::canonical::{self, canonical_json};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::StateId;

/// materialized `{entries, meta}` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub entries: Vec<Value>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl State {
    /// an empty object
    pub fn new() -> Self {
        Self::default()
    }

    /// build a state from records and metadata
    pub fn from_parts(entries: Vec<Value>, meta: Map<String, Value>) -> Self {
        Self { entries, meta }
    }

    /// build a state from a JSON value shaped like `{entries: [...], meta: {...}}`
    pub fn from_value(value: Value) -> StorageResult<Self> {
        match value {
            Value::Object(_) => Ok(serde_json::from_value(value)?),
            other => Err(StorageError::CorruptedObject {
                id: "<state>".to_string(),
                reason: format!("state must be a JSON object, got {}", type_name(&other)),
            }),
        }
    }

    /// the JSON form stored in the content store
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("entries".to_string(), Value::Array(self.entries.clone()));
        map.insert("meta".to_string(), Value::Object(self.meta.clone()));
        Value::Object(map)
    }

    /// content id of this state
    pub fn id(&self) -> StateId {
        StateId::from_digest(canonical::value_hash(&self.to_value()))
    }

    /// number of records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.meta.is_empty()
    }

    /// equality used by the merge commutativity test
    ///
    /// `meta` must match as a map; `entries` must match as a multiset, so two
    /// histories that only differ in the order records were appended compare
    /// equal.
    pub fn structurally_equal(&self, other: &State) -> bool {
        if self.meta != other.meta || self.entries.len() != other.entries.len() {
            return false;
        }
        sorted_records(&self.entries) == sorted_records(&other.entries)
    }
}

fn sorted_records(entries: &[Value]) -> Vec<String> {
    let mut encoded: Vec<String> = entries.iter().map(canonical_json).collect();
    encoded.sort();
    encoded
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(entries: Value, meta: Value) -> State {
        State::from_value(json!({"entries": entries, "meta": meta})).unwrap()
    }

    #[test]
    fn test_identical_states_share_id() {
        let a = state(json!([{"a": 1, "b": 2}]), json!({"title": "t"}));
        let b = state(json!([{"b": 2, "a": 1}]), json!({"title": "t"}));
        assert_eq!(a.id(), b.id());

        let c = state(json!([{"a": 1}]), json!({"title": "t"}));
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_missing_fields_default() {
        let s = State::from_value(json!({})).unwrap();
        assert!(s.is_empty());
        assert!(State::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn test_structural_equality_ignores_record_order() {
        let a = state(json!([{"a": 1}, {"a": 2}]), json!({}));
        let b = state(json!([{"a": 2}, {"a": 1}]), json!({}));
        assert!(a.structurally_equal(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_structural_equality_checks_meta_and_multiplicity() {
        let a = state(json!([{"a": 1}, {"a": 1}]), json!({}));
        let b = state(json!([{"a": 1}, {"a": 2}]), json!({}));
        assert!(!a.structurally_equal(&b));

        let c = state(json!([]), json!({"value": 100}));
        let d = state(json!([]), json!({"value": 200}));
        assert!(!c.structurally_equal(&d));
    }
}
