//! Event dispatch.
//!
//! The registry maps event names to handlers. It is built once, shared by
//! `Arc`, and passed to everything that replays history; there is no global
//! handler table.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::event::builtin;
use crate::event::error::{EventError, EventResult};
use crate::event::{Event, RESERVED_EVENTS};
use crate::storage::{State, INIT_EVENT};

/// mutates a state in place according to an event payload
pub type EventHandler = Arc<dyn Fn(&mut State, &Value) -> EventResult<()> + Send + Sync>;

/// Name to handler table.
#[derive(Clone, Default)]
pub struct EventRegistry {
    handlers: BTreeMap<String, EventHandler>,
}

impl EventRegistry {
    /// an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// a registry with the generic entries/meta vocabulary
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// register (or replace) a handler
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> EventResult<()>
    where
        F: Fn(&mut State, &Value) -> EventResult<()> + Send + Sync + 'static,
    {
        let name = name.into();
        if RESERVED_EVENTS.contains(&name.as_str()) {
            return Err(EventError::ReservedName(name));
        }
        self.insert(name, handler);
        Ok(())
    }

    pub(crate) fn insert<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&mut State, &Value) -> EventResult<()> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    fn handler(&self, name: &str) -> EventResult<&EventHandler> {
        self.handlers.get(name).ok_or_else(|| EventError::UnknownEvent {
            name: name.to_string(),
            known: self.names(),
        })
    }

    /// apply one event, returning the next state
    ///
    /// the input is never modified; a failing batch leaves nothing behind
    pub fn apply(&self, state: &State, event: &Event) -> EventResult<State> {
        let mut next = state.clone();
        self.apply_in_place(&mut next, event)?;
        Ok(next)
    }

    /// apply events in order, returning the final state
    pub fn apply_all<'e, I>(&self, state: &State, events: I) -> EventResult<State>
    where
        I: IntoIterator<Item = &'e Event>,
    {
        let mut next = state.clone();
        for event in events {
            self.apply_in_place(&mut next, event)?;
        }
        Ok(next)
    }

    /// apply to a working copy the caller owns
    ///
    /// on error the copy may be partially modified and must be discarded
    pub fn apply_in_place(&self, state: &mut State, event: &Event) -> EventResult<()> {
        match event {
            Event::Op { name, payload } => (self.handler(name)?)(state, payload),
            Event::Batch(events) => events.iter().try_for_each(|e| self.apply_in_place(state, e)),
        }
    }

    /// check that an event can be staged on top of existing history
    ///
    /// every leaf needs a handler, and `init` belongs to the root commit only
    pub fn validate(&self, event: &Event) -> EventResult<()> {
        if event.contains_init() {
            return Err(EventError::RootOnly(INIT_EVENT.to_string()));
        }
        event
            .flatten()
            .into_iter()
            .try_for_each(|(name, _)| self.handler(name).map(|_| ()))
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_event_is_discoverable() {
        let registry = EventRegistry::with_builtins();
        let err = registry
            .apply(&State::new(), &Event::new("frobnicate", json!({})))
            .unwrap_err();
        match err {
            EventError::UnknownEvent { name, known } => {
                assert_eq!(name, "frobnicate");
                assert!(known.contains(&"append".to_string()));
                assert!(known.contains(&"set_meta".to_string()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_batch_is_atomic() {
        let registry = EventRegistry::with_builtins();
        let state = State::new();
        let batch = Event::batch(vec![
            Event::new("append", json!({"entry": 1})),
            Event::new("remove", json!({"index": 7})),
        ]);
        assert!(registry.apply(&state, &batch).is_err());
        assert!(state.entries.is_empty());
    }

    #[test]
    fn test_custom_handler() {
        let mut registry = EventRegistry::new();
        registry
            .register("bump", |state: &mut State, _payload: &Value| {
                let n = state.meta.get("n").and_then(Value::as_i64).unwrap_or(0);
                state.meta.insert("n".to_string(), json!(n + 1));
                Ok(())
            })
            .unwrap();
        let bump = Event::new("bump", json!({}));
        let state = registry.apply_all(&State::new(), [&bump, &bump]).unwrap();
        assert_eq!(state.meta["n"], json!(2));
    }

    #[test]
    fn test_reserved_names_rejected() {
        let mut registry = EventRegistry::new();
        let result = registry.register("batch", |_: &mut State, _: &Value| Ok(()));
        assert!(matches!(result, Err(EventError::ReservedName(_))));
        let result = registry.register("merge", |_: &mut State, _: &Value| Ok(()));
        assert!(matches!(result, Err(EventError::ReservedName(_))));
    }

    #[test]
    fn test_validate_batch() {
        let registry = EventRegistry::with_builtins();
        let good = Event::batch(vec![Event::new("clear", json!({}))]);
        let bad = Event::batch(vec![Event::new("nope", json!({}))]);
        assert!(registry.validate(&good).is_ok());
        assert!(registry.validate(&bad).is_err());
    }

    #[test]
    fn test_validate_rejects_init_anywhere() {
        let registry = EventRegistry::with_builtins();
        let direct = Event::new(INIT_EVENT, json!({"entries": []}));
        let nested = Event::batch(vec![
            Event::new("append", json!({"entry": 1})),
            Event::batch(vec![Event::new(INIT_EVENT, json!({}))]),
        ]);
        assert!(matches!(registry.validate(&direct), Err(EventError::RootOnly(_))));
        assert!(matches!(registry.validate(&nested), Err(EventError::RootOnly(_))));
        // replay of the root commit still goes through the handler
        assert!(registry.apply(&State::new(), &direct).is_ok());
    }
}
