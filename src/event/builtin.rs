//! Generic event vocabulary over `entries` and `meta`.
//!
//! | event        | payload                  |
//! |--------------|--------------------------|
//! | `init`       | `{entries?, meta?}`      |
//! | `append`     | `{entry}`                |
//! | `insert`     | `{index, entry}`         |
//! | `replace`    | `{index, entry}`         |
//! | `update`     | `{index, fields}`        |
//! | `remove`     | `{index}`                |
//! | `clear`      | `{}`                     |
//! | `set_meta`   | `{key, value}`           |
//! | `delete_meta`| `{key}`                  |

use serde_json::{Map, Value};

use crate::event::error::{EventError, EventResult};
use crate::event::registry::EventRegistry;
use crate::storage::{type_name, State, INIT_EVENT};

pub(crate) fn register_all(registry: &mut EventRegistry) {
    let handlers: [(&str, fn(&mut State, &Value) -> EventResult<()>); 9] = [
        (INIT_EVENT, init),
        ("append", append),
        ("insert", insert),
        ("replace", replace),
        ("update", update),
        ("remove", remove),
        ("clear", clear),
        ("set_meta", set_meta),
        ("delete_meta", delete_meta),
    ];
    for (name, handler) in handlers {
        registry.insert(name, handler);
    }
}

// ==================== Payload Access ====================

fn field<'a>(event: &str, payload: &'a Value, key: &str) -> EventResult<&'a Value> {
    payload
        .get(key)
        .ok_or_else(|| EventError::invalid(event, format!("missing field '{}'", key)))
}

fn index(event: &str, payload: &Value) -> EventResult<usize> {
    let value = field(event, payload, "index")?;
    value
        .as_u64()
        .map(|i| i as usize)
        .ok_or_else(|| {
            EventError::invalid(
                event,
                format!("'index' must be a non-negative integer, got {}", type_name(value)),
            )
        })
}

fn string<'a>(event: &str, payload: &'a Value, key: &str) -> EventResult<&'a str> {
    let value = field(event, payload, key)?;
    value.as_str().ok_or_else(|| {
        EventError::invalid(event, format!("'{}' must be a string, got {}", key, type_name(value)))
    })
}

fn check_index(event: &str, index: usize, len: usize) -> EventResult<()> {
    if index >= len {
        return Err(EventError::IndexOutOfRange {
            event: event.to_string(),
            index,
            len,
        });
    }
    Ok(())
}

// ==================== Handlers ====================

fn init(state: &mut State, payload: &Value) -> EventResult<()> {
    let entries = match payload.get("entries") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => {
            return Err(EventError::invalid(
                INIT_EVENT,
                format!("'entries' must be an array, got {}", type_name(other)),
            ))
        }
    };
    let meta = match payload.get("meta") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(EventError::invalid(
                INIT_EVENT,
                format!("'meta' must be an object, got {}", type_name(other)),
            ))
        }
    };
    *state = State::from_parts(entries, meta);
    Ok(())
}

fn append(state: &mut State, payload: &Value) -> EventResult<()> {
    let entry = field("append", payload, "entry")?;
    state.entries.push(entry.clone());
    Ok(())
}

fn insert(state: &mut State, payload: &Value) -> EventResult<()> {
    let at = index("insert", payload)?;
    let entry = field("insert", payload, "entry")?;
    // inserting at len appends
    if at > state.entries.len() {
        return Err(EventError::IndexOutOfRange {
            event: "insert".to_string(),
            index: at,
            len: state.entries.len(),
        });
    }
    state.entries.insert(at, entry.clone());
    Ok(())
}

fn replace(state: &mut State, payload: &Value) -> EventResult<()> {
    let at = index("replace", payload)?;
    let entry = field("replace", payload, "entry")?;
    check_index("replace", at, state.entries.len())?;
    state.entries[at] = entry.clone();
    Ok(())
}

fn update(state: &mut State, payload: &Value) -> EventResult<()> {
    let at = index("update", payload)?;
    let fields = field("update", payload, "fields")?
        .as_object()
        .ok_or_else(|| EventError::invalid("update", "'fields' must be an object"))?;
    check_index("update", at, state.entries.len())?;
    let record = state.entries[at]
        .as_object_mut()
        .ok_or_else(|| EventError::invalid("update", format!("entry {} is not an object", at)))?;
    for (key, value) in fields {
        record.insert(key.clone(), value.clone());
    }
    Ok(())
}

fn remove(state: &mut State, payload: &Value) -> EventResult<()> {
    let at = index("remove", payload)?;
    check_index("remove", at, state.entries.len())?;
    state.entries.remove(at);
    Ok(())
}

fn clear(state: &mut State, _payload: &Value) -> EventResult<()> {
    state.entries.clear();
    Ok(())
}

fn set_meta(state: &mut State, payload: &Value) -> EventResult<()> {
    let key = string("set_meta", payload, "key")?;
    let value = field("set_meta", payload, "value")?;
    state.meta.insert(key.to_string(), value.clone());
    Ok(())
}

fn delete_meta(state: &mut State, payload: &Value) -> EventResult<()> {
    let key = string("delete_meta", payload, "key")?;
    state.meta.remove(key);
    Ok(())
}
