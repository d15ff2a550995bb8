//! Structural difference between two states.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::storage::{canonical_json, State};

/// Meta keys compared as a map, entries compared as a multiset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateDiff {
    pub meta_added: BTreeMap<String, Value>,
    pub meta_removed: BTreeMap<String, Value>,
    /// key -> (old, new)
    pub meta_changed: BTreeMap<String, (Value, Value)>,
    pub entries_added: Vec<Value>,
    pub entries_removed: Vec<Value>,
}

impl StateDiff {
    pub fn between(old: &State, new: &State) -> Self {
        let mut diff = StateDiff::default();

        for (key, value) in &new.meta {
            match old.meta.get(key) {
                None => {
                    diff.meta_added.insert(key.clone(), value.clone());
                }
                Some(previous) if previous != value => {
                    diff.meta_changed
                        .insert(key.clone(), (previous.clone(), value.clone()));
                }
                Some(_) => {}
            }
        }
        for (key, value) in &old.meta {
            if !new.meta.contains_key(key) {
                diff.meta_removed.insert(key.clone(), value.clone());
            }
        }

        // remaining multiplicity of each old record
        let mut remaining: HashMap<String, usize> = HashMap::new();
        for entry in &old.entries {
            *remaining.entry(canonical_json(entry)).or_default() += 1;
        }
        for entry in &new.entries {
            match remaining.get_mut(&canonical_json(entry)) {
                Some(count) if *count > 0 => *count -= 1,
                _ => diff.entries_added.push(entry.clone()),
            }
        }
        for entry in &old.entries {
            if let Some(count) = remaining.get_mut(&canonical_json(entry)) {
                if *count > 0 {
                    *count -= 1;
                    diff.entries_removed.push(entry.clone());
                }
            }
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.meta_added.is_empty()
            && self.meta_removed.is_empty()
            && self.meta_changed.is_empty()
            && self.entries_added.is_empty()
            && self.entries_removed.is_empty()
    }
}

impl fmt::Display for StateDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "no changes");
        }
        let mut lines = Vec::new();
        for (key, value) in &self.meta_added {
            lines.push(format!("+ meta.{} = {}", key, canonical_json(value)));
        }
        for (key, (old, new)) in &self.meta_changed {
            lines.push(format!(
                "~ meta.{}: {} -> {}",
                key,
                canonical_json(old),
                canonical_json(new)
            ));
        }
        for key in self.meta_removed.keys() {
            lines.push(format!("- meta.{}", key));
        }
        for entry in &self.entries_added {
            lines.push(format!("+ {}", canonical_json(entry)));
        }
        for entry in &self.entries_removed {
            lines.push(format!("- {}", canonical_json(entry)));
        }
        write!(f, "{}", lines.join("\n"))
    }
}
