//! In-process object store.
//!
//! All four tables live behind one `RwLock`, which is what makes
//! `compare_and_swap_ref` atomic. Clone the handle to share it: clones see
//! the same tables.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::storage::backend::{check_expected, ObjectStore};
use crate::storage::commit::Commit;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::state::State;
use crate::storage::types::{CommitId, Ref, RefName, StateId};

/// Thread-safe in-memory repository storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryTables>>,
}

#[derive(Debug, Default)]
struct MemoryTables {
    states: HashMap<StateId, State>,
    commits: HashMap<CommitId, Commit>,
    refs: BTreeMap<RefName, Ref>,
    pins: BTreeMap<CommitId, StateId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// number of stored commits
    pub fn commit_count(&self) -> usize {
        self.inner.read().commits.len()
    }

    /// number of stored state blobs
    pub fn state_count(&self) -> usize {
        self.inner.read().states.len()
    }
}

impl ObjectStore for MemoryStore {
    fn has_state(&self, id: &StateId) -> StorageResult<bool> {
        Ok(self.inner.read().states.contains_key(id))
    }

    fn get_state(&self, id: &StateId) -> StorageResult<State> {
        self.inner
            .read()
            .states
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::StateNotFound(id.clone()))
    }

    fn put_state(&self, state: &State) -> StorageResult<StateId> {
        let id = state.id();
        let mut tables = self.inner.write();
        if !tables.states.contains_key(&id) {
            debug!(state = %id.short(), "storing state blob");
            tables.states.insert(id.clone(), state.clone());
        }
        Ok(id)
    }

    fn delete_state(&self, id: &StateId) -> StorageResult<bool> {
        Ok(self.inner.write().states.remove(id).is_some())
    }

    fn list_state_ids(&self) -> StorageResult<Vec<StateId>> {
        let mut ids: Vec<StateId> = self.inner.read().states.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn has_commit(&self, id: &CommitId) -> StorageResult<bool> {
        Ok(self.inner.read().commits.contains_key(id))
    }

    fn get_commit(&self, id: &CommitId) -> StorageResult<Commit> {
        self.inner
            .read()
            .commits
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::CommitNotFound(id.to_string()))
    }

    fn put_commit(&self, commit: &Commit) -> StorageResult<bool> {
        commit.verify()?;
        let mut tables = self.inner.write();
        if tables.commits.contains_key(&commit.id) {
            return Ok(false);
        }
        if let Some(parent) = commit.parents.iter().find(|p| !tables.commits.contains_key(*p)) {
            return Err(StorageError::MissingParent {
                commit: commit.id.clone(),
                parent: parent.clone(),
            });
        }
        debug!(commit = %commit.id.short(), event = %commit.event_name, "storing commit");
        tables.commits.insert(commit.id.clone(), commit.clone());
        Ok(true)
    }

    fn list_commit_ids(&self) -> StorageResult<Vec<CommitId>> {
        let mut ids: Vec<CommitId> = self.inner.read().commits.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn find_ref(&self, name: &RefName) -> StorageResult<Option<Ref>> {
        Ok(self.inner.read().refs.get(name).cloned())
    }

    fn list_refs(&self) -> StorageResult<Vec<Ref>> {
        Ok(self.inner.read().refs.values().cloned().collect())
    }

    fn upsert_ref(&self, r: &Ref) -> StorageResult<()> {
        let mut tables = self.inner.write();
        if !tables.commits.contains_key(&r.commit_id) {
            return Err(StorageError::CommitNotFound(r.commit_id.to_string()));
        }
        tables.refs.insert(r.name.clone(), r.clone());
        Ok(())
    }

    fn compare_and_swap_ref(&self, expected: Option<&CommitId>, new: &Ref) -> StorageResult<()> {
        let mut tables = self.inner.write();
        if !tables.commits.contains_key(&new.commit_id) {
            return Err(StorageError::CommitNotFound(new.commit_id.to_string()));
        }
        check_expected(&new.name, expected, tables.refs.get(&new.name))?;
        tables.refs.insert(new.name.clone(), new.clone());
        Ok(())
    }

    fn delete_ref(&self, name: &RefName) -> StorageResult<bool> {
        Ok(self.inner.write().refs.remove(name).is_some())
    }

    fn pin_snapshot(&self, commit: &CommitId, state: &StateId) -> StorageResult<()> {
        let mut tables = self.inner.write();
        if !tables.commits.contains_key(commit) {
            return Err(StorageError::CommitNotFound(commit.to_string()));
        }
        if !tables.states.contains_key(state) {
            return Err(StorageError::StateNotFound(state.clone()));
        }
        tables.pins.insert(commit.clone(), state.clone());
        Ok(())
    }

    fn pinned_snapshot(&self, commit: &CommitId) -> StorageResult<Option<StateId>> {
        Ok(self.inner.read().pins.get(commit).cloned())
    }

    fn unpin_snapshot(&self, commit: &CommitId) -> StorageResult<bool> {
        Ok(self.inner.write().pins.remove(commit).is_some())
    }

    fn list_pins(&self) -> StorageResult<Vec<(CommitId, StateId)>> {
        Ok(self
            .inner
            .read()
            .pins
            .iter()
            .map(|(c, s)| (c.clone(), s.clone()))
            .collect())
    }
}
