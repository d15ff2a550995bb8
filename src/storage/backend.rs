//! The object store contract.
//!
//! A repository is three tables (state blobs, commits, refs) plus a small
//! table of snapshot pins. `ObjectStore` is the only interface the engine
//! talks to, and it doubles as the remote protocol: a remote is just another
//! `ObjectStore`, whether it lives in memory, on disk, or behind a network
//! binding.

use std::fmt::Debug;

use crate::storage::commit::Commit;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::state::State;
use crate::storage::types::{CommitId, Ref, RefName, StateId};

/// Storage primitives shared by local repositories and remotes.
///
/// Implementations must make `compare_and_swap_ref` atomic; every other
/// mutation is naturally idempotent because objects are content-addressed.
pub trait ObjectStore: Send + Sync + Debug {
    // ==================== Content Store ====================

    /// check if a state blob is present
    fn has_state(&self, id: &StateId) -> StorageResult<bool>;

    /// load a state blob, `StateNotFound` if absent
    fn get_state(&self, id: &StateId) -> StorageResult<State>;

    /// store a state blob under its content id (idempotent)
    fn put_state(&self, state: &State) -> StorageResult<StateId>;

    /// remove a state blob; only garbage collection calls this
    fn delete_state(&self, id: &StateId) -> StorageResult<bool>;

    /// all state blob ids
    fn list_state_ids(&self) -> StorageResult<Vec<StateId>>;

    // ==================== Commit Graph ====================

    fn has_commit(&self, id: &CommitId) -> StorageResult<bool>;

    /// load a commit, `CommitNotFound` if absent
    fn get_commit(&self, id: &CommitId) -> StorageResult<Commit>;

    /// insert a commit if absent; returns true when it was newly stored
    ///
    /// the commit id must verify and every parent must already be present
    fn put_commit(&self, commit: &Commit) -> StorageResult<bool>;

    /// every commit id, for prefix resolution and statistics
    fn list_commit_ids(&self) -> StorageResult<Vec<CommitId>>;

    // ==================== Ref Store ====================

    fn has_ref(&self, name: &RefName) -> StorageResult<bool> {
        Ok(self.find_ref(name)?.is_some())
    }

    /// look up a ref, `None` if absent
    fn find_ref(&self, name: &RefName) -> StorageResult<Option<Ref>>;

    /// look up a ref, `RefNotFound` if absent
    fn get_ref(&self, name: &RefName) -> StorageResult<Ref> {
        self.find_ref(name)?
            .ok_or_else(|| StorageError::RefNotFound(name.to_string()))
    }

    /// all refs, sorted by name
    fn list_refs(&self) -> StorageResult<Vec<Ref>>;

    /// create or overwrite a ref unconditionally
    fn upsert_ref(&self, r: &Ref) -> StorageResult<()>;

    /// atomically replace a ref only if it currently points at `expected`
    ///
    /// `expected == None` means the ref must not exist yet. On mismatch the
    /// store is unchanged and `ConcurrentModification` is returned.
    fn compare_and_swap_ref(&self, expected: Option<&CommitId>, new: &Ref) -> StorageResult<()>;

    /// delete a ref; returns false if it did not exist
    fn delete_ref(&self, name: &RefName) -> StorageResult<bool>;

    // ==================== Snapshot Pins ====================

    /// attach a snapshot to an existing commit
    fn pin_snapshot(&self, commit: &CommitId, state: &StateId) -> StorageResult<()>;

    /// snapshot pinned to a commit, if any
    fn pinned_snapshot(&self, commit: &CommitId) -> StorageResult<Option<StateId>>;

    /// drop a pin; returns false if there was none
    fn unpin_snapshot(&self, commit: &CommitId) -> StorageResult<bool>;

    /// every `(commit, state)` pin
    fn list_pins(&self) -> StorageResult<Vec<(CommitId, StateId)>>;
}

/// reject a commit whose id does not match or whose parents are missing
pub(crate) fn check_insertable<S: ObjectStore + ?Sized>(store: &S, commit: &Commit) -> StorageResult<()> {
    commit.verify()?;
    for parent in &commit.parents {
        if !store.has_commit(parent)? {
            return Err(StorageError::MissingParent {
                commit: commit.id.clone(),
                parent: parent.clone(),
            });
        }
    }
    Ok(())
}

/// shared CAS check used by the store implementations while holding their lock
pub(crate) fn check_expected(
    name: &RefName,
    expected: Option<&CommitId>,
    current: Option<&Ref>,
) -> StorageResult<()> {
    let actual = current.map(|r| &r.commit_id);
    if actual != expected {
        return Err(StorageError::ConcurrentModification {
            name: name.to_string(),
            expected: expected.cloned(),
            actual: actual.cloned(),
        });
    }
    Ok(())
}
