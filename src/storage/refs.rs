//!  Branch and reference management.
//!
//!  refs are pointers to commits.  This module handles:
//! - branch and tag lifecycle (create, update, delete)
//! - remote tracking refs written by push, pull and fetch
//!
//! Tracking refs use a namespaced pattern: `{remote}/{name}`.

use tracing::debug;

use crate::storage::backend::ObjectStore;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{CommitId, Ref, RefKind, RefName};

/// Manages refs on any object store.
pub struct RefManager;

impl RefManager {
    /// Resolve a branch name to its current commit ID.
    pub fn resolve_branch(store: &dyn ObjectStore, branch: &RefName) -> StorageResult<CommitId> {
        Ok(store.get_ref(branch)?.commit_id)
    }

    /// Create a new branch pointing to the given commit.
    pub fn create_branch(store: &dyn ObjectStore, branch: &RefName, target: CommitId) -> StorageResult<Ref> {
        Self::create(store, Ref::branch(branch.clone(), target))
    }

    /// Create a tag; tags never move once created.
    pub fn create_tag(store: &dyn ObjectStore, tag: &RefName, target: CommitId) -> StorageResult<Ref> {
        Self::create(store, Ref::tag(tag.clone(), target))
    }

    fn create(store: &dyn ObjectStore, r: Ref) -> StorageResult<Ref> {
        match store.compare_and_swap_ref(None, &r) {
            Ok(()) => {
                debug!(name = %r.name, kind = %r.kind, commit = %r.commit_id.short(), "created ref");
                Ok(r)
            }
            Err(StorageError::ConcurrentModification { name, .. }) => {
                Err(StorageError::RefAlreadyExists(name))
            }
            Err(e) => Err(e),
        }
    }

    /// Update a branch only if it still points to the expected commit.
    ///
    /// `expected == None` creates the branch and fails if it already exists.
    pub fn update_branch_if_unchanged(
        store: &dyn ObjectStore,
        branch: &RefName,
        expected: Option<&CommitId>,
        new_target: CommitId,
    ) -> StorageResult<()> {
        let kind = match store.find_ref(branch)? {
            Some(r) => r.kind,
            None => RefKind::Branch,
        };
        store.compare_and_swap_ref(expected, &Ref::new(branch.clone(), new_target, kind))
    }

    /// Delete a ref.
    pub fn delete_branch(store: &dyn ObjectStore, branch: &RefName) -> StorageResult<()> {
        if !store.delete_ref(branch)? {
            return Err(StorageError::RefNotFound(branch.to_string()));
        }
        Ok(())
    }

    /// List refs of one kind, sorted by name.
    pub fn list(store: &dyn ObjectStore, kind: RefKind) -> StorageResult<Vec<Ref>> {
        Ok(store
            .list_refs()?
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect())
    }

    /// List all branches.
    pub fn list_branches(store: &dyn ObjectStore) -> StorageResult<Vec<Ref>> {
        Self::list(store, RefKind::Branch)
    }

    /// Record where a remote's ref pointed when last fetched.
    pub fn update_tracking(
        store: &dyn ObjectStore,
        remote: &str,
        name: &RefName,
        target: CommitId,
    ) -> StorageResult<RefName> {
        let tracking = RefName::tracking(remote, name)?;
        store.upsert_ref(&Ref::new(tracking.clone(), target, RefKind::Remote))?;
        Ok(tracking)
    }
}
