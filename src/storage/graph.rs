//! Commit graph traversal.
//!
//! Everything here is read-only and works over any `ObjectStore`, local or
//! remote: ancestry checks, merge bases, first-parent history, revision
//! resolution and the "what does the other side lack" closure used by sync.

use std::collections::{HashSet, VecDeque};

use crate::storage::backend::ObjectStore;
use crate::storage::commit::Commit;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{CommitId, RefName, DIGEST_HEX_LEN};

/// shortest accepted abbreviated commit id
pub const MIN_PREFIX_LEN: usize = 4;

/// Read-only view of the commit graph held by a store.
#[derive(Clone, Copy)]
pub struct CommitGraph<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> CommitGraph<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &CommitId) -> StorageResult<Commit> {
        self.store.get_commit(id)
    }

    // ==================== Ancestry ====================

    /// true if `ancestor` is reachable from `descendant` (or equal to it)
    pub fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> StorageResult<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([descendant.clone()]);
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            for parent in self.store.get_commit(&id)?.parents {
                if &parent == ancestor {
                    return Ok(true);
                }
                queue.push_back(parent);
            }
        }
        Ok(false)
    }

    /// every commit reachable from `tip`, including `tip`
    pub fn ancestors(&self, tip: &CommitId) -> StorageResult<HashSet<CommitId>> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([tip.clone()]);
        while let Some(id) = queue.pop_front() {
            if visited.contains(&id) {
                continue;
            }
            let commit = self.store.get_commit(&id)?;
            visited.insert(id);
            queue.extend(commit.parents);
        }
        Ok(visited)
    }

    /// lowest common ancestor of `current` and `source`
    ///
    /// builds the ancestor set of `current`, then walks breadth-first out of
    /// `source` and returns the first commit already in that set
    pub fn merge_base(&self, current: &CommitId, source: &CommitId) -> StorageResult<Option<CommitId>> {
        let current_ancestors = self.ancestors(current)?;
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([source.clone()]);
        while let Some(id) = queue.pop_front() {
            if current_ancestors.contains(&id) {
                return Ok(Some(id));
            }
            if !visited.insert(id.clone()) {
                continue;
            }
            queue.extend(self.store.get_commit(&id)?.parents);
        }
        Ok(None)
    }

    // ==================== History ====================

    /// first-parent history starting at `tip`, newest first
    pub fn history(&self, tip: &CommitId) -> History<'a> {
        History {
            store: self.store,
            next: Some(tip.clone()),
        }
    }

    /// follow `steps` first parents back from `id`
    pub fn walk_back(&self, id: &CommitId, steps: usize) -> StorageResult<Option<CommitId>> {
        let mut current = id.clone();
        for _ in 0..steps {
            match self.store.get_commit(&current)?.first_parent() {
                Some(parent) => current = parent.clone(),
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    // ==================== Transfer Closure ====================

    /// commits reachable from `tip` for which `present` is false, parents first
    ///
    /// the walk stops at any commit `present` accepts, since everything
    /// behind it is present too
    pub fn missing_closure<F>(&self, tip: &CommitId, mut present: F) -> StorageResult<Vec<Commit>>
    where
        F: FnMut(&CommitId) -> StorageResult<bool>,
    {
        let mut ordered = Vec::new();
        let mut done: HashSet<CommitId> = HashSet::new();
        // (commit, parents already pushed)
        let mut stack: Vec<(Commit, bool)> = Vec::new();

        if present(tip)? {
            return Ok(ordered);
        }
        stack.push((self.store.get_commit(tip)?, false));

        while let Some((commit, expanded)) = stack.pop() {
            if done.contains(&commit.id) {
                continue;
            }
            if expanded {
                done.insert(commit.id.clone());
                ordered.push(commit);
                continue;
            }
            let parents = commit.parents.clone();
            stack.push((commit, true));
            for parent in parents.iter().rev() {
                if done.contains(parent) || present(parent)? {
                    continue;
                }
                stack.push((self.store.get_commit(parent)?, false));
            }
        }
        Ok(ordered)
    }

    // ==================== Revisions ====================

    /// resolve a revision to a commit id
    ///
    /// accepted forms: `HEAD` (when `head` is given), a ref name, a full id,
    /// an id prefix of at least four hex characters, each optionally followed
    /// by `~N` to step N first parents back
    pub fn resolve(&self, revision: &str, head: Option<&CommitId>) -> StorageResult<CommitId> {
        let (base, steps) = split_revision(revision)?;
        let id = self.resolve_base(base, head)?;
        self.walk_back(&id, steps)?
            .ok_or_else(|| StorageError::UnknownRevision(revision.to_string()))
    }

    fn resolve_base(&self, base: &str, head: Option<&CommitId>) -> StorageResult<CommitId> {
        if base == RefName::HEAD {
            return head
                .cloned()
                .ok_or_else(|| StorageError::UnknownRevision(base.to_string()));
        }

        if let Ok(name) = RefName::new(base) {
            if let Some(r) = self.store.find_ref(&name)? {
                return Ok(r.commit_id);
            }
        }

        let is_hex = base.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !is_hex || base.len() < MIN_PREFIX_LEN {
            return Err(StorageError::UnknownRevision(base.to_string()));
        }

        if base.len() == DIGEST_HEX_LEN {
            let id = CommitId::from_hex(base)?;
            return if self.store.has_commit(&id)? {
                Ok(id)
            } else {
                Err(StorageError::UnknownRevision(base.to_string()))
            };
        }

        let mut candidates: Vec<CommitId> = self
            .store
            .list_commit_ids()?
            .into_iter()
            .filter(|id| id.as_str().starts_with(base))
            .collect();
        match candidates.len() {
            0 => Err(StorageError::UnknownRevision(base.to_string())),
            1 => Ok(candidates.remove(0)),
            _ => Err(StorageError::AmbiguousRevision {
                prefix: base.to_string(),
                candidates,
            }),
        }
    }
}

/// split `rev~N` into the base and the step count
fn split_revision(revision: &str) -> StorageResult<(&str, usize)> {
    match revision.split_once('~') {
        None => Ok((revision, 0)),
        Some((base, "")) => Ok((base, 1)),
        Some((base, n)) => n
            .parse::<usize>()
            .map(|steps| (base, steps))
            .map_err(|_| StorageError::UnknownRevision(revision.to_string())),
    }
}

/// Iterator over first-parent history, newest first.
pub struct History<'a> {
    store: &'a dyn ObjectStore,
    next: Option<CommitId>,
}

impl Iterator for History<'_> {
    type Item = StorageResult<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        match self.store.get_commit(&id) {
            Ok(commit) => {
                self.next = commit.first_parent().cloned();
                Some(Ok(commit))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
