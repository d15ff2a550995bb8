//! State reconstruction.
//!
//! The state at any commit is the nearest snapshot on its first-parent chain
//! with the events recorded after it replayed forward. Merge commits record no
//! event of their own: stepping over one replays the commits only its second
//! parent reaches, after everything its first parent reaches.

mod snapshot;

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::VcsResult;
use crate::event::{Event, EventRegistry};
use crate::storage::{Commit, CommitGraph, CommitId, ObjectStore, State, StateId, StorageError};

pub use snapshot::{
    GcReport, SnapshotCoverage, SnapshotManager, SnapshotPolicy, SnapshotRecord, SnapshotSource,
};

/// where replay of a commit starts
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotLocation {
    /// commit holding the snapshot
    pub commit_id: CommitId,
    pub state_id: StateId,
    /// events after that commit up to the target, oldest first
    pub events: Vec<Event>,
}

impl SnapshotLocation {
    /// number of leaf events to replay
    pub fn distance(&self) -> usize {
        self.events.iter().map(Event::len).sum()
    }
}

/// Rebuilds states from snapshots and events.
#[derive(Clone, Copy)]
pub struct Materializer<'a> {
    store: &'a dyn ObjectStore,
    registry: &'a EventRegistry,
}

impl<'a> Materializer<'a> {
    pub fn new(store: &'a dyn ObjectStore, registry: &'a EventRegistry) -> Self {
        Self { store, registry }
    }

    /// usable snapshot of a commit: embedded first, then pinned
    ///
    /// a pointer whose blob is gone (collected) does not count
    pub fn snapshot_of(&self, commit: &Commit) -> VcsResult<Option<StateId>> {
        if let Some(state_id) = &commit.state_id {
            if self.store.has_state(state_id)? {
                return Ok(Some(state_id.clone()));
            }
            debug!(commit = %commit.id.short(), state = %state_id.short(), "embedded snapshot was collected");
        }
        if let Some(state_id) = self.store.pinned_snapshot(&commit.id)? {
            if self.store.has_state(&state_id)? {
                return Ok(Some(state_id));
            }
            warn!(commit = %commit.id.short(), state = %state_id.short(), "skipping dangling snapshot pin");
        }
        Ok(None)
    }

    /// walk the first-parent chain up to the nearest snapshot
    pub fn find_nearest_snapshot(&self, commit_id: &CommitId) -> VcsResult<SnapshotLocation> {
        let mut current = commit_id.clone();
        loop {
            let commit = self.store.get_commit(&current)?;
            if let Some(state_id) = self.snapshot_of(&commit)? {
                let events = self.events_exclusive(commit_id, &current)?;
                return Ok(SnapshotLocation {
                    commit_id: current,
                    state_id,
                    events,
                });
            }
            current = match commit.first_parent() {
                Some(parent) => parent.clone(),
                None => return Err(StorageError::MissingSnapshot(commit_id.clone()).into()),
            };
        }
    }

    /// the materialized state at a commit
    pub fn get_state(&self, commit_id: &CommitId) -> VcsResult<State> {
        let location = self.find_nearest_snapshot(commit_id)?;
        debug!(
            commit = %commit_id.short(),
            snapshot = %location.commit_id.short(),
            events = location.distance(),
            "materializing"
        );
        let base = self.store.get_state(&location.state_id)?;
        self.replay(&base, &location.events)
    }

    /// apply events to a base state
    pub fn replay(&self, base: &State, events: &[Event]) -> VcsResult<State> {
        Ok(self.registry.apply_all(base, events)?)
    }

    /// events of the commits reachable from `tip` but not from `other`
    ///
    /// parents come before children and a merge's first-parent line before
    /// its second; merge commits add nothing of their own. Commits shared
    /// through an earlier merge are reachable from both sides and are never
    /// collected twice.
    pub fn events_exclusive(&self, tip: &CommitId, other: &CommitId) -> VcsResult<Vec<Event>> {
        enum Visit {
            Enter(CommitId),
            Leave(Commit),
        }

        let excluded = CommitGraph::new(self.store).ancestors(other)?;
        let mut seen: HashSet<CommitId> = HashSet::new();
        let mut events = Vec::new();
        let mut stack = vec![Visit::Enter(tip.clone())];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(id) => {
                    if excluded.contains(&id) || !seen.insert(id.clone()) {
                        continue;
                    }
                    let commit = self.store.get_commit(&id)?;
                    let parents: Vec<CommitId> = commit.parents.iter().rev().cloned().collect();
                    stack.push(Visit::Leave(commit));
                    stack.extend(parents.into_iter().map(Visit::Enter));
                }
                Visit::Leave(commit) => {
                    if !commit.is_merge() {
                        events.extend(Event::from_commit(&commit)?);
                    }
                }
            }
        }
        Ok(events)
    }
}
