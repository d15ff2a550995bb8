//! Object transfer between two stores.
//!
//! Objects move in dependency order: state blobs, then commits parents
//! first, then snapshot pins. The caller moves refs last, so an interrupted
//! transfer leaves only content-addressed objects that a retry reuses.

use std::collections::HashSet;

use tracing::debug;

use crate::error::VcsResult;
use crate::storage::{CommitGraph, CommitId, ObjectStore, StateId};

/// counts of objects copied by one transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub commits: usize,
    pub states: usize,
}

impl std::ops::AddAssign for TransferStats {
    fn add_assign(&mut self, other: Self) {
        self.commits += other.commits;
        self.states += other.states;
    }
}

/// copy everything reachable from `tip` that `to` lacks
pub(crate) fn transfer(from: &dyn ObjectStore, to: &dyn ObjectStore, tip: &CommitId) -> VcsResult<TransferStats> {
    let missing = CommitGraph::new(from).missing_closure(tip, |id| to.has_commit(id))?;
    if missing.is_empty() {
        return Ok(TransferStats::default());
    }

    let mut pins: Vec<(CommitId, StateId)> = Vec::new();
    let mut wanted: Vec<StateId> = Vec::new();
    let mut seen: HashSet<StateId> = HashSet::new();
    for commit in &missing {
        if let Some(state_id) = &commit.state_id {
            if seen.insert(state_id.clone()) {
                wanted.push(state_id.clone());
            }
        }
        if let Some(state_id) = from.pinned_snapshot(&commit.id)? {
            if seen.insert(state_id.clone()) {
                wanted.push(state_id.clone());
            }
            pins.push((commit.id.clone(), state_id));
        }
    }

    let mut stats = TransferStats::default();

    for state_id in &wanted {
        // collected snapshots are simply not sent
        if to.has_state(state_id)? || !from.has_state(state_id)? {
            continue;
        }
        to.put_state(&from.get_state(state_id)?)?;
        stats.states += 1;
    }

    for commit in &missing {
        if to.put_commit(commit)? {
            stats.commits += 1;
        }
    }

    for (commit_id, state_id) in &pins {
        if to.has_state(state_id)? {
            to.pin_snapshot(commit_id, state_id)?;
        }
    }

    debug!(
        tip = %tip.short(),
        commits = stats.commits,
        states = stats.states,
        "transferred objects"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CommitBuilder, MemoryStore, State, INIT_EVENT};
    use serde_json::json;

    fn history(store: &MemoryStore, len: usize) -> Vec<CommitId> {
        let state_id = store.put_state(&State::new()).unwrap();
        let root = CommitBuilder::new("test")
            .event(INIT_EVENT, json!({}))
            .state(Some(state_id))
            .build()
            .unwrap();
        store.put_commit(&root).unwrap();
        let mut ids = vec![root.id];
        for n in 0..len {
            let commit = CommitBuilder::new("test")
                .parent(ids[ids.len() - 1].clone())
                .event("append", json!({ "entry": n }))
                .build()
                .unwrap();
            store.put_commit(&commit).unwrap();
            ids.push(commit.id);
        }
        ids
    }

    #[test]
    fn test_transfer_full_then_incremental() {
        let local = MemoryStore::new();
        let remote = MemoryStore::new();
        let ids = history(&local, 3);

        let first = transfer(&local, &remote, &ids[2]).unwrap();
        assert_eq!(first, TransferStats { commits: 3, states: 1 });

        let second = transfer(&local, &remote, &ids[3]).unwrap();
        assert_eq!(second, TransferStats { commits: 1, states: 0 });

        let again = transfer(&local, &remote, &ids[3]).unwrap();
        assert_eq!(again, TransferStats::default());
        assert_eq!(remote.commit_count(), 4);
    }

    #[test]
    fn test_pins_travel_with_commits() {
        let local = MemoryStore::new();
        let remote = MemoryStore::new();
        let ids = history(&local, 2);
        let snap = State::from_value(json!({"entries": [0, 1]})).unwrap();
        let snap_id = local.put_state(&snap).unwrap();
        local.pin_snapshot(&ids[2], &snap_id).unwrap();

        let stats = transfer(&local, &remote, &ids[2]).unwrap();
        assert_eq!(stats.states, 2);
        assert_eq!(remote.pinned_snapshot(&ids[2]).unwrap(), Some(snap_id));
    }
}
