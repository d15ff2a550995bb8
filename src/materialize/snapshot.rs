//! Snapshot policy, creation and garbage collection.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{VcsError, VcsResult};
use crate::event::EventRegistry;
use crate::materialize::Materializer;
use crate::storage::{CommitId, ObjectStore, RefManager, StateId, StorageError};

/// When to write snapshots and how many to keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotPolicy {
    /// events since the last snapshot that trigger a new one on commit
    pub auto_snapshot_threshold: usize,
    /// minimum distance between explicitly requested snapshots
    pub min_snapshot_interval: usize,
    /// non-root snapshots kept by garbage collection
    pub keep_snapshots: usize,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            auto_snapshot_threshold: 100,
            min_snapshot_interval: 10,
            keep_snapshots: 10,
        }
    }
}

/// how a snapshot is attached to its commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// the commit's own `state_id`
    Embedded,
    /// an entry in the pin table
    Pinned,
}

/// one stored snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRecord {
    pub commit_id: CommitId,
    pub state_id: StateId,
    pub source: SnapshotSource,
    pub timestamp: DateTime<Utc>,
    pub is_root: bool,
}

/// Statistics from a garbage collection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GcReport {
    /// Total snapshots before GC.
    pub total_before: usize,
    /// Number of snapshots retained.
    pub retained: usize,
    /// Commits whose snapshot was dropped.
    pub collected: Vec<CommitId>,
    /// Blobs deleted (or that would be, on a dry run).
    pub states_deleted: Vec<StateId>,
    pub dry_run: bool,
}

impl GcReport {
    /// True if any snapshots were collected.
    pub fn did_collect(&self) -> bool {
        !self.collected.is_empty()
    }
}

impl fmt::Display for GcReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "would collect" } else { "collected" };
        write!(
            f,
            "{} {} of {} snapshots ({} blobs), {} retained",
            verb,
            self.collected.len(),
            self.total_before,
            self.states_deleted.len(),
            self.retained
        )
    }
}

/// replay-distance health of a repository
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotCoverage {
    pub total_commits: usize,
    pub total_snapshots: usize,
    /// commits with no snapshot anywhere in their first-parent ancestry
    pub uncovered_commits: usize,
    pub max_replay_distance: usize,
    pub avg_replay_distance: f64,
    pub recommendations: Vec<String>,
}

/// Decides when snapshots are written and which ones survive GC.
pub struct SnapshotManager<'a> {
    store: &'a dyn ObjectStore,
    materializer: Materializer<'a>,
    policy: &'a SnapshotPolicy,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(store: &'a dyn ObjectStore, registry: &'a EventRegistry, policy: &'a SnapshotPolicy) -> Self {
        Self {
            store,
            materializer: Materializer::new(store, registry),
            policy,
        }
    }

    // ==================== Policy ====================

    /// events since the nearest snapshot, `None` if there is none
    pub fn events_since_snapshot(&self, commit_id: &CommitId) -> VcsResult<Option<usize>> {
        match self.materializer.find_nearest_snapshot(commit_id) {
            Ok(location) => Ok(Some(location.distance())),
            Err(VcsError::Storage(StorageError::MissingSnapshot(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// true if the commit has no snapshot in its ancestry or is at least
    /// `auto_snapshot_threshold` events away from one
    pub fn should_auto_snapshot(&self, commit_id: &CommitId) -> VcsResult<bool> {
        Ok(match self.events_since_snapshot(commit_id)? {
            None => true,
            Some(distance) => distance >= self.policy.auto_snapshot_threshold,
        })
    }

    /// same decision for a commit about to be created on top of `parent`
    pub fn should_snapshot_after(&self, parent: Option<&CommitId>, added: usize) -> VcsResult<bool> {
        let Some(parent) = parent else {
            return Ok(true);
        };
        Ok(match self.events_since_snapshot(parent)? {
            None => true,
            Some(distance) => distance + added >= self.policy.auto_snapshot_threshold,
        })
    }

    // ==================== Creation ====================

    /// snapshot a commit unless one is closer than `min_snapshot_interval`
    ///
    /// returns the existing snapshot if the commit already has one
    pub fn snapshot(&self, commit_id: &CommitId) -> VcsResult<Option<StateId>> {
        let commit = self.store.get_commit(commit_id)?;
        if let Some(existing) = self.materializer.snapshot_of(&commit)? {
            return Ok(Some(existing));
        }
        if let Some(distance) = self.events_since_snapshot(commit_id)? {
            if distance < self.policy.min_snapshot_interval {
                debug!(
                    commit = %commit_id.short(),
                    distance,
                    min = self.policy.min_snapshot_interval,
                    "snapshot skipped, too close to the previous one"
                );
                return Ok(None);
            }
        }
        self.force_snapshot(commit_id).map(Some)
    }

    /// materialize and pin a snapshot regardless of policy
    pub fn force_snapshot(&self, commit_id: &CommitId) -> VcsResult<StateId> {
        let state = self.materializer.get_state(commit_id)?;
        let state_id = self.store.put_state(&state)?;
        self.store.pin_snapshot(commit_id, &state_id)?;
        info!(commit = %commit_id.short(), state = %state_id.short(), "snapshot pinned");
        Ok(state_id)
    }

    /// every usable snapshot, newest first
    pub fn list_snapshots(&self) -> VcsResult<Vec<SnapshotRecord>> {
        let mut records = Vec::new();
        for id in self.store.list_commit_ids()? {
            let commit = self.store.get_commit(&id)?;
            if let Some(state_id) = &commit.state_id {
                if self.store.has_state(state_id)? {
                    records.push(SnapshotRecord {
                        commit_id: id.clone(),
                        state_id: state_id.clone(),
                        source: SnapshotSource::Embedded,
                        timestamp: commit.timestamp,
                        is_root: commit.is_root(),
                    });
                }
            }
        }
        for (commit_id, state_id) in self.store.list_pins()? {
            if !self.store.has_state(&state_id)? {
                continue;
            }
            let commit = self.store.get_commit(&commit_id)?;
            records.push(SnapshotRecord {
                commit_id,
                state_id,
                source: SnapshotSource::Pinned,
                timestamp: commit.timestamp,
                is_root: commit.is_root(),
            });
        }
        records.sort_by(|a, b| {
            (Reverse(a.timestamp), &a.commit_id).cmp(&(Reverse(b.timestamp), &b.commit_id))
        });
        Ok(records)
    }

    // ==================== Garbage Collection ====================

    /// drop all but the root snapshots and the `keep` most recent ones
    pub fn gc(&self, keep: usize) -> VcsResult<GcReport> {
        self.collect(keep, false)
    }

    /// report what `gc` would remove without touching the store
    pub fn gc_dry_run(&self, keep: usize) -> VcsResult<GcReport> {
        self.collect(keep, true)
    }

    fn collect(&self, keep: usize, dry_run: bool) -> VcsResult<GcReport> {
        let records = self.list_snapshots()?;
        let total_before = records.len();

        let mut kept_recent = 0;
        let (retained, dropped): (Vec<SnapshotRecord>, Vec<SnapshotRecord>) =
            records.into_iter().partition(|r| {
                if r.is_root {
                    return true;
                }
                kept_recent += 1;
                kept_recent <= keep
            });

        // blobs are shared between commits with identical state
        let live: HashSet<&StateId> = retained.iter().map(|r| &r.state_id).collect();
        let mut states_deleted: Vec<StateId> = Vec::new();
        for record in &dropped {
            if !live.contains(&record.state_id) && !states_deleted.contains(&record.state_id) {
                states_deleted.push(record.state_id.clone());
            }
        }

        if !dry_run {
            for record in &dropped {
                if record.source == SnapshotSource::Pinned {
                    self.store.unpin_snapshot(&record.commit_id)?;
                }
            }
            for state_id in &states_deleted {
                self.store.delete_state(state_id)?;
            }
        }

        let report = GcReport {
            total_before,
            retained: retained.len(),
            collected: dropped.into_iter().map(|r| r.commit_id).collect(),
            states_deleted,
            dry_run,
        };
        info!(
            dry_run,
            collected = report.collected.len(),
            retained = report.retained,
            blobs = report.states_deleted.len(),
            "snapshot gc"
        );
        Ok(report)
    }

    // ==================== Coverage ====================

    /// replay distances over every stored commit, with recommendations
    pub fn coverage(&self) -> VcsResult<SnapshotCoverage> {
        let commit_ids = self.store.list_commit_ids()?;
        let total_snapshots = self.list_snapshots()?.len();

        let mut distances = Vec::with_capacity(commit_ids.len());
        let mut uncovered = 0;
        for id in &commit_ids {
            match self.events_since_snapshot(id)? {
                Some(distance) => distances.push(distance),
                None => uncovered += 1,
            }
        }

        let max_replay_distance = distances.iter().copied().max().unwrap_or(0);
        let avg_replay_distance = if distances.is_empty() {
            0.0
        } else {
            distances.iter().sum::<usize>() as f64 / distances.len() as f64
        };

        let mut recommendations = Vec::new();
        for branch in RefManager::list_branches(self.store)? {
            if let Some(distance) = self.events_since_snapshot(&branch.commit_id)? {
                if distance >= self.policy.auto_snapshot_threshold {
                    recommendations.push(format!(
                        "create a snapshot on '{}': {} events since the last one",
                        branch.name, distance
                    ));
                }
            }
        }
        if uncovered > 0 {
            recommendations.push(format!(
                "{} commits have no snapshot in their ancestry; the repository is damaged",
                uncovered
            ));
        }
        let collectable = self.gc_dry_run(self.policy.keep_snapshots)?;
        if collectable.did_collect() {
            recommendations.push(format!(
                "run gc: {} snapshots exceed the retention of {}",
                collectable.collected.len(),
                self.policy.keep_snapshots
            ));
        }

        Ok(SnapshotCoverage {
            total_commits: commit_ids.len(),
            total_snapshots,
            uncovered_commits: uncovered,
            max_replay_distance,
            avg_replay_distance,
            recommendations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CommitBuilder, MemoryStore, Ref, RefName, State, INIT_EVENT};
    use serde_json::json;

    fn chain(store: &MemoryStore, len: usize) -> Vec<CommitId> {
        let root_state = store.put_state(&State::new()).unwrap();
        let root = CommitBuilder::new("test")
            .event(INIT_EVENT, json!({}))
            .state(Some(root_state))
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
        store
            .upsert_ref(&Ref::branch(RefName::main(), ids[ids.len() - 1].clone()))
            .unwrap();
        ids
    }

    fn policy(threshold: usize, min: usize, keep: usize) -> SnapshotPolicy {
        SnapshotPolicy {
            auto_snapshot_threshold: threshold,
            min_snapshot_interval: min,
            keep_snapshots: keep,
        }
    }

    #[test]
    fn test_should_auto_snapshot() {
        let store = MemoryStore::new();
        let registry = EventRegistry::with_builtins();
        let ids = chain(&store, 5);
        let policy = policy(5, 1, 10);
        let manager = SnapshotManager::new(&store, &registry, &policy);

        assert!(!manager.should_auto_snapshot(&ids[4]).unwrap());
        assert!(manager.should_auto_snapshot(&ids[5]).unwrap());
        assert!(manager.should_snapshot_after(Some(&ids[4]), 1).unwrap());
        assert!(!manager.should_snapshot_after(Some(&ids[3]), 1).unwrap());
        assert!(manager.should_snapshot_after(None, 1).unwrap());
    }

    #[test]
    fn test_snapshot_respects_min_interval() {
        let store = MemoryStore::new();
        let registry = EventRegistry::with_builtins();
        let ids = chain(&store, 3);
        let policy = policy(100, 5, 10);
        let manager = SnapshotManager::new(&store, &registry, &policy);

        assert_eq!(manager.snapshot(&ids[3]).unwrap(), None);
        let forced = manager.force_snapshot(&ids[3]).unwrap();
        assert_eq!(store.get_state(&forced).unwrap().entries.len(), 3);
        // already snapshotted
        assert_eq!(manager.snapshot(&ids[3]).unwrap(), Some(forced));
        assert_eq!(manager.events_since_snapshot(&ids[3]).unwrap(), Some(0));

        let records = manager.list_snapshots().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .any(|r| r.source == SnapshotSource::Pinned && r.commit_id == ids[3]));
    }

    #[test]
    fn test_gc_keeps_root_and_recent() {
        let store = MemoryStore::new();
        let registry = EventRegistry::with_builtins();
        let ids = chain(&store, 30);
        let policy = policy(100, 1, 10);
        let manager = SnapshotManager::new(&store, &registry, &policy);
        for i in [10, 20, 30] {
            manager.force_snapshot(&ids[i]).unwrap();
        }
        let before = manager.get_states(&ids);

        let dry = manager.gc_dry_run(1).unwrap();
        assert!(dry.dry_run);
        assert_eq!(dry.collected.len(), 2);
        assert_eq!(manager.list_snapshots().unwrap().len(), 4);

        let report = manager.gc(1).unwrap();
        assert_eq!(report.total_before, 4);
        assert_eq!(report.retained, 2);
        assert_eq!(report.states_deleted.len(), 2);
        assert!(!report.collected.contains(&ids[0]));

        // every commit still materializes to the same state
        assert_eq!(manager.get_states(&ids), before);
    }

    #[test]
    fn test_gc_keeps_shared_blobs() {
        let store = MemoryStore::new();
        let registry = EventRegistry::with_builtins();
        let ids = chain(&store, 2);
        let policy = policy(100, 1, 10);
        let manager = SnapshotManager::new(&store, &registry, &policy);

        // a pin on the root shares the root's empty-state blob
        let empty = store.put_state(&State::new()).unwrap();
        store.pin_snapshot(&ids[1], &empty).unwrap();
        manager.force_snapshot(&ids[2]).unwrap();

        let report = manager.gc(0).unwrap();
        assert!(report.collected.contains(&ids[1]));
        assert!(store.has_state(&empty).unwrap());
    }

    #[test]
    fn test_coverage_recommends_snapshot() {
        let store = MemoryStore::new();
        let registry = EventRegistry::with_builtins();
        chain(&store, 12);
        let policy = policy(10, 1, 10);
        let manager = SnapshotManager::new(&store, &registry, &policy);

        let coverage = manager.coverage().unwrap();
        assert_eq!(coverage.total_commits, 13);
        assert_eq!(coverage.total_snapshots, 1);
        assert_eq!(coverage.max_replay_distance, 12);
        assert!((coverage.avg_replay_distance - 6.0).abs() < f64::EPSILON);
        assert!(coverage
            .recommendations
            .iter()
            .any(|r| r.contains("create a snapshot on 'main': 12 events")));
    }

    impl SnapshotManager<'_> {
        fn get_states(&self, ids: &[CommitId]) -> Vec<State> {
            ids.iter()
                .map(|id| self.materializer.get_state(id).unwrap())
                .collect()
        }
    }
}
