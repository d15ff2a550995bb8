//! Push, pull and fetch against a remote.
//!
//! A remote is any `ObjectStore`. The only synchronisation point is the
//! remote ref's compare-and-swap: two concurrent pushes both upload their
//! objects, exactly one moves the ref, and the other sees `NonFastForward`.

mod transfer;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{VcsError, VcsResult};
use crate::event::EventRegistry;
use crate::materialize::Materializer;
use crate::storage::{
    CommitGraph, CommitId, ObjectStore, Ref, RefKind, RefManager, RefName, StateId, StorageError,
};

pub use transfer::TransferStats;
pub(crate) use transfer::transfer;

/// A named handle on another repository's store.
#[derive(Debug, Clone)]
pub struct Remote {
    pub name: String,
    pub store: Arc<dyn ObjectStore>,
}

impl Remote {
    pub fn new(name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }
}

// ==================== Reports ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub ref_name: String,
    /// remote ref before the push, `None` if it did not exist
    pub old_commit: Option<CommitId>,
    pub new_commit: CommitId,
    pub commits_transferred: usize,
    pub states_transferred: usize,
    pub created: bool,
    /// true when a non-fast-forward update was forced
    pub forced: bool,
}

impl PushReport {
    pub fn is_noop(&self) -> bool {
        self.old_commit.as_ref() == Some(&self.new_commit)
    }
}

impl fmt::Display for PushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_noop() {
            return write!(f, "{}: everything up to date", self.ref_name);
        }
        let old = self
            .old_commit
            .as_ref()
            .map(|c| c.short().to_string())
            .unwrap_or_else(|| "(new)".to_string());
        write!(
            f,
            "{}: {} -> {}{} ({} commits, {} states)",
            self.ref_name,
            old,
            self.new_commit.short(),
            if self.forced { " (forced)" } else { "" },
            self.commits_transferred,
            self.states_transferred
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PullOutcome {
    /// local already matched the remote
    UpToDate,
    /// local branch moved forward to the remote tip
    FastForward,
    /// local branch did not exist and was created
    Created,
    /// local is strictly ahead of the remote; nothing moved
    Ahead,
}

impl fmt::Display for PullOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullOutcome::UpToDate => write!(f, "up to date"),
            PullOutcome::FastForward => write!(f, "fast-forward"),
            PullOutcome::Created => write!(f, "created"),
            PullOutcome::Ahead => write!(f, "ahead of remote"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullReport {
    pub ref_name: String,
    pub outcome: PullOutcome,
    /// local ref before the pull
    pub old_commit: Option<CommitId>,
    /// local ref after the pull
    pub new_commit: CommitId,
    pub remote_commit: CommitId,
    pub commits_transferred: usize,
    pub states_transferred: usize,
    /// snapshot materialized from the remote when the new tip had none
    pub synthetic_snapshot: Option<StateId>,
}

impl fmt::Display for PullReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} at {} ({} commits, {} states)",
            self.ref_name,
            self.outcome,
            self.new_commit.short(),
            self.commits_transferred,
            self.states_transferred
        )
    }
}

/// one tracking ref written by fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackingUpdate {
    pub remote_ref: String,
    pub tracking_ref: String,
    pub old_commit: Option<CommitId>,
    pub new_commit: CommitId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub remote: String,
    /// tracking refs that changed
    pub updated: Vec<TrackingUpdate>,
    pub commits_transferred: usize,
    pub states_transferred: usize,
}

impl fmt::Display for FetchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.updated.is_empty() {
            return write!(f, "{}: no changes", self.remote);
        }
        for (i, update) in self.updated.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            let old = update
                .old_commit
                .as_ref()
                .map(|c| c.short().to_string())
                .unwrap_or_else(|| "(new)".to_string());
            write!(f, "{} -> {}: {} -> {}", update.remote_ref, update.tracking_ref, old, update.new_commit.short())?;
        }
        Ok(())
    }
}

// ==================== Engine ====================

/// Moves history between the local store and remotes.
pub struct SyncEngine<'a> {
    local: &'a dyn ObjectStore,
    registry: &'a EventRegistry,
}

impl<'a> SyncEngine<'a> {
    pub fn new(local: &'a dyn ObjectStore, registry: &'a EventRegistry) -> Self {
        Self { local, registry }
    }

    /// upload `local_tip` and move the remote's `ref_name` to it
    pub fn push(&self, remote: &Remote, ref_name: &RefName, local_tip: &CommitId, force: bool) -> VcsResult<PushReport> {
        let remote_store = remote.store.as_ref();
        let old = remote_store.find_ref(ref_name)?;
        let old_commit = old.as_ref().map(|r| r.commit_id.clone());

        if old_commit.as_ref() == Some(local_tip) {
            debug!(remote = %remote.name, branch = %ref_name, "push: remote already up to date");
            return Ok(PushReport {
                ref_name: ref_name.to_string(),
                old_commit,
                new_commit: local_tip.clone(),
                commits_transferred: 0,
                states_transferred: 0,
                created: false,
                forced: false,
            });
        }

        let mut forced = false;
        if let Some(remote_commit) = &old_commit {
            let fast_forward = self.local.has_commit(remote_commit)?
                && CommitGraph::new(self.local).is_ancestor(remote_commit, local_tip)?;
            if !fast_forward {
                if !force {
                    return Err(VcsError::NonFastForward {
                        ref_name: ref_name.to_string(),
                        local: local_tip.clone(),
                        remote: remote_commit.clone(),
                    });
                }
                forced = true;
            }
        }

        let stats = transfer(self.local, remote_store, local_tip)?;

        let kind = old.as_ref().map(|r| r.kind).unwrap_or(RefKind::Branch);
        let new_ref = Ref::new(ref_name.clone(), local_tip.clone(), kind);
        match remote_store.compare_and_swap_ref(old_commit.as_ref(), &new_ref) {
            Ok(()) => {}
            Err(StorageError::ConcurrentModification { actual, .. }) => {
                info!(remote = %remote.name, branch = %ref_name, "push lost a race for the remote ref");
                return Err(VcsError::NonFastForward {
                    ref_name: ref_name.to_string(),
                    local: local_tip.clone(),
                    remote: actual.or_else(|| old_commit.clone()).unwrap_or_else(|| local_tip.clone()),
                });
            }
            Err(e) => return Err(e.into()),
        }
        RefManager::update_tracking(self.local, &remote.name, ref_name, local_tip.clone())?;

        info!(
            remote = %remote.name,
            branch = %ref_name,
            to = %local_tip.short(),
            commits = stats.commits,
            states = stats.states,
            forced,
            "pushed"
        );
        Ok(PushReport {
            ref_name: ref_name.to_string(),
            created: old_commit.is_none(),
            old_commit,
            new_commit: local_tip.clone(),
            commits_transferred: stats.commits,
            states_transferred: stats.states,
            forced,
        })
    }

    /// download the remote's `ref_name` and fast-forward the local branch
    pub fn pull(&self, remote: &Remote, ref_name: &RefName) -> VcsResult<PullReport> {
        let remote_store = remote.store.as_ref();
        let remote_tip = remote_store.get_ref(ref_name)?.commit_id;

        let stats = transfer(remote_store, self.local, &remote_tip)?;
        RefManager::update_tracking(self.local, &remote.name, ref_name, remote_tip.clone())?;

        let old_commit = self.local.find_ref(ref_name)?.map(|r| r.commit_id);
        let graph = CommitGraph::new(self.local);
        let (outcome, new_commit) = match &old_commit {
            None => {
                RefManager::update_branch_if_unchanged(self.local, ref_name, None, remote_tip.clone())?;
                (PullOutcome::Created, remote_tip.clone())
            }
            Some(local) if local == &remote_tip => (PullOutcome::UpToDate, local.clone()),
            Some(local) if graph.is_ancestor(local, &remote_tip)? => {
                RefManager::update_branch_if_unchanged(self.local, ref_name, Some(local), remote_tip.clone())?;
                (PullOutcome::FastForward, remote_tip.clone())
            }
            Some(local) if graph.is_ancestor(&remote_tip, local)? => (PullOutcome::Ahead, local.clone()),
            Some(local) => {
                return Err(VcsError::PullConflict {
                    ref_name: ref_name.to_string(),
                    local: local.clone(),
                    remote: remote_tip,
                })
            }
        };

        let synthetic_snapshot = match outcome {
            PullOutcome::Created | PullOutcome::FastForward => self.ensure_snapshot(remote, &new_commit)?,
            PullOutcome::UpToDate | PullOutcome::Ahead => None,
        };

        info!(
            remote = %remote.name,
            branch = %ref_name,
            outcome = %outcome,
            commits = stats.commits,
            states = stats.states,
            "pulled"
        );
        Ok(PullReport {
            ref_name: ref_name.to_string(),
            outcome,
            old_commit,
            new_commit,
            remote_commit: remote_tip,
            commits_transferred: stats.commits,
            states_transferred: stats.states,
            synthetic_snapshot,
        })
    }

    /// materialize `tip` on the remote and pin it locally if the local
    /// ancestry of `tip` holds no snapshot
    fn ensure_snapshot(&self, remote: &Remote, tip: &CommitId) -> VcsResult<Option<StateId>> {
        match Materializer::new(self.local, self.registry).find_nearest_snapshot(tip) {
            Ok(_) => return Ok(None),
            Err(VcsError::Storage(StorageError::MissingSnapshot(_))) => {}
            Err(e) => return Err(e),
        }
        let state = Materializer::new(remote.store.as_ref(), self.registry).get_state(tip)?;
        let state_id = self.local.put_state(&state)?;
        self.local.pin_snapshot(tip, &state_id)?;
        info!(commit = %tip.short(), state = %state_id.short(), "stored synthetic snapshot from remote");
        Ok(Some(state_id))
    }

    /// mirror every remote branch and tag into `<remote>/<name>` tracking refs
    pub fn fetch(&self, remote: &Remote) -> VcsResult<FetchReport> {
        let remote_store = remote.store.as_ref();
        let mut totals = TransferStats::default();
        let mut updated = Vec::new();

        for r in remote_store.list_refs()? {
            if r.kind == RefKind::Remote {
                continue;
            }
            totals += transfer(remote_store, self.local, &r.commit_id)?;

            let tracking = RefName::tracking(&remote.name, &r.name).map_err(StorageError::from)?;
            let old_commit = self.local.find_ref(&tracking)?.map(|t| t.commit_id);
            if old_commit.as_ref() == Some(&r.commit_id) {
                continue;
            }
            RefManager::update_tracking(self.local, &remote.name, &r.name, r.commit_id.clone())?;
            updated.push(TrackingUpdate {
                remote_ref: r.name.to_string(),
                tracking_ref: tracking.to_string(),
                old_commit,
                new_commit: r.commit_id,
            });
        }

        let report = FetchReport {
            remote: remote.name.clone(),
            updated,
            commits_transferred: totals.commits,
            states_transferred: totals.states,
        };

        info!(
            remote = %remote.name,
            updated = report.updated.len(),
            commits = report.commits_transferred,
            "fetched"
        );
        Ok(report)
    }
}
