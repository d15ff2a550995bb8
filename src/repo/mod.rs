//! The repository facade.
//!
//! A `Repository` is an immutable value: an object at one point in history
//! plus any events staged on top of it. Every mutation returns a new value
//! and the event it staged; `commit` persists the staged events and returns
//! the value at the new commit. Handles are cheap to clone and share the
//! store, the event registry and the configuration.
//!
//! ```text
//! let repo = Repository::init(store, registry, config)?;
//! let (repo, _) = repo.append(json!({"name": "a"}))?;
//! let repo = repo.commit(Some("add a"))?;
//! let feature = repo.branch("feature")?;
//! ```

mod diff;
mod stats;

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::config::RepositoryConfig;
use crate::error::{VcsError, VcsResult};
use crate::event::{Event, EventRegistry};
use crate::materialize::{GcReport, Materializer, SnapshotCoverage, SnapshotManager, SnapshotRecord};
use crate::merge::{MergeEngine, MergeOutcome, MergePrepareResult};
use crate::storage::{
    Commit, CommitBuilder, CommitGraph, CommitId, CommitMessage, ObjectStore, Ref, RefKind, RefManager,
    RefName, State, StateId, StorageError, INIT_EVENT,
};
use crate::sync::{FetchReport, PullReport, PushReport, Remote, SyncEngine};

pub use diff::StateDiff;
pub use stats::RepositoryStats;

/// What the handle is looking at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// a branch; commits move it
    Branch(RefName),
    /// a bare commit; commits move only the handle
    Detached(CommitId),
}

impl fmt::Display for Head {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Head::Branch(name) => write!(f, "{}", name),
            Head::Detached(id) => write!(f, "(detached at {})", id.short()),
        }
    }
}

/// An object at a point in history, with staged events on top.
#[derive(Debug, Clone)]
pub struct Repository {
    store: Arc<dyn ObjectStore>,
    registry: Arc<EventRegistry>,
    config: Arc<RepositoryConfig>,
    head: Head,
    commit_id: CommitId,
    /// state at `commit_id`
    base_state: Arc<State>,
    /// `base_state` with `staged` applied
    state: Arc<State>,
    staged: Vec<Event>,
}

impl Repository {
    // ==================== Lifecycle ====================

    /// Create the root commit and the default branch in an empty store.
    pub fn init(
        store: Arc<dyn ObjectStore>,
        registry: Arc<EventRegistry>,
        config: RepositoryConfig,
    ) -> VcsResult<Self> {
        Self::init_with(store, registry, config, State::new())
    }

    /// Like `init`, with the root commit holding `initial`.
    pub fn init_with(
        store: Arc<dyn ObjectStore>,
        registry: Arc<EventRegistry>,
        config: RepositoryConfig,
        initial: State,
    ) -> VcsResult<Self> {
        config.validate()?;
        let branch = config.default_branch_ref()?;
        if store.has_ref(&branch)? {
            return Err(StorageError::RefAlreadyExists(branch.to_string()).into());
        }

        let event = Event::new(
            INIT_EVENT,
            json!({ "entries": initial.entries, "meta": initial.meta }),
        );
        let root_state = registry.apply(&State::new(), &event)?;
        let state_id = store.put_state(&root_state)?;
        let (name, payload) = event.to_wire();
        let root = CommitBuilder::new(config.scope.as_str())
            .event(name, payload)
            .state(Some(state_id))
            .message(CommitMessage::init())
            .author(config.author.as_str())
            .build()?;
        store.put_commit(&root)?;
        RefManager::create_branch(store.as_ref(), &branch, root.id.clone())?;

        info!(branch = %branch, commit = %root.id.short(), "initialized repository");
        let state = Arc::new(root_state);
        Ok(Self {
            store,
            registry,
            config: Arc::new(config),
            head: Head::Branch(branch),
            commit_id: root.id,
            base_state: state.clone(),
            state,
            staged: Vec::new(),
        })
    }

    /// Open an existing repository on its default branch.
    pub fn open(
        store: Arc<dyn ObjectStore>,
        registry: Arc<EventRegistry>,
        config: RepositoryConfig,
    ) -> VcsResult<Self> {
        config.validate()?;
        let branch = config.default_branch_ref()?;
        Self::load_with(store, registry, Arc::new(config), Head::Branch(branch))
    }

    /// Populate an empty store from a remote's default branch and open it.
    pub fn clone_from(
        remote: &Remote,
        store: Arc<dyn ObjectStore>,
        registry: Arc<EventRegistry>,
        config: RepositoryConfig,
    ) -> VcsResult<Self> {
        config.validate()?;
        let branch = config.default_branch_ref()?;
        SyncEngine::new(store.as_ref(), &registry).pull(remote, &branch)?;
        Self::load_with(store, registry, Arc::new(config), Head::Branch(branch))
    }

    fn load_with(
        store: Arc<dyn ObjectStore>,
        registry: Arc<EventRegistry>,
        config: Arc<RepositoryConfig>,
        head: Head,
    ) -> VcsResult<Self> {
        let commit_id = match &head {
            Head::Branch(name) => RefManager::resolve_branch(store.as_ref(), name)?,
            Head::Detached(id) => id.clone(),
        };
        let state = Arc::new(Materializer::new(store.as_ref(), &registry).get_state(&commit_id)?);
        Ok(Self {
            store,
            registry,
            config,
            head,
            commit_id,
            base_state: state.clone(),
            state,
            staged: Vec::new(),
        })
    }

    fn load(&self, head: Head) -> VcsResult<Self> {
        Self::load_with(self.store.clone(), self.registry.clone(), self.config.clone(), head)
    }

    // ==================== Accessors ====================

    /// working state, staged events included
    pub fn state(&self) -> &State {
        &self.state
    }

    /// state of the current commit, staged events excluded
    pub fn committed_state(&self) -> &State {
        &self.base_state
    }

    pub fn head(&self) -> &Head {
        &self.head
    }

    pub fn commit_id(&self) -> &CommitId {
        &self.commit_id
    }

    /// checked-out branch, `None` when detached
    pub fn branch_name(&self) -> Option<&RefName> {
        match &self.head {
            Head::Branch(name) => Some(name),
            Head::Detached(_) => None,
        }
    }

    pub fn staged(&self) -> &[Event] {
        &self.staged
    }

    pub fn is_dirty(&self) -> bool {
        !self.staged.is_empty()
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    fn require_clean(&self, operation: &str) -> VcsResult<()> {
        if self.is_dirty() {
            return Err(VcsError::UncommittedChanges {
                operation: operation.to_string(),
                pending: self.staged.len(),
            });
        }
        Ok(())
    }

    fn require_branch(&self, operation: &str) -> VcsResult<&RefName> {
        self.branch_name().ok_or_else(|| VcsError::DetachedHead {
            operation: operation.to_string(),
        })
    }

    fn head_label(&self) -> String {
        match &self.head {
            Head::Branch(name) => name.to_string(),
            Head::Detached(_) => RefName::HEAD.to_string(),
        }
    }

    // ==================== Navigation ====================

    /// Resolve a revision against this handle's HEAD.
    pub fn resolve(&self, revision: &str) -> VcsResult<CommitId> {
        Ok(CommitGraph::new(self.store.as_ref()).resolve(revision, Some(&self.commit_id))?)
    }

    /// Read-only view of any revision, detached.
    pub fn at(&self, revision: &str) -> VcsResult<Self> {
        let commit_id = self.resolve(revision)?;
        self.load(Head::Detached(commit_id))
    }

    /// Switch to a branch, or detach at any other revision.
    pub fn checkout(&self, name: &str) -> VcsResult<Self> {
        self.require_clean("checkout")?;
        if let Ok(ref_name) = RefName::new(name) {
            if let Some(r) = self.store.find_ref(&ref_name)? {
                if r.kind == RefKind::Branch {
                    return self.load(Head::Branch(ref_name));
                }
            }
        }
        let commit_id = self.resolve(name)?;
        self.load(Head::Detached(commit_id))
    }

    /// Create a branch at the current commit and switch to it.
    pub fn branch(&self, name: &str) -> VcsResult<Self> {
        self.require_clean("create a branch")?;
        let ref_name = RefName::new(name).map_err(StorageError::from)?;
        RefManager::create_branch(self.store.as_ref(), &ref_name, self.commit_id.clone())?;
        info!(branch = %ref_name, at = %self.commit_id.short(), "created branch");
        Ok(Self {
            head: Head::Branch(ref_name),
            ..self.clone()
        })
    }

    /// Tag the current commit.
    pub fn tag(&self, name: &str) -> VcsResult<Ref> {
        let ref_name = RefName::new(name).map_err(StorageError::from)?;
        let tag = RefManager::create_tag(self.store.as_ref(), &ref_name, self.commit_id.clone())?;
        info!(tag = %ref_name, at = %self.commit_id.short(), "created tag");
        Ok(tag)
    }

    /// Delete a branch other than the checked-out one.
    pub fn delete_branch(&self, name: &str) -> VcsResult<()> {
        let ref_name = RefName::new(name).map_err(StorageError::from)?;
        if self.branch_name() == Some(&ref_name) {
            return Err(VcsError::CheckedOutBranch(ref_name.into_string()));
        }
        RefManager::delete_branch(self.store.as_ref(), &ref_name)?;
        info!(branch = %ref_name, "deleted branch");
        Ok(())
    }

    pub fn branches(&self) -> VcsResult<Vec<Ref>> {
        Ok(RefManager::list_branches(self.store.as_ref())?)
    }

    pub fn tags(&self) -> VcsResult<Vec<Ref>> {
        Ok(RefManager::list(self.store.as_ref(), RefKind::Tag)?)
    }

    // ==================== Staging ====================

    /// Stage an event on top of the working state.
    pub fn apply(&self, event: Event) -> VcsResult<Self> {
        self.registry.validate(&event)?;
        let state = self.registry.apply(&self.state, &event)?;
        let mut staged = self.staged.clone();
        staged.push(event);
        Ok(Self {
            state: Arc::new(state),
            staged,
            ..self.clone()
        })
    }

    fn stage(&self, name: &str, payload: Value) -> VcsResult<(Self, Event)> {
        let event = Event::new(name, payload);
        Ok((self.apply(event.clone())?, event))
    }

    pub fn append(&self, entry: Value) -> VcsResult<(Self, Event)> {
        self.stage("append", json!({ "entry": entry }))
    }

    /// insert before `index`; `index == len` appends
    pub fn insert(&self, index: usize, entry: Value) -> VcsResult<(Self, Event)> {
        self.stage("insert", json!({ "index": index, "entry": entry }))
    }

    pub fn replace(&self, index: usize, entry: Value) -> VcsResult<(Self, Event)> {
        self.stage("replace", json!({ "index": index, "entry": entry }))
    }

    /// shallow-merge `fields` into the object record at `index`
    pub fn update(&self, index: usize, fields: Value) -> VcsResult<(Self, Event)> {
        self.stage("update", json!({ "index": index, "fields": fields }))
    }

    pub fn remove(&self, index: usize) -> VcsResult<(Self, Event)> {
        self.stage("remove", json!({ "index": index }))
    }

    pub fn clear(&self) -> VcsResult<(Self, Event)> {
        self.stage("clear", json!({}))
    }

    pub fn set_meta(&self, key: &str, value: Value) -> VcsResult<(Self, Event)> {
        self.stage("set_meta", json!({ "key": key, "value": value }))
    }

    pub fn delete_meta(&self, key: &str) -> VcsResult<(Self, Event)> {
        self.stage("delete_meta", json!({ "key": key }))
    }

    /// Apply events to the working state without staging them.
    pub fn dry_run(&self, events: &[Event]) -> VcsResult<State> {
        for event in events {
            self.registry.validate(event)?;
        }
        Ok(self.registry.apply_all(&self.state, events)?)
    }

    /// Drop all staged events.
    pub fn discard(&self) -> Self {
        Self {
            state: self.base_state.clone(),
            staged: Vec::new(),
            ..self.clone()
        }
    }

    // ==================== Commit ====================

    /// Persist the staged events as one commit.
    ///
    /// A single staged event is recorded as itself, several as one batch.
    /// On a branch the ref moves by compare-and-swap against the commit
    /// this handle was loaded at, so a concurrent writer on the same branch
    /// surfaces as `ConcurrentModification`.
    pub fn commit(&self, message: Option<&str>) -> VcsResult<Self> {
        if self.staged.is_empty() {
            return Err(VcsError::NothingToCommit);
        }
        let event = match self.staged.as_slice() {
            [single] => single.clone(),
            many => Event::batch(many.to_vec()),
        };

        let manager = SnapshotManager::new(self.store.as_ref(), &self.registry, &self.config.snapshot);
        let state_id = if manager.should_snapshot_after(Some(&self.commit_id), event.len())? {
            Some(self.store.put_state(&self.state)?)
        } else {
            None
        };

        let (name, payload) = event.to_wire();
        let message = message
            .map(str::to_string)
            .unwrap_or_else(|| CommitMessage::event(&name, event.len()));
        let commit = CommitBuilder::new(self.config.scope.as_str())
            .parent(self.commit_id.clone())
            .event(name, payload)
            .state(state_id)
            .message(message)
            .author(self.config.author.as_str())
            .build()?;
        self.store.put_commit(&commit)?;

        let head = match &self.head {
            Head::Branch(branch) => {
                RefManager::update_branch_if_unchanged(
                    self.store.as_ref(),
                    branch,
                    Some(&self.commit_id),
                    commit.id.clone(),
                )?;
                Head::Branch(branch.clone())
            }
            Head::Detached(_) => Head::Detached(commit.id.clone()),
        };

        info!(
            head = %head,
            commit = %commit.id.short(),
            events = event.len(),
            snapshot = commit.state_id.is_some(),
            "committed"
        );
        Ok(Self {
            head,
            commit_id: commit.id,
            base_state: self.state.clone(),
            staged: Vec::new(),
            ..self.clone()
        })
    }

    // ==================== Merge ====================

    fn merge_engine(&self) -> MergeEngine<'_> {
        MergeEngine::new(
            self.store.as_ref(),
            &self.registry,
            &self.config.scope,
            &self.config.author,
        )
    }

    /// Classify a merge of `source` into HEAD without performing it.
    pub fn prepare_merge(&self, source: &str) -> VcsResult<MergePrepareResult> {
        let source_id = self.resolve(source)?;
        self.merge_engine()
            .prepare(&self.head_label(), &self.commit_id, source, &source_id)
    }

    /// Merge `source` into the checked-out branch.
    pub fn merge(&self, source: &str) -> VcsResult<(Self, MergeOutcome)> {
        self.require_clean("merge")?;
        let branch = self.require_branch("merge")?.clone();
        let source_id = self.resolve(source)?;
        let outcome = self.merge_engine().merge(&branch, source, &source_id)?;
        Ok((self.load(Head::Branch(branch))?, outcome))
    }

    // ==================== Sync ====================

    /// Push the checked-out branch to the remote.
    pub fn push(&self, remote: &Remote, force: bool) -> VcsResult<PushReport> {
        self.require_clean("push")?;
        let branch = self.require_branch("push")?;
        SyncEngine::new(self.store.as_ref(), &self.registry).push(remote, branch, &self.commit_id, force)
    }

    /// Pull the checked-out branch from the remote.
    pub fn pull(&self, remote: &Remote) -> VcsResult<(Self, PullReport)> {
        self.require_clean("pull")?;
        let branch = self.require_branch("pull")?.clone();
        let report = SyncEngine::new(self.store.as_ref(), &self.registry).pull(remote, &branch)?;
        Ok((self.load(Head::Branch(branch))?, report))
    }

    /// Update tracking refs for every remote branch and tag.
    pub fn fetch(&self, remote: &Remote) -> VcsResult<FetchReport> {
        SyncEngine::new(self.store.as_ref(), &self.registry).fetch(remote)
    }

    // ==================== Inspection ====================

    /// First-parent history from HEAD, newest first.
    pub fn log(&self, limit: Option<usize>) -> VcsResult<Vec<Commit>> {
        let history = CommitGraph::new(self.store.as_ref()).history(&self.commit_id);
        let commits = history
            .take(limit.unwrap_or(usize::MAX))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(commits)
    }

    pub fn show(&self, revision: &str) -> VcsResult<Commit> {
        let id = self.resolve(revision)?;
        Ok(self.store.get_commit(&id)?)
    }

    pub fn state_at(&self, revision: &str) -> VcsResult<State> {
        let id = self.resolve(revision)?;
        Materializer::new(self.store.as_ref(), &self.registry).get_state(&id)
    }

    pub fn diff(&self, from: &str, to: &str) -> VcsResult<StateDiff> {
        Ok(StateDiff::between(&self.state_at(from)?, &self.state_at(to)?))
    }

    /// staged changes against the current commit
    pub fn diff_working(&self) -> StateDiff {
        StateDiff::between(&self.base_state, &self.state)
    }

    pub fn stats(&self) -> VcsResult<RepositoryStats> {
        let refs = self.store.list_refs()?;
        let count = |kind: RefKind| refs.iter().filter(|r| r.kind == kind).count();
        let history_depth = CommitGraph::new(self.store.as_ref())
            .history(&self.commit_id)
            .count();
        Ok(RepositoryStats {
            branch_count: count(RefKind::Branch),
            tag_count: count(RefKind::Tag),
            tracking_ref_count: count(RefKind::Remote),
            commit_count: self.store.list_commit_ids()?.len(),
            state_count: self.store.list_state_ids()?.len(),
            snapshot_count: self.snapshot_manager().list_snapshots()?.len(),
            history_depth,
            entry_count: self.state.len(),
            meta_key_count: self.state.meta.len(),
            staged_events: self.staged.len(),
        })
    }

    // ==================== Snapshots ====================

    fn snapshot_manager(&self) -> SnapshotManager<'_> {
        SnapshotManager::new(self.store.as_ref(), &self.registry, &self.config.snapshot)
    }

    /// Snapshot the current commit unless one is too close.
    pub fn snapshot(&self) -> VcsResult<Option<StateId>> {
        self.snapshot_manager().snapshot(&self.commit_id)
    }

    /// Snapshot the current commit regardless of policy.
    pub fn force_snapshot(&self) -> VcsResult<StateId> {
        self.snapshot_manager().force_snapshot(&self.commit_id)
    }

    pub fn snapshots(&self) -> VcsResult<Vec<SnapshotRecord>> {
        self.snapshot_manager().list_snapshots()
    }

    /// Collect snapshots, keeping `keep` (or the configured count) recent ones.
    pub fn gc(&self, keep: Option<usize>) -> VcsResult<GcReport> {
        let keep = keep.unwrap_or(self.config.snapshot.keep_snapshots);
        self.snapshot_manager().gc(keep)
    }

    pub fn gc_dry_run(&self, keep: Option<usize>) -> VcsResult<GcReport> {
        let keep = keep.unwrap_or(self.config.snapshot.keep_snapshots);
        self.snapshot_manager().gc_dry_run(keep)
    }

    pub fn coverage(&self) -> VcsResult<SnapshotCoverage> {
        self.snapshot_manager().coverage()
    }
}
