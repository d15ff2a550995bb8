//! Three-way merge by event commutativity.
//!
//! Two diverged histories merge cleanly when replaying their events in
//! either order from the merge base yields structurally equal states. There
//! is no field-level resolution: a failing test is a conflict that carries
//! both event sequences.
//!
//! ```text
//!          current ──▶ c1 ─ c2
//!         /                    \
//!   merge_base                  M   (parents: current tip, source tip)
//!         \                    /
//!          source ───▶ s1 ─ s2
//! ```

use serde_json::json;
use tracing::{debug, info};

use crate::error::{VcsError, VcsResult};
use crate::event::{Event, EventRegistry};
use crate::materialize::Materializer;
use crate::storage::{
    CommitBuilder, CommitGraph, CommitId, CommitMessage, ObjectStore, RefManager, RefName, State,
    StateId, MERGE_EVENT,
};

/// Everything computed before a merge is performed.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePrepareResult {
    pub source_branch: String,
    pub current_branch: String,
    pub merge_base: CommitId,
    pub base_state: Option<State>,
    /// events only the current side reaches, oldest first
    pub current_events: Vec<Event>,
    /// events only the source side reaches, oldest first
    pub source_events: Vec<Event>,
    pub current_commit: CommitId,
    pub source_commit: CommitId,
    pub is_fast_forward: bool,
    pub already_up_to_date: bool,
}

impl MergePrepareResult {
    fn trivial(
        current_branch: &str,
        source_branch: &str,
        current: &CommitId,
        source: &CommitId,
        merge_base: CommitId,
        is_fast_forward: bool,
    ) -> Self {
        Self {
            source_branch: source_branch.to_string(),
            current_branch: current_branch.to_string(),
            merge_base,
            base_state: None,
            current_events: Vec::new(),
            source_events: Vec::new(),
            current_commit: current.clone(),
            source_commit: source.clone(),
            is_fast_forward,
            already_up_to_date: !is_fast_forward,
        }
    }

    pub fn is_three_way(&self) -> bool {
        !self.is_fast_forward && !self.already_up_to_date
    }
}

/// What a merge did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// the source is already contained in the current branch
    UpToDate,
    /// the current branch moved to the source tip; no commit was created
    FastForward { from: CommitId, to: CommitId },
    /// a two-parent merge commit was created
    Merged { commit: CommitId, state_id: StateId },
}

impl MergeOutcome {
    /// the commit the current branch points at afterwards, if it moved
    pub fn new_tip(&self) -> Option<&CommitId> {
        match self {
            MergeOutcome::UpToDate => None,
            MergeOutcome::FastForward { to, .. } => Some(to),
            MergeOutcome::Merged { commit, .. } => Some(commit),
        }
    }
}

/// Merges one commit into a branch.
pub struct MergeEngine<'a> {
    store: &'a dyn ObjectStore,
    materializer: Materializer<'a>,
    scope: &'a str,
    author: &'a str,
}

impl<'a> MergeEngine<'a> {
    pub fn new(store: &'a dyn ObjectStore, registry: &'a EventRegistry, scope: &'a str, author: &'a str) -> Self {
        Self {
            store,
            materializer: Materializer::new(store, registry),
            scope,
            author,
        }
    }

    /// classify a merge and collect both sides' events
    pub fn prepare(
        &self,
        current_branch: &str,
        current: &CommitId,
        source_branch: &str,
        source: &CommitId,
    ) -> VcsResult<MergePrepareResult> {
        if current == source {
            return Ok(MergePrepareResult::trivial(
                current_branch,
                source_branch,
                current,
                source,
                current.clone(),
                false,
            ));
        }

        let merge_base = CommitGraph::new(self.store)
            .merge_base(current, source)?
            .ok_or_else(|| VcsError::NoMergeBase {
                current: current.clone(),
                source_commit: source.clone(),
            })?;

        if &merge_base == current {
            return Ok(MergePrepareResult::trivial(
                current_branch,
                source_branch,
                current,
                source,
                merge_base,
                true,
            ));
        }
        if &merge_base == source {
            return Ok(MergePrepareResult::trivial(
                current_branch,
                source_branch,
                current,
                source,
                merge_base,
                false,
            ));
        }

        let current_events = self.materializer.events_exclusive(current, source)?;
        let source_events = self.materializer.events_exclusive(source, current)?;
        let base_state = self.materializer.get_state(&merge_base)?;
        debug!(
            base = %merge_base.short(),
            current = current_events.len(),
            source = source_events.len(),
            "prepared three-way merge"
        );

        Ok(MergePrepareResult {
            source_branch: source_branch.to_string(),
            current_branch: current_branch.to_string(),
            merge_base,
            base_state: Some(base_state),
            current_events,
            source_events,
            current_commit: current.clone(),
            source_commit: source.clone(),
            is_fast_forward: false,
            already_up_to_date: false,
        })
    }

    /// true if replaying both sides in either order gives the same state
    ///
    /// an order in which an event fails to apply counts as not commuting
    pub fn commutes(&self, base: &State, current: &[Event], source: &[Event]) -> bool {
        let forward = self
            .materializer
            .replay(base, current)
            .and_then(|s| self.materializer.replay(&s, source));
        let backward = self
            .materializer
            .replay(base, source)
            .and_then(|s| self.materializer.replay(&s, current));
        match (forward, backward) {
            (Ok(a), Ok(b)) => a.structurally_equal(&b),
            _ => false,
        }
    }

    /// merge `source` into the branch `current_branch`
    pub fn merge(&self, current_branch: &RefName, source_branch: &str, source: &CommitId) -> VcsResult<MergeOutcome> {
        let current = RefManager::resolve_branch(self.store, current_branch)?;
        let prepared = self.prepare(current_branch.as_str(), &current, source_branch, source)?;

        if prepared.already_up_to_date {
            debug!(branch = %current_branch, source = source_branch, "already up to date");
            return Ok(MergeOutcome::UpToDate);
        }

        if prepared.is_fast_forward {
            RefManager::update_branch_if_unchanged(self.store, current_branch, Some(&current), source.clone())?;
            info!(
                branch = %current_branch,
                from = %current.short(),
                to = %source.short(),
                "fast-forward merge"
            );
            return Ok(MergeOutcome::FastForward {
                from: current,
                to: source.clone(),
            });
        }

        let base_state = prepared.base_state.clone().unwrap_or_default();
        if !self.commutes(&base_state, &prepared.current_events, &prepared.source_events) {
            info!(branch = %current_branch, source = source_branch, "merge conflict");
            return Err(VcsError::MergeConflict {
                current_branch: prepared.current_branch,
                source_branch: prepared.source_branch,
                current_events: prepared.current_events.iter().map(Event::to_wire).collect(),
                source_events: prepared.source_events.iter().map(Event::to_wire).collect(),
            });
        }

        let current_state = self.materializer.get_state(&current)?;
        let merged = self.materializer.replay(&current_state, &prepared.source_events)?;
        let state_id = self.store.put_state(&merged)?;

        let commit = CommitBuilder::new(self.scope)
            .parents(vec![current.clone(), source.clone()])
            .event(
                MERGE_EVENT,
                json!({
                    "source_branch": source_branch,
                    "target_branch": current_branch.as_str(),
                    "merge_base": prepared.merge_base,
                }),
            )
            .state(Some(state_id.clone()))
            .message(CommitMessage::merge(source_branch, current_branch.as_str()))
            .author(self.author)
            .build()?;
        self.store.put_commit(&commit)?;
        RefManager::update_branch_if_unchanged(self.store, current_branch, Some(&current), commit.id.clone())?;

        info!(
            branch = %current_branch,
            source = source_branch,
            commit = %commit.id.short(),
            "three-way merge"
        );
        Ok(MergeOutcome::Merged {
            commit: commit.id,
            state_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, Ref, StorageError, INIT_EVENT};
    use serde_json::Value;

    struct Fixture {
        store: MemoryStore,
        registry: EventRegistry,
    }

    impl Fixture {
        fn new() -> (Self, CommitId) {
            let fx = Self {
                store: MemoryStore::new(),
                registry: EventRegistry::with_builtins(),
            };
            let state = State::from_value(json!({"entries": [], "meta": {"value": 0}})).unwrap();
            let state_id = fx.store.put_state(&state).unwrap();
            let root = CommitBuilder::new("test")
                .event(INIT_EVENT, json!({"meta": {"value": 0}}))
                .state(Some(state_id))
                .build()
                .unwrap();
            fx.store.put_commit(&root).unwrap();
            RefManager::create_branch(&fx.store, &RefName::main(), root.id.clone()).unwrap();
            (fx, root.id)
        }

        fn engine(&self) -> MergeEngine<'_> {
            MergeEngine::new(&self.store, &self.registry, "test", "tester")
        }

        fn commit(&self, parent: &CommitId, name: &str, payload: Value) -> CommitId {
            let commit = CommitBuilder::new("test")
                .parent(parent.clone())
                .event(name, payload)
                .build()
                .unwrap();
            self.store.put_commit(&commit).unwrap();
            commit.id
        }

        fn main(&self) -> CommitId {
            RefManager::resolve_branch(&self.store, &RefName::main()).unwrap()
        }

        fn advance_main(&self, to: CommitId) {
            self.store.upsert_ref(&Ref::branch(RefName::main(), to)).unwrap();
        }
    }

    #[test]
    fn test_up_to_date() {
        let (fx, root) = Fixture::new();
        let outcome = fx.engine().merge(&RefName::main(), "main", &root).unwrap();
        assert_eq!(outcome, MergeOutcome::UpToDate);

        let ahead = fx.commit(&root, "append", json!({"entry": 1}));
        fx.advance_main(ahead.clone());
        let outcome = fx.engine().merge(&RefName::main(), "old", &root).unwrap();
        assert_eq!(outcome, MergeOutcome::UpToDate);
        assert_eq!(fx.main(), ahead);
    }

    #[test]
    fn test_fast_forward_creates_no_commit() {
        let (fx, root) = Fixture::new();
        let feature = fx.commit(&root, "append", json!({"entry": 1}));
        let before = fx.store.commit_count();

        let outcome = fx.engine().merge(&RefName::main(), "feature", &feature).unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::FastForward {
                from: root,
                to: feature.clone()
            }
        );
        assert_eq!(fx.main(), feature);
        assert_eq!(fx.store.commit_count(), before);
    }

    #[test]
    fn test_disjoint_appends_merge() {
        let (fx, root) = Fixture::new();
        let main_tip = fx.commit(&root, "append", json!({"entry": {"id": "main"}}));
        fx.advance_main(main_tip.clone());
        let feature = fx.commit(&root, "append", json!({"entry": {"id": "feature"}}));

        let outcome = fx.engine().merge(&RefName::main(), "feature", &feature).unwrap();
        let MergeOutcome::Merged { commit, state_id } = outcome else {
            panic!("expected a merge commit");
        };
        let merge = fx.store.get_commit(&commit).unwrap();
        assert_eq!(merge.parents, vec![main_tip, feature]);
        assert_eq!(merge.event_name, MERGE_EVENT);
        assert_eq!(merge.event_payload["merge_base"], json!(root));
        assert_eq!(merge.state_id, Some(state_id.clone()));
        assert_eq!(fx.main(), commit);

        let state = fx.store.get_state(&state_id).unwrap();
        assert_eq!(state.entries, vec![json!({"id": "main"}), json!({"id": "feature"})]);
    }

    #[test]
    fn test_same_field_conflict() {
        let (fx, root) = Fixture::new();
        let main_tip = fx.commit(&root, "set_meta", json!({"key": "value", "value": 100}));
        fx.advance_main(main_tip.clone());
        let feature = fx.commit(&root, "set_meta", json!({"key": "value", "value": 200}));

        let err = fx.engine().merge(&RefName::main(), "feature", &feature).unwrap_err();
        match err {
            VcsError::MergeConflict {
                current_branch,
                source_branch,
                current_events,
                source_events,
            } => {
                assert_eq!(current_branch, "main");
                assert_eq!(source_branch, "feature");
                assert_eq!(current_events.len(), 1);
                assert_eq!(source_events[0].1["value"], json!(200));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(fx.main(), main_tip);
    }

    #[test]
    fn test_same_value_edits_commute() {
        let (fx, root) = Fixture::new();
        let main_tip = fx.commit(&root, "set_meta", json!({"key": "value", "value": 5}));
        fx.advance_main(main_tip);
        let feature = fx.commit(&root, "set_meta", json!({"key": "value", "value": 5}));
        assert!(fx.engine().merge(&RefName::main(), "feature", &feature).is_ok());
    }

    #[test]
    fn test_failing_order_is_conflict() {
        let (fx, root) = Fixture::new();
        let base = fx.commit(&root, "append", json!({"entry": 1}));
        let main_tip = fx.commit(&base, "clear", json!({}));
        fx.advance_main(main_tip);
        let feature = fx.commit(&base, "remove", json!({"index": 0}));
        assert!(matches!(
            fx.engine().merge(&RefName::main(), "feature", &feature),
            Err(VcsError::MergeConflict { .. })
        ));
    }

    #[test]
    fn test_no_merge_base() {
        let (fx, _root) = Fixture::new();
        let state_id = fx.store.put_state(&State::new()).unwrap();
        let other = CommitBuilder::new("other")
            .event(INIT_EVENT, json!({}))
            .state(Some(state_id))
            .build()
            .unwrap();
        fx.store.put_commit(&other).unwrap();
        assert!(matches!(
            fx.engine().merge(&RefName::main(), "other", &other.id),
            Err(VcsError::NoMergeBase { .. })
        ));
    }

    #[test]
    fn test_prepare_reports_sides() {
        let (fx, root) = Fixture::new();
        let a = fx.commit(&root, "append", json!({"entry": "a"}));
        let b = fx.commit(&root, "append", json!({"entry": "b"}));
        let b2 = fx.commit(&b, "append", json!({"entry": "b2"}));
        let prepared = fx.engine().prepare("main", &a, "feature", &b2).unwrap();
        assert!(prepared.is_three_way());
        assert_eq!(prepared.merge_base, root);
        assert_eq!(prepared.current_events.len(), 1);
        assert_eq!(prepared.source_events.len(), 2);
        assert_eq!(prepared.base_state.unwrap().meta["value"], json!(0));
    }

    #[test]
    fn test_criss_cross_merge_applies_events_once() {
        let (fx, root) = Fixture::new();
        let feature_ref = RefName::new("feature").unwrap();
        let m = fx.commit(&root, "append", json!({"entry": "M"}));
        fx.advance_main(m.clone());
        let f = fx.commit(&root, "append", json!({"entry": "F"}));
        RefManager::create_branch(&fx.store, &feature_ref, f.clone()).unwrap();

        // main takes the feature, the feature takes the old main tip
        let engine = fx.engine();
        assert!(matches!(engine.merge(&RefName::main(), "feature", &f), Ok(MergeOutcome::Merged { .. })));
        assert!(matches!(engine.merge(&feature_ref, "main", &m), Ok(MergeOutcome::Merged { .. })));
        let feature_tip = RefManager::resolve_branch(&fx.store, &feature_ref).unwrap();

        let prepared = engine.prepare("main", &fx.main(), "feature", &feature_tip).unwrap();
        assert!(prepared.current_events.is_empty());
        assert!(prepared.source_events.is_empty());

        let MergeOutcome::Merged { state_id, .. } = engine.merge(&RefName::main(), "feature", &feature_tip).unwrap()
        else {
            panic!("expected a merge commit");
        };
        let state = fx.store.get_state(&state_id).unwrap();
        assert_eq!(state.entries, vec![json!("M"), json!("F")]);
    }

    #[test]
    fn test_merge_missing_branch() {
        let (fx, root) = Fixture::new();
        let err = fx
            .engine()
            .merge(&RefName::new("nope").unwrap(), "main", &root)
            .unwrap_err();
        assert!(matches!(err, VcsError::Storage(StorageError::RefNotFound(_))));
    }
}
