//! End-to-end scenarios over the public API.

use std::collections::HashSet;
use std::sync::Arc;

use eventgit::{
    Event, EventError, EventRegistry, FileStore, MemoryStore, MergeOutcome, ObjectStore, PullOutcome,
    Remote, Repository, RepositoryConfig, SnapshotPolicy, VcsError,
};
use serde_json::{json, Value};
use tempfile::TempDir;

fn registry() -> Arc<EventRegistry> {
    Arc::new(EventRegistry::with_builtins())
}

fn config(author: &str) -> RepositoryConfig {
    RepositoryConfig::new("scenarios").author(author)
}

fn init(author: &str) -> Repository {
    Repository::init(Arc::new(MemoryStore::new()), registry(), config(author)).unwrap()
}

fn clone(remote: &Remote, author: &str) -> Repository {
    Repository::clone_from(remote, Arc::new(MemoryStore::new()), registry(), config(author)).unwrap()
}

fn memory_remote() -> Remote {
    Remote::new("origin", Arc::new(MemoryStore::new()))
}

fn commit_append(repo: &Repository, entry: Value) -> Repository {
    let (repo, _) = repo.append(entry).unwrap();
    repo.commit(None).unwrap()
}

fn commit_meta(repo: &Repository, key: &str, value: Value) -> Repository {
    let (repo, _) = repo.set_meta(key, value).unwrap();
    repo.commit(None).unwrap()
}

#[test]
fn test_scenario_a_fast_forward() {
    let remote = memory_remote();
    let alice = commit_append(&init("alice"), json!("first"));
    alice.push(&remote, false).unwrap();

    let bob = clone(&remote, "bob");
    let bob = commit_append(&bob, json!("second"));
    let bob = commit_append(&bob, json!("third"));
    bob.push(&remote, false).unwrap();

    let (alice, report) = alice.pull(&remote).unwrap();
    assert_eq!(report.outcome, PullOutcome::FastForward);
    assert_eq!(alice.commit_id(), bob.commit_id());
    assert_eq!(alice.state(), bob.state());
    assert!(alice.log(None).unwrap().iter().all(|c| c.parents.len() <= 1));

    let (merged, outcome) = bob.checkout("main").unwrap().merge("main").unwrap();
    assert_eq!(outcome, MergeOutcome::UpToDate);
    assert_eq!(merged.commit_id(), bob.commit_id());
}

#[test]
fn test_scenario_a_local_fast_forward_merge() {
    let main = commit_append(&init("alice"), json!(1));
    let feature = commit_append(&main.branch("feature").unwrap(), json!(2));
    let commits_before = feature.store().list_commit_ids().unwrap().len();

    let (main, outcome) = feature.checkout("main").unwrap().merge("feature").unwrap();
    assert!(matches!(outcome, MergeOutcome::FastForward { .. }));
    assert_eq!(main.commit_id(), feature.commit_id());
    assert_eq!(main.store().list_commit_ids().unwrap().len(), commits_before);
}

#[test]
fn test_scenario_b_three_way_merge() {
    let base = commit_meta(&commit_append(&init("alice"), json!("seed")), "value", json!(0));

    let feature = base.branch("feature").unwrap();
    let feature = commit_meta(&feature, "title", json!("Census"));
    let feature = commit_append(&feature, json!("from-feature"));

    let main = feature.checkout("main").unwrap();
    let main = commit_meta(&main, "owner", json!("alice"));
    let main = commit_append(&main, json!("from-main"));

    let prepared = main.prepare_merge("feature").unwrap();
    assert!(prepared.is_three_way());
    assert_eq!(prepared.merge_base, *base.commit_id());
    assert_eq!(prepared.current_events.len(), 2);
    assert_eq!(prepared.source_events.len(), 2);

    let (merged, outcome) = main.merge("feature").unwrap();
    let MergeOutcome::Merged { commit, state_id } = outcome else {
        panic!("expected a merge commit");
    };
    let record = merged.show("HEAD").unwrap();
    assert_eq!(record.id, commit);
    assert_eq!(record.state_id, Some(state_id));
    assert_eq!(
        record.parents,
        vec![main.commit_id().clone(), feature.commit_id().clone()]
    );
    assert_eq!(record.event_payload["merge_base"], json!(base.commit_id()));

    let state = merged.state();
    assert_eq!(state.meta["title"], json!("Census"));
    assert_eq!(state.meta["owner"], json!("alice"));
    assert_eq!(state.meta["value"], json!(0));
    assert_eq!(
        state.entries,
        vec![json!("seed"), json!("from-main"), json!("from-feature")]
    );

    // a second round of divergence merges across the first merge commit
    let feature = commit_append(&merged.checkout("feature").unwrap(), json!("late-feature"));
    let main = commit_meta(&feature.checkout("main").unwrap(), "round", json!(2));
    let (merged, outcome) = main.merge("feature").unwrap();
    assert!(matches!(outcome, MergeOutcome::Merged { .. }));
    assert_eq!(merged.state().len(), 4);
    assert_eq!(merged.state().meta["round"], json!(2));
}

#[test]
fn test_criss_cross_merge_applies_each_event_once() {
    let base = commit_append(&init("alice"), json!("seed"));
    let feature = commit_append(&base.branch("feature").unwrap(), json!("F"));
    let main = commit_append(&feature.checkout("main").unwrap(), json!("M"));
    let old_main = main.commit_id().clone();

    let (main, outcome) = main.merge("feature").unwrap();
    assert!(matches!(outcome, MergeOutcome::Merged { .. }));
    let (feature, outcome) = main.checkout("feature").unwrap().merge(old_main.as_str()).unwrap();
    assert!(matches!(outcome, MergeOutcome::Merged { .. }));

    let prepared = main.prepare_merge("feature").unwrap();
    assert!(prepared.current_events.is_empty());
    assert!(prepared.source_events.is_empty());

    let (main, outcome) = feature.checkout("main").unwrap().merge("feature").unwrap();
    assert!(matches!(outcome, MergeOutcome::Merged { .. }));
    assert_eq!(main.state().entries, vec![json!("seed"), json!("M"), json!("F")]);
    assert!(main.state().structurally_equal(feature.state()));
}

#[test]
fn test_reset_after_root_is_rejected() {
    let base = commit_append(&init("alice"), json!("seed"));
    let feature = base.branch("feature").unwrap();

    let reset = Event::new("init", json!({"entries": []}));
    let err = feature.apply(reset.clone()).unwrap_err();
    assert!(matches!(err, VcsError::Event(EventError::RootOnly(_))));
    assert!(feature.apply(Event::batch(vec![reset])).is_err());

    let feature = commit_append(&feature, json!("fresh"));
    let main = commit_append(&feature.checkout("main").unwrap(), json!("mine"));
    let (merged, _) = main.merge("feature").unwrap();
    assert_eq!(
        merged.state().entries,
        vec![json!("seed"), json!("mine"), json!("fresh")]
    );
}

#[test]
fn test_scenario_c_conflict_leaves_main_unchanged() {
    let base = commit_meta(&init("alice"), "value", json!(0));

    let feature = commit_meta(&base.branch("feature").unwrap(), "value", json!(200));
    let main = commit_meta(&feature.checkout("main").unwrap(), "value", json!(100));

    let err = main.merge("feature").unwrap_err();
    match &err {
        VcsError::MergeConflict {
            current_branch,
            source_branch,
            current_events,
            source_events,
        } => {
            assert_eq!(current_branch, "main");
            assert_eq!(source_branch, "feature");
            assert_eq!(current_events[0].1["value"], json!(100));
            assert_eq!(source_events[0].1["value"], json!(200));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_conflict());

    let reopened = main.checkout("main").unwrap();
    assert_eq!(reopened.commit_id(), main.commit_id());
    assert_eq!(reopened.state().meta["value"], json!(100));
}

#[test]
fn test_scenario_d_push_idempotence() {
    let remote = memory_remote();
    let mut repo = init("alice");
    for n in 0..3 {
        repo = commit_append(&repo, json!(n));
    }

    let first = repo.push(&remote, false).unwrap();
    assert!(first.created);
    assert_eq!(first.commits_transferred, 4);
    let reachable_states: HashSet<_> = repo
        .log(None)
        .unwrap()
        .into_iter()
        .filter_map(|c| c.state_id)
        .collect();
    assert_eq!(first.states_transferred, reachable_states.len());
    assert_eq!(remote.store.list_commit_ids().unwrap().len(), 4);
    assert_eq!(remote.store.list_state_ids().unwrap().len(), reachable_states.len());

    let second = repo.push(&remote, false).unwrap();
    assert_eq!(second.commits_transferred, 0);
    assert_eq!(second.states_transferred, 0);
    assert_eq!(second.old_commit.as_ref(), Some(&second.new_commit));
    assert!(second.is_noop());
}

#[test]
fn test_scenario_e_gc_keeps_every_state_reachable() {
    let policy = SnapshotPolicy {
        auto_snapshot_threshold: 3,
        min_snapshot_interval: 1,
        keep_snapshots: 1,
    };
    let mut repo = Repository::init(
        Arc::new(MemoryStore::new()),
        registry(),
        config("alice").snapshot_policy(policy),
    )
    .unwrap();
    for n in 0..12 {
        repo = commit_append(&repo, json!(n));
    }
    let side = commit_append(&repo.branch("side").unwrap(), json!("side"));
    let repo = commit_meta(&side.checkout("main").unwrap(), "k", json!(true));
    let (repo, _) = repo.merge("side").unwrap();

    let ids: Vec<_> = repo.log(None).unwrap().into_iter().map(|c| c.id).collect();
    let before: Vec<_> = ids
        .iter()
        .map(|id| repo.state_at(id.as_str()).unwrap())
        .collect();

    let report = repo.gc(Some(0)).unwrap();
    assert!(report.did_collect());

    for (id, expected) in ids.iter().zip(&before) {
        assert_eq!(&repo.state_at(id.as_str()).unwrap(), expected);
    }
    assert_eq!(repo.state_at("side").unwrap().len(), 13);
}

#[test]
fn test_concurrent_pushes_have_one_winner() {
    let remote = memory_remote();
    let base = init("alice");
    base.push(&remote, false).unwrap();

    let alice = commit_append(&clone(&remote, "alice"), json!("alice"));
    let bob = commit_append(&clone(&remote, "bob"), json!("bob"));

    let results = std::thread::scope(|s| {
        let a = s.spawn(|| alice.push(&remote, false));
        let b = s.spawn(|| bob.push(&remote, false));
        [a.join().unwrap(), b.join().unwrap()]
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(loser, VcsError::NonFastForward { .. }));
    assert!(loser.is_retriable());

    // the loser pulls, sees divergence, merges the tracking ref and retries
    let (loser_repo, winner_repo) = if results[0].is_ok() { (&bob, &alice) } else { (&alice, &bob) };
    assert!(matches!(
        loser_repo.pull(&remote),
        Err(VcsError::PullConflict { .. })
    ));
    let (merged, outcome) = loser_repo.merge("origin/main").unwrap();
    assert!(matches!(outcome, MergeOutcome::Merged { .. }));
    merged.push(&remote, false).unwrap();

    let (winner_repo, report) = winner_repo.pull(&remote).unwrap();
    assert_eq!(report.outcome, PullOutcome::FastForward);
    assert_eq!(winner_repo.state().len(), 2);
}

#[test]
fn test_file_store_round_trip_between_directories() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    let origin = Repository::init(
        Arc::new(FileStore::init(dir_a.path()).unwrap()),
        registry(),
        config("alice"),
    )
    .unwrap();
    let origin = commit_append(&origin, json!({"name": "a"}));

    let remote = Remote::new("origin", Arc::new(FileStore::open(dir_a.path()).unwrap()));
    let copy = Repository::clone_from(
        &remote,
        Arc::new(FileStore::init(dir_b.path()).unwrap()),
        registry(),
        config("bob"),
    )
    .unwrap();
    assert_eq!(copy.state(), origin.state());

    let copy = commit_append(&copy, json!({"name": "b"}));
    copy.push(&remote, false).unwrap();

    let reopened = Repository::open(
        Arc::new(FileStore::open(dir_a.path()).unwrap()),
        registry(),
        config("alice"),
    )
    .unwrap();
    assert_eq!(reopened.commit_id(), copy.commit_id());
    assert_eq!(reopened.state().len(), 2);
}
