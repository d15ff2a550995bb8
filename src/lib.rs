//! eventgit - Git-like version control for JSON objects
//!
//! This crate versions any `{entries, meta}` object with branches, commits,
//! three-way merges and push/pull against remotes. Every change is an event;
//! commits record events, snapshots cache materialized states, and two
//! diverged histories merge when their events commute.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use eventgit::{EventRegistry, MemoryStore, Repository, RepositoryConfig};
//! use serde_json::json;
//!
//! let repo = Repository::init(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(EventRegistry::with_builtins()),
//!     RepositoryConfig::new("survey"),
//! )
//! .unwrap();
//!
//! let (repo, _) = repo.append(json!({"question": "Age?"})).unwrap();
//! let repo = repo.commit(Some("add question")).unwrap();
//!
//! let feature = repo.branch("feature").unwrap();
//! let (feature, _) = feature.set_meta("title", json!("Census")).unwrap();
//! let feature = feature.commit(None).unwrap();
//!
//! let main = feature.checkout("main").unwrap();
//! let (main, _) = main.merge("feature").unwrap();
//! assert_eq!(main.state().meta["title"], json!("Census"));
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod materialize;
pub mod merge;
pub mod repo;
pub mod storage;
pub mod sync;

pub use config::RepositoryConfig;
pub use error::{ErrorKind, VcsError, VcsResult};
pub use event::{Event, EventError, EventRegistry};
pub use materialize::{Materializer, SnapshotManager, SnapshotPolicy};
pub use merge::{MergeEngine, MergeOutcome, MergePrepareResult};
pub use repo::{Head, Repository, RepositoryStats, StateDiff};
pub use storage::{
    Commit, CommitId, FileStore, MemoryStore, ObjectStore, Ref, RefKind, RefName, State, StateId,
    StorageError,
};
pub use sync::{FetchReport, PullOutcome, PullReport, PushReport, Remote, SyncEngine};
