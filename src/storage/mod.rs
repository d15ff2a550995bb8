//! storage layer for eventgit
//!
//! this module provides the persistent substrate: content-addressed state
//! blobs, immutable commits, mutable refs and snapshot pins. The upper layers
//! (materializer, merge engine, sync engine) only talk to the `ObjectStore`
//! trait and never touch files directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ObjectStore                            │
//! │        (MemoryStore, FileStore, or any remote binding)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │   states    │       │   commits   │       │    refs     │
//!  │ (snapshots) │       │  (history)  │       │ (branches)  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         └─────────────────────┼─────────────────────┘
//!                               │
//!                               ▼
//!                        ┌─────────────┐
//!                        │  canonical  │
//!                        │  (hashing)  │
//!                        └─────────────┘
//!  ```
//!
//! # Usage
//!
//! ```ignore
//! use eventgit::storage::{MemoryStore, ObjectStore, State, CommitBuilder};
//!
//! let store = MemoryStore::new();
//! let state_id = store.put_state(&State::new())?;
//! let root = CommitBuilder::new("my-scope")
//!     .event("init", json!({}))
//!     .state(Some(state_id))
//!     .build()?;
//! store.put_commit(&root)?;
//! ```

mod backend;
mod canonical;
mod commit;
mod error;
mod fs;
mod graph;
mod memory;
mod refs;
mod state;
mod types;

// Re-export public API
pub use backend::ObjectStore;
pub use canonical::{canonical_json, content_hash, to_canonical, value_hash};
pub use commit::{Commit, CommitBuilder, CommitMessage, INIT_EVENT, MERGE_EVENT};
pub use error::{StorageError, StorageResult};
pub use fs::FileStore;
pub use graph::{CommitGraph, History, MIN_PREFIX_LEN};
pub use memory::MemoryStore;
pub use refs::RefManager;
pub use state::State;
pub use types::{CommitId, InvalidNameError, Ref, RefKind, RefName, StateId, DIGEST_HEX_LEN};

pub(crate) use state::type_name;
