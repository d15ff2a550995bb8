//! Storage layer error types
//!
//! All errors that can occur in the content store, commit graph and ref
//! store are defined here. We use `thiserror` for ergonomic error definition.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::{CommitId, InvalidNameError, StateId};

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// the state blob is not in the content store
    #[error("state not found: {0}")]
    StateNotFound(StateId),

    /// the commit is not in the commit graph
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// the specified ref was not found
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// the ref already exists
    #[error("ref already exists: {0}")]
    RefAlreadyExists(String),

    /// ref update failed because the ref no longer points where the caller expected
    #[error(
        "concurrent modification of {name}: expected {}, found {}",
        display_opt(.expected),
        display_opt(.actual)
    )]
    ConcurrentModification {
        name: String,
        expected: Option<CommitId>,
        actual: Option<CommitId>,
    },

    /// the revision matches no ref and no commit
    #[error("unknown revision: {0}")]
    UnknownRevision(String),

    /// the short hash prefix matches more than one commit
    #[error("ambiguous revision {prefix}: matches {}", display_ids(.candidates))]
    AmbiguousRevision {
        prefix: String,
        candidates: Vec<CommitId>,
    },

    /// `ancestor` is not reachable from `descendant`
    #[error("{ancestor} is not an ancestor of {descendant}")]
    NotAncestor {
        ancestor: CommitId,
        descendant: CommitId,
    },

    /// invalid ref name or identifier
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// a value could not be turned into canonical JSON
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// an object's content does not match its id, or is unreadable
    #[error("corrupted object {id}: {reason}")]
    CorruptedObject { id: String, reason: String },

    /// no snapshot anywhere in the first-parent ancestry of a commit
    #[error("repository corrupted: no snapshot in the ancestry of {0}")]
    MissingSnapshot(CommitId),

    /// a commit names a parent the store does not hold
    #[error("commit {commit} references missing parent {parent}")]
    MissingParent { commit: CommitId, parent: CommitId },

    /// the directory does not hold an initialized repository
    #[error("not an eventgit repository: {0}")]
    NotInitialized(PathBuf),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_opt(id: &Option<CommitId>) -> String {
    match id {
        Some(id) => id.short().to_string(),
        None => "<absent>".to_string(),
    }
}

fn display_ids(ids: &[CommitId]) -> String {
    ids.iter()
        .map(|id| id.short().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::StateNotFound(_)
                | StorageError::CommitNotFound(_)
                | StorageError::RefNotFound(_)
                | StorageError::UnknownRevision(_)
        )
    }

    /// check if this error is a conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::RefAlreadyExists(_) | StorageError::ConcurrentModification { .. }
        )
    }

    /// check if this error is recoverable by retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StorageError::ConcurrentModification { .. } | StorageError::Io(_)
        )
    }

    /// check if this error means the stored data itself is damaged
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StorageError::CorruptedObject { .. }
                | StorageError::MissingSnapshot(_)
                | StorageError::MissingParent { .. }
        )
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
