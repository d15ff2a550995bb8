//! Crate-level error type.
//!
//! `VcsError` wraps the storage and event errors and adds the protocol and
//! precondition failures raised by the merge engine, the sync engine and the
//! repository facade. No operation retries on its own; every variant carries
//! the identifiers a caller needs to decide what to do next.

use thiserror::Error;

use crate::event::EventError;
use crate::storage::{CommitId, StorageError};

/// broad class of an error, used for exit codes and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// unknown revision, ambiguous prefix, missing object, corruption
    Structural,
    /// non-fast-forward, pull conflict, no merge base, merge conflict
    Protocol,
    /// staged changes, detached HEAD, nothing to commit
    Precondition,
    /// state or payload that cannot be encoded or decoded
    Serialization,
    /// filesystem and configuration failures
    Environment,
}

#[derive(Debug, Error)]
pub enum VcsError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Event(#[from] EventError),

    /// the remote ref is not an ancestor of the local tip
    #[error(
        "push to '{ref_name}' rejected: remote is at {}, which is not an ancestor of {}; pull and merge first",
        .remote.short(),
        .local.short()
    )]
    NonFastForward {
        ref_name: String,
        local: CommitId,
        remote: CommitId,
    },

    /// local and remote histories diverged
    #[error(
        "pull of '{ref_name}' diverged: local {} and remote {} need an explicit merge",
        .local.short(),
        .remote.short()
    )]
    PullConflict {
        ref_name: String,
        local: CommitId,
        remote: CommitId,
    },

    /// the two commits share no history
    #[error("no common ancestor between {} and {}", .current.short(), .source_commit.short())]
    NoMergeBase { current: CommitId, source_commit: CommitId },

    /// the two sides' events do not commute
    #[error(
        "merge conflict: '{source_branch}' ({} events) does not commute with '{current_branch}' ({} events)",
        .source_events.len(),
        .current_events.len()
    )]
    MergeConflict {
        current_branch: String,
        source_branch: String,
        current_events: Vec<(String, serde_json::Value)>,
        source_events: Vec<(String, serde_json::Value)>,
    },

    /// staged events block the operation
    #[error("cannot {operation}: {pending} staged event(s) not committed")]
    UncommittedChanges { operation: String, pending: usize },

    /// the operation needs a checked-out branch
    #[error("cannot {operation} in detached HEAD state")]
    DetachedHead { operation: String },

    #[error("nothing to commit")]
    NothingToCommit,

    /// the branch is checked out by this handle
    #[error("cannot delete the checked-out branch '{0}'")]
    CheckedOutBranch(String),

    #[error("invalid config: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("cannot write config: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl VcsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VcsError::Storage(e) => match e {
                StorageError::Serialization(_) => ErrorKind::Serialization,
                StorageError::Io(_) | StorageError::NotInitialized(_) => ErrorKind::Environment,
                _ => ErrorKind::Structural,
            },
            VcsError::Event(EventError::MalformedBatch(_)) => ErrorKind::Serialization,
            VcsError::Event(_) => ErrorKind::Precondition,
            VcsError::NonFastForward { .. }
            | VcsError::PullConflict { .. }
            | VcsError::NoMergeBase { .. }
            | VcsError::MergeConflict { .. } => ErrorKind::Protocol,
            VcsError::UncommittedChanges { .. }
            | VcsError::DetachedHead { .. }
            | VcsError::NothingToCommit
            | VcsError::CheckedOutBranch(_) => ErrorKind::Precondition,
            VcsError::TomlParse(_) | VcsError::TomlSerialize(_) => ErrorKind::Serialization,
            VcsError::Io(_) | VcsError::Config(_) => ErrorKind::Environment,
        }
    }

    /// process exit code for the command-line binary
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Precondition => 2,
            ErrorKind::Structural => 3,
            ErrorKind::Protocol => 4,
            ErrorKind::Environment => 5,
            ErrorKind::Serialization => 6,
        }
    }

    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, VcsError::Storage(e) if e.is_not_found())
    }

    /// check if this error is a conflict another writer caused
    pub fn is_conflict(&self) -> bool {
        match self {
            VcsError::Storage(e) => e.is_conflict(),
            VcsError::NonFastForward { .. }
            | VcsError::PullConflict { .. }
            | VcsError::MergeConflict { .. } => true,
            _ => false,
        }
    }

    /// check if the caller can succeed by pulling and trying again
    pub fn is_retriable(&self) -> bool {
        match self {
            VcsError::Storage(e) => e.is_retriable(),
            VcsError::NonFastForward { .. } => true,
            _ => false,
        }
    }

    /// actionable hints for the command-line binary
    pub fn suggestions(&self) -> Vec<&'static str> {
        match self {
            VcsError::NonFastForward { .. } => vec![
                "Run 'eventgit pull' to fetch the remote history",
                "Then 'eventgit merge <remote>/<branch>' and push again",
            ],
            VcsError::PullConflict { .. } => vec![
                "Run 'eventgit fetch' and merge the tracking ref explicitly",
            ],
            VcsError::MergeConflict { .. } => vec![
                "The two branches change the same data differently; reconcile one side first",
            ],
            VcsError::Storage(StorageError::AmbiguousRevision { .. }) => {
                vec!["Use a longer commit id prefix"]
            }
            VcsError::Storage(StorageError::NotInitialized(_)) => {
                vec!["Run 'eventgit init' to create a repository"]
            }
            _ => vec![],
        }
    }
}

/// result type alias for repository operations
pub type VcsResult<T> = Result<T, VcsError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn id(c: char) -> CommitId {
        CommitId::from_hex(&c.to_string().repeat(64)).unwrap()
    }

    #[test]
    fn test_error_kinds() {
        let nff = VcsError::NonFastForward {
            ref_name: "main".to_string(),
            local: id('a'),
            remote: id('b'),
        };
        assert_eq!(nff.kind(), ErrorKind::Protocol);
        assert!(nff.is_conflict());
        assert!(nff.is_retriable());
        assert_eq!(nff.exit_code(), 4);
        assert!(!nff.suggestions().is_empty());

        let missing: VcsError = StorageError::UnknownRevision("x".to_string()).into();
        assert_eq!(missing.kind(), ErrorKind::Structural);
        assert!(missing.is_not_found());

        let staged = VcsError::UncommittedChanges {
            operation: "push".to_string(),
            pending: 2,
        };
        assert_eq!(staged.kind(), ErrorKind::Precondition);
        assert_eq!(staged.to_string(), "cannot push: 2 staged event(s) not committed");
    }

    #[test]
    fn test_messages_use_short_ids() {
        let err = VcsError::NoMergeBase {
            current: id('a'),
            source_commit: id('b'),
        };
        assert_eq!(err.to_string(), "no common ancestor between aaaaaaa and bbbbbbb");
    }
}
