//!  Commit records and their content-derived identity.
//!
//!  commits are the immutable units of change. In eventgit:
//! - each commit records exactly one event (possibly a batch)
//! - a commit may carry a snapshot of the state it produces
//! - merge commits have two parents, the first being the mainline
//!
//! this module handles commit construction, id computation and verification

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::canonical;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{CommitId, StateId};

/// event name of a repository's root commit
pub const INIT_EVENT: &str = "init";

/// event name of a two-parent merge commit
pub const MERGE_EVENT: &str = "merge";

/// an immutable commit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    /// repository scope mixed into the id
    pub scope: String,
    /// ordered parents, first parent is the mainline
    pub parents: Vec<CommitId>,
    pub event_name: String,
    pub event_payload: Value,
    /// snapshot of the state this commit produces, if one was stored
    pub state_id: Option<StateId>,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// the fields that make up a commit's identity, in hash order
#[derive(Serialize)]
struct IdentityFields<'a> {
    scope: &'a str,
    parents: &'a [CommitId],
    event_name: &'a str,
    event_payload: &'a Value,
    state_id: Option<&'a StateId>,
    message: &'a str,
    author: &'a str,
}

impl Commit {
    /// recompute the id from this commit's content
    pub fn compute_id(&self) -> StorageResult<CommitId> {
        let fields = IdentityFields {
            scope: &self.scope,
            parents: &self.parents,
            event_name: &self.event_name,
            event_payload: &self.event_payload,
            state_id: self.state_id.as_ref(),
            message: &self.message,
            author: &self.author,
        };
        Ok(CommitId::from_digest(canonical::content_hash(&fields)?))
    }

    /// check that the stored id matches the content
    pub fn verify(&self) -> StorageResult<()> {
        let computed = self.compute_id()?;
        if computed != self.id {
            return Err(StorageError::CorruptedObject {
                id: self.id.to_string(),
                reason: format!("content hashes to {}", computed),
            });
        }
        Ok(())
    }

    /// a commit with no parents
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// check if this is a merge commit (has multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// get the first (or only) parent
    pub fn first_parent(&self) -> Option<&CommitId> {
        self.parents.first()
    }

    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }
}

/// builder for creating commits with a fluent interface
#[derive(Debug, Clone)]
pub struct CommitBuilder {
    scope: String,
    parents: Vec<CommitId>,
    event_name: String,
    event_payload: Value,
    state_id: Option<StateId>,
    message: String,
    author: String,
    timestamp: Option<DateTime<Utc>>,
}

impl CommitBuilder {
    /// create a new CommitBuilder for a repository scope
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            parents: Vec::new(),
            event_name: String::new(),
            event_payload: Value::Object(Default::default()),
            state_id: None,
            message: String::new(),
            author: String::new(),
            timestamp: None,
        }
    }

    /// add a parent commit
    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parents.push(parent);
        self
    }

    /// set multiple parents (for merge commits)
    pub fn parents(mut self, parents: Vec<CommitId>) -> Self {
        self.parents = parents;
        self
    }

    /// set the recorded event
    pub fn event(mut self, name: impl Into<String>, payload: Value) -> Self {
        self.event_name = name.into();
        self.event_payload = payload;
        self
    }

    /// attach a snapshot
    pub fn state(mut self, state_id: Option<StateId>) -> Self {
        self.state_id = state_id;
        self
    }

    /// set the commit message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// override the timestamp (defaults to now)
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// compute the id and produce the commit
    pub fn build(self) -> StorageResult<Commit> {
        if self.event_name.is_empty() {
            return Err(StorageError::CorruptedObject {
                id: "<new commit>".to_string(),
                reason: "commit requires an event".to_string(),
            });
        }

        let mut commit = Commit {
            id: CommitId::from_digest(String::new()),
            scope: self.scope,
            parents: self.parents,
            event_name: self.event_name,
            event_payload: self.event_payload,
            state_id: self.state_id,
            message: self.message,
            author: self.author,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        };
        commit.id = commit.compute_id()?;
        Ok(commit)
    }
}

/// message formatting for engine-authored commits
pub struct CommitMessage;

impl CommitMessage {
    /// message of the root commit
    pub fn init() -> String {
        "Initialize repository".to_string()
    }

    /// message of a three-way merge commit
    pub fn merge(source: &str, target: &str) -> String {
        format!("Merge '{}' into '{}'", source, target)
    }

    /// fallback message when a caller commits without one
    pub fn event(name: &str, count: usize) -> String {
        if count > 1 {
            format!("[{}] {} events", name, count)
        } else {
            format!("[{}]", name)
        }
    }
}
