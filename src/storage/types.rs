//! core type-safe identifiers and names for the storage layer.

use std::fmt;
use std::fmt::Formatter;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// length of a hex-encoded sha256 digest
pub const DIGEST_HEX_LEN: usize = 64;

/// Content-derived commit identifier.
///
/// This makes sure we don't accidentally pass a state ID where a commit ID
/// is expected. Always a 64 character lowercase hex sha256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    /// wrap a digest produced by the canonical hasher
    pub(crate) fn from_digest(hex: String) -> Self {
        Self(hex)
    }

    /// parse CommitId from a full hex string
    pub fn from_hex(hex: &str) -> Result<Self, InvalidNameError> {
        validate_digest(hex)?;
        Ok(Self(hex.to_string()))
    }

    /// the full hex form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// short form of the commit ID
    pub fn short(&self) -> &str {
        &self.0[..7.min(self.0.len())]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CommitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Content-derived identifier of a state blob in the content store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(String);

impl StateId {
    pub(crate) fn from_digest(hex: String) -> Self {
        Self(hex)
    }

    /// parse StateId from a full hex string
    pub fn from_hex(hex: &str) -> Result<Self, InvalidNameError> {
        validate_digest(hex)?;
        Ok(Self(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..7.min(self.0.len())]
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_digest(hex: &str) -> Result<(), InvalidNameError> {
    if hex.len() != DIGEST_HEX_LEN {
        return Err(InvalidNameError::NotADigest(hex.to_string()));
    }
    if !hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) {
        return Err(InvalidNameError::NotADigest(hex.to_string()));
    }
    Ok(())
}

/// A validated ref name (branch, tag, or remote tracking ref).
///
/// Valid names:
/// - 1-255 characters
/// - no whitespace or control characters
/// - no `..`, no leading or trailing `/`
/// - not the reserved `HEAD`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefName(String);

impl RefName {
    /// the default mainline branch name
    pub const MAIN: &'static str = "main";

    /// symbolic name for the checked-out commit, never stored
    pub const HEAD: &'static str = "HEAD";

    /// create a new RefName
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if name.len() > 255 {
            return Err(InvalidNameError::TooLong(name.len()));
        }

        if name == Self::HEAD {
            return Err(InvalidNameError::Reserved(name.to_string()));
        }

        if name.contains("..") || name.ends_with('/') || name.starts_with('/') {
            return Err(InvalidNameError::InvalidPath(name.to_string()));
        }

        for (i, c) in name.chars().enumerate() {
            if c.is_whitespace() || c.is_control() || c == '~' || c == '^' || c == ':' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    /// the main branch name
    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    /// namespaced tracking ref for a ref fetched from a remote, `<remote>/<name>`
    pub fn tracking(remote: &str, name: &RefName) -> Result<Self, InvalidNameError> {
        Self::new(format!("{}/{}", remote, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What a ref is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Branch,
    Tag,
    /// tracking ref written by fetch, `<remote>/<name>`
    Remote,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Branch => write!(f, "branch"),
            RefKind::Tag => write!(f, "tag"),
            RefKind::Remote => write!(f, "remote"),
        }
    }
}

/// A named, mutable pointer to a commit. The only mutable entity in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub name: RefName,
    pub commit_id: CommitId,
    pub kind: RefKind,
    pub updated_at: DateTime<Utc>,
}

impl Ref {
    pub fn new(name: RefName, commit_id: CommitId, kind: RefKind) -> Self {
        Self {
            name,
            commit_id,
            kind,
            updated_at: Utc::now(),
        }
    }

    pub fn branch(name: RefName, commit_id: CommitId) -> Self {
        Self::new(name, commit_id, RefKind::Branch)
    }

    pub fn tag(name: RefName, commit_id: CommitId) -> Self {
        Self::new(name, commit_id, RefKind::Tag)
    }

    /// same ref moved to another commit
    pub fn moved_to(&self, commit_id: CommitId) -> Self {
        Self::new(self.name.clone(), commit_id, self.kind)
    }
}

/// error type for invalid names and identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    Reserved(String),
    InvalidPath(String),
    NotADigest(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
            Self::Reserved(name) => write!(f, "'{}' is a reserved name", name),
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
            Self::NotADigest(s) => write!(f, "'{}' is not a 64 character hex digest", s),
        }
    }
}

impl std::error::Error for InvalidNameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_name_valid() {
        assert!(RefName::new("main").is_ok());
        assert!(RefName::new("feature/login").is_ok());
        assert!(RefName::new("release-1.2").is_ok());
        assert!(RefName::new("origin/main").is_ok());
    }

    #[test]
    fn test_ref_name_invalid() {
        assert!(RefName::new("").is_err());
        assert!(RefName::new("HEAD").is_err());
        assert!(RefName::new("a..b").is_err());
        assert!(RefName::new("/lead").is_err());
        assert!(RefName::new("trail/").is_err());
        assert!(RefName::new("has space").is_err());
        assert!(RefName::new("main~1").is_err());
        assert!(RefName::new("x".repeat(256)).is_err());
    }

    #[test]
    fn test_tracking_name() {
        let name = RefName::main();
        let tracking = RefName::tracking("origin", &name).unwrap();
        assert_eq!(tracking.as_str(), "origin/main");
    }

    #[test]
    fn test_digest_parsing() {
        let hex = "ab".repeat(32);
        let id = CommitId::from_hex(&hex).unwrap();
        assert_eq!(id.short(), "abababa");
        assert!(CommitId::from_hex("abc").is_err());
        assert!(CommitId::from_hex(&"AB".repeat(32)).is_err());
        assert!(StateId::from_hex(&"0f".repeat(32)).is_ok());
    }

    #[test]
    fn test_ref_kind_serde() {
        let json = serde_json::to_string(&RefKind::Remote).unwrap();
        assert_eq!(json, "\"remote\"");
    }
}
