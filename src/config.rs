//! Repository configuration.
//!
//! Stored as TOML (`config.toml` next to a directory-backed store):
//!
//! ```toml
//! scope = "01J9Z3K6Q8V2N4X7B5T0R1M2C3"
//! author = "alice"
//! default_branch = "main"
//!
//! [snapshot]
//! auto_snapshot_threshold = 100
//! min_snapshot_interval = 10
//! keep_snapshots = 10
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{VcsError, VcsResult};
use crate::materialize::SnapshotPolicy;
use crate::storage::RefName;

/// file name used by the command-line binary
pub const CONFIG_FILE: &str = "config.toml";

/// Configuration for opening a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Repository scope mixed into every commit id.
    pub scope: String,
    /// Author recorded on new commits.
    pub author: String,
    /// Branch created by `init` and checked out by `open`.
    pub default_branch: String,
    /// Snapshot and garbage collection policy.
    pub snapshot: SnapshotPolicy,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            scope: "default".to_string(),
            author: "anonymous".to_string(),
            default_branch: RefName::MAIN.to_string(),
            snapshot: SnapshotPolicy::default(),
        }
    }
}

impl RepositoryConfig {
    /// Create a new configuration with the given scope.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Default::default()
        }
    }

    /// A configuration with a fresh, globally unique scope.
    pub fn generated() -> Self {
        Self::new(Ulid::new().to_string())
    }

    /// Set the commit author.
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Set the default branch.
    pub fn default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    /// Set the snapshot policy.
    pub fn snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshot = policy;
        self
    }

    /// the default branch as a validated ref name
    pub fn default_branch_ref(&self) -> VcsResult<RefName> {
        RefName::new(self.default_branch.clone())
            .map_err(|e| VcsError::Config(format!("default_branch: {}", e)))
    }

    pub fn validate(&self) -> VcsResult<()> {
        if self.scope.is_empty() {
            return Err(VcsError::Config("scope cannot be empty".to_string()));
        }
        self.default_branch_ref()?;
        if self.snapshot.auto_snapshot_threshold == 0 {
            return Err(VcsError::Config(
                "snapshot.auto_snapshot_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> VcsResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> VcsResult<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_roundtrip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = RepositoryConfig::generated()
            .author("alice")
            .default_branch("trunk");
        config.save(&path).unwrap();

        let loaded = RepositoryConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.default_branch_ref().unwrap().as_str(), "trunk");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: RepositoryConfig = toml::from_str("scope = \"s\"\n[snapshot]\nkeep_snapshots = 3\n").unwrap();
        assert_eq!(config.author, "anonymous");
        assert_eq!(config.snapshot.keep_snapshots, 3);
        assert_eq!(config.snapshot.auto_snapshot_threshold, 100);
    }

    #[test]
    fn test_generated_scopes_differ() {
        assert_ne!(RepositoryConfig::generated().scope, RepositoryConfig::generated().scope);
    }

    #[test]
    fn test_invalid_default_branch() {
        let config = RepositoryConfig::new("s").default_branch("bad name");
        assert!(matches!(config.validate(), Err(VcsError::Config(_))));
    }
}
