use std::fmt;

use serde::Serialize;

/// Statistics about the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryStats {
    pub branch_count: usize,
    pub tag_count: usize,
    pub tracking_ref_count: usize,
    pub commit_count: usize,
    pub state_count: usize,
    pub snapshot_count: usize,
    /// first-parent depth of the current commit
    pub history_depth: usize,
    pub entry_count: usize,
    pub meta_key_count: usize,
    pub staged_events: usize,
}

impl fmt::Display for RepositoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Repository Statistics:")?;
        writeln!(f, "  Branches: {}", self.branch_count)?;
        writeln!(f, "  Tags: {}", self.tag_count)?;
        writeln!(f, "  Tracking Refs: {}", self.tracking_ref_count)?;
        writeln!(f, "  Commits: {}", self.commit_count)?;
        writeln!(f, "  State Blobs: {}", self.state_count)?;
        writeln!(f, "  Snapshots: {}", self.snapshot_count)?;
        writeln!(f, "  History Depth: {}", self.history_depth)?;
        writeln!(f, "  Entries: {}", self.entry_count)?;
        writeln!(f, "  Meta Keys: {}", self.meta_key_count)?;
        write!(f, "  Staged Events: {}", self.staged_events)
    }
}
