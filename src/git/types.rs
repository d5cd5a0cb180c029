// Shared data structures for the git layer

use serde::{Deserialize, Serialize};

/// A local branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub is_head: bool,
    pub commit_id: String,
}

/// A linked worktree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub name: String,
    pub path: String,
    pub branch: Option<String>,
    pub is_locked: bool,
}

/// One conflicted path from an in-memory merge. A `None` side means that
/// side deleted the file; `ancestor_content` is `None` when both sides
/// added the path independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictEntry {
    pub path: String,
    pub our_content: Option<String>,
    pub their_content: Option<String>,
    pub ancestor_content: Option<String>,
    pub is_binary: bool,
}
