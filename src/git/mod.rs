// Git operations using git2-rs, organized into focused submodules:
// - `manager` - Core GitManager struct and basic operations
// - `branches` - Branch operations (create, delete, list, tips)
// - `worktrees` - Worktree management (add, remove, prune)
// - `merge` - In-memory merge primitives and the fast-forward gate
// - `types` - Shared data structures

mod branches;
mod manager;
mod merge;
#[cfg(test)]
mod tests;
mod types;
mod worktrees;

pub use manager::GitManager;
pub use types::{BranchInfo, ConflictEntry, WorktreeInfo};
