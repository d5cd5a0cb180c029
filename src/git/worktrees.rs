// Worktree management: one isolated checkout per worker slot

use git2::{BranchType, Error as GitError, Repository, Worktree, WorktreeAddOptions};
use std::path::Path;

use crate::git::types::WorktreeInfo;
use crate::git::GitManager;

impl GitManager {
    /// Create a worktree for a branch, creating the branch first if needed
    pub fn create_worktree(&self, branch: &str, path: &Path) -> Result<WorktreeInfo, GitError> {
        if self.repo.find_branch(branch, BranchType::Local).is_err() {
            self.create_branch(branch, false)?;
        }

        let branch_ref = self.repo.find_branch(branch, BranchType::Local)?;

        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(branch_ref.get()));

        // Branch names like "agent/slot-0" would nest under .git/worktrees/
        let worktree_name = branch.replace('/', "-");

        let worktree = self.repo.worktree(&worktree_name, path, Some(&opts))?;

        self.worktree_to_info(&worktree)
    }

    pub fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, GitError> {
        let worktrees = self.repo.worktrees()?;

        let mut result = Vec::new();
        for name in worktrees.iter().flatten() {
            if let Ok(worktree) = self.repo.find_worktree(name) {
                result.push(self.worktree_to_info(&worktree)?);
            }
        }

        Ok(result)
    }

    /// Remove a worktree by its checkout path
    pub fn remove_worktree(&self, path: &str) -> Result<(), GitError> {
        let worktrees = self.repo.worktrees()?;

        for name in worktrees.iter().flatten() {
            if let Ok(worktree) = self.repo.find_worktree(name) {
                let worktree_path = worktree.path().to_string_lossy();
                if worktree_path.trim_end_matches('/') == path.trim_end_matches('/') {
                    // Remove both the checkout directory and the registration
                    let mut opts = git2::WorktreePruneOptions::new();
                    opts.valid(true).working_tree(true);
                    worktree.prune(Some(&mut opts))?;
                    return Ok(());
                }
            }
        }

        Err(GitError::from_str(&format!("Worktree not found: {}", path)))
    }

    /// Prune worktree registrations whose checkout directory is gone.
    /// Returns the number pruned.
    pub fn prune_orphaned_worktrees(&self) -> Result<u32, GitError> {
        let worktrees = self.repo.worktrees()?;
        let mut pruned_count = 0;

        for name in worktrees.iter().flatten() {
            if let Ok(worktree) = self.repo.find_worktree(name) {
                if !worktree.path().exists() {
                    log::info!(
                        "[Git] Pruning orphaned worktree '{}' ({:?} no longer exists)",
                        name,
                        worktree.path()
                    );
                    if let Err(e) = worktree.prune(None) {
                        log::warn!("[Git] Failed to prune worktree '{}': {}", name, e);
                    } else {
                        pruned_count += 1;
                    }
                }
            }
        }

        Ok(pruned_count)
    }

    pub(crate) fn worktree_to_info(&self, worktree: &Worktree) -> Result<WorktreeInfo, GitError> {
        let name = worktree.name().unwrap_or("").to_string();
        let path = worktree.path().to_string_lossy().to_string();
        let is_locked = worktree
            .is_locked()
            .map(|status| !matches!(status, git2::WorktreeLockStatus::Unlocked))
            .unwrap_or(false);

        let branch = Repository::open(worktree.path())
            .ok()
            .and_then(|wt_repo| {
                wt_repo.head().ok().and_then(|head| {
                    if head.is_branch() {
                        head.shorthand().map(|s| s.to_string())
                    } else {
                        None
                    }
                })
            });

        Ok(WorktreeInfo {
            name,
            path,
            branch,
            is_locked,
        })
    }
}
