// Branch operations: create, delete, list, tips

use git2::{Branch, BranchType, Error as GitError, Oid};

use crate::git::types::BranchInfo;
use crate::git::GitManager;

impl GitManager {
    /// Create a branch at the current HEAD. Handles the unborn-branch case
    /// by seeding an empty initial commit first.
    pub fn create_branch(&self, name: &str, force: bool) -> Result<BranchInfo, GitError> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
                log::info!("[Git] No commits found, creating initial commit");
                self.create_initial_commit()?;
                self.repo.head()?
            }
            Err(e) => return Err(e),
        };

        let head_commit = head.peel_to_commit()?;
        let branch = self.repo.branch(name, &head_commit, force)?;

        self.branch_to_info(&branch)
    }

    pub(crate) fn create_initial_commit(&self) -> Result<(), GitError> {
        let tree_id = self.repo.index()?.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = self.signature()?;

        self.repo
            .commit(Some("HEAD"), &signature, &signature, "Initial commit", &tree, &[])?;
        Ok(())
    }

    /// Create a branch pointing at a specific commit
    pub fn create_branch_at(&self, name: &str, commit_id: Oid, force: bool) -> Result<BranchInfo, GitError> {
        let commit = self.repo.find_commit(commit_id)?;
        let branch = self.repo.branch(name, &commit, force)?;
        self.branch_to_info(&branch)
    }

    pub fn delete_branch(&self, name: &str) -> Result<(), GitError> {
        let mut branch = self.repo.find_branch(name, BranchType::Local)?;
        branch.delete()?;
        Ok(())
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.repo.find_branch(name, BranchType::Local).is_ok()
    }

    /// Commit id a local branch currently points at
    pub fn branch_tip(&self, name: &str) -> Result<Oid, GitError> {
        let branch = self.repo.find_branch(name, BranchType::Local)?;
        Ok(branch.get().peel_to_commit()?.id())
    }

    pub fn list_branches(&self) -> Result<Vec<BranchInfo>, GitError> {
        let branches = self.repo.branches(Some(BranchType::Local))?;

        let mut result = Vec::new();
        for branch in branches {
            let (branch, _) = branch?;
            result.push(self.branch_to_info(&branch)?);
        }

        Ok(result)
    }

    /// Default branch name: current HEAD branch, then "main"/"master", then "main"
    pub fn get_default_branch_name(&self) -> String {
        if let Ok(head) = self.repo.head() {
            if head.is_branch() {
                if let Some(name) = head.shorthand() {
                    return name.to_string();
                }
            }
        }

        for name in &["main", "master"] {
            if self.repo.find_branch(name, BranchType::Local).is_ok() {
                return (*name).to_string();
            }
        }

        "main".to_string()
    }

    pub(crate) fn branch_to_info(&self, branch: &Branch) -> Result<BranchInfo, GitError> {
        let name = branch.name()?.unwrap_or("").to_string();
        let is_head = branch.is_head();
        let commit_id = branch.get().peel_to_commit()?.id().to_string();

        Ok(BranchInfo {
            name,
            is_head,
            commit_id,
        })
    }
}
