// Core GitManager struct and basic operations

use git2::{Error as GitError, Repository, Signature};
use std::path::{Path, PathBuf};

/// Handle on the orchestrated repository. All branch, worktree and merge
/// operations go through this; worker processes never touch it directly.
pub struct GitManager {
    pub(crate) repo: Repository,
}

impl GitManager {
    /// Open an existing repository at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let repo = Repository::open(path)?;
        Ok(Self { repo })
    }

    /// Path to the .git directory
    pub fn repo_path(&self) -> PathBuf {
        self.repo.path().to_path_buf()
    }

    /// Path to the working directory of the main worktree
    pub fn workdir_path(&self) -> Result<PathBuf, GitError> {
        self.repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| GitError::from_str("Repository has no working directory"))
    }

    /// Committer identity: repo config if set, a fixed fallback otherwise
    pub(crate) fn signature(&self) -> Result<Signature<'static>, GitError> {
        self.repo
            .signature()
            .or_else(|_| Signature::now("Taskwave Orchestrator", "orchestrator@taskwave.dev"))
    }
}
