// Merge engine: integrates worker branches atomically through a
// disposable integration branch. Per-branch merge commits land on
// `integration/<session>` only; the real target branch moves once, by a
// single fast-forward, after every branch has integrated cleanly. Any
// failure deletes the integration branch and leaves the target untouched.

pub mod classify;
pub mod resolve;

pub use classify::{
    classify, classify_all, Conflict, ConflictSummary, ConflictType, ResolutionComplexity,
};
pub use resolve::resolve_auto_conflicts;

use anyhow::{anyhow, Context as _, Result};
use git2::Oid;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::events::{EventBus, SessionCommand};
use crate::git::GitManager;
use crate::models::{BranchStatus, TrackedBranch};

/// Merge engine lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeState {
    Idle,
    Monitoring,
    Preparing,
    Resolving,
    Reviewing,
    Merging,
    Success,
    Failure,
}

/// Result of one merge attempt. `success=false, rolled_back=false` with a
/// nonempty conflict set means the engine paused for review and can resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub base_branch: String,
    pub merged_branches: Vec<String>,
    pub conflicts: Vec<Conflict>,
    pub success: bool,
    pub rolled_back: bool,
}

pub struct MergeEngine {
    repo_path: PathBuf,
    session_id: String,
    target_branch: String,
    state: MergeState,
    tracked: Vec<TrackedBranch>,
    /// Branches already committed onto the integration branch. Resuming
    /// after review never re-runs these.
    merged: Vec<String>,
    integration_tip: Option<Oid>,
    /// Conflicts from branches that have integrated
    conflicts_seen: Vec<Conflict>,
    /// Branch whose merge paused on unresolved conflicts
    pending_branch: Option<String>,
    pending_conflicts: Vec<Conflict>,
    bus: EventBus,
}

impl MergeEngine {
    pub fn new(
        repo_path: impl AsRef<Path>,
        session_id: impl Into<String>,
        target_branch: Option<String>,
        bus: EventBus,
    ) -> Result<Self> {
        let repo_path = repo_path.as_ref().to_path_buf();
        let target_branch = match target_branch {
            Some(name) => name,
            None => GitManager::new(&repo_path)?.get_default_branch_name(),
        };

        Ok(Self {
            repo_path,
            session_id: session_id.into(),
            target_branch,
            state: MergeState::Idle,
            tracked: Vec::new(),
            merged: Vec::new(),
            integration_tip: None,
            conflicts_seen: Vec::new(),
            pending_branch: None,
            pending_conflicts: Vec::new(),
            bus,
        })
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    pub fn target_branch(&self) -> &str {
        &self.target_branch
    }

    pub fn integration_branch(&self) -> String {
        format!("integration/{}", self.session_id)
    }

    pub fn tracked(&self) -> &[TrackedBranch] {
        &self.tracked
    }

    /// Start tracking a worker branch as it begins producing commits
    pub fn track_branch(&mut self, branch: TrackedBranch) {
        if self.state == MergeState::Idle {
            self.state = MergeState::Monitoring;
        }
        log::info!("[Merge] Tracking branch {}", branch.name);
        self.tracked.push(branch);
    }

    /// Mark a tracked branch as finished and ready to integrate
    pub fn mark_completed(&mut self, name: &str) {
        if let Some(branch) = self.tracked.iter_mut().find(|b| b.name == name) {
            branch.status = BranchStatus::Completed;
        } else {
            log::warn!("[Merge] mark_completed for untracked branch {}", name);
        }
    }

    /// Record an approved resolution for a conflict awaiting review.
    /// Returns false when no such conflict is pending.
    pub fn approve_resolution(&mut self, file: &str, content: String) -> bool {
        match self.pending_conflicts.iter_mut().find(|c| c.file == file) {
            Some(conflict) => {
                conflict.suggested_resolution = Some(content);
                log::info!("[Merge] Approved resolution for {}", file);
                true
            }
            None => {
                log::warn!("[Merge] No pending conflict for {}", file);
                false
            }
        }
    }

    /// Re-enter merging after review. Already-integrated branches are
    /// skipped via the merged ledger.
    pub fn resume(&mut self) -> Result<MergeOutcome> {
        if self.state != MergeState::Reviewing {
            return Err(anyhow!("Nothing to resume: engine is not reviewing"));
        }
        self.execute()
    }

    /// Abandon the attempt: delete the integration branch and report a
    /// rolled-back failure. The target branch is untouched by construction.
    pub fn abort(&mut self) -> Result<MergeOutcome> {
        let git = GitManager::new(&self.repo_path)?;
        let integration = self.integration_branch();
        if git.branch_exists(&integration) {
            git.delete_branch(&integration)
                .with_context(|| format!("Failed to delete {}", integration))?;
        }

        self.integration_tip = None;
        self.state = MergeState::Failure;
        log::warn!("[Merge] Aborted, integration branch {} removed", integration);
        Ok(self.outcome(false, true))
    }

    /// Drive the merge end to end, consuming review commands whenever it
    /// pauses: `ApproveResolution` records a resolution for a pending
    /// conflict, `Resume` re-enters merging, `Cancel` (or a closed channel)
    /// aborts and rolls back. Returns only a final outcome, never a paused
    /// one.
    pub async fn run(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Result<MergeOutcome> {
        let mut outcome = self.execute()?;
        while self.state == MergeState::Reviewing {
            match commands.recv().await {
                Some(SessionCommand::ApproveResolution { file, content }) => {
                    self.approve_resolution(&file, content);
                }
                Some(SessionCommand::Resume) => {
                    outcome = self.resume()?;
                }
                Some(SessionCommand::Cancel) | None => {
                    outcome = self.abort()?;
                }
            }
        }
        Ok(outcome)
    }

    /// Run the merge to completion, pause or failure
    pub fn execute(&mut self) -> Result<MergeOutcome> {
        let git = GitManager::new(&self.repo_path)?;

        let queue: Vec<String> = self
            .tracked
            .iter()
            .filter(|b| b.status == BranchStatus::Completed)
            .filter(|b| !self.merged.contains(&b.name))
            .map(|b| b.name.clone())
            .collect();

        if queue.is_empty() && self.merged.is_empty() {
            return Err(anyhow!("No completed branches to merge"));
        }

        self.prepare(&git, &queue)?;

        let integration_ref = format!("refs/heads/{}", self.integration_branch());
        for name in queue {
            let theirs = git
                .branch_tip(&name)
                .with_context(|| format!("Missing branch {}", name))?;
            let ours = self
                .integration_tip
                .ok_or_else(|| anyhow!("Integration branch has no tip"))?;

            let mut index = git.merge_commits_index(ours, theirs)?;
            let mut branch_conflicts = Vec::new();

            if index.has_conflicts() {
                self.state = MergeState::Resolving;
                let entries = git.conflict_entries(&index)?;
                let mut conflicts = classify_all(&entries);
                self.carry_approved(&name, &mut conflicts);

                let auto = resolve_auto_conflicts(&mut conflicts);
                log::info!(
                    "[Merge] {}: {} conflict(s), {} auto-resolved",
                    name,
                    conflicts.len(),
                    auto
                );

                let unresolved: Vec<Conflict> = conflicts
                    .iter()
                    .filter(|c| c.suggested_resolution.is_none())
                    .cloned()
                    .collect();
                if !unresolved.is_empty() {
                    self.state = MergeState::Reviewing;
                    self.pending_branch = Some(name);
                    self.pending_conflicts = conflicts;
                    self.bus.emit_conflicts_needing_review(unresolved);
                    return Ok(self.outcome(false, false));
                }

                for conflict in &conflicts {
                    if let Some(content) = &conflict.suggested_resolution {
                        git.resolve_in_index(&mut index, &conflict.file, content)?;
                    }
                }
                branch_conflicts = conflicts;
            }

            self.state = MergeState::Merging;
            let message = format!("Merge {} into {}", name, self.integration_branch());
            match git.commit_merge_on_ref(&integration_ref, &mut index, &message, &[ours, theirs]) {
                Ok(tip) => {
                    self.integration_tip = Some(tip);
                    self.merged.push(name.clone());
                    self.conflicts_seen.extend(branch_conflicts);
                    self.pending_branch = None;
                    self.pending_conflicts.clear();
                    if let Some(branch) = self.tracked.iter_mut().find(|b| b.name == name) {
                        branch.status = BranchStatus::Merged;
                    }
                }
                Err(e) => {
                    log::error!("[Merge] Commit of {} failed: {}", name, e);
                    return self.rollback(&git);
                }
            }
        }

        self.finalize(&git)
    }

    /// Create or reattach the integration branch and log dry-run results
    fn prepare(&mut self, git: &GitManager, queue: &[String]) -> Result<()> {
        self.state = MergeState::Preparing;
        let integration = self.integration_branch();

        if git.branch_exists(&integration) {
            self.integration_tip = Some(git.branch_tip(&integration)?);
        } else {
            let target_tip = git
                .branch_tip(&self.target_branch)
                .with_context(|| format!("Missing target branch {}", self.target_branch))?;
            git.create_branch_at(&integration, target_tip, false)?;
            self.integration_tip = Some(target_tip);
            log::info!(
                "[Merge] Created {} at {} tip {}",
                integration,
                self.target_branch,
                target_tip
            );
        }

        // Non-destructive preview against the target, for the logs only
        for name in queue {
            match git.trial_merge(&self.target_branch, name) {
                Ok(files) if files.is_empty() => {
                    log::info!("[Merge] Trial merge of {} is clean", name);
                }
                Ok(files) => {
                    log::info!("[Merge] Trial merge of {}: {} conflict(s)", name, files.len());
                }
                Err(e) => {
                    log::warn!("[Merge] Trial merge of {} failed: {}", name, e);
                }
            }
        }

        Ok(())
    }

    /// Carry approved resolutions over to a freshly recomputed conflict set
    fn carry_approved(&self, branch: &str, conflicts: &mut [Conflict]) {
        if self.pending_branch.as_deref() != Some(branch) {
            return;
        }
        for conflict in conflicts.iter_mut() {
            if conflict.suggested_resolution.is_some() {
                continue;
            }
            if let Some(prev) = self
                .pending_conflicts
                .iter()
                .find(|p| p.file == conflict.file)
            {
                conflict.suggested_resolution = prev.suggested_resolution.clone();
            }
        }
    }

    /// Fast-forward the target and discard everything disposable
    fn finalize(&mut self, git: &GitManager) -> Result<MergeOutcome> {
        let tip = self
            .integration_tip
            .ok_or_else(|| anyhow!("Integration branch has no tip"))?;

        self.state = MergeState::Merging;
        if let Err(e) = git.fast_forward(&self.target_branch, tip) {
            log::error!(
                "[Merge] Fast-forward of {} failed: {}",
                self.target_branch,
                e
            );
            return self.rollback(git);
        }

        let integration = self.integration_branch();
        if let Err(e) = git.delete_branch(&integration) {
            log::warn!("[Merge] Failed to delete {}: {}", integration, e);
        }

        // Prune worker workspaces and branches, best effort
        for branch in &self.tracked {
            if branch.status != BranchStatus::Merged {
                continue;
            }
            if !branch.workspace_path.is_empty() {
                if let Err(e) = git.remove_worktree(&branch.workspace_path) {
                    log::warn!(
                        "[Merge] Failed to remove worktree {}: {}",
                        branch.workspace_path,
                        e
                    );
                }
            }
            if let Err(e) = git.delete_branch(&branch.name) {
                log::warn!("[Merge] Failed to delete branch {}: {}", branch.name, e);
            }
        }

        self.state = MergeState::Success;
        log::info!(
            "[Merge] {} branch(es) merged into {}",
            self.merged.len(),
            self.target_branch
        );
        Ok(self.outcome(true, false))
    }

    /// Delete the integration branch. The target was never touched, so
    /// removing the staging ref is the whole rollback.
    fn rollback(&mut self, git: &GitManager) -> Result<MergeOutcome> {
        let integration = self.integration_branch();
        if git.branch_exists(&integration) {
            git.delete_branch(&integration)
                .with_context(|| format!("Rollback failed to delete {}", integration))?;
        }
        self.integration_tip = None;
        self.state = MergeState::Failure;
        log::warn!("[Merge] Rolled back, {} is unchanged", self.target_branch);
        Ok(self.outcome(false, true))
    }

    fn outcome(&self, success: bool, rolled_back: bool) -> MergeOutcome {
        let mut conflicts = self.conflicts_seen.clone();
        conflicts.extend(self.pending_conflicts.iter().cloned());

        MergeOutcome {
            base_branch: self.target_branch.clone(),
            merged_branches: self.merged.clone(),
            conflicts,
            success,
            rolled_back,
        }
    }
}
