// Workspace supervision: one isolated git worktree per worker slot,
// seeded with tasks.json, BRIEF.md and progress.log before launch

pub mod brief;

pub use brief::{render_brief, BriefContext, DEFAULT_BRIEF_TEMPLATE};

use anyhow::{anyhow, Context as _, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::git::GitManager;
use crate::models::{Slot, SlotStatus};
use crate::taskdoc::TaskDocument;

/// How many trailing progress lines get carried into the next brief
const HANDOFF_LINES: usize = 20;

pub struct WorkspaceSupervisor {
    repo_path: PathBuf,
    workspace_base: PathBuf,
    status_doc_path: PathBuf,
    brief_template: String,
}

impl WorkspaceSupervisor {
    pub fn new(repo_path: impl AsRef<Path>, status_doc_path: impl AsRef<Path>) -> Self {
        let repo_path = repo_path.as_ref().to_path_buf();
        let workspace_base = repo_path.join(".taskwave").join("workspaces");

        Self {
            repo_path,
            workspace_base,
            status_doc_path: status_doc_path.as_ref().to_path_buf(),
            brief_template: DEFAULT_BRIEF_TEMPLATE.to_string(),
        }
    }

    pub fn with_workspace_base(mut self, base: impl AsRef<Path>) -> Self {
        self.workspace_base = base.as_ref().to_path_buf();
        self
    }

    pub fn with_brief_template(mut self, template: impl Into<String>) -> Self {
        self.brief_template = template.into();
        self
    }

    pub fn workspace_base(&self) -> &Path {
        &self.workspace_base
    }

    /// Branch name for a slot
    pub fn branch_name(slot_number: u32) -> String {
        format!("agent/slot-{}", slot_number)
    }

    /// Create the slot's branch and worktree, then seed the workspace files.
    /// Fills in `workspace_path`, `branch_name` and flips the slot to
    /// `workspace_ready`. Re-preparing an existing workspace reseeds
    /// tasks.json and the brief but keeps the worktree and progress log.
    pub fn prepare(&self, slot: &mut Slot, doc: &TaskDocument) -> Result<()> {
        std::fs::create_dir_all(&self.workspace_base)
            .with_context(|| format!("Failed to create {}", self.workspace_base.display()))?;

        let branch = Self::branch_name(slot.slot_number);
        let path = self.workspace_base.join(format!("slot-{}", slot.slot_number));

        let git = GitManager::new(&self.repo_path)?;
        let already_registered = git
            .list_worktrees()?
            .iter()
            .any(|w| Path::new(&w.path) == path);
        if !already_registered {
            git.create_worktree(&branch, &path).map_err(|e| {
                anyhow!("Failed to create worktree for slot {}: {}", slot.slot_number, e)
            })?;
        }

        // tasks.json: the document filtered to this slot's assignments
        let filtered = doc.filtered(&slot.assigned_task_ids);
        let tasks_json = serde_json::to_string_pretty(&filtered)?;
        std::fs::write(path.join("tasks.json"), tasks_json)?;

        // progress.log: append-only, created only if absent so handoff
        // history survives
        let progress_path = path.join("progress.log");
        let recent_progress = read_recent_progress(&progress_path);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&progress_path)
            .with_context(|| format!("Failed to open {}", progress_path.display()))?;

        let brief_ctx = BriefContext {
            feature: filtered.feature.clone(),
            slot_number: slot.slot_number,
            branch_name: branch.clone(),
            status_doc_path: self.status_doc_path.display().to_string(),
            tasks: filtered.tasks,
            recent_progress,
        };
        let brief = render_brief(&self.brief_template, &brief_ctx)?;
        std::fs::write(path.join("BRIEF.md"), brief)?;

        slot.workspace_path = path.display().to_string();
        slot.branch_name = branch;
        slot.launch_status = SlotStatus::WorkspaceReady;

        log::info!(
            "[Workspace] Prepared slot {} at {} ({} task(s))",
            slot.slot_number,
            slot.workspace_path,
            slot.assigned_task_ids.len()
        );
        Ok(())
    }

    /// Check every prepared workspace before launch: the worktree must be
    /// registered and the seeded files present. Any failure aborts the
    /// session, so the error names the offending slot.
    pub fn validate(&self, slots: &[Slot]) -> Result<()> {
        let git = GitManager::new(&self.repo_path)?;
        let registered: Vec<String> = git
            .list_worktrees()?
            .into_iter()
            .map(|w| w.path)
            .collect();

        for slot in slots {
            let path = Path::new(&slot.workspace_path);
            if !path.is_dir() {
                return Err(anyhow!(
                    "Slot {} workspace missing: {}",
                    slot.slot_number,
                    slot.workspace_path
                ));
            }
            if !registered.iter().any(|p| Path::new(p) == path) {
                return Err(anyhow!(
                    "Slot {} workspace is not a registered worktree: {}",
                    slot.slot_number,
                    slot.workspace_path
                ));
            }
            for file in ["tasks.json", "BRIEF.md", "progress.log"] {
                if !path.join(file).is_file() {
                    return Err(anyhow!(
                        "Slot {} workspace missing {}: {}",
                        slot.slot_number,
                        file,
                        slot.workspace_path
                    ));
                }
            }
        }

        log::info!("[Workspace] Validated {} workspace(s)", slots.len());
        Ok(())
    }

    /// Remove a slot's worktree (best effort on the directory side)
    pub fn remove(&self, slot: &Slot) -> Result<()> {
        let git = GitManager::new(&self.repo_path)?;
        git.remove_worktree(&slot.workspace_path)
            .map_err(|e| anyhow!("Failed to remove worktree {}: {}", slot.workspace_path, e))?;
        Ok(())
    }

    /// Drop stale worktree registrations left by crashed sessions
    pub fn cleanup_orphaned(&self) -> Result<u32> {
        let git = GitManager::new(&self.repo_path)?;
        Ok(git.prune_orphaned_worktrees()?)
    }
}

/// Tail of an existing progress log, for the next brief's handoff section
fn read_recent_progress(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return None;
    }
    let start = lines.len().saturating_sub(HANDOFF_LINES);
    Some(lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentKind;
    use git2::{Repository, Signature};
    use tempfile::TempDir;

    fn setup_repo() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::init(temp_dir.path()).unwrap();

        let sig = Signature::now("Test User", "test@example.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .unwrap();

        temp_dir
    }

    fn task_doc() -> TaskDocument {
        serde_json::from_str(
            r#"{
                "feature": "auth",
                "tasks": [
                    {"id": "a", "title": "Schema", "description": "DB schema"},
                    {"id": "b", "title": "Endpoints", "dependsOn": ["a"]}
                ]
            }"#,
        )
        .unwrap()
    }

    fn supervisor(repo: &TempDir, workspaces: &TempDir) -> WorkspaceSupervisor {
        WorkspaceSupervisor::new(repo.path(), repo.path().join("status.json"))
            .with_workspace_base(workspaces.path().join("ws"))
    }

    #[test]
    fn test_prepare_seeds_workspace() {
        let repo = setup_repo();
        let workspaces = TempDir::new().unwrap();
        let sup = supervisor(&repo, &workspaces);

        let mut slot = Slot::new(0, AgentKind::Claude, vec!["a".to_string()]);
        sup.prepare(&mut slot, &task_doc()).unwrap();

        assert_eq!(slot.launch_status, SlotStatus::WorkspaceReady);
        assert_eq!(slot.branch_name, "agent/slot-0");

        let path = Path::new(&slot.workspace_path);
        assert!(path.join("tasks.json").is_file());
        assert!(path.join("BRIEF.md").is_file());
        assert!(path.join("progress.log").is_file());

        // tasks.json holds only this slot's tasks
        let seeded: TaskDocument =
            serde_json::from_str(&std::fs::read_to_string(path.join("tasks.json")).unwrap())
                .unwrap();
        assert_eq!(seeded.tasks.len(), 1);
        assert_eq!(seeded.tasks[0].id, "a");

        let brief = std::fs::read_to_string(path.join("BRIEF.md")).unwrap();
        assert!(brief.contains("### a: Schema"));
        assert!(!brief.contains("Endpoints"));
    }

    #[test]
    fn test_prepare_creates_branch_per_slot() {
        let repo = setup_repo();
        let workspaces = TempDir::new().unwrap();
        let sup = supervisor(&repo, &workspaces);

        let mut slot0 = Slot::new(0, AgentKind::Claude, vec!["a".to_string()]);
        let mut slot1 = Slot::new(1, AgentKind::Claude, vec!["b".to_string()]);
        sup.prepare(&mut slot0, &task_doc()).unwrap();
        sup.prepare(&mut slot1, &task_doc()).unwrap();

        let git = GitManager::new(repo.path()).unwrap();
        assert!(git.branch_exists("agent/slot-0"));
        assert!(git.branch_exists("agent/slot-1"));
        assert_ne!(slot0.workspace_path, slot1.workspace_path);
    }

    #[test]
    fn test_reprepare_reseeds_tasks_and_keeps_progress() {
        let repo = setup_repo();
        let workspaces = TempDir::new().unwrap();
        let sup = supervisor(&repo, &workspaces);

        let mut slot = Slot::new(0, AgentKind::Claude, vec!["a".to_string()]);
        sup.prepare(&mut slot, &task_doc()).unwrap();

        let progress = Path::new(&slot.workspace_path).join("progress.log");
        std::fs::write(&progress, "did the schema\n").unwrap();

        // Next layer: same slot, different task
        slot.assigned_task_ids = vec!["b".to_string()];
        sup.prepare(&mut slot, &task_doc()).unwrap();

        let seeded: TaskDocument =
            serde_json::from_str(&std::fs::read_to_string(
                Path::new(&slot.workspace_path).join("tasks.json"),
            )
            .unwrap())
            .unwrap();
        assert_eq!(seeded.tasks[0].id, "b");

        // Progress survives and feeds the new brief's handoff section
        assert_eq!(
            std::fs::read_to_string(&progress).unwrap(),
            "did the schema\n"
        );
        let brief =
            std::fs::read_to_string(Path::new(&slot.workspace_path).join("BRIEF.md")).unwrap();
        assert!(brief.contains("did the schema"));
    }

    #[test]
    fn test_validate_accepts_prepared_workspaces() {
        let repo = setup_repo();
        let workspaces = TempDir::new().unwrap();
        let sup = supervisor(&repo, &workspaces);

        let mut slot = Slot::new(0, AgentKind::Claude, vec!["a".to_string()]);
        sup.prepare(&mut slot, &task_doc()).unwrap();

        sup.validate(&[slot]).unwrap();
    }

    #[test]
    fn test_validate_rejects_missing_seed_file() {
        let repo = setup_repo();
        let workspaces = TempDir::new().unwrap();
        let sup = supervisor(&repo, &workspaces);

        let mut slot = Slot::new(0, AgentKind::Claude, vec!["a".to_string()]);
        sup.prepare(&mut slot, &task_doc()).unwrap();

        std::fs::remove_file(Path::new(&slot.workspace_path).join("BRIEF.md")).unwrap();

        let err = sup.validate(&[slot]).unwrap_err();
        assert!(err.to_string().contains("BRIEF.md"));
    }

    #[test]
    fn test_validate_rejects_unregistered_directory() {
        let repo = setup_repo();
        let workspaces = TempDir::new().unwrap();
        let sup = supervisor(&repo, &workspaces);

        // A plain directory that was never created as a worktree
        let fake = workspaces.path().join("ws").join("slot-9");
        std::fs::create_dir_all(&fake).unwrap();

        let mut slot = Slot::new(9, AgentKind::Claude, vec!["a".to_string()]);
        slot.workspace_path = fake.display().to_string();

        assert!(sup.validate(&[slot]).is_err());
    }

    #[test]
    fn test_remove_deletes_worktree() {
        let repo = setup_repo();
        let workspaces = TempDir::new().unwrap();
        let sup = supervisor(&repo, &workspaces);

        let mut slot = Slot::new(0, AgentKind::Claude, vec!["a".to_string()]);
        sup.prepare(&mut slot, &task_doc()).unwrap();
        assert!(Path::new(&slot.workspace_path).exists());

        sup.remove(&slot).unwrap();
        assert!(!Path::new(&slot.workspace_path).exists());
    }

    #[test]
    fn test_recent_progress_tails_existing_log() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("progress.log");

        let lines: Vec<String> = (0..30).map(|i| format!("entry {}", i)).collect();
        std::fs::write(&log_path, lines.join("\n")).unwrap();

        let recent = read_recent_progress(&log_path).unwrap();
        assert!(recent.starts_with("entry 10"));
        assert!(recent.ends_with("entry 29"));
        assert_eq!(recent.lines().count(), HANDOFF_LINES);
    }

    #[test]
    fn test_recent_progress_missing_log_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(read_recent_progress(&dir.path().join("progress.log")).is_none());
    }
}
