// Configuration: `.taskwave.toml` in the orchestrated repository's root,
// falling back to one in the home directory, then built-in defaults

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::agents::ResourceLimits;

pub const CONFIG_FILE_NAME: &str = ".taskwave.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskwaveConfig {
    /// Orchestration settings
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    /// Merge engine settings
    #[serde(default)]
    pub merge: MergeConfig,
    /// Worker resource limits
    #[serde(default)]
    pub limits: ResourceLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Status document poll interval in seconds
    #[serde(
        rename = "pollIntervalSecs",
        alias = "poll_interval_secs",
        default = "default_poll_interval"
    )]
    pub poll_interval_secs: u64,
    /// Seconds without a status change before a slot counts as stalled
    #[serde(
        rename = "stallThresholdSecs",
        alias = "stall_threshold_secs",
        default = "default_stall_threshold"
    )]
    pub stall_threshold_secs: u64,
    /// Worker agent CLI to launch
    #[serde(rename = "agentKind", alias = "agent_kind", default = "default_agent_kind")]
    pub agent_kind: String,
    /// Status document path, relative to the repository root
    #[serde(
        rename = "statusDocPath",
        alias = "status_doc_path",
        default = "default_status_doc_path"
    )]
    pub status_doc_path: String,
    /// Base directory for slot worktrees, relative to the repository root
    #[serde(
        rename = "workspaceBase",
        alias = "workspace_base",
        default = "default_workspace_base"
    )]
    pub workspace_base: String,
    /// Per-slot log directory, relative to the repository root
    #[serde(rename = "logDir", alias = "log_dir", default = "default_log_dir")]
    pub log_dir: String,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_stall_threshold() -> u64 {
    120
}
fn default_agent_kind() -> String {
    "claude".to_string()
}
fn default_status_doc_path() -> String {
    ".taskwave/status.json".to_string()
}
fn default_workspace_base() -> String {
    ".taskwave/workspaces".to_string()
}
fn default_log_dir() -> String {
    ".taskwave/logs".to_string()
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            stall_threshold_secs: default_stall_threshold(),
            agent_kind: default_agent_kind(),
            status_doc_path: default_status_doc_path(),
            workspace_base: default_workspace_base(),
            log_dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Branch the integration branch finally fast-forwards. Defaults to
    /// the repository's current default branch.
    #[serde(rename = "targetBranch", alias = "target_branch", default)]
    pub target_branch: Option<String>,
    /// Apply deterministic resolutions for auto-class conflicts
    #[serde(rename = "autoResolve", alias = "auto_resolve", default = "default_true")]
    pub auto_resolve: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            target_branch: None,
            auto_resolve: default_true(),
        }
    }
}

impl TaskwaveConfig {
    /// Repository-root config, then home-directory config, then defaults
    pub fn load(repo_path: &Path) -> Result<Self> {
        let candidates: Vec<PathBuf> = std::iter::once(repo_path.join(CONFIG_FILE_NAME))
            .chain(dirs::home_dir().map(|h| h.join(CONFIG_FILE_NAME)))
            .collect();

        for path in &candidates {
            if let Some(config) = Self::load_from_path(path)? {
                log::info!("[Config] Loaded {}", path.display());
                return Ok(config);
            }
        }

        log::info!("[Config] No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;

        config.validate()?;
        Ok(Some(config))
    }

    fn validate(&self) -> Result<()> {
        if self.orchestration.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be greater than 0"));
        }
        if self.orchestration.stall_threshold_secs == 0 {
            return Err(anyhow!("stall_threshold_secs must be greater than 0"));
        }
        if self.limits.max_slots == 0 {
            return Err(anyhow!("max_slots must be greater than 0"));
        }
        self.orchestration
            .agent_kind
            .parse::<crate::models::AgentKind>()
            .map_err(|e| anyhow!("Invalid agent_kind: {}", e))?;
        Ok(())
    }

    pub fn status_doc_path(&self, repo_path: &Path) -> PathBuf {
        repo_path.join(&self.orchestration.status_doc_path)
    }

    pub fn workspace_base(&self, repo_path: &Path) -> PathBuf {
        repo_path.join(&self.orchestration.workspace_base)
    }

    pub fn log_dir(&self, repo_path: &Path) -> PathBuf {
        repo_path.join(&self.orchestration.log_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = TaskwaveConfig::default();
        assert_eq!(config.orchestration.poll_interval_secs, 5);
        assert_eq!(config.orchestration.stall_threshold_secs, 120);
        assert_eq!(config.orchestration.agent_kind, "claude");
        assert_eq!(config.limits.max_slots, 4);
        assert!(config.merge.auto_resolve);
        assert!(config.merge.target_branch.is_none());
    }

    #[test]
    fn test_loads_repo_root_config() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
[orchestration]
poll_interval_secs = 2
agent_kind = "codex"

[merge]
target_branch = "develop"

[limits]
max_slots = 2
"#,
        )
        .unwrap();

        let config = TaskwaveConfig::load(dir.path()).unwrap();
        assert_eq!(config.orchestration.poll_interval_secs, 2);
        assert_eq!(config.orchestration.agent_kind, "codex");
        assert_eq!(config.merge.target_branch.as_deref(), Some("develop"));
        assert_eq!(config.limits.max_slots, 2);
        // Untouched sections keep defaults
        assert_eq!(config.orchestration.stall_threshold_secs, 120);
    }

    #[test]
    fn test_missing_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config = TaskwaveConfig::load(dir.path()).unwrap();
        assert_eq!(config.orchestration.poll_interval_secs, 5);
    }

    #[test]
    fn test_camel_case_keys_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            r#"
[orchestration]
pollIntervalSecs = 7
stallThresholdSecs = 60
"#,
        )
        .unwrap();

        let config = TaskwaveConfig::load_from_path(&path).unwrap().unwrap();
        assert_eq!(config.orchestration.poll_interval_secs, 7);
        assert_eq!(config.orchestration.stall_threshold_secs, 60);
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[orchestration]\npoll_interval_secs = 0\n").unwrap();
        assert!(TaskwaveConfig::load_from_path(&path).is_err());
    }

    #[test]
    fn test_rejects_unknown_agent_kind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[orchestration]\nagent_kind = \"hal9000\"\n").unwrap();
        assert!(TaskwaveConfig::load_from_path(&path).is_err());
    }

    #[test]
    fn test_relative_paths_anchor_to_repo() {
        let config = TaskwaveConfig::default();
        let repo = Path::new("/work/repo");
        assert_eq!(
            config.status_doc_path(repo),
            Path::new("/work/repo/.taskwave/status.json")
        );
        assert_eq!(
            config.workspace_base(repo),
            Path::new("/work/repo/.taskwave/workspaces")
        );
    }
}
