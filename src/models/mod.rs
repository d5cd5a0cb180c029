// Core data model shared across the scheduler, dispatcher and merge engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Run status of a single task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Blocked,
    Ready,
    InProgress,
    Complete,
    Failed,
}

impl TaskStatus {
    /// Terminal statuses never transition again on the orchestrator side
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

/// One unit of work from the task document. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub unit_test_spec: Option<String>,
}

/// Mutable run state for a task, keyed by task id in the status document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_slot: Option<u32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// When this entry last changed. Stall detection reads it per task,
    /// so one busy task cannot hide another slot's silence.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl TaskState {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            assigned_slot: None,
            started_at: None,
            completed_at: None,
            updated_at: None,
            last_error: None,
        }
    }
}

/// A wave of tasks whose dependencies all live in strictly earlier layers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DependencyLayer {
    pub level: usize,
    pub task_ids: Vec<String>,
}

/// The shared coordination record between the orchestrator and workers.
/// The orchestrator seeds it; each worker updates only the TaskState entries
/// for tasks assigned to its slot. There is no locking: every read is a
/// best-effort snapshot and every write rewrites the whole document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDocument {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_layer: usize,
    pub layers: Vec<DependencyLayer>,
    pub tasks: HashMap<String, TaskState>,
}

/// Launch status of a worker slot
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Pending,
    WorkspaceReady,
    Launching,
    Running,
    Completed,
    Failed,
}

/// Worker CLI family a slot runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Claude,
    Opencode,
    Cursor,
    Codex,
}

impl AgentKind {
    /// Executable name the kind resolves to on PATH
    pub fn executable(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Opencode => "opencode",
            AgentKind::Cursor => "cursor-agent",
            AgentKind::Codex => "codex",
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(AgentKind::Claude),
            "opencode" => Ok(AgentKind::Opencode),
            "cursor" | "cursor-agent" => Ok(AgentKind::Cursor),
            "codex" => Ok(AgentKind::Codex),
            _ => Err(format!(
                "Invalid agent kind: '{}'. Expected 'claude', 'opencode', 'cursor', or 'codex'",
                s
            )),
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentKind::Claude => "claude",
            AgentKind::Opencode => "opencode",
            AgentKind::Cursor => "cursor",
            AgentKind::Codex => "codex",
        };
        write!(f, "{}", name)
    }
}

/// One worker lane: isolated workspace + branch + supervised process.
/// A slot lives for the duration of one worker's execution and may carry
/// tasks across multiple layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub slot_number: u32,
    pub agent_kind: AgentKind,
    pub workspace_path: String,
    pub branch_name: String,
    pub assigned_task_ids: Vec<String>,
    #[serde(default)]
    pub process_id: Option<u32>,
    pub launch_status: SlotStatus,
}

impl Slot {
    pub fn new(slot_number: u32, agent_kind: AgentKind, assigned_task_ids: Vec<String>) -> Self {
        Self {
            slot_number,
            agent_kind,
            workspace_path: String::new(),
            branch_name: String::new(),
            assigned_task_ids,
            process_id: None,
            launch_status: SlotStatus::Pending,
        }
    }
}

/// Merge-phase status of a worker branch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Pending,
    InProgress,
    Completed,
    Merged,
}

/// A worker branch the merge engine tracks. Transitions to `merged` only
/// after the engine has integrated it onto the integration branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedBranch {
    pub name: String,
    pub workspace_path: String,
    pub agent_kind: AgentKind,
    pub status: BranchStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Record appended to the session history after every orchestration run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub layers_run: usize,
    pub branches_merged: Vec<String>,
    pub conflicts_auto_resolved: usize,
    pub conflicts_escalated: usize,
    pub duration_secs: i64,
    #[serde(default)]
    pub errors: Vec<String>,
}
