// Layered dispatcher: owns the orchestration state machine for one
// session. Prepares and validates slot workspaces, launches every slot of
// the active layer in parallel, then blocks on status monitor events until
// the layer completes. Cross-slot coordination happens exclusively through
// the status document; a slot failure never aborts its siblings.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::agents::{SlotPool, WorkerLaunchConfig, WorkerProcess};
use crate::config::TaskwaveConfig;
use crate::events::{EventBus, SessionCommand};
use crate::models::{
    AgentKind, BranchStatus, DependencyLayer, Slot, SlotStatus, TaskStatus, TrackedBranch,
};
use crate::scheduler::{assign_to_slots, build_layers};
use crate::statusdoc::{MonitorEvent, StatusMonitor, StatusStore};
use crate::taskdoc::TaskDocument;
use crate::utils::generate_id;
use crate::workspace::WorkspaceSupervisor;

/// How often exited workers are reaped and stalls are checked
const REAP_INTERVAL_MS: u64 = 500;
/// Grace period for lingering workers after all tasks complete
const DRAIN_ATTEMPTS: u32 = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    Idle,
    PreparingWorkspaces,
    ValidatingWorkspaces,
    LaunchingLayer,
    Monitoring,
    Completed,
    Failed,
}

/// What one dispatch run produced. Branches with status `completed` are
/// the merge engine's input.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub state: DispatcherState,
    pub session_id: String,
    pub layers_run: usize,
    pub branches: Vec<TrackedBranch>,
    pub errors: Vec<String>,
}

pub struct Dispatcher {
    repo_path: PathBuf,
    config: TaskwaveConfig,
    session_id: String,
    doc: TaskDocument,
    layers: Vec<DependencyLayer>,
    /// Per layer: task ids per slot index, stable across the session
    layer_assignments: Vec<Vec<Vec<String>>>,
    agent_kind: AgentKind,
    store: StatusStore,
    supervisor: WorkspaceSupervisor,
    pool: SlotPool,
    slots: Vec<Slot>,
    /// Launch times, the stall baseline until a slot's first task update
    slot_launched_at: HashMap<u32, chrono::DateTime<Utc>>,
    branches: HashMap<u32, TrackedBranch>,
    failed_slots: HashSet<u32>,
    errors: Vec<String>,
    state: DispatcherState,
    bus: EventBus,
    /// Argv replacing the agent CLI, for stub workers in tests
    command_override: Option<Vec<String>>,
}

impl Dispatcher {
    /// Build a dispatcher for one task document. Specification errors
    /// (cycles, bad agent kind) surface here, before anything is created.
    pub fn new(
        repo_path: impl AsRef<Path>,
        config: TaskwaveConfig,
        doc: TaskDocument,
        bus: EventBus,
    ) -> Result<Self> {
        let repo_path = repo_path.as_ref().to_path_buf();
        let layers = build_layers(&doc.tasks)?;
        let agent_kind = config
            .orchestration
            .agent_kind
            .parse::<AgentKind>()
            .map_err(|e| anyhow!(e))?;

        let layer_assignments: Vec<Vec<Vec<String>>> = layers
            .iter()
            .map(|layer| assign_to_slots(layer, config.limits.max_slots))
            .collect();
        let width = layer_assignments.iter().map(Vec::len).max().unwrap_or(0);
        let slots = (0..width)
            .map(|i| Slot::new(i as u32, agent_kind, Vec::new()))
            .collect();

        let store = StatusStore::new(config.status_doc_path(&repo_path));
        let supervisor = WorkspaceSupervisor::new(&repo_path, store.path())
            .with_workspace_base(config.workspace_base(&repo_path));
        let pool = SlotPool::with_limits(config.limits.clone());

        Ok(Self {
            repo_path,
            session_id: generate_id(),
            doc,
            layers,
            layer_assignments,
            agent_kind,
            store,
            supervisor,
            pool,
            slots,
            slot_launched_at: HashMap::new(),
            branches: HashMap::new(),
            failed_slots: HashSet::new(),
            errors: Vec::new(),
            state: DispatcherState::Idle,
            bus,
            command_override: None,
            config,
        })
    }

    pub fn with_command_override(mut self, argv: Vec<String>) -> Self {
        self.command_override = Some(argv);
        self
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    /// Run the session to completion, failure or cancellation. The command
    /// receiver is borrowed so the caller can keep feeding the same channel
    /// into the merge phase afterwards.
    pub async fn run(
        mut self,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Result<DispatchOutcome> {
        self.state = DispatcherState::PreparingWorkspaces;
        self.store.create(&self.session_id, self.layers.clone())?;

        let mut current_layer = 0usize;
        self.launch_layer(current_layer, true)?;
        self.state = DispatcherState::Monitoring;

        let monitor = StatusMonitor::new(
            self.store.clone(),
            Duration::from_secs(self.config.orchestration.poll_interval_secs),
        );
        let (mon_tx, mut mon_rx) = mpsc::unbounded_channel();
        tokio::spawn(monitor.run(mon_tx));

        let mut reap = tokio::time::interval(Duration::from_millis(REAP_INTERVAL_MS));
        reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut commands_open = true;
        let mut stalled_emitted: HashSet<u32> = HashSet::new();

        loop {
            tokio::select! {
                Some(event) = mon_rx.recv() => match event {
                    MonitorEvent::TaskCompleted(task_id) => {
                        log::info!("[Dispatcher] Task {} complete", task_id);
                    }
                    MonitorEvent::LayerCompleted(level) if level == current_layer => {
                        if current_layer + 1 < self.layers.len() {
                            self.retire_layer_workers(current_layer);
                            current_layer += 1;
                            self.store.advance_layer(current_layer)?;
                            self.bus.emit_layer_advanced(current_layer);
                            self.state = DispatcherState::LaunchingLayer;
                            self.launch_layer(current_layer, false)?;
                            self.state = DispatcherState::Monitoring;
                        }
                    }
                    MonitorEvent::LayerCompleted(level) => {
                        log::debug!("[Dispatcher] Layer {} completed out of order", level);
                    }
                    MonitorEvent::AllCompleted => {
                        self.drain_finished_workers(current_layer).await;
                        self.state = DispatcherState::Completed;
                        break;
                    }
                },
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(SessionCommand::Cancel) => {
                        log::warn!("[Dispatcher] Session cancelled");
                        self.cancel(current_layer);
                        break;
                    }
                    Some(other) => {
                        // Review commands only apply once the merge engine runs
                        log::debug!("[Dispatcher] Ignoring {:?} during dispatch", other);
                    }
                    None => {
                        commands_open = false;
                    }
                },
                _ = reap.tick() => {
                    for (slot_number, code) in self.pool.poll_exited() {
                        self.handle_exit(slot_number, code, current_layer);
                    }
                    for slot_number in self.pool.runtime_violations() {
                        let _ = self.pool.kill(slot_number);
                        self.mark_slot_failed(
                            slot_number,
                            current_layer,
                            "exceeded maximum runtime",
                        );
                    }
                    self.check_stalls(current_layer, &mut stalled_emitted);

                    if self.layer_starved(current_layer) {
                        log::error!(
                            "[Dispatcher] Layer {} cannot complete: every remaining task \
                             is on a failed slot",
                            current_layer
                        );
                        self.errors.push(format!(
                            "layer {} starved by failed slots",
                            current_layer
                        ));
                        self.pool.kill_all();
                        self.state = DispatcherState::Failed;
                        break;
                    }
                },
            }
        }

        Ok(DispatchOutcome {
            state: self.state,
            session_id: self.session_id.clone(),
            layers_run: current_layer + 1,
            branches: self.branches.values().cloned().collect(),
            errors: self.errors.clone(),
        })
    }

    /// Prepare, validate and launch every slot that has tasks in a layer.
    /// Workspace failures are fatal per slot; validation failure aborts
    /// the whole session since it precedes any launch.
    fn launch_layer(&mut self, level: usize, first: bool) -> Result<()> {
        let assignments = self.layer_assignments[level].clone();
        log::info!(
            "[Dispatcher] Layer {}: {} slot(s)",
            level,
            assignments.len()
        );

        let mut participants = Vec::new();
        for (idx, task_ids) in assignments.iter().enumerate() {
            let slot_number = idx as u32;
            if self.failed_slots.contains(&slot_number) {
                log::warn!(
                    "[Dispatcher] Slot {} already failed, skipping its layer {} tasks",
                    slot_number,
                    level
                );
                self.mark_tasks_failed(task_ids, "assigned slot failed in an earlier layer");
                continue;
            }

            self.slots[idx].assigned_task_ids = task_ids.clone();
            let old_status = self.slots[idx].launch_status;
            match self.supervisor.prepare(&mut self.slots[idx], &self.doc) {
                Ok(()) => {
                    self.bus.emit_slot_status_changed(&self.slots[idx], old_status);
                    participants.push(idx);
                }
                Err(e) => {
                    self.mark_slot_failed(slot_number, level, &format!("workspace: {}", e));
                }
            }
        }

        if first {
            self.state = DispatcherState::ValidatingWorkspaces;
        }
        let prepared: Vec<Slot> = participants.iter().map(|&i| self.slots[i].clone()).collect();
        self.supervisor.validate(&prepared)?;

        self.state = DispatcherState::LaunchingLayer;
        for idx in participants {
            self.launch_slot(idx, level);
        }
        Ok(())
    }

    fn launch_slot(&mut self, idx: usize, level: usize) {
        let slot_number = self.slots[idx].slot_number;
        let config = WorkerLaunchConfig {
            slot_number,
            agent_kind: self.agent_kind,
            workspace_path: self.slots[idx].workspace_path.clone(),
            status_doc_path: self.store.path().display().to_string(),
            log_dir: self.config.log_dir(&self.repo_path),
            command_override: self.command_override.clone(),
        };

        let old_status = self.slots[idx].launch_status;
        self.slots[idx].launch_status = SlotStatus::Launching;
        self.bus.emit_slot_status_changed(&self.slots[idx], old_status);

        let launched = WorkerProcess::launch(&config, self.bus.clone())
            .and_then(|worker| {
                self.slots[idx].process_id = worker.process_id;
                self.pool.register(worker)
            });

        match launched {
            Ok(()) => {
                let old_status = self.slots[idx].launch_status;
                self.slots[idx].launch_status = SlotStatus::Running;
                self.slot_launched_at.insert(slot_number, Utc::now());
                self.bus.emit_slot_status_changed(&self.slots[idx], old_status);

                let slot = &self.slots[idx];
                self.branches
                    .entry(slot_number)
                    .and_modify(|b| b.status = BranchStatus::InProgress)
                    .or_insert_with(|| TrackedBranch {
                        name: slot.branch_name.clone(),
                        workspace_path: slot.workspace_path.clone(),
                        agent_kind: slot.agent_kind,
                        status: BranchStatus::InProgress,
                    });

                for task_id in self.slots[idx].assigned_task_ids.clone() {
                    let result = self.store.update_task(&task_id, |state| {
                        state.assigned_slot = Some(slot_number);
                    });
                    if let Err(e) = result {
                        log::warn!("[Dispatcher] Failed to record assignment: {}", e);
                    }
                }
            }
            Err(e) => {
                self.mark_slot_failed(slot_number, level, &format!("launch: {}", e));
            }
        }
    }

    /// Worker exit. Code 0 completes the slot only when every task it was
    /// assigned in the layer is terminal; a clean exit that abandoned its
    /// tasks fails the slot like a nonzero exit does, so the layer starves
    /// out instead of waiting forever on a dead worker.
    fn handle_exit(&mut self, slot_number: u32, code: i32, level: usize) {
        if code != 0 {
            self.mark_slot_failed(slot_number, level, &format!("worker exited with code {}", code));
            return;
        }
        if !self.slot_tasks_terminal(slot_number, level) {
            self.mark_slot_failed(
                slot_number,
                level,
                "worker exited cleanly before finishing its tasks",
            );
            return;
        }

        let idx = slot_number as usize;
        let old_status = self.slots[idx].launch_status;
        self.slots[idx].launch_status = SlotStatus::Completed;
        self.slots[idx].process_id = None;
        self.bus.emit_slot_status_changed(&self.slots[idx], old_status);

        if let Some(branch) = self.branches.get_mut(&slot_number) {
            branch.status = BranchStatus::Completed;
        }
        log::info!("[Dispatcher] Slot {} worker finished cleanly", slot_number);
    }

    fn slot_tasks_terminal(&self, slot_number: u32, level: usize) -> bool {
        let task_ids = match self
            .layer_assignments
            .get(level)
            .and_then(|a| a.get(slot_number as usize))
        {
            Some(ids) => ids,
            None => return true,
        };
        let doc = match self.store.load() {
            Ok(doc) => doc,
            // An unreadable document is not evidence of abandoned work
            Err(_) => return true,
        };
        task_ids
            .iter()
            .all(|id| doc.tasks.get(id).map_or(true, |s| s.status.is_terminal()))
    }

    fn mark_slot_failed(&mut self, slot_number: u32, level: usize, reason: &str) {
        log::error!("[Dispatcher] Slot {} failed: {}", slot_number, reason);
        self.failed_slots.insert(slot_number);
        self.errors.push(format!("slot {}: {}", slot_number, reason));

        let idx = slot_number as usize;
        if idx < self.slots.len() {
            let old_status = self.slots[idx].launch_status;
            self.slots[idx].launch_status = SlotStatus::Failed;
            self.slots[idx].process_id = None;
            self.bus.emit_slot_status_changed(&self.slots[idx], old_status);
        }

        let task_ids = self
            .layer_assignments
            .get(level)
            .and_then(|a| a.get(idx))
            .cloned()
            .unwrap_or_default();
        self.mark_tasks_failed(&task_ids, reason);
    }

    /// Mark the non-complete tasks of a dead slot as failed in the
    /// status document
    fn mark_tasks_failed(&self, task_ids: &[String], reason: &str) {
        for task_id in task_ids {
            let result = self.store.update_task(task_id, |state| {
                if state.status != TaskStatus::Complete {
                    state.status = TaskStatus::Failed;
                    state.last_error = Some(reason.to_string());
                }
            });
            if let Err(e) = result {
                log::warn!("[Dispatcher] Failed to mark task {} failed: {}", task_id, e);
            }
        }
    }

    fn cancel(&mut self, level: usize) {
        let killed = self.pool.kill_all();
        for slot_number in killed {
            self.mark_slot_failed(slot_number, level, "session cancelled");
        }
        self.errors.push("session cancelled".to_string());
        self.state = DispatcherState::Failed;
    }

    /// A stalled slot is escalated, not failed: none of its assigned tasks
    /// have moved for the configured threshold while its worker still runs.
    /// Idleness is keyed on per-task timestamps, so a busy sibling writing
    /// to the shared document cannot mask another slot's silence.
    fn check_stalls(&self, level: usize, stalled_emitted: &mut HashSet<u32>) {
        let doc = match self.store.load() {
            Ok(doc) => doc,
            Err(_) => return,
        };
        let threshold = self.config.orchestration.stall_threshold_secs;
        let now = Utc::now();

        for slot in &self.slots {
            if slot.launch_status != SlotStatus::Running || !self.pool.is_running(slot.slot_number)
            {
                continue;
            }

            let task_activity = self
                .layer_assignments
                .get(level)
                .and_then(|a| a.get(slot.slot_number as usize))
                .into_iter()
                .flatten()
                .filter_map(|id| doc.tasks.get(id))
                .filter_map(|state| state.updated_at)
                .max();
            let last_activity = match task_activity
                .or_else(|| self.slot_launched_at.get(&slot.slot_number).copied())
            {
                Some(at) => at,
                None => continue,
            };

            let idle_secs = (now - last_activity).num_seconds().max(0) as u64;
            if idle_secs < threshold {
                stalled_emitted.remove(&slot.slot_number);
            } else if stalled_emitted.insert(slot.slot_number) {
                log::warn!(
                    "[Dispatcher] Slot {} stalled ({}s without a task update)",
                    slot.slot_number,
                    idle_secs
                );
                self.bus.emit_slot_stalled(slot.slot_number, idle_secs);
            }
        }
    }

    /// True when the active layer can never complete: at least one task
    /// failed and every task has reached a terminal status, so no running
    /// worker can still move the layer forward.
    fn layer_starved(&self, level: usize) -> bool {
        let doc = match self.store.load() {
            Ok(doc) => doc,
            Err(_) => return false,
        };
        let layer = match self.layers.get(level) {
            Some(layer) => layer,
            None => return false,
        };

        let mut any_failed = false;
        for task_id in &layer.task_ids {
            match doc.tasks.get(task_id).map(|s| s.status) {
                Some(TaskStatus::Failed) => any_failed = true,
                Some(TaskStatus::Complete) => {}
                _ => return false,
            }
        }
        any_failed
    }

    /// A layer just completed, so every task of every still-running worker
    /// is done. Reap clean exits, then kill lingerers so their slots are
    /// free for the next layer; either way the slot counts as completed.
    fn retire_layer_workers(&mut self, level: usize) {
        for (slot_number, code) in self.pool.poll_exited() {
            self.handle_exit(slot_number, code, level);
        }
        for slot_number in self.pool.kill_all() {
            log::info!(
                "[Dispatcher] Retired lingering slot {} worker after layer {}",
                slot_number,
                level
            );
            self.complete_slot(slot_number);
        }
    }

    fn complete_slot(&mut self, slot_number: u32) {
        if let Some(branch) = self.branches.get_mut(&slot_number) {
            branch.status = BranchStatus::Completed;
        }
        let idx = slot_number as usize;
        if idx < self.slots.len() {
            let old_status = self.slots[idx].launch_status;
            self.slots[idx].launch_status = SlotStatus::Completed;
            self.slots[idx].process_id = None;
            self.bus.emit_slot_status_changed(&self.slots[idx], old_status);
        }
    }

    /// After AllCompleted, give lingering workers a moment to exit on
    /// their own before killing them. Their tasks are already complete,
    /// so their branches count as completed either way.
    async fn drain_finished_workers(&mut self, level: usize) {
        for _ in 0..DRAIN_ATTEMPTS {
            for (slot_number, code) in self.pool.poll_exited() {
                self.handle_exit(slot_number, code, level);
            }
            if self.pool.running_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for slot_number in self.pool.kill_all() {
            log::warn!(
                "[Dispatcher] Killed lingering slot {} worker after completion",
                slot_number
            );
            self.complete_slot(slot_number);
        }
    }
}
