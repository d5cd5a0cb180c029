// Taskwave CLI: plan the layers, run an orchestration session, or merge
// completed worker branches.

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;

use taskwave::dispatcher::{Dispatcher, DispatcherState};
use taskwave::events::{EventBus, OrchestratorEvent, SessionCommand};
use taskwave::merge::{MergeEngine, MergeOutcome, ResolutionComplexity};
use taskwave::models::{BranchStatus, SessionRecord, TrackedBranch};
use taskwave::scheduler::{assign_to_slots, build_layers};
use taskwave::session::SessionHistory;
use taskwave::taskdoc::TaskDocument;
use taskwave::TaskwaveConfig;

#[derive(Parser)]
#[command(name = "taskwave", version, about = "Layered orchestrator for parallel coding agents")]
struct Cli {
    /// Repository to orchestrate
    #[arg(short, long, default_value = ".", global = true)]
    repo: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the dependency layers for a task document without running it
    Plan {
        /// Task document (JSON)
        tasks: PathBuf,
    },
    /// Run a full session: schedule, launch workers, merge on completion
    Run {
        /// Task document (JSON)
        tasks: PathBuf,
        /// Worker agent CLI, overrides the configured one
        #[arg(long)]
        agent: Option<String>,
        /// Maximum concurrent worker slots, overrides the configured limit
        #[arg(long)]
        max_parallel: Option<usize>,
        /// Print the layers and slot assignments without launching anything
        #[arg(long)]
        dry_run: bool,
        /// Stop after all tasks complete, without merging branches
        #[arg(long)]
        no_merge: bool,
    },
    /// Merge completed worker branches into the target branch
    Merge {
        /// Branch to merge; repeatable
        #[arg(long = "branch", required = true)]
        branches: Vec<String>,
        /// Branch to fast-forward, overrides the configured target
        #[arg(long)]
        target: Option<String>,
        /// Session id naming the integration branch
        #[arg(long)]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let repo = cli.repo.canonicalize().map_err(|e| {
        anyhow!("Cannot resolve repository path {}: {}", cli.repo.display(), e)
    })?;
    let config = TaskwaveConfig::load(&repo)?;

    match cli.command {
        Command::Plan { tasks } => plan(&tasks, &config),
        Command::Run {
            tasks,
            agent,
            max_parallel,
            dry_run,
            no_merge,
        } => {
            let mut config = config;
            if let Some(agent) = agent {
                config.orchestration.agent_kind = agent;
            }
            if let Some(max_parallel) = max_parallel {
                config.limits.max_slots = max_parallel;
            }
            if dry_run {
                return plan(&tasks, &config);
            }
            run(&repo, config, &tasks, no_merge).await
        }
        Command::Merge {
            branches,
            target,
            session,
        } => {
            let mut config = config;
            if target.is_some() {
                config.merge.target_branch = target;
            }
            merge_only(&repo, config, branches, session).await
        }
    }
}

fn plan(tasks_path: &PathBuf, config: &TaskwaveConfig) -> Result<()> {
    let doc = TaskDocument::load(tasks_path)?;
    let layers = build_layers(&doc.tasks)?;

    println!("Feature: {}", doc.feature);
    for layer in &layers {
        println!("  layer {}: {}", layer.level, layer.task_ids.join(", "));
        for (slot, tasks) in assign_to_slots(layer, config.limits.max_slots)
            .iter()
            .enumerate()
        {
            println!("    slot {}: {}", slot, tasks.join(", "));
        }
    }
    println!("{} task(s) across {} layer(s)", doc.tasks.len(), layers.len());
    Ok(())
}

async fn run(
    repo: &PathBuf,
    config: TaskwaveConfig,
    tasks_path: &PathBuf,
    no_merge: bool,
) -> Result<()> {
    let doc = TaskDocument::load(tasks_path)?;
    let started_at = Utc::now();

    let (bus, mut events) = EventBus::new();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(event);
        }
    });

    let dispatcher = Dispatcher::new(repo, config.clone(), doc, bus.clone())?;
    let session_id = dispatcher.session_id().to_string();
    let store = dispatcher.store().clone();

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("[Main] Interrupt received, cancelling session");
            let _ = cmd_tx.send(SessionCommand::Cancel);
        }
    });

    let outcome = dispatcher.run(&mut cmd_rx).await?;
    println!(
        "Session {} finished: {:?} ({} layer(s))",
        outcome.session_id, outcome.state, outcome.layers_run
    );
    for error in &outcome.errors {
        println!("  error: {}", error);
    }

    let mut errors = outcome.errors.clone();
    let mut merge_outcome = None;
    if outcome.state == DispatcherState::Completed && !no_merge {
        let completed: Vec<TrackedBranch> = outcome
            .branches
            .iter()
            .filter(|b| b.status == BranchStatus::Completed)
            .cloned()
            .collect();
        match run_merge(repo, &config, &session_id, completed, bus.clone(), &mut cmd_rx).await {
            Ok(result) => merge_outcome = Some(result),
            Err(e) => errors.push(format!("merge: {}", e)),
        }
    }

    let record = session_record(&session_id, started_at, &outcome.layers_run, &merge_outcome, errors);
    let history = SessionHistory::new(repo);
    history.append(&record)?;
    bus.emit_session_complete(record);
    if store.path().exists() {
        let _ = history.archive_status_doc(store.path(), &session_id);
    }

    match merge_outcome {
        Some(result) if !result.success => Err(anyhow!(
            "Merge rolled back: {} conflict(s) left unresolved",
            result
                .conflicts
                .iter()
                .filter(|c| c.suggested_resolution.is_none())
                .count()
        )),
        _ if outcome.state == DispatcherState::Failed => Err(anyhow!("Session failed")),
        _ => Ok(()),
    }
}

/// Drive a merge through the engine's review loop. Approvals and resumes
/// arrive on the same command channel that served the dispatch phase; a
/// closed channel means nobody can review, so a paused merge rolls back.
async fn run_merge(
    repo: &PathBuf,
    config: &TaskwaveConfig,
    session_id: &str,
    branches: Vec<TrackedBranch>,
    bus: EventBus,
    commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
) -> Result<MergeOutcome> {
    if branches.is_empty() {
        return Err(anyhow!("No completed branches to merge"));
    }

    let mut engine = MergeEngine::new(
        repo,
        session_id,
        config.merge.target_branch.clone(),
        bus,
    )?;
    for branch in branches {
        engine.track_branch(branch);
    }

    let result = engine.run(commands).await?;
    if result.success {
        println!(
            "Merged {} branch(es) into {}",
            result.merged_branches.len(),
            result.base_branch
        );
    } else {
        println!("Merge rolled back, {} is unchanged", result.base_branch);
        for conflict in &result.conflicts {
            if conflict.suggested_resolution.is_none() {
                println!("  unresolved: {} ({:?})", conflict.file, conflict.conflict_type);
            }
        }
    }
    Ok(result)
}

async fn merge_only(
    repo: &PathBuf,
    config: TaskwaveConfig,
    branches: Vec<String>,
    session: Option<String>,
) -> Result<()> {
    let agent_kind = config
        .orchestration
        .agent_kind
        .parse()
        .map_err(|e: String| anyhow!(e))?;
    let tracked: Vec<TrackedBranch> = branches
        .into_iter()
        .map(|name| TrackedBranch {
            name,
            workspace_path: String::new(),
            agent_kind,
            status: BranchStatus::Completed,
        })
        .collect();

    let session_id = session.unwrap_or_else(taskwave::utils::generate_id);
    let (bus, mut events) = EventBus::new();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(event);
        }
    });

    // No interactive reviewer on this path: a paused merge rolls back
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<SessionCommand>();
    drop(cmd_tx);
    let result = run_merge(repo, &config, &session_id, tracked, bus, &mut cmd_rx).await?;

    if result.success {
        Ok(())
    } else {
        Err(anyhow!("Merge did not complete"))
    }
}

fn session_record(
    session_id: &str,
    started_at: chrono::DateTime<Utc>,
    layers_run: &usize,
    merge_outcome: &Option<MergeOutcome>,
    errors: Vec<String>,
) -> SessionRecord {
    let finished_at = Utc::now();
    let (merged, auto, escalated) = match merge_outcome {
        Some(result) => {
            let auto = result
                .conflicts
                .iter()
                .filter(|c| c.resolution_complexity == ResolutionComplexity::Auto)
                .count();
            let escalated = result.conflicts.len() - auto;
            (result.merged_branches.clone(), auto, escalated)
        }
        None => (Vec::new(), 0, 0),
    };

    SessionRecord {
        session_id: session_id.to_string(),
        started_at,
        finished_at,
        layers_run: *layers_run,
        branches_merged: merged,
        conflicts_auto_resolved: auto,
        conflicts_escalated: escalated,
        duration_secs: (finished_at - started_at).num_seconds(),
        errors,
    }
}

fn print_event(event: OrchestratorEvent) {
    match event {
        OrchestratorEvent::Log(payload) => {
            log::info!("[slot {}] {}", payload.slot_number, payload.line);
        }
        OrchestratorEvent::SlotStatusChanged(payload) => {
            log::info!(
                "[slot {}] {:?} -> {:?}",
                payload.slot_number,
                payload.old_status,
                payload.new_status
            );
        }
        OrchestratorEvent::LayerAdvanced { level } => {
            println!("Advancing to layer {}", level);
        }
        OrchestratorEvent::SlotStalled { slot_number, idle_secs } => {
            println!(
                "Slot {} has made no progress for {}s (still running)",
                slot_number, idle_secs
            );
        }
        OrchestratorEvent::ConflictsNeedingReview(conflicts) => {
            println!("{} conflict(s) need review", conflicts.len());
        }
        OrchestratorEvent::SessionComplete(record) => {
            println!(
                "Session {} complete in {}s",
                record.session_id, record.duration_secs
            );
        }
    }
}
