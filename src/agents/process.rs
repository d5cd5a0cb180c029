// Worker process supervision on a PTY. The worker CLIs are interactive
// tools that refuse plain pipes, so every slot gets a pseudo-terminal.
// Combined output drains to a per-slot log file and onto the event bus.

use anyhow::{anyhow, Context as _, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::agents::output::{scan_line, SignalKind};
use crate::events::EventBus;
use crate::models::{AgentKind, LogLevel};
use crate::utils::lock_mutex_recover;

const ENV_STATUS_DOC: &str = "TASKWAVE_STATUS_DOC";
const ENV_SLOT: &str = "TASKWAVE_SLOT";

/// Everything needed to launch one worker
#[derive(Debug, Clone)]
pub struct WorkerLaunchConfig {
    pub slot_number: u32,
    pub agent_kind: AgentKind,
    pub workspace_path: String,
    pub status_doc_path: String,
    /// Directory for per-slot output logs
    pub log_dir: PathBuf,
    /// Full argv replacing the agent CLI, for stub workers in tests
    pub command_override: Option<Vec<String>>,
}

/// A launched worker. The PTY master stays alive as long as this handle
/// (or a clone of it) exists.
#[derive(Clone)]
pub struct WorkerProcess {
    pub slot_number: u32,
    pub process_id: Option<u32>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    _master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
}

impl WorkerProcess {
    /// Spawn the worker on a fresh PTY and start the output drain thread
    pub fn launch(config: &WorkerLaunchConfig, bus: EventBus) -> Result<Self> {
        let cmd = build_command(config)?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 40,
                cols: 120,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| anyhow!("Failed to open PTY for slot {}: {}", config.slot_number, e))?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| anyhow!("Failed to spawn worker for slot {}: {}", config.slot_number, e))?;
        drop(pair.slave);

        let process_id = child.process_id();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| anyhow!("Failed to clone PTY reader: {}", e))?;

        std::fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("Failed to create {}", config.log_dir.display()))?;
        let log_path = config.log_dir.join(format!("slot-{}.log", config.slot_number));
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open {}", log_path.display()))?;

        let slot_number = config.slot_number;
        std::thread::spawn(move || drain_output(reader, log_file, slot_number, bus));

        log::info!(
            "[Agents] Launched slot {} worker (pid {:?})",
            config.slot_number,
            process_id
        );

        Ok(Self {
            slot_number: config.slot_number,
            process_id,
            child: Arc::new(Mutex::new(child)),
            _master: Arc::new(Mutex::new(pair.master)),
        })
    }

    /// Block until the worker exits and return its exit code. Call from a
    /// blocking-capable context.
    pub fn wait(&self) -> Result<i32> {
        let mut child = lock_mutex_recover(&self.child);
        let status = child
            .wait()
            .map_err(|e| anyhow!("Failed to wait for slot {} worker: {}", self.slot_number, e))?;
        Ok(status.exit_code() as i32)
    }

    /// Exit code if the worker has already exited, None if still running
    pub fn try_wait(&self) -> Result<Option<i32>> {
        let mut child = lock_mutex_recover(&self.child);
        let status = child
            .try_wait()
            .map_err(|e| anyhow!("Failed to poll slot {} worker: {}", self.slot_number, e))?;
        Ok(status.map(|s| s.exit_code() as i32))
    }

    pub fn kill(&self) -> Result<()> {
        let mut child = lock_mutex_recover(&self.child);
        child
            .kill()
            .map_err(|e| anyhow!("Failed to kill slot {} worker: {}", self.slot_number, e))?;
        log::info!("[Agents] Killed slot {} worker", self.slot_number);
        Ok(())
    }
}

/// Drain the PTY until EOF, writing lines to the slot log and the bus
fn drain_output(
    mut reader: Box<dyn Read + Send>,
    mut log_file: std::fs::File,
    slot_number: u32,
    bus: EventBus,
) {
    let mut buf = [0u8; 4096];
    let mut pending = String::new();

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                pending.push_str(&String::from_utf8_lossy(&buf[..n]));

                while let Some(newline) = pending.find('\n') {
                    let line: String = pending.drain(..=newline).collect();
                    let line = line.trim_end_matches(['\n', '\r']);
                    if line.is_empty() {
                        continue;
                    }

                    let _ = writeln!(log_file, "{}", line);

                    let level = match scan_line(line).map(|s| s.kind) {
                        Some(SignalKind::ErrorReported) => LogLevel::Error,
                        Some(SignalKind::RateLimited) => LogLevel::Warn,
                        _ => LogLevel::Info,
                    };
                    bus.emit_log(slot_number, level, line);
                }
            }
            Err(e) => {
                log::warn!("[Agents] PTY read error for slot {}: {}", slot_number, e);
                break;
            }
        }
    }

    // Flush any unterminated final line
    let remainder = pending.trim();
    if !remainder.is_empty() {
        let _ = writeln!(log_file, "{}", remainder);
        bus.emit_log(slot_number, LogLevel::Info, remainder);
    }

    log::debug!("[Agents] PTY EOF for slot {}", slot_number);
}

/// Build the worker command for the slot's agent CLI
fn build_command(config: &WorkerLaunchConfig) -> Result<CommandBuilder> {
    let mut cmd = if let Some(argv) = &config.command_override {
        let program = argv
            .first()
            .ok_or_else(|| anyhow!("Empty command override for slot {}", config.slot_number))?;
        let mut cmd = CommandBuilder::new(program);
        cmd.args(&argv[1..]);
        cmd
    } else {
        let exe = which::which(config.agent_kind.executable()).map_err(|e| {
            anyhow!(
                "Worker executable '{}' not found on PATH: {}",
                config.agent_kind.executable(),
                e
            )
        })?;

        let brief_path = PathBuf::from(&config.workspace_path).join("BRIEF.md");
        let prompt = std::fs::read_to_string(&brief_path)
            .with_context(|| format!("Failed to read {}", brief_path.display()))?;

        let mut cmd = CommandBuilder::new(exe);
        match config.agent_kind {
            AgentKind::Claude => {
                cmd.arg(&prompt);
            }
            AgentKind::Opencode => {
                cmd.arg("run");
                cmd.arg(&prompt);
            }
            AgentKind::Cursor => {
                cmd.arg("--prompt");
                cmd.arg(&prompt);
            }
            AgentKind::Codex => {
                cmd.arg("exec");
                cmd.arg(&prompt);
            }
        }
        cmd
    };

    cmd.cwd(&config.workspace_path);
    cmd.env(ENV_STATUS_DOC, &config.status_doc_path);
    cmd.env(ENV_SLOT, config.slot_number.to_string());
    Ok(cmd)
}
