// Event types and the channel bus the core exposes to the outside
// (the dashboard and any other consumer live behind this seam)

use crate::merge::Conflict;
use crate::models::{LogLevel, SessionRecord, Slot, SlotStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Payload for per-slot log lines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPayload {
    pub slot_number: u32,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub line: String,
}

/// Payload for slot status transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatusChangedPayload {
    pub slot_number: u32,
    pub old_status: SlotStatus,
    pub new_status: SlotStatus,
    pub branch_name: String,
}

/// Events the core emits. Consumers receive them over an unbounded channel;
/// a dropped receiver never unwinds the dispatcher (sends are best effort).
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    Log(LogPayload),
    SlotStatusChanged(SlotStatusChangedPayload),
    LayerAdvanced { level: usize },
    /// A running slot produced no status-document change for the configured
    /// threshold. Distinct from failure and not auto-fatal.
    SlotStalled { slot_number: u32, idle_secs: u64 },
    ConflictsNeedingReview(Vec<Conflict>),
    SessionComplete(SessionRecord),
}

/// Commands the core accepts back from the outside
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Cancel,
    /// Re-enter merging after manual conflict resolution
    Resume,
    /// Approve a reviewed resolution for one conflicted file
    ApproveResolution { file: String, content: String },
}

/// Thin wrapper around the event channel with typed emit helpers
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OrchestratorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: OrchestratorEvent) {
        let _ = self.tx.send(event); // Best effort
    }

    pub fn emit_log(&self, slot_number: u32, level: LogLevel, line: impl Into<String>) {
        self.emit(OrchestratorEvent::Log(LogPayload {
            slot_number,
            timestamp: Utc::now(),
            level,
            line: line.into(),
        }));
    }

    pub fn emit_slot_status_changed(&self, slot: &Slot, old_status: SlotStatus) {
        self.emit(OrchestratorEvent::SlotStatusChanged(
            SlotStatusChangedPayload {
                slot_number: slot.slot_number,
                old_status,
                new_status: slot.launch_status,
                branch_name: slot.branch_name.clone(),
            },
        ));
    }

    pub fn emit_layer_advanced(&self, level: usize) {
        self.emit(OrchestratorEvent::LayerAdvanced { level });
    }

    pub fn emit_slot_stalled(&self, slot_number: u32, idle_secs: u64) {
        self.emit(OrchestratorEvent::SlotStalled {
            slot_number,
            idle_secs,
        });
    }

    pub fn emit_conflicts_needing_review(&self, conflicts: Vec<Conflict>) {
        self.emit(OrchestratorEvent::ConflictsNeedingReview(conflicts));
    }

    pub fn emit_session_complete(&self, record: SessionRecord) {
        self.emit(OrchestratorEvent::SessionComplete(record));
    }
}
