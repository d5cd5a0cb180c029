// Status monitor: polls the status document on a fixed interval, diffs
// against the last-seen snapshot, and emits discrete transition events.
// The event stream is monotonic: a task that regresses from `complete` is
// logged as a data anomaly, never un-completed.

use crate::models::{StatusDocument, TaskStatus};
use crate::statusdoc::StatusStore;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;

/// Transition events derived from status document diffs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    TaskCompleted(String),
    LayerCompleted(usize),
    AllCompleted,
}

/// Poll-based monitor over one status document
pub struct StatusMonitor {
    store: StatusStore,
    poll_interval: Duration,
    /// Last status seen per task, for diffing
    last_seen: HashMap<String, TaskStatus>,
    /// Tasks for which TaskCompleted has been emitted (monotonic)
    completed: HashSet<String>,
    /// Layers for which LayerCompleted has been emitted
    layers_emitted: HashSet<usize>,
    all_emitted: bool,
}

impl StatusMonitor {
    pub fn new(store: StatusStore, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
            last_seen: HashMap::new(),
            completed: HashSet::new(),
            layers_emitted: HashSet::new(),
            all_emitted: false,
        }
    }

    /// Task ids the monitor has observed as complete so far
    pub fn completed_tasks(&self) -> &HashSet<String> {
        &self.completed
    }

    /// One poll cycle: read the latest document and return the events to
    /// emit. A missing or malformed file is treated as "no change".
    /// Re-reading an unchanged document returns no events.
    pub fn poll_once(&mut self) -> Vec<MonitorEvent> {
        let doc = match self.store.load() {
            Ok(doc) => doc,
            Err(e) => {
                log::warn!("[StatusMonitor] Skipping poll, document unreadable: {}", e);
                return Vec::new();
            }
        };
        self.diff(&doc)
    }

    /// Diff one snapshot against accumulated state. Always compares against
    /// the authoritative latest document content, never stale per-task
    /// caches, so interleaved worker writes are tolerated.
    pub fn diff(&mut self, doc: &StatusDocument) -> Vec<MonitorEvent> {
        let mut events = Vec::new();

        for (task_id, state) in &doc.tasks {
            let previous = self.last_seen.get(task_id).copied();

            if state.status == TaskStatus::Complete {
                if self.completed.insert(task_id.clone()) {
                    events.push(MonitorEvent::TaskCompleted(task_id.clone()));
                }
            } else if self.completed.contains(task_id) {
                // Regression from complete: anomaly, keep the emitted event
                log::warn!(
                    "[StatusMonitor] Task {} regressed from complete to {:?}, ignoring",
                    task_id,
                    state.status
                );
            }

            if previous != Some(state.status) {
                self.last_seen.insert(task_id.clone(), state.status);
            }
        }

        // Layer completion by set intersection against the layer's ids, not
        // by count, so out-of-order completion is tolerated.
        for layer in &doc.layers {
            if self.layers_emitted.contains(&layer.level) {
                continue;
            }
            let done = layer
                .task_ids
                .iter()
                .all(|id| self.completed.contains(id));
            if done && !layer.task_ids.is_empty() {
                self.layers_emitted.insert(layer.level);
                events.push(MonitorEvent::LayerCompleted(layer.level));
            }
        }

        if !self.all_emitted {
            let all_done = doc
                .layers
                .iter()
                .flat_map(|l| l.task_ids.iter())
                .all(|id| self.completed.contains(id));
            if all_done && !doc.layers.is_empty() {
                self.all_emitted = true;
                events.push(MonitorEvent::AllCompleted);
            }
        }

        events
    }

    /// Run the poll loop, forwarding events until AllCompleted has been
    /// emitted or the receiver goes away. Never exits on a bad read.
    pub async fn run(mut self, tx: mpsc::UnboundedSender<MonitorEvent>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            for event in self.poll_once() {
                if tx.send(event).is_err() {
                    log::debug!("[StatusMonitor] Receiver dropped, stopping");
                    return;
                }
            }

            if self.all_emitted {
                log::info!("[StatusMonitor] All tasks complete, stopping poll loop");
                return;
            }
        }
    }
}
