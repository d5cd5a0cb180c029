// Dependency-layer scheduler: turns the task list into parallel waves

use crate::models::{DependencyLayer, Task};
use std::collections::{HashMap, HashSet};

/// Errors from layer construction
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },
    /// The remaining tasks form at least one cycle. No layers are produced:
    /// forcing the leftovers into a final layer would hide a real error in
    /// the task document.
    #[error("dependency cycle detected among tasks: {}", remaining.join(", "))]
    CycleDetected { remaining: Vec<String> },
}

/// Build the ordered layer sequence. Every dependency of a task is placed in
/// a strictly earlier layer; the layers partition the task set exactly once.
/// O(T*D) per pass, fine for task counts in the low hundreds.
pub fn build_layers(tasks: &[Task]) -> Result<Vec<DependencyLayer>, ScheduleError> {
    let mut by_id: HashMap<&str, &Task> = HashMap::new();
    for task in tasks {
        if by_id.insert(task.id.as_str(), task).is_some() {
            return Err(ScheduleError::DuplicateTask(task.id.clone()));
        }
    }

    for task in tasks {
        for dep in &task.depends_on {
            if !by_id.contains_key(dep.as_str()) {
                return Err(ScheduleError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let mut placed: HashSet<&str> = HashSet::new();
    let mut layers: Vec<DependencyLayer> = Vec::new();

    while placed.len() < tasks.len() {
        let mut wave: Vec<&Task> = tasks
            .iter()
            .filter(|t| !placed.contains(t.id.as_str()))
            .filter(|t| t.depends_on.iter().all(|d| placed.contains(d.as_str())))
            .collect();

        if wave.is_empty() {
            let remaining: Vec<String> = tasks
                .iter()
                .filter(|t| !placed.contains(t.id.as_str()))
                .map(|t| t.id.clone())
                .collect();
            log::error!(
                "[Scheduler] Cycle detected, {} task(s) unplaceable",
                remaining.len()
            );
            return Err(ScheduleError::CycleDetected { remaining });
        }

        // Deterministic order inside a wave: priority first, then id
        wave.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));

        for task in &wave {
            placed.insert(task.id.as_str());
        }

        layers.push(DependencyLayer {
            level: layers.len(),
            task_ids: wave.iter().map(|t| t.id.clone()).collect(),
        });
    }

    log::info!(
        "[Scheduler] Built {} layer(s) for {} task(s)",
        layers.len(),
        tasks.len()
    );
    Ok(layers)
}

/// Round-robin assignment of a layer's tasks across `max_parallel` slots.
/// Returns one task-id list per slot, empty lists omitted.
pub fn assign_to_slots(layer: &DependencyLayer, max_parallel: usize) -> Vec<Vec<String>> {
    let slots = max_parallel.max(1).min(layer.task_ids.len().max(1));
    let mut assignments: Vec<Vec<String>> = vec![Vec::new(); slots];

    for (idx, task_id) in layer.task_ids.iter().enumerate() {
        assignments[idx % slots].push(task_id.clone());
    }

    assignments.retain(|a| !a.is_empty());
    assignments
}
