// Task document loading and validation

use crate::models::Task;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// The input specification: a feature name plus the task list with
/// dependency edges. Consumed once by the scheduler to build layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDocument {
    pub feature: String,
    pub tasks: Vec<Task>,
}

/// Errors from loading or validating a task document
#[derive(Debug, thiserror::Error)]
pub enum TaskDocError {
    #[error("failed to read task document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed task document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("task document contains no tasks")]
    Empty,
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },
    #[error("task '{0}' depends on itself")]
    SelfDependency(String),
}

impl TaskDocument {
    /// Load a task document from a JSON file and validate it
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TaskDocError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| TaskDocError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        let doc: TaskDocument = serde_json::from_str(&content)?;
        doc.validate()?;
        Ok(doc)
    }

    /// Validate id uniqueness and dependency references
    pub fn validate(&self) -> Result<(), TaskDocError> {
        if self.tasks.is_empty() {
            return Err(TaskDocError::Empty);
        }

        let mut ids = HashSet::new();
        for task in &self.tasks {
            if !ids.insert(task.id.as_str()) {
                return Err(TaskDocError::DuplicateTask(task.id.clone()));
            }
        }

        for task in &self.tasks {
            for dep in &task.depends_on {
                if dep == &task.id {
                    return Err(TaskDocError::SelfDependency(task.id.clone()));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(TaskDocError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Subset of the document containing only the given task ids, preserving
    /// document order. Written into each slot's workspace before launch.
    pub fn filtered(&self, task_ids: &[String]) -> TaskDocument {
        let wanted: HashSet<&str> = task_ids.iter().map(|s| s.as_str()).collect();
        TaskDocument {
            feature: self.feature.clone(),
            tasks: self
                .tasks
                .iter()
                .filter(|t| wanted.contains(t.id.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}
