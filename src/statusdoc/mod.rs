// Status document store: the single shared file coordinating orchestrator
// and workers. All writes rewrite the whole document (temp file + rename);
// the file itself carries no lock so workers stay trivial, language-agnostic
// participants.

pub mod monitor;

pub use monitor::{MonitorEvent, StatusMonitor};

use crate::models::{DependencyLayer, StatusDocument, TaskState, TaskStatus};
use crate::utils::generate_id;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Errors from status document IO
#[derive(Debug, thiserror::Error)]
pub enum StatusDocError {
    #[error("failed to access status document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed status document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown task id in status document update: {0}")]
    UnknownTask(String),
}

/// Handle on the status document file
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create and seed the document for a new session. Tasks in layer 0
    /// start `ready`, everything else starts `blocked`.
    pub fn create(
        &self,
        session_id: &str,
        layers: Vec<DependencyLayer>,
    ) -> Result<StatusDocument, StatusDocError> {
        let now = Utc::now();
        let mut tasks = std::collections::HashMap::new();

        for layer in &layers {
            let status = if layer.level == 0 {
                TaskStatus::Ready
            } else {
                TaskStatus::Blocked
            };
            for id in &layer.task_ids {
                tasks.insert(id.clone(), TaskState::new(status));
            }
        }

        let doc = StatusDocument {
            session_id: session_id.to_string(),
            created_at: now,
            updated_at: now,
            current_layer: 0,
            layers,
            tasks,
        };

        self.save(&doc)?;
        log::info!(
            "[StatusStore] Seeded status document for session {} at {}",
            session_id,
            self.path.display()
        );
        Ok(doc)
    }

    /// Read the whole document. Every read is a best-effort snapshot.
    pub fn load(&self) -> Result<StatusDocument, StatusDocError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| StatusDocError::Io {
            path: self.path.display().to_string(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the whole document atomically: serialize to a sibling temp file
    /// and rename into place, so readers never observe a torn write. The
    /// temp name is unique per write; concurrent writers (orchestrator and
    /// workers are separate processes) must never share one.
    pub fn save(&self, doc: &StatusDocument) -> Result<(), StatusDocError> {
        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension(format!("tmp-{}", generate_id()));

        let io_err = |e: std::io::Error| StatusDocError::Io {
            path: self.path.display().to_string(),
            source: e,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            io_err(e)
        })?;
        Ok(())
    }

    /// Read-modify-write of a single task's state. This is the worker-side
    /// protocol; the closure sees the current state and mutates it in place.
    pub fn update_task<F>(&self, task_id: &str, mutate: F) -> Result<StatusDocument, StatusDocError>
    where
        F: FnOnce(&mut TaskState),
    {
        let mut doc = self.load()?;
        let state = doc
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StatusDocError::UnknownTask(task_id.to_string()))?;
        mutate(state);
        let now = Utc::now();
        state.updated_at = Some(now);
        doc.updated_at = now;
        self.save(&doc)?;
        Ok(doc)
    }

    /// Advance the current layer pointer (orchestrator-side only)
    pub fn advance_layer(&self, level: usize) -> Result<StatusDocument, StatusDocError> {
        let mut doc = self.load()?;
        doc.current_layer = level;
        doc.updated_at = Utc::now();

        // Unblock the tasks of the newly active layer
        if let Some(layer) = doc.layers.iter().find(|l| l.level == level) {
            let ids = layer.task_ids.clone();
            for id in ids {
                if let Some(state) = doc.tasks.get_mut(&id) {
                    if state.status == TaskStatus::Blocked {
                        state.status = TaskStatus::Ready;
                    }
                }
            }
        }

        self.save(&doc)?;
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layers() -> Vec<DependencyLayer> {
        vec![
            DependencyLayer {
                level: 0,
                task_ids: vec!["a".into(), "b".into()],
            },
            DependencyLayer {
                level: 1,
                task_ids: vec!["c".into()],
            },
        ]
    }

    #[test]
    fn test_create_seeds_ready_and_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("status.json"));

        let doc = store.create("s1", layers()).unwrap();
        assert_eq!(doc.tasks["a"].status, TaskStatus::Ready);
        assert_eq!(doc.tasks["b"].status, TaskStatus::Ready);
        assert_eq!(doc.tasks["c"].status, TaskStatus::Blocked);
        assert_eq!(doc.current_layer, 0);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("status.json"));

        store.create("s1", layers()).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.session_id, "s1");
        assert_eq!(loaded.layers.len(), 2);
    }

    #[test]
    fn test_update_task_read_modify_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("status.json"));
        store.create("s1", layers()).unwrap();

        store
            .update_task("a", |state| {
                state.status = TaskStatus::Complete;
                state.completed_at = Some(Utc::now());
            })
            .unwrap();

        let doc = store.load().unwrap();
        assert_eq!(doc.tasks["a"].status, TaskStatus::Complete);
        assert!(doc.tasks["a"].completed_at.is_some());
        // Untouched entries survive the rewrite
        assert_eq!(doc.tasks["b"].status, TaskStatus::Ready);
    }

    #[test]
    fn test_update_task_stamps_only_that_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("status.json"));
        let doc = store.create("s1", layers()).unwrap();
        assert!(doc.tasks["a"].updated_at.is_none());

        let doc = store
            .update_task("a", |state| state.status = TaskStatus::InProgress)
            .unwrap();
        assert!(doc.tasks["a"].updated_at.is_some());
        assert!(doc.tasks["b"].updated_at.is_none());
    }

    #[test]
    fn test_update_unknown_task_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("status.json"));
        store.create("s1", layers()).unwrap();

        let err = store.update_task("ghost", |_| {}).unwrap_err();
        assert!(matches!(err, StatusDocError::UnknownTask(_)));
    }

    #[test]
    fn test_advance_layer_unblocks_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("status.json"));
        store.create("s1", layers()).unwrap();

        let doc = store.advance_layer(1).unwrap();
        assert_eq!(doc.current_layer, 1);
        assert_eq!(doc.tasks["c"].status, TaskStatus::Ready);
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let store = StatusStore::new(&path);
        store.create("s1", layers()).unwrap();
        store
            .update_task("a", |state| state.status = TaskStatus::InProgress)
            .unwrap();

        assert!(path.exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name != "status.json")
            .collect();
        assert!(leftovers.is_empty(), "stray files: {:?}", leftovers);
    }

    #[test]
    fn test_concurrent_writers_never_tear_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("status.json"));
        store.create("s1", layers()).unwrap();

        // Each writer gets its own temp file, so interleaved saves may
        // lose an update but must never fail or corrupt the document
        let handles: Vec<_> = ["a", "b"]
            .iter()
            .map(|id| {
                let store = store.clone();
                let id = id.to_string();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store
                            .update_task(&id, |state| {
                                state.status = TaskStatus::InProgress;
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let doc = store.load().unwrap();
        assert_eq!(doc.tasks.len(), 3);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let store = StatusStore::new("/nonexistent/status.json");
        assert!(matches!(store.load(), Err(StatusDocError::Io { .. })));
    }
}
