// Session history: append-only JSONL record of completed orchestration
// runs, plus archival of finished status documents. The appender takes an
// exclusive advisory lock so overlapping sessions cannot interleave lines.

use anyhow::{anyhow, Context as _, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::SessionRecord;

pub const HISTORY_FILE_NAME: &str = "history.jsonl";

pub struct SessionHistory {
    history_path: PathBuf,
    archive_dir: PathBuf,
}

impl SessionHistory {
    pub fn new(repo_path: impl AsRef<Path>) -> Self {
        let base = repo_path.as_ref().join(".taskwave");
        Self {
            history_path: base.join(HISTORY_FILE_NAME),
            archive_dir: base.join("archive"),
        }
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    /// Append one session record as a JSONL line
    pub fn append(&self, record: &SessionRecord) -> Result<()> {
        if let Some(parent) = self.history_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)
            .with_context(|| format!("Failed to open {}", self.history_path.display()))?;

        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", self.history_path.display()))?;

        let result = self.write_record(&file, record);
        let _ = FileExt::unlock(&file);
        result?;

        log::info!(
            "[Session] Recorded session {} ({} branch(es) merged)",
            record.session_id,
            record.branches_merged.len()
        );
        Ok(())
    }

    fn write_record(&self, mut file: &File, record: &SessionRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    /// All recorded sessions in append order. Malformed lines are skipped
    /// with a warning, never a failure.
    pub fn load_all(&self) -> Result<Vec<SessionRecord>> {
        if !self.history_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.history_path)
            .with_context(|| format!("Failed to read {}", self.history_path.display()))?;

        let mut records = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    log::warn!("[Session] Skipping malformed history line {}: {}", number + 1, e);
                }
            }
        }
        Ok(records)
    }

    pub fn last(&self) -> Result<Option<SessionRecord>> {
        Ok(self.load_all()?.pop())
    }

    /// Move a finished status document into the archive directory
    pub fn archive_status_doc(&self, status_doc_path: &Path, session_id: &str) -> Result<PathBuf> {
        if !status_doc_path.exists() {
            return Err(anyhow!(
                "Status document not found: {}",
                status_doc_path.display()
            ));
        }

        fs::create_dir_all(&self.archive_dir)
            .with_context(|| format!("Failed to create {}", self.archive_dir.display()))?;

        let archived = self.archive_dir.join(format!("status-{}.json", session_id));
        fs::rename(status_doc_path, &archived).or_else(|_| {
            // Rename fails across filesystems; fall back to copy + remove
            fs::copy(status_doc_path, &archived)?;
            fs::remove_file(status_doc_path)
        })?;

        log::info!("[Session] Archived status document to {}", archived.display());
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(session_id: &str) -> SessionRecord {
        SessionRecord {
            session_id: session_id.to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            layers_run: 2,
            branches_merged: vec!["agent/slot-0".to_string()],
            conflicts_auto_resolved: 1,
            conflicts_escalated: 0,
            duration_secs: 42,
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_append_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let history = SessionHistory::new(dir.path());

        history.append(&record("s1")).unwrap();
        history.append(&record("s2")).unwrap();

        let records = history.load_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].session_id, "s1");
        assert_eq!(records[1].session_id, "s2");
        assert_eq!(history.last().unwrap().unwrap().session_id, "s2");
    }

    #[test]
    fn test_empty_history_loads_empty() {
        let dir = TempDir::new().unwrap();
        let history = SessionHistory::new(dir.path());
        assert!(history.load_all().unwrap().is_empty());
        assert!(history.last().unwrap().is_none());
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let history = SessionHistory::new(dir.path());
        history.append(&record("good")).unwrap();

        // Corrupt the file with a non-JSON line
        let mut content = fs::read_to_string(history.history_path()).unwrap();
        content.push_str("this is not json\n");
        fs::write(history.history_path(), content).unwrap();
        history.append(&record("after")).unwrap();

        let records = history.load_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].session_id, "after");
    }

    #[test]
    fn test_archive_moves_status_doc() {
        let dir = TempDir::new().unwrap();
        let history = SessionHistory::new(dir.path());

        let doc_path = dir.path().join("status.json");
        fs::write(&doc_path, "{}").unwrap();

        let archived = history.archive_status_doc(&doc_path, "s1").unwrap();
        assert!(!doc_path.exists());
        assert!(archived.ends_with("status-s1.json"));
        assert!(archived.exists());
    }

    #[test]
    fn test_archive_missing_doc_errors() {
        let dir = TempDir::new().unwrap();
        let history = SessionHistory::new(dir.path());
        assert!(history
            .archive_status_doc(&dir.path().join("nope.json"), "s1")
            .is_err());
    }
}
