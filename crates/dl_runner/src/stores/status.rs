use std::fs;
use std::path::Path;

use tracing::warn;
use uuid::Uuid;

use crate::config::TaskPaths;
use crate::error::StoreError;
use crate::models::types::{TaskRecord, TaskState, TaskUpdate};

/// Durable task state: one JSON file per task under the status directory.
/// Files are the source of truth; nothing task-related is kept in memory.
#[derive(Debug, Clone)]
pub struct StatusStore {
    paths: TaskPaths,
}

impl StatusStore {
    pub fn new(paths: TaskPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &TaskPaths {
        &self.paths
    }

    /// Writes a full record, atomically.
    pub fn create(&self, record: &TaskRecord) -> Result<(), StoreError> {
        self.write_record(record)
    }

    /// Read-modify-write merge. A missing or unreadable file is treated as an
    /// empty record so late updates (e.g. a failure written after a delete)
    /// never error out of the pipeline.
    pub fn update(&self, id: Uuid, update: TaskUpdate) -> Result<(), StoreError> {
        let mut record = match self.read(id) {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) | Err(StoreError::InvalidRecord(_)) => {
                TaskRecord::empty(id)
            }
            Err(e) => return Err(e),
        };
        update.apply(&mut record);
        self.write_record(&record)
    }

    pub fn read(&self, id: Uuid) -> Result<TaskRecord, StoreError> {
        let path = self.paths.status_file(id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw).map_err(|_| StoreError::InvalidRecord(id))
    }

    /// All parseable records, newest first. Corrupt files are logged and
    /// skipped so one bad record cannot take down the listing.
    pub fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let mut records = Vec::new();
        let entries = match fs::read_dir(self.paths.status_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            match serde_json::from_str::<TaskRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping unparseable status file");
                }
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Removes the record, logs, download directory, and archives. Returns
    /// whether anything existed. Safe to call repeatedly.
    pub fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut removed = false;
        for path in [
            self.paths.status_file(id),
            self.paths.download_log(id),
            self.paths.upload_log(id),
            self.paths.oauth_log(id),
        ] {
            removed |= remove_file_if_exists(&path)?;
        }

        let download_dir = self.paths.download_dir(id);
        if download_dir.is_dir() {
            fs::remove_dir_all(&download_dir)?;
            removed = true;
        }

        removed |= self.remove_archives(id)?;
        Ok(removed)
    }

    /// Deletes every `archive_<id>*.tar.zst` volume for the task.
    pub fn remove_archives(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut removed = false;
        let prefix = format!("archive_{id}");
        let entries = match fs::read_dir(self.paths.archives_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) {
                removed |= remove_file_if_exists(&entry.path())?;
            }
        }
        Ok(removed)
    }

    /// Records persisted in an executing state. Used for the status endpoint
    /// and the startup reconciliation in `main`.
    pub fn active_count(&self) -> Result<usize, StoreError> {
        Ok(self
            .list()?
            .iter()
            .filter(|r| r.status.is_executing())
            .count())
    }

    fn write_record(&self, record: &TaskRecord) -> Result<(), StoreError> {
        fs::create_dir_all(self.paths.status_dir())?;
        let path = self.paths.status_file(record.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(record)
            .map_err(|_| StoreError::InvalidRecord(record.id))?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn remove_file_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Marks executing records as failed. Run once at startup; a fresh process
/// cannot own any of the pids those records refer to.
pub fn reconcile_orphans(store: &StatusStore) -> Result<usize, StoreError> {
    let mut reconciled = 0;
    for record in store.list()? {
        if record.status.is_executing() {
            store.update(
                record.id,
                TaskUpdate {
                    status: Some(TaskState::Failed),
                    pid: Some(None),
                    previous_status: Some(None),
                    error: Some("Task orphaned by service restart".into()),
                    ..Default::default()
                },
            )?;
            reconciled += 1;
        }
    }
    Ok(reconciled)
}
