use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{StoreError, TaskError};
use crate::models::types::{
    ControlOutcome, TaskAction, TaskDetail, TaskParams, TaskRecord, TaskState, TaskUpdate,
};
use crate::services::pipeline::JobPipeline;
use crate::services::progress;
use crate::stores::registry::{ProcessRegistry, TaskSignal};
use crate::stores::status::StatusStore;

/// Control surface over the stores and the pipeline: submission, listing,
/// detail reads, and the pause/resume/retry/cancel actions.
pub struct TaskManager {
    store: Arc<StatusStore>,
    registry: Arc<ProcessRegistry>,
    pipeline: Arc<JobPipeline>,
}

impl TaskManager {
    pub fn new(
        store: Arc<StatusStore>,
        registry: Arc<ProcessRegistry>,
        pipeline: Arc<JobPipeline>,
    ) -> Self {
        Self {
            store,
            registry,
            pipeline,
        }
    }

    /// Validates a submission and persists one queued record per URL.
    /// Records exist on disk before any pipeline starts.
    pub fn create_tasks(&self, params: &TaskParams) -> Result<Vec<(Uuid, TaskParams)>, TaskError> {
        let urls: Vec<&str> = params
            .url
            .lines()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(TaskError::Validation("At least one URL is required".into()));
        }
        if params.upload_service.is_empty() {
            return Err(TaskError::Validation("Upload service is required".into()));
        }
        // gofile derives the destination from token and folder id.
        let has_path = params
            .upload_path
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty());
        if params.upload_service != "gofile" && !has_path {
            return Err(TaskError::Validation(
                "Upload path is required for this service".into(),
            ));
        }

        let mut tasks = Vec::with_capacity(urls.len());
        for url in urls {
            let id = Uuid::new_v4();
            let mut task_params = params.clone();
            task_params.url = url.to_string();
            self.store.create(&TaskRecord::new(id, &task_params))?;
            info!(task_id = %id, url, "Task queued");
            tasks.push((id, task_params));
        }
        Ok(tasks)
    }

    /// Validates, persists, and launches. Returns the new task ids.
    pub fn submit(&self, params: TaskParams) -> Result<Vec<Uuid>, TaskError> {
        let tasks = self.create_tasks(&params)?;
        let ids = tasks.iter().map(|(id, _)| *id).collect();
        for (id, task_params) in tasks {
            self.pipeline.spawn(id, task_params);
        }
        Ok(ids)
    }

    pub fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.store.list()
    }

    pub fn get(&self, id: Uuid) -> Result<TaskDetail, StoreError> {
        let record = self.store.read(id)?;
        let paths = self.store.paths();
        let download_log = std::fs::read_to_string(paths.download_log(id)).unwrap_or_default();
        let upload_log = std::fs::read_to_string(paths.upload_log(id)).unwrap_or_default();
        let oauth_log = std::fs::read_to_string(paths.oauth_log(id)).unwrap_or_default();
        let progress = progress::parse_upload_log(&upload_log);
        Ok(TaskDetail {
            record,
            download_log,
            upload_log,
            oauth_log,
            progress,
        })
    }

    pub fn control(&self, id: Uuid, action: TaskAction) -> ControlOutcome {
        let record = match self.store.read(id) {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => return ControlOutcome::failed("Task not found"),
            Err(StoreError::InvalidRecord(_)) => {
                return ControlOutcome::failed("Invalid status file")
            }
            Err(e) => return ControlOutcome::failed(e.to_string()),
        };

        match action {
            TaskAction::Pause => self.pause(&record),
            TaskAction::Resume => self.resume(&record),
            TaskAction::Cancel => self.cancel(&record),
            TaskAction::Retry => self.retry(&record),
        }
    }

    fn pause(&self, record: &TaskRecord) -> ControlOutcome {
        if !self.registry.signal(record.id, TaskSignal::Pause) {
            warn!(task_id = %record.id, "Pause requested but no live process");
            return ControlOutcome::failed("No running process to pause");
        }
        let result = self.store.update(
            record.id,
            TaskUpdate {
                status: Some(TaskState::Paused),
                previous_status: Some(Some(record.status)),
                ..Default::default()
            },
        );
        match result {
            Ok(()) => ControlOutcome::ok(),
            Err(e) => ControlOutcome::failed(e.to_string()),
        }
    }

    fn resume(&self, record: &TaskRecord) -> ControlOutcome {
        if !self.registry.signal(record.id, TaskSignal::Resume) {
            warn!(task_id = %record.id, "Resume requested but no live process");
            return ControlOutcome::failed("No paused process to resume");
        }
        let restored = record.previous_status.unwrap_or(TaskState::Running);
        let result = self.store.update(
            record.id,
            TaskUpdate {
                status: Some(restored),
                previous_status: Some(None),
                ..Default::default()
            },
        );
        match result {
            Ok(()) => ControlOutcome::ok(),
            Err(e) => ControlOutcome::failed(e.to_string()),
        }
    }

    /// Kills the whole process group. A registry miss leaves the record
    /// untouched. The cancel reason is written before the signal goes out so
    /// the pipeline's failure handler sees it when the killed step unwinds.
    fn cancel(&self, record: &TaskRecord) -> ControlOutcome {
        if self.registry.get(record.id).is_none() {
            warn!(task_id = %record.id, "Cancel requested but no live process");
            return ControlOutcome::failed("No running process to cancel");
        }
        let result = self.store.update(
            record.id,
            TaskUpdate {
                status: Some(TaskState::Failed),
                pid: Some(None),
                previous_status: Some(None),
                error: Some("Task cancelled by user".into()),
                ..Default::default()
            },
        );
        if let Err(e) = result {
            return ControlOutcome::failed(e.to_string());
        }
        self.registry.signal(record.id, TaskSignal::Kill);
        ControlOutcome::ok()
    }

    /// Re-runs the stored submission parameters as a brand new task. The
    /// source record keeps its terminal state.
    fn retry(&self, record: &TaskRecord) -> ControlOutcome {
        let Some(params) = record.original_params.clone() else {
            return ControlOutcome::failed("Task has no stored parameters to retry");
        };

        let new_id = Uuid::new_v4();
        let mut new_record = TaskRecord::new(new_id, &params);
        new_record.retry_of = Some(record.id);
        if let Err(e) = self.store.create(&new_record) {
            return ControlOutcome::failed(e.to_string());
        }

        info!(task_id = %new_id, retry_of = %record.id, "Retrying task");
        self.pipeline.spawn(new_id, params);
        ControlOutcome {
            success: true,
            new_task_id: Some(new_id),
            message: None,
        }
    }

    /// Removes the record and every artifact. Returns whether anything
    /// existed.
    pub fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        self.store.delete(id)
    }

    /// Live child process count, paused groups included.
    pub fn active_processes(&self) -> usize {
        self.registry.count()
    }

    /// Records persisted in an executing state.
    pub fn active_records(&self) -> Result<usize, StoreError> {
        self.store.active_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, TaskPaths};
    use crate::services::command::CommandRunner;

    fn fixture() -> (tempfile::TempDir, TaskManager) {
        let dir = tempfile::tempdir().unwrap();
        let paths = TaskPaths::from_dirs(
            dir.path().join("status"),
            dir.path().join("downloads"),
            dir.path().join("archives"),
        );
        paths.ensure_dirs().unwrap();
        let store = Arc::new(StatusStore::new(paths));
        let registry = Arc::new(ProcessRegistry::new());
        let settings = Arc::new(Settings::default());
        let runner = Arc::new(CommandRunner::new(store.clone(), registry.clone()));
        let pipeline = Arc::new(JobPipeline::new(store.clone(), settings, runner));
        (dir, TaskManager::new(store, registry, pipeline))
    }

    fn valid_params(url: &str, service: &str, path: Option<&str>) -> TaskParams {
        TaskParams {
            url: url.into(),
            upload_service: service.into(),
            upload_path: path.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn batch_submission_creates_one_queued_task_per_url() {
        let (_dir, manager) = fixture();
        let params = valid_params(
            "https://example.com/a\nhttps://example.com/b\n\n",
            "webdav",
            Some("/backup"),
        );

        let tasks = manager.create_tasks(&params).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_ne!(tasks[0].0, tasks[1].0);

        for (id, task_params) in &tasks {
            let record = manager.store.read(*id).unwrap();
            assert_eq!(record.status, TaskState::Queued);
            assert_eq!(record.url, task_params.url);
            assert!(record.original_params.is_some());
        }
        let urls: Vec<String> = tasks.iter().map(|(_, p)| p.url.clone()).collect();
        assert_eq!(urls, ["https://example.com/a", "https://example.com/b"]);
    }

    #[test]
    fn gofile_is_exempt_from_the_upload_path_requirement() {
        let (_dir, manager) = fixture();
        let params = valid_params("https://example.com/a", "gofile", None);
        assert_eq!(manager.create_tasks(&params).unwrap().len(), 1);
    }

    #[test]
    fn non_gofile_services_require_an_upload_path() {
        let (_dir, manager) = fixture();
        for path in [None, Some(""), Some("   ")] {
            let params = valid_params("https://example.com/a", "webdav", path);
            let err = manager.create_tasks(&params).unwrap_err();
            assert!(matches!(err, TaskError::Validation(_)), "path {path:?}");
        }
    }

    #[test]
    fn submission_without_urls_is_rejected() {
        let (_dir, manager) = fixture();
        let params = valid_params("\n  \n", "gofile", None);
        assert!(matches!(
            manager.create_tasks(&params),
            Err(TaskError::Validation(_))
        ));
    }

    #[test]
    fn cancel_without_a_live_process_reports_failure_and_leaves_the_record() {
        let (_dir, manager) = fixture();
        let params = valid_params("https://example.com/a", "gofile", None);
        let (id, _) = manager.create_tasks(&params).unwrap().remove(0);

        let outcome = manager.control(id, TaskAction::Cancel);
        assert!(!outcome.success);

        let record = manager.store.read(id).unwrap();
        assert_eq!(record.status, TaskState::Queued);
        assert!(record.error.is_none());
    }

    #[test]
    fn control_of_an_unknown_task_is_a_reported_miss() {
        let (_dir, manager) = fixture();
        let outcome = manager.control(Uuid::new_v4(), TaskAction::Pause);
        assert!(!outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("Task not found"));
    }

    #[tokio::test]
    async fn retry_creates_a_fresh_task_carrying_the_original_params() {
        let (_dir, manager) = fixture();
        let mut params = valid_params("https://example.com/a", "gofile", None);
        params.gofile_token = Some("tok".into());
        let (id, _) = manager.create_tasks(&params).unwrap().remove(0);
        manager
            .store
            .update(
                id,
                TaskUpdate {
                    status: Some(TaskState::Failed),
                    error: Some("boom".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let outcome = manager.control(id, TaskAction::Retry);
        assert!(outcome.success);
        let new_id = outcome.new_task_id.unwrap();
        assert_ne!(new_id, id);

        let new_record = manager.store.read(new_id).unwrap();
        assert_eq!(new_record.retry_of, Some(id));
        assert_eq!(new_record.url, "https://example.com/a");
        let carried = new_record.original_params.unwrap();
        assert_eq!(carried.gofile_token.as_deref(), Some("tok"));

        // The source record keeps its terminal state.
        assert_eq!(manager.store.read(id).unwrap().status, TaskState::Failed);
    }

    #[test]
    fn retry_without_stored_params_is_refused() {
        let (_dir, manager) = fixture();
        let id = Uuid::new_v4();
        let mut record =
            TaskRecord::new(id, &valid_params("https://example.com/a", "gofile", None));
        record.original_params = None;
        manager.store.create(&record).unwrap();

        let outcome = manager.control(id, TaskAction::Retry);
        assert!(!outcome.success);
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, manager) = fixture();
        let params = valid_params("https://example.com/a", "gofile", None);
        let (id, _) = manager.create_tasks(&params).unwrap().remove(0);

        assert!(manager.delete(id).unwrap());
        assert!(!manager.delete(id).unwrap());
        assert!(matches!(
            manager.get(id),
            Err(StoreError::NotFound(_))
        ));
    }
}
