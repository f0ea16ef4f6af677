use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of a task. `paused` is only ever entered from an executing state
/// and `previous_status` records where to go back to on resume.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Compressing,
    Uploading,
    Completed,
    Failed,
    Paused,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// States in which an external process is (or should be) alive.
    pub fn is_executing(&self) -> bool {
        matches!(
            self,
            TaskState::Running | TaskState::Compressing | TaskState::Uploading | TaskState::Paused
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
pub enum DownloaderKind {
    #[serde(rename = "gallery-dl")]
    #[default]
    GalleryDl,
    #[serde(rename = "megadl")]
    MegaDl,
    #[serde(rename = "kemono-dl")]
    KemonoDl,
}

/// Submission parameters. `url` may hold several newline-separated URLs when
/// used as a request body; each spawned task carries a single-URL copy.
#[derive(Debug, Clone, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskParams {
    pub url: String,
    pub downloader: DownloaderKind,
    pub upload_service: String,
    pub upload_path: Option<String>,
    #[serde(default = "default_true")]
    pub enable_compression: bool,
    pub split_compression: bool,
    #[serde(default = "default_split_size_mb")]
    pub split_size_mb: u64,
    pub created_by: Option<String>,

    // Downloader extras. Only consulted by the engine they belong to.
    pub cookies: Option<String>,
    pub proxy: Option<String>,
    pub rate_limit: Option<String>,
    pub kemono_username: Option<String>,
    pub kemono_password: Option<String>,
    pub kemono_posts: Option<u32>,
    pub kemono_revisions: bool,
    pub kemono_path_template: bool,
    pub pixiv_ugoira: Option<bool>,
    pub deviantart_client_id: Option<String>,
    pub deviantart_client_secret: Option<String>,

    // Upload extras. Only consulted by the selected service.
    pub upload_rate_limit: Option<String>,
    pub gofile_token: Option<String>,
    pub gofile_folder_id: Option<String>,
    pub openlist_url: Option<String>,
    pub openlist_user: Option<String>,
    pub openlist_pass: Option<String>,
    pub webdav_url: Option<String>,
    pub webdav_user: Option<String>,
    pub webdav_pass: Option<String>,
    pub s3_provider: Option<String>,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub b2_account_id: Option<String>,
    pub b2_application_key: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_split_size_mb() -> u64 {
    1000
}

/// Upload progress derived from the upload log. All fields optional because
/// rclone emits byte totals and file counts on separate stats lines.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_files: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_files: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transferred: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_percent: Option<f32>,
}

/// The durable per-task record, persisted as `<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: Uuid,
    pub status: TaskState,
    pub url: String,
    pub downloader: DownloaderKind,
    pub upload_service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    /// Process-group id of the currently executing step, present only while
    /// a child process is alive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<TaskState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_count: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gofile_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_stats: Option<UploadStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_params: Option<TaskParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<Uuid>,
}

impl TaskRecord {
    pub fn new(id: Uuid, params: &TaskParams) -> Self {
        Self {
            id,
            status: TaskState::Queued,
            url: params.url.clone(),
            downloader: params.downloader,
            upload_service: params.upload_service.clone(),
            upload_path: params.upload_path.clone(),
            created_at: Utc::now(),
            created_by: params.created_by.clone().unwrap_or_else(|| "api".into()),
            pid: None,
            previous_status: None,
            error: None,
            progress_count: None,
            gofile_link: None,
            upload_stats: None,
            original_params: Some(params.clone()),
            retry_of: None,
        }
    }

    /// Placeholder used when a merge targets a record whose file is missing
    /// or unreadable. Identity fields stay empty; the merge fills what it can.
    pub fn empty(id: Uuid) -> Self {
        Self {
            id,
            status: TaskState::Queued,
            url: String::new(),
            downloader: DownloaderKind::default(),
            upload_service: String::new(),
            upload_path: None,
            created_at: Utc::now(),
            created_by: String::new(),
            pid: None,
            previous_status: None,
            error: None,
            progress_count: None,
            gofile_link: None,
            upload_stats: None,
            original_params: None,
            retry_of: None,
        }
    }
}

/// Partial update applied onto a stored record. `None` leaves the field
/// untouched; the double-Option fields can also clear.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskState>,
    pub pid: Option<Option<i32>>,
    pub previous_status: Option<Option<TaskState>>,
    pub error: Option<String>,
    pub progress_count: Option<String>,
    pub gofile_link: Option<String>,
    pub upload_stats: Option<UploadStats>,
}

impl TaskUpdate {
    pub fn status(status: TaskState) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn apply(self, record: &mut TaskRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(pid) = self.pid {
            record.pid = pid;
        }
        if let Some(previous) = self.previous_status {
            record.previous_status = previous;
        }
        if let Some(error) = self.error {
            record.error = Some(error);
        }
        if let Some(progress) = self.progress_count {
            record.progress_count = Some(progress);
        }
        if let Some(link) = self.gofile_link {
            record.gofile_link = Some(link);
        }
        if let Some(stats) = self.upload_stats {
            record.upload_stats = Some(stats);
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    Pause,
    Resume,
    Retry,
    #[serde(alias = "kill")]
    Cancel,
}

/// Result of a control action. Misses (no live process to signal) are
/// reported, never raised.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_task_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ControlOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            new_task_id: None,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            new_task_id: None,
            message: Some(message.into()),
        }
    }
}

/// Full task view: record, the three logs, and progress derived from the
/// upload log on demand.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    #[serde(flatten)]
    pub record: TaskRecord,
    pub download_log: String,
    pub upload_log: String,
    pub oauth_log: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<UploadStats>,
}
