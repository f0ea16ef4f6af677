use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task {0} not found")]
    NotFound(Uuid),

    #[error("Invalid status file for task {0}")]
    InvalidRecord(Uuid),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command exited with code {code}: {tail}")]
    ExitStatus { code: i32, tail: String },

    #[error("Status update failed: {0}")]
    StoreError(#[from] StoreError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Compression failed: {0}")]
    CommandError(#[from] CommandError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Missing credentials for {0}")]
    MissingCredentials(&'static str),

    #[error("gofile upload failed: {0}")]
    Gofile(String),

    #[error("openlist request failed: {0}")]
    Openlist(String),

    #[error("rclone error: {0}")]
    Rclone(String),

    #[error("Upload command failed: {0}")]
    CommandError(#[from] CommandError),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Download failed: {0}")]
    CommandError(#[from] CommandError),

    #[error("Archive failed: {0}")]
    ArchiveError(#[from] ArchiveError),

    #[error("Upload failed: {0}")]
    UploadError(#[from] UploadError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
