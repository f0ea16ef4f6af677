//! Download-and-archive task engine
//!
//! Drives submitted URLs through download, optional tar+zstd compression,
//! and upload to a configured backend, with durable per-task JSON state and
//! signal-based pause/resume/cancel over the external tool processes.

pub mod config;
pub mod error;
pub mod models;

pub mod routes;

pub mod services;

pub mod stores;

pub mod utils;

pub mod libs;

// Re-export commonly used types
pub use config::{Config, Settings, TaskPaths};
pub use error::{CommandError, StoreError, TaskError, UploadError};
pub use models::types::{
    ControlOutcome, TaskAction, TaskDetail, TaskParams, TaskRecord, TaskState,
};
pub use services::manager::TaskManager;
pub use services::pipeline::JobPipeline;
pub use stores::registry::{ProcessRegistry, TaskSignal};
pub use stores::status::StatusStore;
