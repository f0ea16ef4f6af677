use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{TaskError, UploadError};
use crate::models::types::{TaskParams, TaskState, TaskUpdate, UploadStats};
use crate::services::archiver::Archiver;
use crate::services::command::{append_log, CommandRunner};
use crate::services::downloader::DownloaderService;
use crate::services::gofile::GofileClient;
use crate::services::openlist::OpenlistClient;
use crate::services::rclone::RcloneUploader;
use crate::stores::status::StatusStore;
use crate::utils::metrics::get_metrics;

/// Drives one task through download, optional compression, and upload.
/// Every submission gets its own tokio task; steps within a task run
/// strictly in order.
pub struct JobPipeline {
    store: Arc<StatusStore>,
    settings: Arc<Settings>,
    runner: Arc<CommandRunner>,
    downloader: DownloaderService,
    archiver: Archiver,
    rclone: RcloneUploader,
    gofile: GofileClient,
    http: reqwest::Client,
}

impl JobPipeline {
    pub fn new(
        store: Arc<StatusStore>,
        settings: Arc<Settings>,
        runner: Arc<CommandRunner>,
    ) -> Self {
        let http = reqwest::Client::new();
        Self {
            downloader: DownloaderService::new(settings.clone()),
            archiver: Archiver::new(settings.clone(), runner.clone(), store.paths().clone()),
            rclone: RcloneUploader::new(settings.clone(), runner.clone()),
            gofile: GofileClient::new(http.clone()),
            store,
            settings,
            runner,
            http,
        }
    }

    /// Launches the pipeline in the background. Never blocks the submitter.
    pub fn spawn(self: &Arc<Self>, task_id: Uuid, params: TaskParams) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.run(task_id, params).await;
        });
    }

    pub async fn run(&self, task_id: Uuid, params: TaskParams) {
        let started = Instant::now();
        get_metrics().record_task_start();
        info!(task_id = %task_id, url = %params.url, "Task started");

        match self.execute(task_id, &params).await {
            Ok(()) => {
                get_metrics().record_task_complete("completed", started.elapsed().as_secs_f64());
                info!(task_id = %task_id, "Task completed");
            }
            Err(e) => {
                let message = e.to_string();
                get_metrics().record_error(error_label(&e));
                get_metrics().record_task_complete("failed", started.elapsed().as_secs_f64());
                error!(task_id = %task_id, error = %message, "Task failed");

                // A user cancel already wrote its own failure reason; the
                // killed command's exit error must not replace it.
                let cancelled = self
                    .store
                    .read(task_id)
                    .ok()
                    .is_some_and(|r| r.error.as_deref() == Some("Task cancelled by user"));
                let _ = self.store.update(
                    task_id,
                    TaskUpdate {
                        status: Some(TaskState::Failed),
                        pid: Some(None),
                        error: (!cancelled).then_some(message.clone()),
                        ..Default::default()
                    },
                );
                let _ = append_log(
                    &self.store.paths().download_log(task_id),
                    &format!("\n--- JOB FAILED ---\n{message}\n"),
                );
            }
        }
    }

    async fn execute(&self, task_id: Uuid, params: &TaskParams) -> Result<(), TaskError> {
        let paths = self.store.paths().clone();
        let download_log = paths.download_log(task_id);
        let upload_log = paths.upload_log(task_id);
        let download_dir = paths.download_dir(task_id);

        self.store
            .update(task_id, TaskUpdate::status(TaskState::Running))?;
        fs::write(
            &download_log,
            format!("Starting job {task_id} for URL: {}\n", params.url),
        )?;
        fs::create_dir_all(&download_dir)?;

        // The jar guard must outlive the download so the temp file survives
        // until the tool has read it.
        let (spec, _cookie_jar) = self.downloader.build(params, &download_dir)?;
        self.runner.run(task_id, &spec, &download_log).await?;

        let archives = if params.enable_compression {
            self.store
                .update(task_id, TaskUpdate::status(TaskState::Compressing))?;
            let split_size = params
                .split_compression
                .then_some(params.split_size_mb * 1024 * 1024);
            self.archiver
                .compress(task_id, &download_dir, split_size, &download_log)
                .await?
        } else {
            Vec::new()
        };

        self.store
            .update(task_id, TaskUpdate::status(TaskState::Uploading))?;

        match params.upload_service.as_str() {
            "gofile" => {
                self.upload_gofile(task_id, params, &archives, &upload_log)
                    .await?
            }
            "openlist" => {
                self.upload_openlist(task_id, params, &archives, &download_dir)
                    .await?
            }
            _ => {
                self.upload_rclone(task_id, params, &archives, &download_dir, &upload_log)
                    .await?
            }
        }

        self.store.update(
            task_id,
            TaskUpdate {
                status: Some(TaskState::Completed),
                progress_count: Some("100%".into()),
                ..Default::default()
            },
        )?;
        append_log(&download_log, "\nJob completed successfully!\n")?;

        // Local artifacts are only reclaimed once everything is uploaded;
        // failures keep them on disk for retry or manual recovery.
        let _ = fs::remove_dir_all(&download_dir);
        for archive in &archives {
            let _ = fs::remove_file(archive);
        }
        Ok(())
    }

    async fn upload_gofile(
        &self,
        task_id: Uuid,
        params: &TaskParams,
        archives: &[PathBuf],
        upload_log: &Path,
    ) -> Result<(), TaskError> {
        if archives.is_empty() {
            append_log(
                upload_log,
                "\nUncompressed upload is not supported for gofile.io.\n",
            )?;
            return Ok(());
        }

        let token = self
            .settings
            .resolve(params.gofile_token.as_deref(), "gofile_token");
        let folder_id = self
            .settings
            .resolve(params.gofile_folder_id.as_deref(), "gofile_folder_id");

        for archive in archives {
            let log_path = upload_log.to_path_buf();
            let link = self
                .gofile
                .upload(archive, token.as_deref(), folder_id.as_deref(), |msg| {
                    let _ = append_log(&log_path, &format!("{msg}\n"));
                })
                .await?;
            self.store.update(
                task_id,
                TaskUpdate {
                    gofile_link: Some(link),
                    ..Default::default()
                },
            )?;
        }
        Ok(())
    }

    async fn upload_openlist(
        &self,
        task_id: Uuid,
        params: &TaskParams,
        archives: &[PathBuf],
        download_dir: &Path,
    ) -> Result<(), TaskError> {
        let base_url = self
            .settings
            .resolve(params.openlist_url.as_deref(), "openlist_url")
            .ok_or(UploadError::MissingCredentials("openlist"))?;
        let user = self
            .settings
            .resolve(params.openlist_user.as_deref(), "openlist_user")
            .ok_or(UploadError::MissingCredentials("openlist"))?;
        let pass = self
            .settings
            .resolve(params.openlist_pass.as_deref(), "openlist_pass")
            .ok_or(UploadError::MissingCredentials("openlist"))?;
        let upload_path = params.upload_path.clone().unwrap_or_default();

        let oauth_log = self.store.paths().oauth_log(task_id);
        let client = OpenlistClient::new(self.http.clone(), base_url);

        append_log(&oauth_log, "\n--- Starting Openlist Upload ---\n")?;
        let token = client.login(&user, &pass).await.map_err(|e| {
            let _ = append_log(&oauth_log, &format!("Login failed: {e}\n"));
            e
        })?;
        append_log(&oauth_log, "Login successful.\n")?;

        if !archives.is_empty() {
            client.mkdir(&token, &upload_path).await?;
            let total = archives.len() as u64;
            for (index, archive) in archives.iter().enumerate() {
                let progress = self.openlist_progress(task_id, archive, index as u64, total);
                client
                    .upload_file(&token, archive, &upload_path, progress)
                    .await?;
            }
            return Ok(());
        }

        // Uncompressed: mirror the directory tree under <path>/<task id>.
        let remote_root = format!("{}/{task_id}", upload_path.trim_end_matches('/'));
        client.mkdir(&token, &remote_root).await?;

        let mut uploaded = 0u64;
        let total = count_files(download_dir)?;
        let mut stack = vec![(download_dir.to_path_buf(), remote_root)];
        while let Some((local_dir, remote_dir)) = stack.pop() {
            for entry in fs::read_dir(&local_dir)? {
                let entry = entry?;
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                if path.is_dir() {
                    let remote_sub = format!("{remote_dir}/{name}");
                    client.mkdir(&token, &remote_sub).await?;
                    stack.push((path, remote_sub));
                } else {
                    let progress = self.openlist_progress(task_id, &path, uploaded, total);
                    client
                        .upload_file(&token, &path, &remote_dir, progress)
                        .await?;
                    uploaded += 1;
                    self.store.update(
                        task_id,
                        TaskUpdate {
                            upload_stats: Some(UploadStats {
                                uploaded_files: Some(uploaded),
                                total_files: Some(total),
                                percent: Some(uploaded as f32 / total.max(1) as f32 * 100.0),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Byte-progress callback that mirrors per-file progress into the record.
    fn openlist_progress(
        &self,
        task_id: Uuid,
        file: &Path,
        done_files: u64,
        total_files: u64,
    ) -> Box<dyn FnMut(u64, u64) + Send> {
        let store = self.store.clone();
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Box::new(move |current, total| {
            let file_percent = if total > 0 {
                current as f32 / total as f32 * 100.0
            } else {
                100.0
            };
            let _ = store.update(
                task_id,
                TaskUpdate {
                    upload_stats: Some(UploadStats {
                        uploaded_files: Some(done_files),
                        total_files: Some(total_files),
                        current_file: Some(name.clone()),
                        file_percent: Some(file_percent),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            );
        })
    }

    async fn upload_rclone(
        &self,
        task_id: Uuid,
        params: &TaskParams,
        archives: &[PathBuf],
        download_dir: &Path,
        upload_log: &Path,
    ) -> Result<(), TaskError> {
        let service = params.upload_service.as_str();
        let upload_path = params.upload_path.clone().unwrap_or_default();
        let bwlimit = params.upload_rate_limit.as_deref();

        // Dropped at the end of this call, deleting the credential file.
        let config = self.rclone.write_config(task_id, service, params).await?;

        if archives.is_empty() {
            let dest = format!("{}/{task_id}", upload_path.trim_end_matches('/'));
            self.rclone
                .copy_dir(task_id, &config, download_dir, &dest, bwlimit, upload_log)
                .await?;
            return Ok(());
        }

        for archive in archives {
            let name = archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let dest = format!("{}/{name}", upload_path.trim_end_matches('/'));
            self.rclone
                .copy_file(task_id, &config, archive, &dest, bwlimit, upload_log)
                .await?;
        }
        Ok(())
    }
}

fn count_files(dir: &Path) -> std::io::Result<u64> {
    let mut count = 0;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                count += 1;
            }
        }
    }
    Ok(count)
}

fn error_label(error: &TaskError) -> &'static str {
    match error {
        TaskError::Validation(_) => "validation",
        TaskError::StoreError(_) => "store",
        TaskError::CommandError(_) => "command",
        TaskError::ArchiveError(_) => "archive",
        TaskError::UploadError(_) => "upload",
        TaskError::IoError(_) => "io",
    }
}
