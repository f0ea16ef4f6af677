//! End-to-end pipeline tests against stub tool binaries.
//!
//! Binary paths are resolved through `Settings`, so each test points the
//! engine at small shell scripts instead of the real downloaders/uploaders.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use dl_runner::services::command::CommandRunner;
use dl_runner::services::manager::TaskManager;
use dl_runner::services::pipeline::JobPipeline;
use dl_runner::stores::registry::ProcessRegistry;
use dl_runner::stores::status::StatusStore;
use dl_runner::{Settings, TaskParams, TaskPaths, TaskRecord, TaskState};

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<StatusStore>,
    manager: TaskManager,
}

fn harness(settings: HashMap<String, String>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let paths = TaskPaths::from_dirs(
        dir.path().join("status"),
        dir.path().join("downloads"),
        dir.path().join("archives"),
    );
    paths.ensure_dirs().unwrap();

    let store = Arc::new(StatusStore::new(paths));
    let registry = Arc::new(ProcessRegistry::new());
    let settings = Arc::new(Settings::new(settings));
    let runner = Arc::new(CommandRunner::new(store.clone(), registry.clone()));
    let pipeline = Arc::new(JobPipeline::new(store.clone(), settings, runner));
    let manager = TaskManager::new(store.clone(), registry, pipeline);
    Harness {
        _dir: dir,
        store,
        manager,
    }
}

fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Fakes a downloader: finds the `--directory` argument and drops a file in.
const DOWNLOADER_STUB: &str = r#"#!/bin/sh
dir=""
prev=""
for a in "$@"; do
  if [ "$prev" = "--directory" ]; then dir="$a"; fi
  prev="$a"
done
mkdir -p "$dir"
echo "payload" > "$dir/item.txt"
echo "downloaded one file"
"#;

/// Fakes rclone: answers `obscure` and emits a finished `-P` stats block.
const RCLONE_STUB: &str = r#"#!/bin/sh
if [ "$1" = "obscure" ]; then
  echo "obscured-$2"
  exit 0
fi
printf 'Transferred:   \t   10.500 MiB / 10.500 MiB, 100%%, 2.000 MiB/s, ETA 0s\n'
printf 'Transferred:            1 / 1, 100%%\n'
exit 0
"#;

async fn wait_for<F>(store: &StatusStore, id: Uuid, timeout: Duration, pred: F) -> TaskRecord
where
    F: Fn(&TaskRecord) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(record) = store.read(id) {
            if pred(&record) {
                return record;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting; last record: {record:?}");
            }
        } else if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting; record unreadable");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn uncompressed_webdav_upload_runs_to_completion() {
    let bin = tempfile::tempdir().unwrap();
    let gallery_dl = write_stub(bin.path(), "gallery-dl", DOWNLOADER_STUB);
    let rclone = write_stub(bin.path(), "rclone", RCLONE_STUB);

    let h = harness(HashMap::from([
        (
            "gallery_dl_bin".to_string(),
            gallery_dl.to_string_lossy().into_owned(),
        ),
        (
            "rclone_bin".to_string(),
            rclone.to_string_lossy().into_owned(),
        ),
    ]));

    let params = TaskParams {
        url: "https://example.com/gallery/1".into(),
        upload_service: "webdav".into(),
        upload_path: Some("/backup".into()),
        enable_compression: false,
        webdav_url: Some("https://dav.example.com".into()),
        webdav_user: Some("alice".into()),
        webdav_pass: Some("secret".into()),
        ..Default::default()
    };

    let ids = h.manager.submit(params).unwrap();
    assert_eq!(ids.len(), 1);
    let id = ids[0];

    let record = wait_for(&h.store, id, Duration::from_secs(10), |r| {
        r.status.is_terminal()
    })
    .await;
    assert_eq!(record.status, TaskState::Completed, "error: {:?}", record.error);
    assert_eq!(record.progress_count.as_deref(), Some("100%"));
    assert!(record.pid.is_none());

    // The upload log carries the rclone stats block and the detail view
    // derives progress from it.
    let detail = h.manager.get(id).unwrap();
    assert!(detail.upload_log.contains("Transferred:"));
    let progress = detail.progress.unwrap();
    assert_eq!(progress.percent, Some(100.0));
    assert_eq!(progress.uploaded_files, Some(1));

    // Download log has the full step trail.
    assert!(detail.download_log.contains(&format!("Starting job {id}")));
    assert!(detail.download_log.contains("[Executing]"));
    assert!(detail.download_log.contains("Job completed successfully!"));

    // Local artifacts are reclaimed on success.
    assert!(!h.store.paths().download_dir(id).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_resume_and_cancel_drive_the_live_process() {
    let bin = tempfile::tempdir().unwrap();
    let gallery_dl = write_stub(bin.path(), "gallery-dl", "#!/bin/sh\nsleep 30\n");

    let h = harness(HashMap::from([(
        "gallery_dl_bin".to_string(),
        gallery_dl.to_string_lossy().into_owned(),
    )]));

    let params = TaskParams {
        url: "https://example.com/slow".into(),
        upload_service: "gofile".into(),
        ..Default::default()
    };
    let id = h.manager.submit(params).unwrap()[0];

    let running = wait_for(&h.store, id, Duration::from_secs(10), |r| {
        r.status == TaskState::Running && r.pid.is_some()
    })
    .await;
    let pid = running.pid.unwrap();

    let outcome = h.manager.control(id, dl_runner::TaskAction::Pause);
    assert!(outcome.success);
    let paused = h.store.read(id).unwrap();
    assert_eq!(paused.status, TaskState::Paused);
    assert_eq!(paused.previous_status, Some(TaskState::Running));
    // Pausing suspends the process without replacing it.
    assert_eq!(paused.pid, Some(pid));

    let outcome = h.manager.control(id, dl_runner::TaskAction::Resume);
    assert!(outcome.success);
    let resumed = h.store.read(id).unwrap();
    assert_eq!(resumed.status, TaskState::Running);
    assert!(resumed.previous_status.is_none());

    let outcome = h.manager.control(id, dl_runner::TaskAction::Cancel);
    assert!(outcome.success);
    let failed = wait_for(&h.store, id, Duration::from_secs(10), |r| {
        r.status == TaskState::Failed && r.pid.is_none()
    })
    .await;
    assert_eq!(failed.error.as_deref(), Some("Task cancelled by user"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_downloader_binary_fails_the_task() {
    let h = harness(HashMap::from([(
        "gallery_dl_bin".to_string(),
        "/nonexistent/gallery-dl".to_string(),
    )]));

    let params = TaskParams {
        url: "https://example.com/gallery/1".into(),
        upload_service: "gofile".into(),
        ..Default::default()
    };
    let id = h.manager.submit(params).unwrap()[0];

    let record = wait_for(&h.store, id, Duration::from_secs(10), |r| {
        r.status.is_terminal()
    })
    .await;
    assert_eq!(record.status, TaskState::Failed);
    let error = record.error.unwrap();
    assert!(error.contains("Failed to spawn"), "error: {error}");

    let detail = h.manager.get(id).unwrap();
    assert!(detail.download_log.contains("--- JOB FAILED ---"));
    // Failed tasks keep their download directory for retry.
    assert!(h.store.paths().download_dir(id).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_downloader_surfaces_exit_code_and_marker() {
    let bin = tempfile::tempdir().unwrap();
    let gallery_dl = write_stub(
        bin.path(),
        "gallery-dl",
        "#!/bin/sh\necho 'fatal: no extractor' >&2\nexit 4\n",
    );

    let h = harness(HashMap::from([(
        "gallery_dl_bin".to_string(),
        gallery_dl.to_string_lossy().into_owned(),
    )]));

    let params = TaskParams {
        url: "https://example.com/unsupported".into(),
        upload_service: "gofile".into(),
        ..Default::default()
    };
    let id = h.manager.submit(params).unwrap()[0];

    let record = wait_for(&h.store, id, Duration::from_secs(10), |r| {
        r.status.is_terminal()
    })
    .await;
    assert_eq!(record.status, TaskState::Failed);
    let error = record.error.unwrap();
    assert!(error.contains("code 4"), "error: {error}");
    assert!(error.contains("no extractor"), "error: {error}");

    let detail = h.manager.get(id).unwrap();
    assert!(detail
        .download_log
        .contains("--- TASK FAILED (Exit Code: 4) ---"));
}
