use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::CommandError;
use crate::models::types::TaskUpdate;
use crate::stores::registry::{ProcessHandle, ProcessRegistry};
use crate::stores::status::StatusStore;

const LOG_TAIL_BYTES: usize = 2048;

/// One external tool invocation. `display` is the human-readable command line
/// written to the task log; secrets must not appear in it.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub display: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            display: program.clone(),
            program,
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        let arg = arg.into();
        self.display.push(' ');
        self.display.push_str(&arg);
        self.args.push(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Adds an argument that is executed but not echoed to the log.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.display.push_str(" ****");
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// A `sh -c <script>` invocation, used for shell pipelines that must live
    /// in a single process group.
    pub fn shell(sh: impl Into<String>, script: impl Into<String>) -> Self {
        let script = script.into();
        Self::new(sh).arg("-c").arg(script)
    }
}

/// Spawns external tools in their own process group, mirrors the handle into
/// the registry and the status record for the duration of the run, and
/// appends combined output plus outcome markers to the task log.
#[derive(Debug)]
pub struct CommandRunner {
    store: Arc<StatusStore>,
    registry: Arc<ProcessRegistry>,
}

impl CommandRunner {
    pub fn new(store: Arc<StatusStore>, registry: Arc<ProcessRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn run(
        &self,
        task_id: Uuid,
        spec: &CommandSpec,
        log_path: &Path,
    ) -> Result<(), CommandError> {
        append_log(log_path, &format!("\n[Executing] {}\n", spec.display))?;
        debug!(task_id = %task_id, command = %spec.display, "Spawning external tool");

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        let stderr_file = log_file.try_clone()?;

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file));
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| CommandError::SpawnFailed {
            program: spec.program.clone(),
            source,
        })?;

        // The child is its own group leader, so pid doubles as pgid.
        let pid = child.id().unwrap_or_default();
        let pgid = pid as i32;
        self.registry
            .register(task_id, ProcessHandle { pid, pgid });
        self.store.update(
            task_id,
            TaskUpdate {
                pid: Some(Some(pgid)),
                ..Default::default()
            },
        )?;

        let status = child.wait().await;

        self.registry.unregister(task_id);
        self.store.update(
            task_id,
            TaskUpdate {
                pid: Some(None),
                ..Default::default()
            },
        )?;

        let status = status?;
        if status.success() {
            append_log(log_path, "\nTask finished successfully.\n")?;
            info!(task_id = %task_id, command = %spec.program, "External tool finished");
            return Ok(());
        }

        // Killed-by-signal has no exit code; -1 stands in for it.
        let code = status.code().unwrap_or(-1);
        append_log(
            log_path,
            &format!("\n--- TASK FAILED (Exit Code: {code}) ---\n"),
        )?;
        Err(CommandError::ExitStatus {
            code,
            tail: read_tail(log_path, LOG_TAIL_BYTES),
        })
    }
}

/// Appends to a task log, creating it on first write.
pub fn append_log(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())
}

/// Last `max` bytes of the log, trimmed to valid UTF-8.
pub fn read_tail(path: &Path, max: usize) -> String {
    let Ok(raw) = std::fs::read(path) else {
        return String::new();
    };
    let start = raw.len().saturating_sub(max);
    String::from_utf8_lossy(&raw[start..]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskPaths;
    use crate::models::types::{TaskParams, TaskRecord};

    fn fixture() -> (tempfile::TempDir, Arc<StatusStore>, CommandRunner) {
        let dir = tempfile::tempdir().unwrap();
        let paths = TaskPaths::from_dirs(
            dir.path().join("status"),
            dir.path().join("downloads"),
            dir.path().join("archives"),
        );
        paths.ensure_dirs().unwrap();
        let store = Arc::new(StatusStore::new(paths));
        let registry = Arc::new(ProcessRegistry::new());
        let runner = CommandRunner::new(store.clone(), registry);
        (dir, store, runner)
    }

    fn queued_task(store: &StatusStore) -> Uuid {
        let id = Uuid::new_v4();
        let params = TaskParams {
            url: "https://example.com".into(),
            upload_service: "gofile".into(),
            ..Default::default()
        };
        store.create(&TaskRecord::new(id, &params)).unwrap();
        id
    }

    #[tokio::test]
    async fn successful_command_logs_header_and_success_marker() {
        let (_dir, store, runner) = fixture();
        let id = queued_task(&store);
        let log = store.paths().download_log(id);

        let spec = CommandSpec::new("echo").arg("hello");
        runner.run(id, &spec, &log).await.unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("[Executing] echo hello"));
        assert!(contents.contains("hello"));
        assert!(contents.contains("Task finished successfully."));
        assert!(store.read(id).unwrap().pid.is_none());
    }

    #[tokio::test]
    async fn failing_command_surfaces_exit_code_and_tail() {
        let (_dir, store, runner) = fixture();
        let id = queued_task(&store);
        let log = store.paths().download_log(id);

        let spec = CommandSpec::shell("sh", "echo boom >&2; exit 3");
        let err = runner.run(id, &spec, &log).await.unwrap_err();
        match err {
            CommandError::ExitStatus { code, tail } => {
                assert_eq!(code, 3);
                assert!(tail.contains("boom"));
                assert!(tail.contains("TASK FAILED (Exit Code: 3)"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.read(id).unwrap().pid.is_none());
    }

    #[tokio::test]
    async fn spawn_failure_names_the_program() {
        let (_dir, store, runner) = fixture();
        let id = queued_task(&store);
        let log = store.paths().download_log(id);

        let spec = CommandSpec::new("definitely-not-a-real-binary-54321");
        let err = runner.run(id, &spec, &log).await.unwrap_err();
        assert!(matches!(err, CommandError::SpawnFailed { ref program, .. }
            if program == "definitely-not-a-real-binary-54321"));
    }

    #[test]
    fn secret_args_are_masked_in_display() {
        let spec = CommandSpec::new("tool")
            .arg("--user")
            .arg("alice")
            .arg("--pass")
            .secret_arg("hunter2");
        assert_eq!(spec.display, "tool --user alice --pass ****");
        assert_eq!(spec.args.last().map(String::as_str), Some("hunter2"));
    }
}
