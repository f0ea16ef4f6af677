use std::collections::HashMap;
use std::sync::Mutex;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::debug;
use uuid::Uuid;

/// Live process handle for a task step. The pgid is what signals target;
/// every step is spawned as its own process-group leader so shell pipelines
/// pause and die as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub pgid: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSignal {
    Pause,
    Resume,
    Kill,
}

impl TaskSignal {
    fn as_signal(self) -> Signal {
        match self {
            TaskSignal::Pause => Signal::SIGSTOP,
            TaskSignal::Resume => Signal::SIGCONT,
            TaskSignal::Kill => Signal::SIGKILL,
        }
    }
}

/// In-memory map of task id to live process group. Never persisted; entries
/// exist exactly while a child process is running.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    inner: Mutex<HashMap<Uuid, ProcessHandle>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Uuid, handle: ProcessHandle) {
        self.inner.lock().unwrap().insert(id, handle);
    }

    pub fn unregister(&self, id: Uuid) {
        self.inner.lock().unwrap().remove(&id);
    }

    pub fn get(&self, id: Uuid) -> Option<ProcessHandle> {
        self.inner.lock().unwrap().get(&id).copied()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Delivers the signal to the task's process group. Returns false on a
    /// registry miss or when the group is already gone.
    pub fn signal(&self, id: Uuid, signal: TaskSignal) -> bool {
        let Some(handle) = self.get(id) else {
            debug!(task_id = %id, "Signal requested for unregistered task");
            return false;
        };
        killpg(Pid::from_raw(handle.pgid), signal.as_signal()).is_ok()
    }
}
