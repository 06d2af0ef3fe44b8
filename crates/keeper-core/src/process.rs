use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use keeper_platform::helper_command;
use log::{debug, info, warn};
use tokio::process::Child;
use tokio::sync::{broadcast, oneshot, watch};
use uuid::Uuid;

use crate::error::EngineError;
use crate::lock::InstanceLock;
use crate::state::{self, InstanceState};

/// A live child process owned by one instance.
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    generation: u64,
    stop_tx: Option<oneshot::Sender<()>>,
    done: watch::Receiver<bool>,
}

#[derive(Debug, Default)]
pub enum RunState {
    #[default]
    NotRunning,
    Running(ProcessHandle),
}

/// Shared run state of one instance. The supervisor's watcher task holds a
/// clone so it can clear the slot when the process exits.
#[derive(Debug, Clone, Default)]
pub struct RunSlot(Arc<Mutex<RunState>>);

impl RunSlot {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.lock(), RunState::Running(_))
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        match &*self.lock() {
            RunState::Running(handle) => handle.pid,
            RunState::NotRunning => None,
        }
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &*self.lock() {
            RunState::Running(handle) => Some(handle.started_at),
            RunState::NotRunning => None,
        }
    }

    /// Resolve once the current process (if any) has exited and been reaped.
    pub async fn wait(&self) {
        let done = match &*self.lock() {
            RunState::Running(handle) => handle.done.clone(),
            RunState::NotRunning => return,
        };
        wait_done(done).await;
    }
}

/// What to run for an instance and what it holds while running.
#[derive(Debug)]
pub struct Launch {
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    /// Directories put in front of the child's `PATH`.
    pub search_path: Vec<PathBuf>,
    /// Released once the process has exited and the slot is cleared.
    pub lease: Option<InstanceLock>,
}

impl Launch {
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            working_dir: working_dir.into(),
            search_path: Vec::new(),
            lease: None,
        }
    }

    #[must_use]
    pub fn with_search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_path.push(dir.into());
        self
    }

    #[must_use]
    pub fn with_lease(mut self, lease: InstanceLock) -> Self {
        self.lease = Some(lease);
        self
    }

    fn path_var(&self) -> Option<OsString> {
        if self.search_path.is_empty() {
            return None;
        }
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        let dirs = self
            .search_path
            .iter()
            .cloned()
            .chain(std::env::split_paths(&inherited));
        match std::env::join_paths(dirs) {
            Ok(joined) => Some(joined),
            Err(error) => {
                warn!("Ignoring extra search path: {error}");
                None
            }
        }
    }
}

/// Broadcast when a supervised process ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub instance_id: Uuid,
    pub exit_code: Option<i32>,
    /// True when the exit followed a stop request.
    pub requested: bool,
}

#[derive(Debug)]
pub struct ProcessSupervisor {
    exits: broadcast::Sender<ProcessExit>,
    next_generation: AtomicU64,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new() -> Self {
        let (exits, _) = broadcast::channel(32);
        Self {
            exits,
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessExit> {
        self.exits.subscribe()
    }

    /// Launch the program and watch it in the background. Must be called
    /// from within a tokio runtime.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidOperation`] when `slot` already holds a
    /// live process, and a launch error when the executable is missing or
    /// cannot be spawned.
    pub fn start(
        &self,
        instance_id: Uuid,
        slot: &RunSlot,
        launch: Launch,
    ) -> Result<(), EngineError> {
        let executable = launch.executable.as_path();
        let mut run_state = slot.lock();
        if matches!(*run_state, RunState::Running(_)) {
            return Err(EngineError::InvalidOperation {
                command: state::Command::Start,
                state: InstanceState::Running,
            });
        }
        if !executable.is_file() {
            return Err(EngineError::launch(executable, "executable not found"));
        }

        let mut command = helper_command(executable);
        command.current_dir(&launch.working_dir);
        if let Some(path) = launch.path_var() {
            command.env("PATH", path);
        }
        let child = command
            .spawn()
            .map_err(|error| EngineError::launch(executable, error.to_string()))?;

        let pid = child.id();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = watch::channel(false);

        *run_state = RunState::Running(ProcessHandle {
            pid,
            started_at: Utc::now(),
            generation,
            stop_tx: Some(stop_tx),
            done: done_rx,
        });
        drop(run_state);

        info!(
            "Started {} (pid {})",
            executable.display(),
            pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string())
        );

        let watcher = Watcher {
            instance_id,
            generation,
            slot: slot.clone(),
            exits: self.exits.clone(),
            done: done_tx,
            lease: launch.lease,
        };
        tokio::spawn(watcher.run(child, stop_rx));
        Ok(())
    }

    /// Ask the process in `slot` to terminate and wait until it has been
    /// reaped. Returns whether a process was running.
    pub async fn stop(&self, slot: &RunSlot) -> bool {
        let (stop_tx, done) = match &mut *slot.lock() {
            RunState::NotRunning => return false,
            RunState::Running(handle) => (handle.stop_tx.take(), handle.done.clone()),
        };

        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }
        wait_done(done).await;
        true
    }
}

struct Watcher {
    instance_id: Uuid,
    generation: u64,
    slot: RunSlot,
    exits: broadcast::Sender<ProcessExit>,
    done: watch::Sender<bool>,
    lease: Option<InstanceLock>,
}

impl Watcher {
    async fn run(mut self, mut child: Child, mut stop_rx: oneshot::Receiver<()>) {
        let (status, requested) = tokio::select! {
            status = child.wait() => (status, false),
            Ok(()) = &mut stop_rx => {
                if let Err(error) = child.start_kill() {
                    debug!("Kill request failed, process likely already exited: {error}");
                }
                (child.wait().await, true)
            }
        };

        let exit_code = match status {
            Ok(status) => status.code(),
            Err(error) => {
                warn!("Failed to wait on managed process: {error}");
                None
            }
        };
        info!(
            "Instance {} exited (code {exit_code:?}, requested {requested})",
            self.instance_id
        );

        {
            let mut run_state = self.slot.lock();
            if let RunState::Running(handle) = &*run_state
                && handle.generation == self.generation
            {
                *run_state = RunState::NotRunning;
            }
        }
        drop(self.lease.take());

        // Exit goes out first so anyone woken by `done` can already see it.
        let _ = self.exits.send(ProcessExit {
            instance_id: self.instance_id,
            exit_code,
            requested,
        });
        let _ = self.done.send(true);
    }
}

async fn wait_done(mut done: watch::Receiver<bool>) {
    let _ = done.wait_for(|exited| *exited).await;
}

/// Run `<executable> --version` and return the first non-empty line of its
/// output. Any failure means "no local version".
pub async fn probe_version(executable: &Path) -> Option<String> {
    if !executable.is_file() {
        return None;
    }

    let mut command = helper_command(executable);
    command.arg("--version");
    if let Some(dir) = executable.parent() {
        command.current_dir(dir);
    }

    let output = command.output().await.ok()?;
    if !output.status.success() {
        debug!(
            "{} --version exited with {}",
            executable.display(),
            output.status
        );
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(ToString::to_string)
}
