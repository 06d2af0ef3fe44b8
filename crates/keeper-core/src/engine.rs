use std::path::{Path, PathBuf};
use std::sync::Arc;

use keeper_platform::Platform;
use log::{debug, info, warn};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::download::{Progress, ProgressSender, download};
use crate::error::{EngineError, ErrorKind};
use crate::extract::extract_archive;
use crate::instance::InstanceRecord;
use crate::lock::InstanceLock;
use crate::process::{Launch, ProcessExit, ProcessSupervisor, RunSlot, probe_version};
use crate::release::{
    FeedConfig, ReleaseClient, ReleaseDescriptor, expected_asset_name, select_asset,
};
use crate::state::{Command, InstanceState, ensure_allowed};
use crate::swap::{InstallSwap, SwapPhase, relocate_install, restore_backup};

/// Prefix of per-install scratch directories under the scratch root. The
/// owning instance id follows it.
pub const SCRATCH_PREFIX: &str = ".tmp";

const EXTRACT_DIR: &str = "extract";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub feed: FeedConfig,
    pub platform: Platform,
    /// Executable base name without platform suffix, e.g. `NadekoBot`.
    pub executable_name: String,
    /// Downloads and extractions happen in fresh directories below this.
    pub scratch_root: PathBuf,
    /// Holds one [`InstanceLock`] file per instance.
    pub locks_dir: PathBuf,
    /// Installed runtime dependencies, put on the managed program's `PATH`.
    pub tools_dir: Option<PathBuf>,
}

/// Outcome of an install, update, or rollback, for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub instance_id: Uuid,
    pub success: bool,
    pub message: String,
}

/// An instance record plus its live process slot.
#[derive(Debug)]
pub struct InstanceRuntime {
    pub record: InstanceRecord,
    slot: RunSlot,
}

impl InstanceRuntime {
    #[must_use]
    pub fn new(record: InstanceRecord) -> Self {
        Self {
            record,
            slot: RunSlot::default(),
        }
    }

    #[must_use]
    pub fn slot(&self) -> &RunSlot {
        &self.slot
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.slot.is_running()
    }
}

#[derive(Debug)]
pub struct Engine {
    releases: Arc<ReleaseClient>,
    http: reqwest::Client,
    supervisor: ProcessSupervisor,
    completions: broadcast::Sender<Completion>,
    platform: Platform,
    executable_name: String,
    scratch_root: PathBuf,
    locks_dir: PathBuf,
    tools_dir: Option<PathBuf>,
}

impl Engine {
    #[must_use]
    pub fn new(http: reqwest::Client, config: EngineConfig) -> Self {
        let (completions, _) = broadcast::channel(32);
        Self {
            releases: Arc::new(ReleaseClient::new(http.clone(), config.feed)),
            http,
            supervisor: ProcessSupervisor::new(),
            completions,
            platform: config.platform,
            executable_name: config.executable_name,
            scratch_root: config.scratch_root,
            locks_dir: config.locks_dir,
            tools_dir: config.tools_dir,
        }
    }

    #[must_use]
    pub fn releases(&self) -> &Arc<ReleaseClient> {
        &self.releases
    }

    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn subscribe_completions(&self) -> broadcast::Receiver<Completion> {
        self.completions.subscribe()
    }

    pub fn subscribe_exits(&self) -> broadcast::Receiver<ProcessExit> {
        self.supervisor.subscribe()
    }

    #[must_use]
    pub fn executable_path(&self, record: &InstanceRecord) -> PathBuf {
        record
            .path
            .join(self.platform.executable_file_name(&self.executable_name))
    }

    /// An instance locked by another keeper process counts as running.
    #[must_use]
    pub fn state(&self, runtime: &InstanceRuntime) -> InstanceState {
        InstanceState::derive(
            runtime.record.has_local_version(),
            self.releases
                .is_update_available(runtime.record.version.as_deref()),
            runtime.is_running() || InstanceLock::is_held(&self.locks_dir, runtime.record.id),
        )
    }

    fn lease(
        &self,
        runtime: &InstanceRuntime,
        command: Command,
    ) -> Result<InstanceLock, EngineError> {
        let lease = InstanceLock::try_acquire(&self.locks_dir, runtime.record.id)?;
        lease.ok_or_else(|| EngineError::Busy {
            instance: runtime.record.name.clone(),
            command,
        })
    }

    /// # Errors
    /// Propagates [`ReleaseClient::fetch_latest`] failures.
    pub async fn refresh_latest(&self) -> Result<Arc<ReleaseDescriptor>, EngineError> {
        self.releases.fetch_latest().await
    }

    /// First install into an empty instance.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidOperation`] unless the instance is
    /// downloadable, otherwise any pipeline failure.
    pub async fn download(
        &self,
        runtime: &mut InstanceRuntime,
        progress: &ProgressSender,
    ) -> Result<Option<String>, EngineError> {
        ensure_allowed(self.state(runtime), Command::Download)?;
        let _lease = self.lease(runtime, Command::Download)?;
        self.install(runtime, progress).await
    }

    /// Reinstall the latest release over an existing install.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidOperation`] unless the instance is
    /// installed and stopped, otherwise any pipeline failure.
    pub async fn update(
        &self,
        runtime: &mut InstanceRuntime,
        progress: &ProgressSender,
    ) -> Result<Option<String>, EngineError> {
        ensure_allowed(self.state(runtime), Command::Update)?;
        let _lease = self.lease(runtime, Command::Update)?;
        self.install(runtime, progress).await
    }

    async fn install(
        &self,
        runtime: &mut InstanceRuntime,
        progress: &ProgressSender,
    ) -> Result<Option<String>, EngineError> {
        let result = self.run_install(runtime, progress).await;
        let message = match &result {
            Ok(Some(version)) => format!("Installed version {version}"),
            Ok(None) => "Installed, but the version could not be determined".to_string(),
            Err(error) => error.to_string(),
        };
        if let Err(error) = &result {
            warn!("Install of {} failed: {error}", runtime.record.name);
        }
        let _ = self.completions.send(Completion {
            instance_id: runtime.record.id,
            success: result.is_ok(),
            message,
        });
        result
    }

    async fn run_install(
        &self,
        runtime: &mut InstanceRuntime,
        progress: &ProgressSender,
    ) -> Result<Option<String>, EngineError> {
        let release = match self.releases.latest() {
            Some(release) => release,
            None => self.releases.fetch_latest().await?,
        };

        let product = &self.releases.feed().product;
        let asset_name = expected_asset_name(product, self.platform);
        let asset = select_asset(&release, product, self.platform).ok_or_else(|| {
            EngineError::AssetNotFound {
                expected: asset_name.clone(),
            }
        })?;

        let scratch = create_scratch(&self.scratch_root, runtime.record.id)?;
        let extraction_root = scratch.path().join(EXTRACT_DIR);
        let mut swap = InstallSwap::prepare(
            &runtime.record.path,
            &extraction_root,
            self.platform.build_dir_name(product),
        );
        swap.run_phase(SwapPhase::Guard)?;

        let archive = scratch.path().join(&asset_name);
        download(
            &self.http,
            &asset.browser_download_url,
            &archive,
            &release.tag_name,
            progress,
        )
        .await?;
        let _ = progress.send(Progress::new(1.0, "Download complete. Extracting..."));

        extract_archive(&archive, &extraction_root).await?;
        let _ = progress.send(Progress::new(1.0, "Extraction complete. Installing..."));

        let swap = swap.with_scratch(scratch);
        let report = tokio::task::spawn_blocking(move || swap.execute())
            .await
            .map_err(|error| EngineError::task("install task failed", ErrorKind::Io, error))??;
        if let Some(carried) = &report.carried
            && !carried.skipped.is_empty()
        {
            warn!(
                "{} data entries were not carried forward",
                carried.skipped.len()
            );
        }

        let version = self.refresh_local_version(runtime).await;
        info!(
            "Installed {} into {}",
            release.tag_name,
            runtime.record.path.display()
        );
        Ok(version)
    }

    /// Launch the instance. Its lock is held until the process exits.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidOperation`] unless the instance is
    /// installed and stopped, or a launch error.
    pub fn start(&self, runtime: &InstanceRuntime) -> Result<(), EngineError> {
        ensure_allowed(self.state(runtime), Command::Start)?;
        let lease = self.lease(runtime, Command::Start)?;

        let executable = self.executable_path(&runtime.record);
        let mut launch = Launch::new(executable, &runtime.record.path).with_lease(lease);
        if let Some(tools_dir) = &self.tools_dir {
            launch = launch.with_search_path(tools_dir);
        }
        self.supervisor.start(runtime.record.id, &runtime.slot, launch)
    }

    /// Stop the running process and re-read the installed version.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidOperation`] when nothing is running and
    /// [`EngineError::Busy`] when another keeper process owns the instance.
    pub async fn stop(&self, runtime: &mut InstanceRuntime) -> Result<(), EngineError> {
        ensure_allowed(self.state(runtime), Command::Stop)?;
        if !runtime.is_running() {
            return Err(EngineError::Busy {
                instance: runtime.record.name.clone(),
                command: Command::Stop,
            });
        }
        self.supervisor.stop(&runtime.slot).await;
        self.refresh_local_version(runtime).await;
        Ok(())
    }

    /// Swap the previous install back in.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidOperation`] unless the instance is
    /// installed and stopped, or the rollback failure.
    pub async fn rollback(
        &self,
        runtime: &mut InstanceRuntime,
    ) -> Result<Option<String>, EngineError> {
        ensure_allowed(self.state(runtime), Command::Rollback)?;
        let _lease = self.lease(runtime, Command::Rollback)?;

        let path = runtime.record.path.clone();
        let result = tokio::task::spawn_blocking(move || restore_backup(&path))
            .await
            .map_err(|error| EngineError::task("rollback task failed", ErrorKind::Io, error))
            .and_then(|restored| restored);

        let (success, message) = match &result {
            Ok(_) => (true, "Rolled back to the previous install".to_string()),
            Err(error) => (false, error.to_string()),
        };
        let _ = self.completions.send(Completion {
            instance_id: runtime.record.id,
            success,
            message,
        });
        result?;

        Ok(self.refresh_local_version(runtime).await)
    }

    /// Move the instance directory (and its backup) to `new_path` and update
    /// the record. The caller persists it.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidOperation`] while running,
    /// [`EngineError::Busy`] when another keeper process owns the instance,
    /// or the move failure.
    pub async fn relocate(
        &self,
        runtime: &mut InstanceRuntime,
        new_path: &Path,
    ) -> Result<PathBuf, EngineError> {
        ensure_allowed(self.state(runtime), Command::Move)?;
        let _lease = self.lease(runtime, Command::Move)?;

        let from = runtime.record.path.clone();
        let to = new_path.to_path_buf();
        let moved = tokio::task::spawn_blocking(move || relocate_install(&from, &to))
            .await
            .map_err(|error| EngineError::task("move task failed", ErrorKind::Io, error))??;

        runtime.record.path.clone_from(&moved);
        Ok(moved)
    }

    /// Ask the installed executable for its version and store the result in the record.
    pub async fn refresh_local_version(&self, runtime: &mut InstanceRuntime) -> Option<String> {
        let version = probe_version(&self.executable_path(&runtime.record)).await;
        debug!(
            "Version of {}: {}",
            runtime.record.name,
            version.as_deref().unwrap_or("no version")
        );
        runtime.record.version.clone_from(&version);
        version
    }

    /// Remove scratch directories left behind by interrupted installs.
    /// Directories of instances locked by a live keeper process are left
    /// alone. Returns how many were removed.
    #[must_use]
    pub fn sweep_scratch(&self) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.scratch_root) else {
            return 0;
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(owner) = name.to_str().and_then(|name| name.strip_prefix(SCRATCH_PREFIX))
            else {
                continue;
            };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(id) = scratch_owner(owner)
                && InstanceLock::is_held(&self.locks_dir, id)
            {
                debug!("Keeping {}, its install is in progress", path.display());
                continue;
            }
            match std::fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(error) => warn!("Failed to remove {}: {error}", path.display()),
            }
        }
        if removed > 0 {
            info!("Removed {removed} leftover scratch director(ies)");
        }
        removed
    }
}

fn create_scratch(scratch_root: &Path, owner: Uuid) -> Result<tempfile::TempDir, EngineError> {
    std::fs::create_dir_all(scratch_root)
        .map_err(|error| EngineError::io("failed to create scratch root", scratch_root, error))?;
    tempfile::Builder::new()
        .prefix(&format!("{SCRATCH_PREFIX}{owner}."))
        .tempdir_in(scratch_root)
        .map_err(|error| EngineError::io("failed to create scratch directory", scratch_root, error))
}

/// Instance id encoded after the scratch prefix, if any.
fn scratch_owner(suffix: &str) -> Option<Uuid> {
    suffix.get(..36).and_then(|id| Uuid::parse_str(id).ok())
}
