use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::TempDir;

use crate::carry::{CopyReport, copy_tree, copy_tree_exact};
use crate::error::EngineError;

const BACKUP_PREFIX: &str = ".old-";
const STAGING_PREFIX: &str = ".new-";
const DISCARD_PREFIX: &str = ".discard-";
const DATA_DIR: &str = "data";

/// One step of replacing an install, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwapPhase {
    Guard,
    ClearStaleBackup,
    BackupCurrent,
    PlaceNew,
    CarryForward,
    Cleanup,
}

impl SwapPhase {
    pub const ALL: [Self; 6] = [
        Self::Guard,
        Self::ClearStaleBackup,
        Self::BackupCurrent,
        Self::PlaceNew,
        Self::CarryForward,
        Self::Cleanup,
    ];
}

impl fmt::Display for SwapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Guard => "guard",
            Self::ClearStaleBackup => "clear stale backup",
            Self::BackupCurrent => "back up current install",
            Self::PlaceNew => "place new build",
            Self::CarryForward => "carry data forward",
            Self::Cleanup => "clean up",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SwapReport {
    pub completed: Vec<SwapPhase>,
    /// Set once the previous install has been moved aside.
    pub backup_path: Option<PathBuf>,
    /// Directory the new build was taken from.
    pub placed_from: Option<PathBuf>,
    pub carried: Option<CopyReport>,
    pub scratch_removed: bool,
}

#[derive(Debug)]
struct Target {
    instance: PathBuf,
    backup: PathBuf,
}

/// Replaces the contents of an instance directory with a freshly extracted
/// build while keeping the previous one as a one-step backup.
#[derive(Debug)]
pub struct InstallSwap {
    instance_path: PathBuf,
    extraction_root: PathBuf,
    product_dir: String,
    scratch: Option<TempDir>,
    target: Option<Target>,
    report: SwapReport,
}

impl InstallSwap {
    /// Nothing touches the disk until a phase runs.
    #[must_use]
    pub fn prepare(
        instance_path: impl Into<PathBuf>,
        extraction_root: impl Into<PathBuf>,
        product_dir: impl Into<String>,
    ) -> Self {
        Self {
            instance_path: instance_path.into(),
            extraction_root: extraction_root.into(),
            product_dir: product_dir.into(),
            scratch: None,
            target: None,
            report: SwapReport::default(),
        }
    }

    /// Hand over the scratch directory so the cleanup phase can remove it.
    #[must_use]
    pub fn with_scratch(mut self, scratch: TempDir) -> Self {
        self.scratch = Some(scratch);
        self
    }

    #[must_use]
    pub fn report(&self) -> &SwapReport {
        &self.report
    }

    /// Run every phase that has not completed yet, in order.
    ///
    /// # Errors
    /// Stops at the first failing phase and returns its error.
    pub fn execute(mut self) -> Result<SwapReport, EngineError> {
        for phase in SwapPhase::ALL {
            if !self.report.completed.contains(&phase) {
                self.run_phase(phase)?;
            }
        }
        info!("Installed new build into {}", self.instance_path.display());
        Ok(self.report)
    }

    /// Run a single phase. Every phase after [`SwapPhase::Guard`] requires the
    /// guard to have passed.
    ///
    /// # Errors
    /// Returns a safety error from the guard, an I/O error from the
    /// filesystem phases, or [`EngineError::Invalid`] when the guard has not
    /// run yet.
    pub fn run_phase(&mut self, phase: SwapPhase) -> Result<(), EngineError> {
        debug!("Swap phase: {phase}");
        match phase {
            SwapPhase::Guard => self.guard()?,
            SwapPhase::ClearStaleBackup => self.clear_stale_backup()?,
            SwapPhase::BackupCurrent => self.backup_current()?,
            SwapPhase::PlaceNew => self.place_new()?,
            SwapPhase::CarryForward => self.carry_forward()?,
            SwapPhase::Cleanup => self.cleanup(),
        }
        self.report.completed.push(phase);
        Ok(())
    }

    fn guard(&mut self) -> Result<(), EngineError> {
        let (instance, backup) = resolve_target(&self.instance_path)?;
        self.target = Some(Target { instance, backup });
        Ok(())
    }

    fn target(&self) -> Result<&Target, EngineError> {
        self.target
            .as_ref()
            .ok_or_else(|| EngineError::Invalid("install guard has not run".to_string()))
    }

    fn clear_stale_backup(&mut self) -> Result<(), EngineError> {
        let backup = &self.target()?.backup;
        if backup.symlink_metadata().is_ok() {
            debug!("Removing stale backup {}", backup.display());
            remove_any(backup)
                .map_err(|error| EngineError::io("failed to remove stale backup", backup, error))?;
        }
        Ok(())
    }

    fn backup_current(&mut self) -> Result<(), EngineError> {
        let target = self.target()?;
        let instance = target.instance.clone();
        let backup = target.backup.clone();

        if instance.exists() {
            std::fs::rename(&instance, &backup).map_err(|error| {
                EngineError::io("failed to move current install aside", &instance, error)
            })?;
            debug!("Backed up {} to {}", instance.display(), backup.display());
            self.report.backup_path = Some(backup);
        } else if let Some(parent) = instance.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                EngineError::io("failed to create instance parent directory", parent, error)
            })?;
        }
        Ok(())
    }

    fn place_new(&mut self) -> Result<(), EngineError> {
        let instance = self.target()?.instance.clone();

        let build_dir = self.extraction_root.join(&self.product_dir);
        let source = if build_dir.is_dir() {
            build_dir
        } else {
            debug!(
                "No {} directory in archive, installing extraction root",
                self.product_dir
            );
            self.extraction_root.clone()
        };

        if let Err(error) = move_into_place(&source, &instance) {
            self.restore_after_failed_placement(&instance);
            return Err(error);
        }

        self.report.placed_from = Some(source);
        Ok(())
    }

    fn restore_after_failed_placement(&self, instance: &Path) {
        let Some(backup) = &self.report.backup_path else {
            return;
        };
        match std::fs::rename(backup, instance) {
            Ok(()) => warn!("Placement failed, restored previous install"),
            Err(error) => warn!(
                "Placement failed and the previous install could not be restored from {}: {error}",
                backup.display()
            ),
        }
    }

    fn carry_forward(&mut self) -> Result<(), EngineError> {
        let instance = self.target()?.instance.clone();
        let Some(backup) = &self.report.backup_path else {
            return Ok(());
        };
        let old_data = backup.join(DATA_DIR);
        if !old_data.is_dir() {
            return Ok(());
        }

        let report = copy_tree(&old_data, &instance.join(DATA_DIR))?;
        info!(
            "Carried {} data file(s) forward, {} skipped",
            report.files_copied,
            report.skipped.len()
        );
        self.report.carried = Some(report);
        Ok(())
    }

    fn cleanup(&mut self) {
        let Some(scratch) = self.scratch.take() else {
            return;
        };
        let path = scratch.path().to_path_buf();
        match scratch.close() {
            Ok(()) => self.report.scratch_removed = true,
            Err(error) => warn!(
                "Failed to remove scratch directory {}: {error}",
                path.display()
            ),
        }
    }
}

/// Where the one-step backup of `instance_path` lives, if the path is one an
/// install may be placed into.
#[must_use]
pub fn backup_path(instance_path: &Path) -> Option<PathBuf> {
    resolve_target(instance_path).ok().map(|(_, backup)| backup)
}

/// Put the previous install back, discarding the current one. The current
/// `data` directory is copied over the restored one first.
///
/// # Errors
/// Returns a `NotFound` I/O error when there is no backup, a safety error for
/// root paths, or an I/O error when the directories cannot be swapped.
pub fn restore_backup(instance_path: &Path) -> Result<PathBuf, EngineError> {
    let (instance, backup) = resolve_target(instance_path)?;
    if !backup.is_dir() {
        return Err(EngineError::io(
            "no previous install to roll back to",
            &backup,
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ));
    }

    let current_data = instance.join(DATA_DIR);
    if current_data.is_dir() {
        copy_tree(&current_data, &backup.join(DATA_DIR))?;
    }

    let discard = sibling(&instance, DISCARD_PREFIX)?;
    if discard.symlink_metadata().is_ok() {
        remove_any(&discard)
            .map_err(|error| EngineError::io("failed to remove stale discard", &discard, error))?;
    }

    let had_current = instance.exists();
    if had_current {
        std::fs::rename(&instance, &discard).map_err(|error| {
            EngineError::io("failed to move current install aside", &instance, error)
        })?;
    }

    if let Err(error) = std::fs::rename(&backup, &instance) {
        if had_current {
            let _ = std::fs::rename(&discard, &instance);
        }
        return Err(EngineError::io(
            "failed to restore previous install",
            &backup,
            error,
        ));
    }

    if had_current && let Err(error) = std::fs::remove_dir_all(&discard) {
        warn!(
            "Failed to remove discarded install {}: {error}",
            discard.display()
        );
    }

    info!("Rolled back {}", instance.display());
    Ok(instance)
}

/// Move an instance directory, and its backup if there is one, to `to`.
/// Returns the resolved new location.
///
/// An existing destination must be an empty directory. An instance that was
/// never installed only changes its path.
///
/// # Errors
/// Returns a safety error for root paths, a destination inside the instance,
/// or a non-empty destination, and an I/O error when the move fails.
pub fn relocate_install(from: &Path, to: &Path) -> Result<PathBuf, EngineError> {
    let (source, source_backup) = resolve_target(from)?;
    let (destination, destination_backup) = resolve_target(to)?;
    if destination == source {
        return Ok(destination);
    }
    if destination.starts_with(&source) {
        return Err(EngineError::safety(
            &destination,
            "destination is inside the instance",
        ));
    }

    if destination.symlink_metadata().is_ok() {
        let empty = std::fs::read_dir(&destination)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !empty {
            return Err(EngineError::safety(&destination, "destination is not empty"));
        }
        std::fs::remove_dir(&destination).map_err(|error| {
            EngineError::io("failed to replace empty destination", &destination, error)
        })?;
    }
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            EngineError::io("failed to create destination parent", parent, error)
        })?;
    }

    if source.exists() {
        move_into_place(&source, &destination)?;
        remove_leftover(&source);
    }

    if source_backup.is_dir() {
        if destination_backup.symlink_metadata().is_ok() {
            remove_any(&destination_backup).map_err(|error| {
                EngineError::io("failed to remove stale backup", &destination_backup, error)
            })?;
        }
        match move_into_place(&source_backup, &destination_backup) {
            Ok(()) => remove_leftover(&source_backup),
            Err(error) => warn!("Previous install was not moved, rollback is unavailable: {error}"),
        }
    }

    info!(
        "Moved {} to {}",
        source.display(),
        destination.display()
    );
    Ok(destination)
}

/// A copy fallback leaves the source behind.
fn remove_leftover(source: &Path) {
    if source.exists()
        && let Err(error) = std::fs::remove_dir_all(source)
    {
        warn!("Failed to remove {}: {error}", source.display());
    }
}

fn resolve_target(instance_path: &Path) -> Result<(PathBuf, PathBuf), EngineError> {
    let instance = resolve(instance_path)?;
    let Some(parent) = instance.parent() else {
        return Err(EngineError::safety(&instance, "path is a filesystem root"));
    };
    if resolve(parent)? == instance {
        return Err(EngineError::safety(&instance, "path is a filesystem root"));
    }
    let backup = sibling(&instance, BACKUP_PREFIX)?;
    Ok((instance, backup))
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the
/// rest, so paths that do not exist yet still compare with ones that do.
fn resolve(path: &Path) -> Result<PathBuf, EngineError> {
    let absolute = std::path::absolute(path)
        .map_err(|error| EngineError::io("failed to resolve instance path", path, error))?;

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(resolved) = std::fs::canonicalize(existing) {
            return Ok(missing
                .iter()
                .rev()
                .fold(resolved, |resolved, name| resolved.join(name)));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(absolute),
        }
    }
}

fn sibling(instance: &Path, prefix: &str) -> Result<PathBuf, EngineError> {
    let (Some(parent), Some(name)) = (instance.parent(), instance.file_name()) else {
        return Err(EngineError::safety(instance, "path has no directory name"));
    };
    let mut sibling_name = OsString::from(prefix);
    sibling_name.push(name);
    Ok(parent.join(sibling_name))
}

fn remove_any(path: &Path) -> std::io::Result<()> {
    if path.is_dir() && !path.is_symlink() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Rename `source` onto `destination`. When a plain rename is impossible
/// (for example across filesystems) the tree is copied into a sibling staging
/// directory first so a partial copy never occupies `destination`.
fn move_into_place(source: &Path, destination: &Path) -> Result<(), EngineError> {
    move_with(source, destination, |from, to| std::fs::rename(from, to))
}

fn move_with(
    source: &Path,
    destination: &Path,
    rename: impl Fn(&Path, &Path) -> io::Result<()>,
) -> Result<(), EngineError> {
    let rename_error = match rename(source, destination) {
        Ok(()) => return Ok(()),
        Err(error) => error,
    };
    if !source.is_dir() {
        return Err(EngineError::io(
            "failed to move new build into place",
            source,
            rename_error,
        ));
    }
    debug!("Rename failed ({rename_error}), copying through staging directory");

    let staging = sibling(destination, STAGING_PREFIX)?;
    if staging.symlink_metadata().is_ok() {
        remove_any(&staging)
            .map_err(|error| EngineError::io("failed to remove stale staging", &staging, error))?;
    }

    let placed = copy_tree_exact(source, &staging).and_then(|_| {
        rename(&staging, destination).map_err(|error| {
            EngineError::io("failed to move staged build into place", destination, error)
        })
    });
    if placed.is_err() {
        let _ = std::fs::remove_dir_all(&staging);
    }
    placed
}
