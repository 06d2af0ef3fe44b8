use std::io;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::EngineError;

/// An entry that could not be carried into the new install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub files_copied: usize,
    pub skipped: Vec<SkippedEntry>,
}

impl CopyReport {
    fn skip(&mut self, path: &Path, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Skipping {} while copying data: {reason}", path.display());
        self.skipped.push(SkippedEntry {
            path: path.to_path_buf(),
            reason,
        });
    }
}

/// Recursively copy `source` into `destination`, creating directories and
/// overwriting same-named files.
///
/// Entries that cannot be read or copied are recorded in the report and the
/// rest of the tree is still copied. Symlinks are not followed.
///
/// # Errors
/// Fails only when `destination` itself cannot be created.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<CopyReport, EngineError> {
    std::fs::create_dir_all(destination)
        .map_err(|error| EngineError::io("failed to create data directory", destination, error))?;

    let mut walk = Walk::new(Mode::Lenient);
    walk.copy_dir(source, destination)?;
    Ok(walk.report)
}

/// Copy a whole build, stopping at the first entry that cannot be copied.
/// Symlinks are recreated as links, never followed. Returns the number of
/// regular files copied.
pub(crate) fn copy_tree_exact(source: &Path, destination: &Path) -> Result<usize, EngineError> {
    std::fs::create_dir_all(destination)
        .map_err(|error| EngineError::io("failed to create directory", destination, error))?;

    let mut walk = Walk::new(Mode::Exact);
    walk.copy_dir(source, destination)?;
    Ok(walk.report.files_copied)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Record problems and keep going. Symlinks are skipped.
    Lenient,
    /// Fail on the first problem. Symlinks are recreated.
    Exact,
}

struct Walk {
    mode: Mode,
    report: CopyReport,
}

impl Walk {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            report: CopyReport::default(),
        }
    }

    fn problem(
        &mut self,
        context: &'static str,
        path: &Path,
        error: io::Error,
    ) -> Result<(), EngineError> {
        match self.mode {
            Mode::Lenient => {
                self.report.skip(path, error.to_string());
                Ok(())
            }
            Mode::Exact => Err(EngineError::io(context, path, error)),
        }
    }

    fn copy_dir(&mut self, source: &Path, destination: &Path) -> Result<(), EngineError> {
        let entries = match std::fs::read_dir(source) {
            Ok(entries) => entries,
            Err(error) => return self.problem("failed to read directory", source, error),
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    self.problem("failed to read directory entry", source, error)?;
                    continue;
                }
            };
            let src_path = entry.path();
            let dest_path = destination.join(entry.file_name());

            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(error) => {
                    self.problem("failed to inspect entry", &src_path, error)?;
                    continue;
                }
            };

            if file_type.is_dir() {
                if let Err(error) = std::fs::create_dir_all(&dest_path) {
                    self.problem("failed to create directory", &dest_path, error)?;
                    continue;
                }
                self.copy_dir(&src_path, &dest_path)?;
            } else if file_type.is_file() {
                match std::fs::copy(&src_path, &dest_path) {
                    Ok(_) => self.report.files_copied += 1,
                    Err(error) => self.problem("failed to copy file", &src_path, error)?,
                }
            } else if file_type.is_symlink() {
                match self.mode {
                    Mode::Lenient => self.report.skip(&src_path, "symbolic link"),
                    Mode::Exact => recreate_symlink(&src_path, &dest_path)?,
                }
            } else {
                self.problem(
                    "cannot copy special file",
                    &src_path,
                    io::Error::new(io::ErrorKind::Unsupported, "not a regular file or directory"),
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn recreate_symlink(source: &Path, destination: &Path) -> Result<(), EngineError> {
    let target = std::fs::read_link(source)
        .map_err(|error| EngineError::io("failed to read symlink", source, error))?;
    std::os::unix::fs::symlink(&target, destination)
        .map_err(|error| EngineError::io("failed to recreate symlink", destination, error))
}

#[cfg(not(unix))]
fn recreate_symlink(source: &Path, _destination: &Path) -> Result<(), EngineError> {
    warn!("Not copying symlink {}", source.display());
    Ok(())
}
