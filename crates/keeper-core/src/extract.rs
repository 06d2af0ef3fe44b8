use std::path::Path;

use keeper_platform::helper_command;
use log::{debug, warn};

use crate::error::{EngineError, ErrorKind};

/// Archive formats a release can ship in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Classify by file name suffix, ignoring case.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }

    /// Expand `archive` into `dest`, creating `dest` first.
    ///
    /// # Errors
    /// Returns an extraction error when the archive is corrupt or `tar`
    /// fails, and an I/O error when `dest` cannot be written.
    pub async fn extract(self, archive: &Path, dest: &Path) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|error| {
                EngineError::io("failed to create extraction directory", dest, error)
            })?;

        match self {
            Self::Zip => {
                let archive = archive.to_path_buf();
                let dest = dest.to_path_buf();
                tokio::task::spawn_blocking(move || extract_zip(&archive, &dest))
                    .await
                    .map_err(|error| {
                        EngineError::task("zip extraction task failed", ErrorKind::Extract, error)
                    })?
            }
            Self::TarGz => extract_tar_gz(archive, dest).await,
        }
    }
}

/// Extract `archive` into `dest`, choosing the format from its file name.
///
/// # Errors
/// Returns [`EngineError::UnsupportedArchive`] for unknown formats, otherwise
/// whatever [`ArchiveKind::extract`] returns.
pub async fn extract_archive(archive: &Path, dest: &Path) -> Result<(), EngineError> {
    let file_name = archive
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let Some(kind) = ArchiveKind::from_file_name(&file_name) else {
        return Err(EngineError::UnsupportedArchive { file_name });
    };

    debug!("Extracting {} as {kind:?}", archive.display());
    kind.extract(archive, dest).await
}

fn extract_zip(zip_path: &Path, dest: &Path) -> Result<(), EngineError> {
    let file = std::fs::File::open(zip_path)
        .map_err(|error| EngineError::io("failed to open zip file", zip_path, error))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|error| EngineError::zip("failed to read zip archive", error))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|error| EngineError::zip("failed to read zip entry", error))?;
        let Some(name) = entry.enclosed_name() else {
            warn!("Skipping zip entry with unsafe path: {}", entry.name());
            continue;
        };
        let out_path = dest.join(name);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|error| {
                EngineError::io("failed to create extraction directory", &out_path, error)
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                EngineError::io("failed to create extraction parent directory", parent, error)
            })?;
        }
        let mut outfile = std::fs::File::create(&out_path)
            .map_err(|error| EngineError::io("failed to create extracted file", &out_path, error))?;
        std::io::copy(&mut entry, &mut outfile)
            .map_err(|error| EngineError::io("failed to extract archive entry", &out_path, error))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
            }
        }
    }

    debug!("Zip extraction complete to {}", dest.display());
    Ok(())
}

async fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<(), EngineError> {
    let tar = which::which("tar").map_err(|error| EngineError::ExtractFailed {
        exit_code: None,
        stderr: format!("tar is not available: {error}"),
    })?;

    let output = helper_command(&tar)
        .arg("-xzf")
        .arg(archive)
        .arg("-C")
        .arg(dest)
        .output()
        .await
        .map_err(|error| EngineError::ExtractFailed {
            exit_code: None,
            stderr: format!("failed to run {}: {error}", tar.display()),
        })?;

    if !output.status.success() {
        return Err(EngineError::ExtractFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    debug!("tar extraction complete to {}", dest.display());
    Ok(())
}
