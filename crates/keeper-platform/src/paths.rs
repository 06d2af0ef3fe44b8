use std::path::PathBuf;
use thiserror::Error;

const APP_DIR: &str = "keeper";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AppPathsError {
    #[error("Could not determine home directory")]
    HomeDirUnavailable,
    #[error("Could not determine config directory")]
    ConfigDirUnavailable,
    #[error("Could not determine cache directory")]
    CacheDirUnavailable,
    #[error("Could not determine data directory")]
    DataDirUnavailable,
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
    /// Parent folder offered for new instances when the user gives no path.
    pub instances_dir: PathBuf,
}

impl AppPaths {
    /// Build application paths for the current platform.
    ///
    /// # Errors
    /// Returns an error when a required base directory (for example the user
    /// home/config/cache/data directory) cannot be determined.
    pub fn new() -> Result<Self, AppPathsError> {
        let home = dirs::home_dir().ok_or(AppPathsError::HomeDirUnavailable)?;
        let instances_dir = dirs::document_dir()
            .unwrap_or_else(|| home.clone())
            .join(APP_DIR)
            .join("instances");

        #[cfg(target_os = "macos")]
        {
            Ok(Self {
                config_dir: home.join("Library/Application Support").join(APP_DIR),
                cache_dir: home.join("Library/Caches").join(APP_DIR),
                data_dir: home.join("Library/Application Support").join(APP_DIR),
                instances_dir,
            })
        }

        #[cfg(not(target_os = "macos"))]
        {
            Ok(Self {
                config_dir: dirs::config_dir()
                    .ok_or(AppPathsError::ConfigDirUnavailable)?
                    .join(APP_DIR),
                cache_dir: dirs::cache_dir()
                    .ok_or(AppPathsError::CacheDirUnavailable)?
                    .join(APP_DIR),
                data_dir: dirs::data_dir()
                    .ok_or(AppPathsError::DataDirUnavailable)?
                    .join(APP_DIR),
                instances_dir,
            })
        }
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    #[must_use]
    pub fn instances_file(&self) -> PathBuf {
        self.config_dir.join("instances.json")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("debug.log")
    }

    /// Where download and extraction scratch directories are created.
    #[must_use]
    pub fn scratch_dir(&self) -> PathBuf {
        self.cache_dir.join("downloads")
    }

    /// Per-instance lock files. Present while an instance is running or
    /// being installed by some keeper process.
    #[must_use]
    pub fn locks_dir(&self) -> PathBuf {
        self.config_dir.join("locks")
    }

    /// Runtime dependencies keeper installed itself, such as ffmpeg.
    #[must_use]
    pub fn tools_dir(&self) -> PathBuf {
        self.data_dir.join("tools")
    }

    /// Ensure all application directories exist on disk.
    ///
    /// # Errors
    /// Returns an error if any directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.cache_dir)?;
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.scratch_dir())?;
        std::fs::create_dir_all(self.locks_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::AppPaths;

    fn test_paths(root: &Path) -> AppPaths {
        AppPaths {
            config_dir: root.join("config"),
            cache_dir: root.join("cache"),
            data_dir: root.join("data"),
            instances_dir: root.join("instances"),
        }
    }

    #[test]
    fn file_paths_use_expected_filenames() {
        let root = Path::new("/tmp/keeper-paths");
        let paths = test_paths(root);

        assert!(paths.settings_file().ends_with(Path::new("config").join("settings.json")));
        assert!(
            paths
                .instances_file()
                .ends_with(Path::new("config").join("instances.json"))
        );
        assert!(paths.log_file().ends_with(Path::new("data").join("debug.log")));
        assert!(paths.scratch_dir().ends_with(Path::new("cache").join("downloads")));
        assert!(paths.locks_dir().ends_with(Path::new("config").join("locks")));
        assert!(paths.tools_dir().ends_with(Path::new("data").join("tools")));
    }

    #[test]
    fn ensure_dirs_creates_all_directories() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let paths = test_paths(temp.path());

        paths
            .ensure_dirs()
            .expect("ensure_dirs should create application directories");

        assert!(paths.config_dir.is_dir());
        assert!(paths.cache_dir.is_dir());
        assert!(paths.data_dir.is_dir());
        assert!(paths.scratch_dir().is_dir());
        assert!(paths.locks_dir().is_dir());
    }
}
