use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::EngineError;

const SYSTEM_DIR: &str = "system";
const DATA_DIR: &str = "data";
const CREDS_FILE: &str = "creds.yml";

/// What a single layout migration changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub creds_moved: bool,
    /// Where a pre-existing credentials file was preserved, if one was.
    pub creds_backup: Option<PathBuf>,
    pub data_moved: bool,
    pub shortcuts_removed: usize,
    pub system_removed: bool,
}

#[derive(Debug)]
pub struct MigrationOutcome {
    pub root: PathBuf,
    pub result: Result<MigrationReport, EngineError>,
}

/// Old installs kept everything under `<root>/system`.
#[must_use]
pub fn needs_migration(root: &Path) -> bool {
    root.join(SYSTEM_DIR).is_dir()
}

/// Convert one instance directory from the nested `system/` layout to the
/// flat one.
///
/// # Errors
/// Returns an I/O error naming the step and path that failed. Steps already
/// completed stay applied.
pub fn migrate_layout(root: &Path) -> Result<MigrationReport, EngineError> {
    let mut report = MigrationReport::default();
    let system = root.join(SYSTEM_DIR);
    let system_data = system.join(DATA_DIR);
    let system_creds = system.join(CREDS_FILE);

    if system_creds.is_file() && system_data.is_dir() {
        let dest = system_data.join(CREDS_FILE);
        if dest.exists() {
            let bak = system_data.join(format!("{CREDS_FILE}.bak"));
            if bak.exists() {
                std::fs::remove_file(&bak).map_err(|error| {
                    EngineError::io("failed to remove old credentials backup", &bak, error)
                })?;
            }
            std::fs::rename(&dest, &bak).map_err(|error| {
                EngineError::io("failed to back up existing credentials", &dest, error)
            })?;
            report.creds_backup = Some(root.join(DATA_DIR).join(format!("{CREDS_FILE}.bak")));
        }
        std::fs::rename(&system_creds, &dest)
            .map_err(|error| EngineError::io("failed to move credentials", &system_creds, error))?;
        report.creds_moved = true;
    }

    if system_data.is_dir() {
        let data = root.join(DATA_DIR);
        if data.exists() {
            std::fs::remove_dir_all(&data)
                .map_err(|error| {
                    EngineError::io("failed to replace data directory", &data, error)
                })?;
        }
        std::fs::rename(&system_data, &data)
            .map_err(|error| {
                EngineError::io("failed to move data directory", &system_data, error)
            })?;
        report.data_moved = true;
    }

    report.shortcuts_removed = remove_shortcuts(root)?;

    if system.exists() {
        std::fs::remove_dir_all(&system)
            .map_err(|error| EngineError::io("failed to remove system directory", &system, error))?;
        report.system_removed = true;
    }

    debug!("Migrated layout of {}: {report:?}", root.display());
    Ok(report)
}

fn remove_shortcuts(root: &Path) -> Result<usize, EngineError> {
    let entries = std::fs::read_dir(root)
        .map_err(|error| EngineError::io("failed to read instance directory", root, error))?;

    let mut removed = 0;
    for entry in entries {
        let path = entry
            .map_err(|error| EngineError::io("failed to read directory entry", root, error))?
            .path();
        let is_shortcut = path
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| ext.eq_ignore_ascii_case("lnk"));
        if is_shortcut && path.is_file() {
            std::fs::remove_file(&path)
                .map_err(|error| EngineError::io("failed to remove shortcut", &path, error))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Migrate every root that still uses the old layout. A failure on one root
/// is logged and does not stop the others.
pub fn migrate_all<I, P>(roots: I) -> Vec<MigrationOutcome>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    roots
        .into_iter()
        .filter(|root| needs_migration(root.as_ref()))
        .map(|root| {
            let root = root.as_ref().to_path_buf();
            let result = migrate_layout(&root);
            match &result {
                Ok(_) => info!("Migrated legacy layout in {}", root.display()),
                Err(error) => warn!("Failed to migrate {}: {error}", root.display()),
            }
            MigrationOutcome { root, result }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{migrate_all, migrate_layout, needs_migration};

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("parent should be created");
        }
        std::fs::write(path, contents).expect("file should be written");
    }

    fn legacy_root(root: &Path) {
        write(&root.join("system/creds.yml"), "token: legacy");
        write(&root.join("system/data/bot.db"), "rows");
        write(&root.join("system/NadekoBot.dll"), "old");
        write(&root.join("NadekoBot.lnk"), "shortcut");
        write(&root.join("Updater.LNK"), "shortcut");
        write(&root.join("readme.txt"), "keep");
    }

    #[test]
    fn flattens_layout_and_removes_shortcuts() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let root = temp.path();
        legacy_root(root);
        write(&root.join("data/stale.txt"), "replaced");
        assert!(needs_migration(root));

        let report = migrate_layout(root).expect("migration should succeed");

        assert!(report.creds_moved);
        assert!(report.creds_backup.is_none());
        assert!(report.data_moved);
        assert_eq!(report.shortcuts_removed, 2);
        assert!(report.system_removed);

        assert!(!root.join("system").exists());
        assert_eq!(
            std::fs::read_to_string(root.join("data/creds.yml")).expect("creds moved"),
            "token: legacy"
        );
        assert!(root.join("data/bot.db").is_file());
        assert!(!root.join("data/stale.txt").exists());
        assert!(!root.join("NadekoBot.lnk").exists());
        assert!(!root.join("Updater.LNK").exists());
        assert!(root.join("readme.txt").is_file());
        assert!(!needs_migration(root));
    }

    #[test]
    fn existing_creds_are_kept_as_bak() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let root = temp.path();
        legacy_root(root);
        write(&root.join("system/data/creds.yml"), "token: newer");
        write(&root.join("system/data/creds.yml.bak"), "token: ancient");

        let report = migrate_layout(root).expect("migration should succeed");

        assert_eq!(report.creds_backup, Some(root.join("data/creds.yml.bak")));
        assert_eq!(
            std::fs::read_to_string(root.join("data/creds.yml")).expect("creds moved"),
            "token: legacy"
        );
        assert_eq!(
            std::fs::read_to_string(root.join("data/creds.yml.bak")).expect("backup kept"),
            "token: newer"
        );
    }

    #[test]
    fn system_without_data_is_still_removed() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let root = temp.path();
        write(&root.join("system/creds.yml"), "token");

        let report = migrate_layout(root).expect("migration should succeed");

        assert!(!report.creds_moved);
        assert!(!report.data_moved);
        assert!(report.system_removed);
        assert!(!root.join("data").exists());
    }

    #[test]
    fn migrate_all_isolates_failures() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let good = temp.path().join("good");
        let modern = temp.path().join("modern");
        legacy_root(&good);
        write(&modern.join("data/bot.db"), "rows");

        let outcomes = migrate_all([&good, &modern, &temp.path().join("missing")]);

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].root, good);
        assert!(outcomes[0].result.is_ok());
        assert!(modern.join("data/bot.db").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn migrate_all_continues_after_failure() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let broken = temp.path().join("broken");
        let good = temp.path().join("good");
        legacy_root(&broken);
        legacy_root(&good);

        // root ignores directory permissions, so only assert when they bite
        std::fs::set_permissions(&broken, std::fs::Permissions::from_mode(0o555))
            .expect("permissions should be set");
        let read_only_enforced = std::fs::write(broken.join("write-check"), "x").is_err();

        let outcomes = migrate_all([&broken, &good]);

        std::fs::set_permissions(&broken, std::fs::Permissions::from_mode(0o755))
            .expect("permissions should be restored");

        assert_eq!(outcomes.len(), 2);
        if read_only_enforced {
            assert!(outcomes[0].result.is_err());
        }
        assert!(outcomes[1].result.is_ok());
        assert!(!good.join("system").exists());
    }
}
