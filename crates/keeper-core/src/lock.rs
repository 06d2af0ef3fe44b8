use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::debug;
use uuid::Uuid;

use crate::error::EngineError;

/// Exclusive, cross-process claim on one instance.
///
/// Any keeper process that runs, installs into, rolls back, moves or removes
/// an instance holds this for the duration. The OS drops the lock when the
/// file is closed, so a crashed process never leaves a stale claim behind.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    #[must_use]
    pub fn lock_path(locks_dir: &Path, instance_id: Uuid) -> PathBuf {
        locks_dir.join(format!("{instance_id}.lock"))
    }

    /// Take the lock for `instance_id`, or `None` when another holder has it.
    ///
    /// # Errors
    /// Returns an I/O error when the lock file cannot be created or locked
    /// for a reason other than contention.
    pub fn try_acquire(locks_dir: &Path, instance_id: Uuid) -> Result<Option<Self>, EngineError> {
        std::fs::create_dir_all(locks_dir)
            .map_err(|error| {
                EngineError::io("failed to create locks directory", locks_dir, error)
            })?;

        let path = Self::lock_path(locks_dir, instance_id);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|error| EngineError::io("failed to open instance lock file", &path, error))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(error) if is_contended(&error) => {
                debug!("Instance {instance_id} is locked by another holder");
                return Ok(None);
            }
            Err(error) => {
                return Err(EngineError::io("failed to acquire instance lock", &path, error));
            }
        }

        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)).map(|_| ()))
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .map_err(|error| {
                EngineError::io("failed to write instance lock metadata", &path, error)
            })?;

        Ok(Some(Self { file, path }))
    }

    /// Whether some other holder currently has the lock for `instance_id`.
    /// Errors while checking count as not held.
    #[must_use]
    pub fn is_held(locks_dir: &Path, instance_id: Uuid) -> bool {
        let path = Self::lock_path(locks_dir, instance_id);
        let Ok(file) = OpenOptions::new().read(true).write(true).open(&path) else {
            return false;
        };
        match file.try_lock_exclusive() {
            // Closing the file releases this check's own lock.
            Ok(()) => false,
            Err(error) => is_contended(&error),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        debug!("Releasing {}", self.path.display());
        // Closing the file would release it too; this just makes it prompt.
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::InstanceLock;

    #[test]
    fn second_acquire_is_refused_while_held() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let locks = temp.path().join("locks");
        let id = Uuid::new_v4();

        let held = InstanceLock::try_acquire(&locks, id)
            .expect("lock should be taken")
            .expect("nobody else holds it");
        assert!(held.path().is_file());

        let second = InstanceLock::try_acquire(&locks, id).expect("contention is not an error");
        assert!(second.is_none());
        assert!(InstanceLock::is_held(&locks, id));
    }

    #[test]
    fn dropping_the_lock_releases_it() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let id = Uuid::new_v4();

        let held = InstanceLock::try_acquire(temp.path(), id)
            .expect("lock should be taken")
            .expect("nobody else holds it");
        drop(held);

        assert!(!InstanceLock::is_held(temp.path(), id));
        assert!(
            InstanceLock::try_acquire(temp.path(), id)
                .expect("lock should be taken")
                .is_some()
        );
    }

    #[test]
    fn locks_are_per_instance() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let first = Uuid::new_v4();

        let _held = InstanceLock::try_acquire(temp.path(), first)
            .expect("lock should be taken")
            .expect("nobody else holds it");

        assert!(!InstanceLock::is_held(temp.path(), Uuid::new_v4()));
        assert!(!InstanceLock::is_held(&temp.path().join("missing"), first));
    }

    #[cfg(unix)]
    #[test]
    fn holder_pid_is_recorded() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let held = InstanceLock::try_acquire(temp.path(), Uuid::new_v4())
            .expect("lock should be taken")
            .expect("nobody else holds it");

        let contents = std::fs::read_to_string(held.path()).expect("lock file readable");
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}
