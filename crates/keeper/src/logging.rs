use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use keeper_platform::AppPaths;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};

/// Append-mode log file that reopens itself when the file is deleted while
/// the process is running.
struct ReopeningLogFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl ReopeningLogFile {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = Self::open_append(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    fn open_append(path: &Path) -> io::Result<File> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() || !self.path.exists() {
            *guard = Some(Self::open_append(&self.path)?);
        }
        match guard.as_mut() {
            Some(file) => f(file),
            None => Err(io::Error::other("log file not available")),
        }
    }
}

impl Write for ReopeningLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(File::flush)
    }
}

/// Keep the newest half of the log, cut at a line boundary.
fn trim_oversized_log(log_path: &Path, max_log_size: u64) {
    if let Ok(metadata) = std::fs::metadata(log_path)
        && metadata.len() > max_log_size
        && let Ok(contents) = std::fs::read(log_path)
    {
        let half = contents.len() / 2;
        let keep_from = contents[half..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(half, |pos| half + pos + 1);
        let _ = std::fs::write(log_path, &contents[keep_from..]);
    }
}

/// Log to `<data_dir>/debug.log` and, for warnings (or everything in debug
/// builds), to the terminal.
pub fn init_logging(paths: &AppPaths, debug_enabled: bool, max_log_size: u64) {
    let _ = paths.ensure_dirs();
    let log_path = paths.log_file();
    trim_oversized_log(&log_path, max_log_size);

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("keeper")
        .build();

    let term_level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        term_level,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Ok(writer) = ReopeningLogFile::open(log_path.clone()) {
        loggers.push(WriteLogger::new(LevelFilter::Debug, config, writer));
    }
    let _ = CombinedLogger::init(loggers);

    set_logging_enabled(debug_enabled);
    log::debug!("Debug logging initialized, log file: {}", log_path.display());
}

/// Debug logging on, or warnings only.
pub fn set_logging_enabled(enabled: bool) {
    if enabled {
        log::set_max_level(LevelFilter::Debug);
    } else {
        log::set_max_level(LevelFilter::Warn);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::{ReopeningLogFile, set_logging_enabled, trim_oversized_log};

    #[test]
    fn log_file_is_recreated_after_deletion() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let log_path = temp.path().join("logs/debug.log");
        let mut writer = ReopeningLogFile::open(log_path.clone()).expect("log should open");

        writer.write_all(b"first\n").expect("first write should succeed");
        std::fs::remove_file(&log_path).expect("log should be removable");
        writer
            .write_all(b"second\n")
            .expect("write after deletion should recreate the file");

        assert_eq!(
            std::fs::read_to_string(&log_path).expect("log should be readable"),
            "second\n"
        );
    }

    #[test]
    fn oversized_log_keeps_newest_lines() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let log_path = temp.path().join("debug.log");
        std::fs::write(&log_path, "a-1\na-2\na-3\na-4\na-5\na-6\n").expect("log written");

        trim_oversized_log(&log_path, 8);

        let trimmed = std::fs::read_to_string(&log_path).expect("log should be readable");
        assert!(!trimmed.contains("a-1"));
        assert!(trimmed.ends_with("a-6\n"));
        assert!(trimmed.starts_with("a-"));
    }

    #[test]
    fn small_log_is_left_alone() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let log_path = temp.path().join("debug.log");
        std::fs::write(&log_path, "short\n").expect("log written");

        trim_oversized_log(&log_path, 1024);

        assert_eq!(
            std::fs::read_to_string(&log_path).expect("log should be readable"),
            "short\n"
        );
    }

    #[test]
    fn toggling_changes_global_level() {
        set_logging_enabled(true);
        assert_eq!(log::max_level(), log::LevelFilter::Debug);

        set_logging_enabled(false);
        assert_eq!(log::max_level(), log::LevelFilter::Warn);
    }
}
