use std::path::{Path, PathBuf};

use keeper_platform::AppPaths;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FEED_URL: &str = "https://api.github.com/repos/nadeko-bot/nadekobot/releases/latest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Product base name used in asset names and the feed `User-Agent`.
    #[serde(default = "default_product")]
    pub product: String,

    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    #[serde(default = "default_executable_name")]
    pub executable_name: String,

    /// Parent folder for new instances; the per-user documents folder when
    /// unset.
    #[serde(default)]
    pub instances_dir: Option<PathBuf>,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

fn default_product() -> String {
    "nadeko".to_string()
}

fn default_feed_url() -> String {
    DEFAULT_FEED_URL.to_string()
}

fn default_executable_name() -> String {
    "NadekoBot".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            product: default_product(),
            feed_url: default_feed_url(),
            executable_name: default_executable_name(),
            instances_dir: None,
            http_timeout_secs: default_http_timeout(),
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }
}

impl AppSettings {
    pub fn load(paths: &AppPaths) -> Self {
        Self::load_from(&paths.settings_file())
    }

    /// Missing or unreadable files fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, paths: &AppPaths) -> Result<(), std::io::Error> {
        paths.ensure_dirs()?;
        self.save_to(&paths.settings_file())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
    }

    pub fn instances_dir(&self, paths: &AppPaths) -> PathBuf {
        self.instances_dir
            .clone()
            .unwrap_or_else(|| paths.instances_dir.clone())
    }
}
