//! Runtime configuration and path resolution.
//!
//! Resolution order for each directory: explicit value (CLI flag), then the
//! environment variable, then the platform default from [`ProjectDirs`].

use crate::cache::DEFAULT_CACHE_NAME;
use crate::loader::DEFAULT_MANIFEST_PATH;
use directories::ProjectDirs;
use std::path::PathBuf;

pub const DATA_ROOT_ENV: &str = "STUDYGUIDE_DATA_ROOT";
pub const STORAGE_DIR_ENV: &str = "STUDYGUIDE_STORAGE_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Directory that manifest and source paths are relative to.
    pub data_root: PathBuf,
    /// Manifest path relative to `data_root`.
    pub manifest: String,
    /// Directory holding the definitions blob.
    pub storage_dir: PathBuf,
    /// Directory holding versioned offline caches.
    pub cache_root: PathBuf,
    pub cache_name: String,
    /// Assets fetched when the offline cache is installed.
    pub precache: Vec<String>,
    /// Read sources through the offline cache.
    pub offline: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let storage_dir = default_storage_dir();
        Self {
            data_root: PathBuf::from("."),
            manifest: DEFAULT_MANIFEST_PATH.to_string(),
            cache_root: storage_dir.join("cache"),
            storage_dir,
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            precache: vec![DEFAULT_MANIFEST_PATH.to_string()],
            offline: false,
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = env_path(DATA_ROOT_ENV) {
            config.data_root = root;
        }
        if let Some(dir) = env_path(STORAGE_DIR_ENV) {
            config.set_storage_dir(dir);
        }
        config
    }

    /// Moves the storage directory; the cache root follows it.
    pub fn set_storage_dir(&mut self, dir: PathBuf) {
        self.cache_root = dir.join("cache");
        self.storage_dir = dir;
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Platform data directory, e.g. `~/.local/share/studyguide` on Linux.
fn default_storage_dir() -> PathBuf {
    ProjectDirs::from("dev", "studyguide", "studyguide")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".studyguide"))
}
