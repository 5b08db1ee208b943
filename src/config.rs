//! Configuration for the model library

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::hash::DEFAULT_CHUNK_SIZE;

/// Default database file name, hidden inside the library directory
pub const DEFAULT_DATABASE_NAME: &str = ".cache.db";

/// Default number of files processed concurrently during a scan
pub const DEFAULT_SCAN_CONCURRENCY: usize = 4;

/// Default delay used to coalesce scan requests (milliseconds)
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Default time a query waits for the scan transaction to release the store
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// A file bundled with the application and extracted on first run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultContent {
    /// Path relative to the library directory
    pub name: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl DefaultContent {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Configuration for the library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Root directory holding models and animations
    pub library_dir: PathBuf,

    /// File name of the SQLite store inside the library directory
    pub database_name: String,

    /// Number of files hashed concurrently during a scan
    /// 0 means the default of 4
    pub scan_concurrency: usize,

    /// Delay used to coalesce non-immediate scan requests
    pub debounce_ms: u64,

    /// Chunk size used when streaming files into the digest
    pub hash_chunk_size: usize,

    /// Directory names to skip while walking
    pub ignore_dirs: HashSet<String>,

    /// Whether to watch the library directory for changes
    pub watch: bool,

    /// Whether opening the library schedules an immediate scan
    pub scan_on_open: bool,

    /// Whether to report scan progress as JSON lines on stderr
    pub progress: bool,

    /// How long queries and favorite updates wait on a busy store
    pub busy_timeout_ms: u64,

    /// Files extracted into the library directory when it is first created
    pub default_content: Vec<DefaultContent>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            library_dir: PathBuf::from("models"),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            scan_concurrency: DEFAULT_SCAN_CONCURRENCY,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            hash_chunk_size: DEFAULT_CHUNK_SIZE,
            ignore_dirs: Self::default_ignore_dirs(),
            watch: true,
            scan_on_open: true,
            progress: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            default_content: Vec::new(),
        }
    }
}

impl LibraryConfig {
    /// Create a new config for the given library directory
    pub fn new(library_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: library_dir.into(),
            ..Default::default()
        }
    }

    /// Create a config builder
    pub fn builder() -> LibraryConfigBuilder {
        LibraryConfigBuilder::new()
    }

    /// Get the default directories to ignore
    pub fn default_ignore_dirs() -> HashSet<String> {
        [
            "$RECYCLE.BIN",
            "System Volume Information",
            "__MACOSX",
            "node_modules",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Check if a directory should be ignored
    pub fn should_ignore_dir(&self, name: &str) -> bool {
        // Ignore hidden directories (starting with .)
        if name.starts_with('.') {
            return true;
        }
        self.ignore_dirs.contains(name)
    }

    /// Full path of the store
    pub fn database_path(&self) -> PathBuf {
        self.library_dir.join(&self.database_name)
    }

    /// Where a store that failed to open is moved before being recreated
    pub fn backup_database_path(&self) -> PathBuf {
        let name = match self.database_name.strip_suffix(".db") {
            Some(stem) => format!("{}-backup.db", stem),
            None => format!("{}-backup", self.database_name),
        };
        self.library_dir.join(name)
    }

    /// Get the effective scan concurrency
    pub fn effective_concurrency(&self) -> usize {
        if self.scan_concurrency == 0 {
            DEFAULT_SCAN_CONCURRENCY
        } else {
            self.scan_concurrency
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Builder for LibraryConfig
#[derive(Debug, Default)]
pub struct LibraryConfigBuilder {
    config: LibraryConfig,
}

impl LibraryConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the library directory
    pub fn library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.library_dir = dir.into();
        self
    }

    /// Set the database file name
    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.config.database_name = name.into();
        self
    }

    /// Set the number of files processed concurrently
    pub fn scan_concurrency(mut self, concurrency: usize) -> Self {
        self.config.scan_concurrency = concurrency;
        self
    }

    /// Set the coalescing delay in milliseconds
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.debounce_ms = ms;
        self
    }

    /// Set the hashing chunk size
    pub fn hash_chunk_size(mut self, size: usize) -> Self {
        self.config.hash_chunk_size = size;
        self
    }

    /// Add a directory to ignore
    pub fn add_ignore_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.ignore_dirs.insert(dir.into());
        self
    }

    /// Enable or disable filesystem watching
    pub fn watch(mut self, enabled: bool) -> Self {
        self.config.watch = enabled;
        self
    }

    /// Enable or disable the scan scheduled when the library opens
    pub fn scan_on_open(mut self, enabled: bool) -> Self {
        self.config.scan_on_open = enabled;
        self
    }

    /// Enable or disable progress reporting
    pub fn progress(mut self, enabled: bool) -> Self {
        self.config.progress = enabled;
        self
    }

    /// Set the busy timeout in milliseconds
    pub fn busy_timeout_ms(mut self, ms: u64) -> Self {
        self.config.busy_timeout_ms = ms;
        self
    }

    /// Add a file to extract on first run
    pub fn default_content(mut self, content: DefaultContent) -> Self {
        self.config.default_content.push(content);
        self
    }

    /// Build the config
    pub fn build(self) -> LibraryConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LibraryConfig::default();
        assert_eq!(config.database_name, DEFAULT_DATABASE_NAME);
        assert_eq!(config.scan_concurrency, DEFAULT_SCAN_CONCURRENCY);
        assert_eq!(config.hash_chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.watch);
        assert!(config.scan_on_open);
        assert!(!config.progress);
    }

    #[test]
    fn test_should_ignore_dir() {
        let config = LibraryConfig::default();
        assert!(config.should_ignore_dir(".git"));
        assert!(config.should_ignore_dir("__MACOSX"));
        assert!(!config.should_ignore_dir("Characters"));
    }

    #[test]
    fn test_database_paths() {
        let config = LibraryConfig::new("/models");
        assert_eq!(config.database_path(), PathBuf::from("/models/.cache.db"));
        assert_eq!(
            config.backup_database_path(),
            PathBuf::from("/models/.cache-backup.db")
        );

        let config = LibraryConfig::builder()
            .library_dir("/models")
            .database_name("index")
            .build();
        assert_eq!(config.backup_database_path(), PathBuf::from("/models/index-backup"));
    }

    #[test]
    fn test_config_builder() {
        let config = LibraryConfig::builder()
            .library_dir("/models")
            .scan_concurrency(0)
            .debounce_ms(5)
            .watch(false)
            .default_content(DefaultContent::new("default.vrm", b"glTF".to_vec()))
            .build();

        assert_eq!(config.effective_concurrency(), DEFAULT_SCAN_CONCURRENCY);
        assert_eq!(config.debounce(), Duration::from_millis(5));
        assert!(!config.watch);
        assert_eq!(config.default_content.len(), 1);
    }
}
