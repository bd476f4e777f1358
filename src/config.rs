//! Configuration for the media scanner

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::ScanError;

/// Default large file threshold (100 MB)
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Default interval between progress lines
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;

/// Configuration for the scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Root directories to scan
    pub roots: Vec<PathBuf>,

    /// Extensions of files that get imported (lowercase, without dot)
    pub extensions: HashSet<String>,

    /// Extensions of files that may serve as cover art
    pub cover_extensions: HashSet<String>,

    /// Directory names to never descend into
    pub ignore_dirs: HashSet<String>,

    /// Directory path prefixes to never descend into
    pub blacklist: Vec<PathBuf>,

    /// Whether entries starting with '.' (files and directories) are skipped
    #[serde(alias = "skip_hidden_dirs")]
    pub skip_hidden: bool,

    /// Whether the importer computes file content hashes
    pub compute_hash: bool,

    /// Threshold for using partial hash (bytes)
    /// Files larger than this use partial hash (first 1MB + last 1MB)
    pub large_file_threshold: u64,

    /// Number of worker threads
    /// 0 means auto-detect (CPU cores × 2)
    pub num_threads: usize,

    /// Database path for storing results
    pub db_path: Option<PathBuf>,

    /// Whether progress lines are written to stderr
    pub show_progress: bool,

    /// Minimum interval between progress lines
    pub progress_interval_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            extensions: Self::default_extensions(),
            cover_extensions: Self::default_cover_extensions(),
            ignore_dirs: Self::default_ignore_dirs(),
            blacklist: Vec::new(),
            skip_hidden: true,
            compute_hash: false,
            large_file_threshold: DEFAULT_LARGE_FILE_THRESHOLD,
            num_threads: 0,
            db_path: None,
            show_progress: false,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl ScanConfig {
    /// Create a new config with the given root directories
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            ..Default::default()
        }
    }

    /// Create a config builder
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::new()
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ScanError::config(path.to_path_buf(), e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| ScanError::config(path.to_path_buf(), e.to_string()))
    }

    /// Get the default video extensions
    pub fn default_video_extensions() -> HashSet<String> {
        [
            "mp4", "mkv", "avi", "wmv", "flv", "mov", "webm", "m4v", "ts", "rmvb",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Get the default audio extensions
    pub fn default_audio_extensions() -> HashSet<String> {
        [
            "mp3", "flac", "wav", "aac", "ogg", "opus", "wma", "m4a", "aiff", "aif", "wv",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Get all default importable extensions
    pub fn default_extensions() -> HashSet<String> {
        let mut extensions = Self::default_audio_extensions();
        extensions.extend(Self::default_video_extensions());
        extensions
    }

    /// Get the default cover art extensions
    pub fn default_cover_extensions() -> HashSet<String> {
        ["jpg", "jpeg", "png", "gif", "webp", "bmp"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Get the default directories to ignore
    pub fn default_ignore_dirs() -> HashSet<String> {
        [
            "$RECYCLE.BIN",
            "System Volume Information",
            ".Trash",
            ".Trash-1000",
            "@eaDir",
            ".git",
            ".svn",
            "node_modules",
            "__pycache__",
            ".cache",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Check if an extension marks an importable file
    pub fn should_include_extension(&self, ext: &str) -> bool {
        self.extensions.contains(&ext.to_lowercase())
    }

    /// Check if an extension marks a cover art candidate
    pub fn is_cover_extension(&self, ext: &str) -> bool {
        self.cover_extensions.contains(&ext.to_lowercase())
    }

    /// Check if an entry name is hidden and hidden entries are skipped
    pub fn is_hidden(&self, name: &str) -> bool {
        self.skip_hidden && name.starts_with('.')
    }

    /// Check if a directory name should be ignored
    pub fn should_ignore_dir(&self, name: &str) -> bool {
        self.is_hidden(name) || self.ignore_dirs.contains(name)
    }

    /// Check if a directory path falls under a blacklisted prefix
    pub fn is_blacklisted_path(&self, path: &Path) -> bool {
        self.blacklist.iter().any(|prefix| path.starts_with(prefix))
    }

    /// Get the effective number of threads
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            // Auto-detect: CPU cores × 2
            std::thread::available_parallelism()
                .map(|p| p.get() * 2)
                .unwrap_or(4)
        } else {
            self.num_threads
        }
    }
}

/// Builder for ScanConfig
#[derive(Debug, Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config
    pub fn from_config(config: ScanConfig) -> Self {
        Self { config }
    }

    /// Set the root directories
    pub fn roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.config.roots = roots;
        self
    }

    /// Add a root directory
    pub fn add_root(mut self, root: PathBuf) -> Self {
        self.config.roots.push(root);
        self
    }

    /// Set the importable extensions
    pub fn extensions(mut self, extensions: HashSet<String>) -> Self {
        self.config.extensions = extensions;
        self
    }

    /// Import audio files only
    pub fn audio_only(mut self) -> Self {
        self.config.extensions = ScanConfig::default_audio_extensions();
        self
    }

    /// Import video files only
    pub fn video_only(mut self) -> Self {
        self.config.extensions = ScanConfig::default_video_extensions();
        self
    }

    /// Set the cover art extensions
    pub fn cover_extensions(mut self, extensions: HashSet<String>) -> Self {
        self.config.cover_extensions = extensions;
        self
    }

    /// Set the directories to ignore
    pub fn ignore_dirs(mut self, dirs: HashSet<String>) -> Self {
        self.config.ignore_dirs = dirs;
        self
    }

    /// Add a directory to ignore
    pub fn add_ignore_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.ignore_dirs.insert(dir.into());
        self
    }

    /// Add a blacklisted directory prefix
    pub fn add_blacklist(mut self, path: PathBuf) -> Self {
        self.config.blacklist.push(path);
        self
    }

    /// Skip or list hidden files and directories
    pub fn skip_hidden(mut self, enabled: bool) -> Self {
        self.config.skip_hidden = enabled;
        self
    }

    /// Enable or disable hash computation
    pub fn compute_hash(mut self, enabled: bool) -> Self {
        self.config.compute_hash = enabled;
        self
    }

    /// Set the large file threshold
    pub fn large_file_threshold(mut self, threshold: u64) -> Self {
        self.config.large_file_threshold = threshold;
        self
    }

    /// Set the number of threads
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.num_threads = threads;
        self
    }

    /// Set the database path
    pub fn db_path(mut self, path: PathBuf) -> Self {
        self.config.db_path = Some(path);
        self
    }

    /// Enable or disable progress lines
    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.config.show_progress = enabled;
        self
    }

    /// Build the config
    pub fn build(self) -> ScanConfig {
        self.config
    }
}
