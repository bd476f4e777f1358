//! Incremental media library scanner
//!
//! Directories are fingerprinted from the names of their importable files and
//! compared with the fingerprints stored by the previous pass. Only changed
//! directories are handed to the importer. Each directory is its own task on a
//! rayon pool, and a shared visited set keyed by canonical path keeps symlink
//! cycles from being walked twice.

pub mod config;
pub mod db;
pub mod error;
pub mod fingerprint;
pub mod import;
pub mod models;
pub mod progress;
pub mod scanner;
pub mod state;
pub mod task;

pub use config::{ScanConfig, ScanConfigBuilder};
pub use db::{DirectoryRecord, ScanDatabase};
pub use error::{ScanError, ScanErrorKind};
pub use fingerprint::{directory_fingerprint, empty_fingerprint};
pub use import::{FileImporter, Importer};
pub use models::{
    AccessToken, CancelToken, EntryClass, FileEntry, FileStatus, Fingerprint, ImportJob,
    ImportedDirectory, MediaType, ScanEvent, ScanProgress, ScanResult, ScannedFile, TaskOutcome,
};
pub use progress::{ProgressReporter, ScanPhase};
pub use scanner::{scan_directories, scan_library, LibraryScanner};
pub use state::{DirectoryHashIndex, FingerprintLookup, ScanState};
pub use task::{DirectoryScanTask, TaskQueue};
