//! Core data models for the media scanner

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ScanError;

/// Order-sensitive fingerprint of a directory's importable file list.
///
/// Every value is a valid fingerprint, including the one of an empty
/// directory. "Never scanned" is expressed as `Option::None`, never as a
/// sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Bit-preserving conversion for SQLite INTEGER columns
    pub fn to_i64(self) -> i64 {
        self.0 as i64
    }

    /// Inverse of [`Fingerprint::to_i64`]
    pub fn from_i64(value: i64) -> Self {
        Self(value as u64)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// How a file name is treated by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryClass {
    /// Imported and part of the directory fingerprint
    Importable,
    /// Handed to the importer as a possible cover, not fingerprinted
    CoverArt,
    /// Not relevant
    Ignored,
}

/// A file found directly inside a scanned directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Full path as enumerated (not canonicalized)
    pub path: PathBuf,
    /// File name without path
    pub name: String,
}

impl FileEntry {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name }
    }
}

/// Opaque read capability for a subtree.
///
/// The scanner never inspects it; it is cloned into every child task and
/// every import job so the importer can use whatever the caller put in.
#[derive(Clone, Default)]
pub struct AccessToken {
    inner: Option<Arc<dyn Any + Send + Sync>>,
}

impl AccessToken {
    /// A token carrying no capability
    pub fn none() -> Self {
        Self::default()
    }

    /// Wrap a caller-defined capability
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Some(Arc::new(value)),
        }
    }

    /// Borrow the capability if it is of type `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    /// Whether two tokens share the same capability
    pub fn same_as(&self, other: &AccessToken) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("present", &self.inner.is_some())
            .finish()
    }
}

/// Shared, one-way cancellation flag for a scan session
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Cannot be undone.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Unit of work handed to the import collaborator for one changed directory
#[derive(Debug, Clone)]
pub struct ImportJob {
    /// Directory path as scanned (the fingerprint key)
    pub directory: PathBuf,
    /// Fingerprint computed in this pass
    pub fingerprint: Fingerprint,
    /// Whether the store already had a fingerprint for this directory
    pub prior_record_existed: bool,
    /// Importable files, in enumeration order
    pub import_candidates: Vec<FileEntry>,
    /// Possible cover art files
    pub cover_candidates: Vec<FileEntry>,
    /// Capability forwarded from the scan task
    pub token: AccessToken,
}

/// What the importer produced for one [`ImportJob`]
#[derive(Debug, Clone, Default)]
pub struct ImportedDirectory {
    pub files: Vec<ScannedFile>,
    pub cover: Option<PathBuf>,
}

/// How a scan task ended
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// Directory processed; its outcome event and children were submitted
    Completed,
    /// Stopped cooperatively because cancellation was requested
    Cancelled,
    /// The directory itself could not be read
    Failed(ScanError),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }
}

/// Notifications produced while a scan runs
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Directory changed (or is new) and holds nothing to import
    DirectoryHashed {
        directory: PathBuf,
        is_new: bool,
        fingerprint: Fingerprint,
    },
    /// Directory fingerprint equals the stored one
    DirectoryUnchanged { directory: PathBuf },
    /// Import of a changed directory finished
    DirectoryImported {
        directory: PathBuf,
        fingerprint: Fingerprint,
        is_new: bool,
        imported: ImportedDirectory,
    },
    /// Import of a changed directory failed
    ImportFailed { directory: PathBuf, error: ScanError },
    /// A directory scan task finished running
    TaskFinished {
        directory: PathBuf,
        outcome: TaskOutcome,
    },
}

impl ScanEvent {
    /// Directory the event refers to
    pub fn directory(&self) -> &Path {
        match self {
            ScanEvent::DirectoryHashed { directory, .. }
            | ScanEvent::DirectoryUnchanged { directory }
            | ScanEvent::DirectoryImported { directory, .. }
            | ScanEvent::ImportFailed { directory, .. }
            | ScanEvent::TaskFinished { directory, .. } => directory,
        }
    }
}

/// File status in incremental scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// New file (not in previous scan)
    #[default]
    New,
    /// Modified file (size or mtime changed)
    Modified,
    /// Unchanged file (same as previous scan)
    Unchanged,
}

impl FileStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::New => "new",
            FileStatus::Modified => "modified",
            FileStatus::Unchanged => "unchanged",
        }
    }
}

/// Media type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Video files (mp4, mkv, avi, etc.)
    Video,
    /// Image files (jpg, png, webp, etc.)
    Image,
    /// Audio files (mp3, flac, wav, etc.)
    Audio,
    /// Unknown or unsupported media type
    Unknown,
}

impl MediaType {
    /// Infer media type from file extension
    pub fn from_extension(ext: &str) -> Self {
        let ext_lower = ext.to_lowercase();
        match ext_lower.as_str() {
            "mp4" | "mkv" | "avi" | "wmv" | "flv" | "mov" | "webm" | "m4v" | "ts" | "rmvb" => {
                MediaType::Video
            }
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "tiff" | "tif" => MediaType::Image,
            "mp3" | "flac" | "wav" | "aac" | "ogg" | "opus" | "wma" | "m4a" | "aiff" | "aif"
            | "wv" => MediaType::Audio,
            _ => MediaType::Unknown,
        }
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Image => "image",
            MediaType::Audio => "audio",
            MediaType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An imported file with its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedFile {
    /// Full path to the file
    pub path: PathBuf,
    /// Directory the file was found in
    pub directory: PathBuf,
    /// File name without path
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Modification time as Unix timestamp
    pub mtime: i64,
    /// Creation time as Unix timestamp
    pub ctime: i64,
    /// File extension (lowercase, without dot)
    pub extension: String,
    /// Inferred media type
    pub media_type: MediaType,
    /// File content hash (MD5 or partial hash)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Whether the hash is a partial hash (for large files)
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_partial_hash: bool,
    /// File status (new/modified/unchanged)
    pub status: FileStatus,
}

impl ScannedFile {
    /// Create a new ScannedFile with basic metadata
    pub fn new(
        path: PathBuf,
        directory: PathBuf,
        name: String,
        size: u64,
        mtime: i64,
        ctime: i64,
        extension: String,
    ) -> Self {
        let media_type = MediaType::from_extension(&extension);
        Self {
            path,
            directory,
            name,
            size,
            mtime,
            ctime,
            extension,
            media_type,
            hash: None,
            is_partial_hash: false,
            status: FileStatus::New,
        }
    }

    /// Set the file hash
    pub fn with_hash(mut self, hash: String, is_partial: bool) -> Self {
        self.hash = Some(hash);
        self.is_partial_hash = is_partial;
        self
    }

    /// Set the file status
    pub fn with_status(mut self, status: FileStatus) -> Self {
        self.status = status;
        self
    }

    /// Path in the normalized form used as database key
    pub fn key(&self) -> String {
        path_key(&self.path)
    }
}

/// Encode a path as the string used for database keys.
///
/// Distinct paths always give distinct keys. On Unix, bytes that are not
/// UTF-8 become `\xNN` and a literal backslash is doubled.
#[cfg(not(windows))]
pub fn path_key(path: &Path) -> String {
    use std::fmt::Write;

    let bytes = path.as_os_str().as_encoded_bytes();
    if let Ok(text) = std::str::from_utf8(bytes) {
        if !text.contains('\\') {
            return text.to_owned();
        }
    }
    let mut key = String::with_capacity(bytes.len() + 8);
    for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            if c == '\\' {
                key.push_str("\\\\");
            } else {
                key.push(c);
            }
        }
        for byte in chunk.invalid() {
            let _ = write!(key, "\\x{:02x}", byte);
        }
    }
    key
}

/// Encode a path as the string used for database keys, with `/` separators.
#[cfg(windows)]
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Result of a library scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResult {
    /// Directory tasks that completed
    pub total_dirs: u64,
    /// Directories whose fingerprint matched the stored one
    pub unchanged_dirs: u64,
    /// Changed or new directories with nothing to import
    pub hashed_dirs: u64,
    /// Directories handed to the importer and imported
    pub imported_dirs: u64,
    /// Directories that could not be read
    pub failed_dirs: u64,
    /// Tasks stopped by cancellation
    pub cancelled_tasks: u64,
    /// Stored directories that no longer exist and were removed
    pub purged_dirs: u64,
    /// Number of files imported in this pass
    pub total_files: u64,
    /// Number of new files
    pub new_files: u64,
    /// Number of modified files
    pub modified_files: u64,
    /// Number of re-imported files that did not change
    pub unchanged_files: u64,
    /// Number of deleted files
    pub deleted_files: u64,
    /// Imported files with metadata
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ScannedFile>,
    /// List of deleted file paths
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deleted_paths: Vec<String>,
    /// Errors encountered during scanning
    #[serde(skip)]
    pub errors: Vec<ScanError>,
    /// Whether the scan was cancelled before finishing
    pub cancelled: bool,
    /// Total scan duration in milliseconds
    pub duration_ms: u64,
}

impl ScanResult {
    /// Create a new empty scan result
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of errors
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Check if the scan completed without errors or cancellation
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }
}

/// Progress information during a scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanProgress {
    /// Directory tasks finished so far
    pub scanned_dirs: u64,
    /// Unchanged directories so far
    pub unchanged_dirs: u64,
    /// Directories imported so far
    pub imported_dirs: u64,
    /// Files imported so far
    pub imported_files: u64,
    /// Last directory reported
    pub current_dir: String,
    /// Elapsed time in milliseconds
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_from_extension() {
        assert_eq!(MediaType::from_extension("mp4"), MediaType::Video);
        assert_eq!(MediaType::from_extension("MKV"), MediaType::Video);
        assert_eq!(MediaType::from_extension("JPEG"), MediaType::Image);
        assert_eq!(MediaType::from_extension("mp3"), MediaType::Audio);
        assert_eq!(MediaType::from_extension("FLAC"), MediaType::Audio);
        assert_eq!(MediaType::from_extension("txt"), MediaType::Unknown);
    }

    #[test]
    fn test_fingerprint_sqlite_conversion_keeps_high_bit() {
        let fp = Fingerprint(u64::MAX - 7);
        assert!(fp.to_i64() < 0);
        assert_eq!(Fingerprint::from_i64(fp.to_i64()), fp);
    }

    #[test]
    fn test_access_token_downcast_and_identity() {
        let token = AccessToken::new(String::from("bookmark"));
        let clone = token.clone();
        assert_eq!(clone.downcast_ref::<String>().map(String::as_str), Some("bookmark"));
        assert!(clone.downcast_ref::<u32>().is_none());
        assert!(token.same_as(&clone));
        assert!(!token.same_as(&AccessToken::new(String::from("bookmark"))));
        assert!(AccessToken::none().same_as(&AccessToken::none()));
    }

    #[test]
    fn test_cancel_token_is_shared_and_sticky() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_file_entry_name() {
        let entry = FileEntry::new(PathBuf::from("/music/a.mp3"));
        assert_eq!(entry.name, "a.mp3");
    }

    #[test]
    fn test_path_key_plain_paths_are_unchanged() {
        assert_eq!(path_key(Path::new("/music/a b/ü.mp3")), "/music/a b/ü.mp3");
    }

    #[cfg(unix)]
    #[test]
    fn test_path_key_is_injective_on_unix() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let ff = path_key(&Path::new("/m").join(OsStr::from_bytes(b"\xff.mp3")));
        let fe = path_key(&Path::new("/m").join(OsStr::from_bytes(b"\xfe.mp3")));
        assert_eq!(ff, "/m/\\xff.mp3");
        assert_ne!(ff, fe);

        let escaped_lookalike = path_key(Path::new("/m/\\xff.mp3"));
        assert_eq!(escaped_lookalike, "/m/\\\\xff.mp3");
        assert_ne!(escaped_lookalike, ff);

        assert_ne!(path_key(Path::new("a\\b")), path_key(Path::new("a/b")));
    }

    #[test]
    fn test_scan_result_default() {
        let result = ScanResult::new();
        assert_eq!(result.total_dirs, 0);
        assert_eq!(result.error_count(), 0);
        assert!(result.is_success());
    }
}
