//! Import collaborator: turns an [`ImportJob`] into file records.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::models::{FileEntry, ImportJob, ImportedDirectory, ScannedFile};

/// Partial hash window at each end of a large file
const PARTIAL_HASH_CHUNK: usize = 1024 * 1024;

/// Cover file base names, most preferred first
const PREFERRED_COVER_NAMES: &[&str] = &["cover", "front", "album", "folder"];

/// Executes import jobs handed off by scan tasks. Runs on worker threads.
pub trait Importer: Send + Sync {
    fn import(&self, job: &ImportJob) -> Result<ImportedDirectory, ScanError>;
}

/// Default importer: reads file metadata and optionally a content hash
#[derive(Debug, Clone)]
pub struct FileImporter {
    compute_hash: bool,
    large_file_threshold: u64,
}

impl FileImporter {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            compute_hash: config.compute_hash,
            large_file_threshold: config.large_file_threshold,
        }
    }
}

impl Importer for FileImporter {
    fn import(&self, job: &ImportJob) -> Result<ImportedDirectory, ScanError> {
        let files = job
            .import_candidates
            .iter()
            .filter_map(|entry| self.process_file(&job.directory, entry))
            .collect();
        Ok(ImportedDirectory {
            files,
            cover: select_cover(&job.cover_candidates),
        })
    }
}

impl FileImporter {
    /// Build a record for one file; `None` if it vanished since listing
    fn process_file(&self, directory: &Path, entry: &FileEntry) -> Option<ScannedFile> {
        let path = entry.path.as_path();
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                log::debug!("Skipping {:?}: {}", path, e);
                return None;
            }
        };

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let ctime = metadata
            .created()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(mtime);

        let mut scanned = ScannedFile::new(
            path.to_path_buf(),
            directory.to_path_buf(),
            entry.name.clone(),
            metadata.len(),
            mtime,
            ctime,
            extension,
        );

        if self.compute_hash {
            match compute_file_hash(path, self.large_file_threshold) {
                Ok((hash, is_partial)) => scanned = scanned.with_hash(hash, is_partial),
                Err(e) => log::warn!("Hashing failed for {:?}: {}", path, e.message),
            }
        }

        Some(scanned)
    }
}

/// Compute file hash (MD5)
/// For large files, compute partial hash (first 1MB + last 1MB)
pub fn compute_file_hash(path: &Path, large_file_threshold: u64) -> Result<(String, bool), ScanError> {
    let hash_err = |e: std::io::Error| ScanError::hash_error(path.to_path_buf(), e.to_string());

    let mut file = File::open(path).map_err(hash_err)?;
    let file_size = file.metadata().map_err(hash_err)?.len();
    let mut hasher = Md5::new();

    if file_size <= large_file_threshold {
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer).map_err(hash_err)?;
        hasher.update(&buffer);
        return Ok((format!("{:x}", hasher.finalize()), false));
    }

    let mut buffer = vec![0u8; PARTIAL_HASH_CHUNK];
    let bytes_read = file.read(&mut buffer).map_err(hash_err)?;
    hasher.update(&buffer[..bytes_read]);

    if file_size > PARTIAL_HASH_CHUNK as u64 {
        file.seek(SeekFrom::End(-(PARTIAL_HASH_CHUNK as i64)))
            .map_err(hash_err)?;
        let bytes_read = file.read(&mut buffer).map_err(hash_err)?;
        hasher.update(&buffer[..bytes_read]);
    }

    Ok((format!("{:x}", hasher.finalize()), true))
}

/// Pick the cover for a directory from its image files
pub fn select_cover(candidates: &[FileEntry]) -> Option<PathBuf> {
    let stem = |entry: &FileEntry| {
        Path::new(&entry.name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    };
    PREFERRED_COVER_NAMES
        .iter()
        .find_map(|preferred| candidates.iter().find(|c| stem(*c) == *preferred))
        .or_else(|| candidates.first())
        .map(|entry| entry.path.clone())
}
