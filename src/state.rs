//! Shared ledger for one scan session.
//!
//! All methods take `&self` and are safe to call from any worker. The visited
//! set is the only piece of state workers write to; claiming a directory is a
//! single atomic insert so two routes to the same canonical path cannot both
//! win.

use dashmap::DashSet;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ScanConfig;
use crate::models::{path_key, CancelToken, EntryClass, Fingerprint};

/// Read access to fingerprints stored by earlier scans
pub trait FingerprintLookup: Send + Sync {
    /// `None` means the directory was never scanned before
    fn prior_fingerprint(&self, directory: &Path) -> Option<Fingerprint>;
}

/// In-memory snapshot of stored directory fingerprints
#[derive(Debug, Clone, Default)]
pub struct DirectoryHashIndex {
    hashes: HashMap<String, Fingerprint>,
}

impl DirectoryHashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, directory: &Path, fingerprint: Fingerprint) {
        self.hashes.insert(path_key(directory), fingerprint);
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl FromIterator<(String, Fingerprint)> for DirectoryHashIndex {
    fn from_iter<T: IntoIterator<Item = (String, Fingerprint)>>(iter: T) -> Self {
        Self {
            hashes: iter.into_iter().collect(),
        }
    }
}

impl FingerprintLookup for DirectoryHashIndex {
    fn prior_fingerprint(&self, directory: &Path) -> Option<Fingerprint> {
        self.hashes.get(&path_key(directory)).copied()
    }
}

/// Process-wide state for a single scan pass
pub struct ScanState {
    visited: DashSet<PathBuf>,
    rules: ScanConfig,
    prior: Arc<dyn FingerprintLookup>,
    cancel: CancelToken,
}

impl ScanState {
    pub fn new(config: &ScanConfig, prior: Arc<dyn FingerprintLookup>, cancel: CancelToken) -> Self {
        let rules = ScanConfig {
            roots: Vec::new(),
            extensions: lowercase_set(&config.extensions),
            cover_extensions: lowercase_set(&config.cover_extensions),
            ..config.clone()
        };
        Self {
            visited: DashSet::new(),
            rules,
            prior,
            cancel,
        }
    }

    /// Claim a canonical directory path for this session.
    ///
    /// Returns `true` only for the first caller; later calls are no-ops.
    pub fn mark_visited(&self, canonical: PathBuf) -> bool {
        self.visited.insert(canonical)
    }

    pub fn is_visited(&self, canonical: &Path) -> bool {
        self.visited.contains(canonical)
    }

    /// Number of directories claimed so far
    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Whether a directory must never be descended into
    pub fn is_blacklisted(&self, path: &Path) -> bool {
        if self.rules.is_blacklisted_path(path) {
            return true;
        }
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.rules.should_ignore_dir(name))
    }

    pub fn lookup_prior_fingerprint(&self, directory: &Path) -> Option<Fingerprint> {
        self.prior.prior_fingerprint(directory)
    }

    pub fn should_cancel(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    /// Classify a file name by its extension
    pub fn classify(&self, file_name: &str) -> EntryClass {
        if self.rules.is_hidden(file_name) {
            return EntryClass::Ignored;
        }
        let ext = match Path::new(file_name).extension().and_then(|e| e.to_str()) {
            Some(ext) => ext,
            None => return EntryClass::Ignored,
        };
        if self.rules.should_include_extension(ext) {
            EntryClass::Importable
        } else if self.rules.is_cover_extension(ext) {
            EntryClass::CoverArt
        } else {
            EntryClass::Ignored
        }
    }
}

fn lowercase_set(set: &HashSet<String>) -> HashSet<String> {
    set.iter().map(|e| e.to_lowercase()).collect()
}

impl std::fmt::Debug for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanState")
            .field("visited", &self.visited.len())
            .field("blacklist", &self.rules.blacklist)
            .field("cancelled", &self.should_cancel())
            .finish()
    }
}
