//! Per-directory scan task.
//!
//! A task lists one directory (no recursion), fingerprints its importable
//! files, compares the fingerprint with the stored one and decides between
//! "unchanged", "hashed" and an import handoff. Every unvisited
//! sub-directory becomes a new task on the queue, so the traversal grows as a
//! task graph instead of a call stack.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ScanError;
use crate::fingerprint::directory_fingerprint;
use crate::models::{AccessToken, EntryClass, FileEntry, ImportJob, ScanEvent, TaskOutcome};
use crate::state::ScanState;

/// Where a task sends the work and notifications it produces
pub trait TaskQueue {
    /// Schedule a sub-directory task
    fn queue_scan(&self, task: DirectoryScanTask);
    /// Schedule an import of a changed directory
    fn queue_import(&self, job: ImportJob);
    /// Publish a directory outcome
    fn emit(&self, event: ScanEvent);
}

/// Scan of a single directory, consumed by [`DirectoryScanTask::run`]
#[derive(Debug)]
pub struct DirectoryScanTask {
    state: Arc<ScanState>,
    directory: PathBuf,
    token: AccessToken,
}

#[derive(Debug, Default)]
struct Listing {
    import_candidates: Vec<FileEntry>,
    cover_candidates: Vec<FileEntry>,
    subdirs: Vec<(PathBuf, PathBuf)>,
}

impl DirectoryScanTask {
    /// Claim `directory` for this session and build its task.
    ///
    /// Returns `None` when the canonical directory was already claimed,
    /// through this path or another one (symlink cycles end here).
    pub fn claim(state: Arc<ScanState>, directory: PathBuf, token: AccessToken) -> Option<Self> {
        let canonical = fs::canonicalize(&directory).unwrap_or_else(|_| directory.clone());
        Self::claim_canonical(state, directory, canonical, token)
    }

    fn claim_canonical(
        state: Arc<ScanState>,
        directory: PathBuf,
        canonical: PathBuf,
        token: AccessToken,
    ) -> Option<Self> {
        if !state.mark_visited(canonical) {
            log::debug!("Already claimed, skipping {:?}", directory);
            return None;
        }
        Some(Self {
            state,
            directory,
            token,
        })
    }

    /// Directory as it was reached (not canonicalized)
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Process the directory and push its successors onto `queue`
    pub fn run(self, queue: &dyn TaskQueue) -> TaskOutcome {
        if self.state.should_cancel() {
            return TaskOutcome::Cancelled;
        }

        let listing = match self.enumerate() {
            Ok(listing) => listing,
            Err(e) => {
                log::warn!("Cannot read directory {:?}: {}", self.directory, e.message);
                return TaskOutcome::Failed(e);
            }
        };

        if self.state.should_cancel() {
            return TaskOutcome::Cancelled;
        }

        let Listing {
            import_candidates,
            cover_candidates,
            subdirs,
        } = listing;

        let fingerprint = directory_fingerprint(import_candidates.iter().map(|f| &f.path));
        let prior = self.state.lookup_prior_fingerprint(&self.directory);

        if prior == Some(fingerprint) {
            queue.emit(ScanEvent::DirectoryUnchanged {
                directory: self.directory.clone(),
            });
        } else if import_candidates.is_empty() {
            queue.emit(ScanEvent::DirectoryHashed {
                directory: self.directory.clone(),
                is_new: prior.is_none(),
                fingerprint,
            });
        } else {
            log::debug!(
                "{:?} changed ({} importable files)",
                self.directory,
                import_candidates.len()
            );
            queue.queue_import(ImportJob {
                directory: self.directory.clone(),
                fingerprint,
                prior_record_existed: prior.is_some(),
                import_candidates,
                cover_candidates,
                token: self.token.clone(),
            });
        }

        // Children are visited whether or not this directory changed.
        if self.state.should_cancel() {
            log::info!(
                "Scan cancelled, dropping {} sub-directories of {:?}",
                subdirs.len(),
                self.directory
            );
            return TaskOutcome::Completed;
        }
        for (child, canonical) in subdirs {
            if let Some(task) =
                Self::claim_canonical(Arc::clone(&self.state), child, canonical, self.token.clone())
            {
                queue.queue_scan(task);
            }
        }

        TaskOutcome::Completed
    }

    /// List immediate entries. Only failing to open the directory itself is
    /// an error; unreadable entries are skipped.
    fn enumerate(&self) -> Result<Listing, ScanError> {
        let entries = fs::read_dir(&self.directory)
            .map_err(|e| ScanError::from_io(self.directory.clone(), &e))?;

        let mut listing = Listing::default();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Skipping unreadable entry in {:?}: {}", self.directory, e);
                    continue;
                }
            };
            let path = entry.path();

            let (is_dir, is_file) = match entry.file_type() {
                Ok(ft) if ft.is_symlink() => match fs::metadata(&path) {
                    Ok(meta) => (meta.is_dir(), meta.is_file()),
                    Err(e) => {
                        log::debug!("Skipping broken link {:?}: {}", path, e);
                        continue;
                    }
                },
                Ok(ft) => (ft.is_dir(), ft.is_file()),
                Err(e) => {
                    log::debug!("Skipping {:?}: {}", path, e);
                    continue;
                }
            };

            if is_file {
                let name = entry.file_name().to_string_lossy().into_owned();
                match self.state.classify(&name) {
                    EntryClass::Importable => listing.import_candidates.push(FileEntry { path, name }),
                    EntryClass::CoverArt => listing.cover_candidates.push(FileEntry { path, name }),
                    EntryClass::Ignored => {}
                }
            } else if is_dir {
                if self.state.is_blacklisted(&path) {
                    log::debug!("Skipping blacklisted directory {:?}", path);
                    continue;
                }
                let canonical = match fs::canonicalize(&path) {
                    Ok(canonical) => canonical,
                    Err(e) => {
                        log::debug!("Cannot resolve {:?}: {}", path, e);
                        continue;
                    }
                };
                if self.state.is_visited(&canonical) {
                    continue;
                }
                listing.subdirs.push((path, canonical));
            }
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::error::ScanErrorKind;
    use crate::fingerprint::{directory_fingerprint, empty_fingerprint};
    use crate::models::{CancelToken, Fingerprint};
    use crate::state::DirectoryHashIndex;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingQueue {
        scans: RefCell<Vec<DirectoryScanTask>>,
        imports: RefCell<Vec<ImportJob>>,
        events: RefCell<Vec<ScanEvent>>,
        cancel_on_emit: Option<Arc<ScanState>>,
    }

    impl TaskQueue for RecordingQueue {
        fn queue_scan(&self, task: DirectoryScanTask) {
            self.scans.borrow_mut().push(task);
        }

        fn queue_import(&self, job: ImportJob) {
            if let Some(state) = &self.cancel_on_emit {
                state.request_cancel();
            }
            self.imports.borrow_mut().push(job);
        }

        fn emit(&self, event: ScanEvent) {
            if let Some(state) = &self.cancel_on_emit {
                state.request_cancel();
            }
            self.events.borrow_mut().push(event);
        }
    }

    fn music_tree() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"a").unwrap();
        std::fs::write(dir.path().join("b.mp3"), b"b").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"n").unwrap();
        std::fs::write(dir.path().join("folder.jpg"), b"c").unwrap();
        std::fs::create_dir(dir.path().join("covers")).unwrap();
        std::fs::write(dir.path().join("covers").join("front.jpg"), b"f").unwrap();
        dir
    }

    fn state(config: &ScanConfig, index: DirectoryHashIndex) -> Arc<ScanState> {
        Arc::new(ScanState::new(config, Arc::new(index), CancelToken::new()))
    }

    #[test]
    fn test_first_scan_hands_off_import() {
        let dir = music_tree();
        let state = state(&ScanConfig::default(), DirectoryHashIndex::new());
        let token = AccessToken::new(7u32);
        let task = DirectoryScanTask::claim(state, dir.path().to_path_buf(), token.clone()).unwrap();

        let queue = RecordingQueue::default();
        assert!(task.run(&queue).is_success());

        let imports = queue.imports.borrow();
        assert_eq!(imports.len(), 1);
        let job = &imports[0];
        assert_eq!(job.directory, dir.path());
        assert!(!job.prior_record_existed);
        assert!(job.token.same_as(&token));

        let mut names: Vec<_> = job.import_candidates.iter().map(|f| f.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["a.mp3", "b.mp3"]);
        assert_eq!(job.cover_candidates.len(), 1);
        assert_eq!(job.cover_candidates[0].name, "folder.jpg");
        assert_eq!(
            job.fingerprint,
            directory_fingerprint(job.import_candidates.iter().map(|f| &f.path))
        );

        assert!(queue.events.borrow().is_empty());
        let scans = queue.scans.borrow();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].directory(), dir.path().join("covers"));
    }

    #[test]
    fn test_empty_directory_without_record_is_hashed_as_new() {
        let dir = music_tree();
        let covers = dir.path().join("covers");
        let state = state(&ScanConfig::default(), DirectoryHashIndex::new());
        let task = DirectoryScanTask::claim(state, covers.clone(), AccessToken::none()).unwrap();

        let queue = RecordingQueue::default();
        task.run(&queue);

        assert!(queue.imports.borrow().is_empty());
        match queue.events.borrow().as_slice() {
            [ScanEvent::DirectoryHashed {
                directory,
                is_new,
                fingerprint,
            }] => {
                assert_eq!(directory, &covers);
                assert!(*is_new);
                assert_eq!(*fingerprint, empty_fingerprint());
            }
            other => panic!("unexpected events: {:?}", other),
        };
    }

    #[test]
    fn test_stored_empty_fingerprint_is_unchanged() {
        let dir = music_tree();
        let covers = dir.path().join("covers");
        let mut index = DirectoryHashIndex::new();
        index.insert(&covers, empty_fingerprint());
        let state = state(&ScanConfig::default(), index);
        let task = DirectoryScanTask::claim(state, covers, AccessToken::none()).unwrap();

        let queue = RecordingQueue::default();
        task.run(&queue);

        assert!(matches!(
            queue.events.borrow().as_slice(),
            [ScanEvent::DirectoryUnchanged { .. }]
        ));
    }

    #[test]
    fn test_emptied_directory_with_record_is_hashed_not_new() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = DirectoryHashIndex::new();
        index.insert(dir.path(), directory_fingerprint([dir.path().join("gone.mp3")]));
        let state = state(&ScanConfig::default(), index);
        let task = DirectoryScanTask::claim(state, dir.path().to_path_buf(), AccessToken::none()).unwrap();

        let queue = RecordingQueue::default();
        task.run(&queue);

        assert!(matches!(
            queue.events.borrow().as_slice(),
            [ScanEvent::DirectoryHashed { is_new: false, .. }]
        ));
    }

    #[test]
    fn test_unchanged_directory_still_spawns_children() {
        let dir = music_tree();
        let first = state(&ScanConfig::default(), DirectoryHashIndex::new());
        let queue = RecordingQueue::default();
        DirectoryScanTask::claim(first, dir.path().to_path_buf(), AccessToken::none())
            .unwrap()
            .run(&queue);
        let fingerprint = queue.imports.borrow()[0].fingerprint;

        let mut index = DirectoryHashIndex::new();
        index.insert(dir.path(), fingerprint);
        let second = state(&ScanConfig::default(), index);
        let queue = RecordingQueue::default();
        DirectoryScanTask::claim(second, dir.path().to_path_buf(), AccessToken::none())
            .unwrap()
            .run(&queue);

        assert!(queue.imports.borrow().is_empty());
        assert!(matches!(
            queue.events.borrow().as_slice(),
            [ScanEvent::DirectoryUnchanged { .. }]
        ));
        assert_eq!(queue.scans.borrow().len(), 1);
    }

    #[test]
    fn test_changed_file_set_triggers_import_with_prior_flag() {
        let dir = music_tree();
        let mut index = DirectoryHashIndex::new();
        index.insert(dir.path(), Fingerprint(42));
        let state = state(&ScanConfig::default(), index);
        let queue = RecordingQueue::default();
        DirectoryScanTask::claim(state, dir.path().to_path_buf(), AccessToken::none())
            .unwrap()
            .run(&queue);

        let imports = queue.imports.borrow();
        assert_eq!(imports.len(), 1);
        assert!(imports[0].prior_record_existed);
    }

    #[test]
    fn test_blacklisted_child_is_not_visited() {
        let dir = music_tree();
        std::fs::create_dir(dir.path().join("podcasts")).unwrap();
        std::fs::write(dir.path().join("podcasts").join("ep1.mp3"), b"p").unwrap();
        let config = ScanConfig::builder()
            .add_blacklist(dir.path().join("podcasts"))
            .build();
        let state = state(&config, DirectoryHashIndex::new());
        let queue = RecordingQueue::default();
        DirectoryScanTask::claim(Arc::clone(&state), dir.path().to_path_buf(), AccessToken::none())
            .unwrap()
            .run(&queue);

        let scans = queue.scans.borrow();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].directory(), dir.path().join("covers"));
        let podcasts = std::fs::canonicalize(dir.path().join("podcasts")).unwrap();
        assert!(!state.is_visited(&podcasts));
        assert_eq!(queue.imports.borrow()[0].import_candidates.len(), 2);
    }

    #[test]
    fn test_cancelled_before_start_has_no_side_effects() {
        let dir = music_tree();
        let state = state(&ScanConfig::default(), DirectoryHashIndex::new());
        let task = DirectoryScanTask::claim(Arc::clone(&state), dir.path().to_path_buf(), AccessToken::none())
            .unwrap();
        state.request_cancel();

        let queue = RecordingQueue::default();
        assert!(matches!(task.run(&queue), TaskOutcome::Cancelled));
        assert!(queue.events.borrow().is_empty());
        assert!(queue.imports.borrow().is_empty());
        assert!(queue.scans.borrow().is_empty());
    }

    #[test]
    fn test_cancel_after_checkpoint_spawns_no_children() {
        let dir = music_tree();
        let state = state(&ScanConfig::default(), DirectoryHashIndex::new());
        let task = DirectoryScanTask::claim(Arc::clone(&state), dir.path().to_path_buf(), AccessToken::none())
            .unwrap();

        let queue = RecordingQueue {
            cancel_on_emit: Some(Arc::clone(&state)),
            ..Default::default()
        };
        assert!(task.run(&queue).is_success());
        assert_eq!(queue.imports.borrow().len(), 1);
        assert!(queue.scans.borrow().is_empty());
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let state = state(&ScanConfig::default(), DirectoryHashIndex::new());
        let task = DirectoryScanTask::claim(state, missing.clone(), AccessToken::none()).unwrap();

        let queue = RecordingQueue::default();
        match task.run(&queue) {
            TaskOutcome::Failed(e) => {
                assert_eq!(e.kind, ScanErrorKind::NotFound);
                assert_eq!(e.path, Some(missing));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(queue.events.borrow().is_empty());
        assert!(queue.scans.borrow().is_empty());
    }

    #[test]
    fn test_duplicate_claim_is_rejected() {
        let dir = music_tree();
        let state = state(&ScanConfig::default(), DirectoryHashIndex::new());
        assert!(DirectoryScanTask::claim(Arc::clone(&state), dir.path().to_path_buf(), AccessToken::none()).is_some());
        assert!(DirectoryScanTask::claim(state, dir.path().join("."), AccessToken::none()).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_link_to_ancestor_is_pruned() {
        let dir = music_tree();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("covers").join("loop")).unwrap();
        let state = state(&ScanConfig::default(), DirectoryHashIndex::new());
        let queue = RecordingQueue::default();
        DirectoryScanTask::claim(Arc::clone(&state), dir.path().to_path_buf(), AccessToken::none())
            .unwrap()
            .run(&queue);

        let child = queue.scans.borrow_mut().pop().unwrap();
        let queue = RecordingQueue::default();
        child.run(&queue);
        assert!(queue.scans.borrow().is_empty());
        assert_eq!(state.visited_count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_link_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"a").unwrap();
        std::os::unix::fs::symlink(dir.path().join("nowhere.mp3"), dir.path().join("dangling.mp3"))
            .unwrap();
        let state = state(&ScanConfig::default(), DirectoryHashIndex::new());
        let queue = RecordingQueue::default();
        let outcome = DirectoryScanTask::claim(state, dir.path().to_path_buf(), AccessToken::none())
            .unwrap()
            .run(&queue);

        assert!(outcome.is_success());
        let imports = queue.imports.borrow();
        assert_eq!(imports[0].import_candidates.len(), 1);
        assert_eq!(
            imports[0].fingerprint,
            directory_fingerprint([dir.path().join("a.mp3")])
        );
    }

    #[test]
    fn test_hidden_files_are_not_candidates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"a").unwrap();
        std::fs::write(dir.path().join("._a.mp3"), b"resource fork").unwrap();
        std::fs::write(dir.path().join(".cover.jpg"), b"c").unwrap();
        let state = state(&ScanConfig::default(), DirectoryHashIndex::new());
        let queue = RecordingQueue::default();
        DirectoryScanTask::claim(state, dir.path().to_path_buf(), AccessToken::none())
            .unwrap()
            .run(&queue);

        let imports = queue.imports.borrow();
        let names: Vec<_> = imports[0].import_candidates.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.mp3"]);
        assert!(imports[0].cover_candidates.is_empty());
        assert_eq!(
            imports[0].fingerprint,
            directory_fingerprint([dir.path().join("a.mp3")])
        );
    }

    #[test]
    fn test_hidden_files_listed_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"a").unwrap();
        std::fs::write(dir.path().join(".b.mp3"), b"b").unwrap();
        let config = ScanConfig::builder().skip_hidden(false).build();
        let state = state(&config, DirectoryHashIndex::new());
        let queue = RecordingQueue::default();
        DirectoryScanTask::claim(state, dir.path().to_path_buf(), AccessToken::none())
            .unwrap()
            .run(&queue);

        assert_eq!(queue.imports.borrow()[0].import_candidates.len(), 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_rename_between_non_utf8_names_is_detected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let before = dir.path().join(OsStr::from_bytes(b"\xff.mp3"));
        let after = dir.path().join(OsStr::from_bytes(b"\xfe.mp3"));
        std::fs::write(&before, b"x").unwrap();

        let first = RecordingQueue::default();
        DirectoryScanTask::claim(
            state(&ScanConfig::default(), DirectoryHashIndex::new()),
            dir.path().to_path_buf(),
            AccessToken::none(),
        )
        .unwrap()
        .run(&first);
        let stored = first.imports.borrow()[0].fingerprint;

        std::fs::rename(&before, &after).unwrap();
        let mut index = DirectoryHashIndex::new();
        index.insert(dir.path(), stored);
        let second = RecordingQueue::default();
        DirectoryScanTask::claim(
            state(&ScanConfig::default(), index),
            dir.path().to_path_buf(),
            AccessToken::none(),
        )
        .unwrap()
        .run(&second);

        assert!(second.events.borrow().is_empty());
        let imports = second.imports.borrow();
        assert_eq!(imports.len(), 1);
        assert!(imports[0].prior_record_existed);
        assert_ne!(imports[0].fingerprint, stored);
        assert_eq!(imports[0].import_candidates[0].path, after);
    }
}
