//! Scanner module - runs directory tasks on a worker pool and applies their
//! outcomes to the library database

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use rayon::Scope;

use crate::config::ScanConfig;
use crate::db::ScanDatabase;
use crate::error::ScanError;
use crate::import::{FileImporter, Importer};
use crate::models::{
    AccessToken, CancelToken, FileStatus, ImportJob, ScanEvent, ScanProgress, ScanResult,
    ScannedFile, TaskOutcome,
};
use crate::progress::{ProgressReporter, ScanPhase};
use crate::state::ScanState;
use crate::task::{DirectoryScanTask, TaskQueue};

/// Everything a running task needs besides its own inputs
struct ScanContext {
    state: Arc<ScanState>,
    importer: Arc<dyn Importer>,
    events: Sender<ScanEvent>,
}

impl ScanContext {
    fn send(&self, event: ScanEvent) {
        // The receiver lives until every task is done.
        let _ = self.events.send(event);
    }
}

/// [`TaskQueue`] backed by a rayon scope
struct PoolQueue<'a, 'scope> {
    scope: &'a Scope<'scope>,
    ctx: &'a Arc<ScanContext>,
}

impl TaskQueue for PoolQueue<'_, '_> {
    fn queue_scan(&self, task: DirectoryScanTask) {
        spawn_scan(self.scope, Arc::clone(self.ctx), task);
    }

    fn queue_import(&self, job: ImportJob) {
        let ctx = Arc::clone(self.ctx);
        self.scope.spawn(move |_| run_import(&ctx, job));
    }

    fn emit(&self, event: ScanEvent) {
        self.ctx.send(event);
    }
}

fn spawn_scan<'scope>(scope: &Scope<'scope>, ctx: Arc<ScanContext>, task: DirectoryScanTask) {
    scope.spawn(move |scope| {
        let directory = task.directory().to_path_buf();
        let outcome = task.run(&PoolQueue { scope, ctx: &ctx });
        ctx.send(ScanEvent::TaskFinished { directory, outcome });
    });
}

fn run_import(ctx: &ScanContext, job: ImportJob) {
    if ctx.state.should_cancel() {
        log::debug!("Scan cancelled, skipping import of {:?}", job.directory);
        return;
    }
    let event = match ctx.importer.import(&job) {
        Ok(imported) => ScanEvent::DirectoryImported {
            directory: job.directory,
            fingerprint: job.fingerprint,
            is_new: !job.prior_record_existed,
            imported,
        },
        Err(error) => ScanEvent::ImportFailed {
            directory: job.directory,
            error,
        },
    };
    ctx.send(event);
}

/// Scan `roots` on a pool of `num_threads` workers.
///
/// Events are delivered to `on_event` on the calling thread while the
/// workers run. Returns once every task and import has finished, with
/// errors for roots that do not exist.
pub fn scan_directories<F>(
    state: Arc<ScanState>,
    roots: &[PathBuf],
    token: AccessToken,
    importer: Arc<dyn Importer>,
    num_threads: usize,
    mut on_event: F,
) -> Result<Vec<ScanError>, ScanError>
where
    F: FnMut(ScanEvent),
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("scan-{}", i))
        .build()?;

    let mut errors = Vec::new();
    let mut seeds = Vec::new();
    for root in roots {
        if !root.exists() {
            log::warn!("Root does not exist: {:?}", root);
            errors.push(ScanError::not_found(root.clone()));
            continue;
        }
        match DirectoryScanTask::claim(Arc::clone(&state), root.clone(), token.clone()) {
            Some(task) => seeds.push(task),
            None => log::info!("Root {:?} is already covered by another root", root),
        }
    }

    let (tx, rx) = crossbeam_channel::unbounded();
    let ctx = Arc::new(ScanContext {
        state,
        importer,
        events: tx,
    });

    std::thread::scope(|s| {
        s.spawn(move || {
            pool.scope(move |scope| {
                for task in seeds {
                    spawn_scan(scope, Arc::clone(&ctx), task);
                }
            });
        });
        // Ends when the last task drops its context, closing the channel.
        for event in rx.iter() {
            on_event(event);
        }
    });

    Ok(errors)
}

/// Incremental scan of a library against its database
pub struct LibraryScanner {
    config: ScanConfig,
    cancel: CancelToken,
    token: AccessToken,
    importer: Arc<dyn Importer>,
}

impl LibraryScanner {
    pub fn new(config: ScanConfig) -> Self {
        let importer = Arc::new(FileImporter::new(&config));
        Self {
            config,
            cancel: CancelToken::new(),
            token: AccessToken::none(),
            importer,
        }
    }

    /// Capability forwarded to every task and import
    pub fn with_token(mut self, token: AccessToken) -> Self {
        self.token = token;
        self
    }

    /// Replace the default [`FileImporter`]
    pub fn with_importer(mut self, importer: Arc<dyn Importer>) -> Self {
        self.importer = importer;
        self
    }

    /// Flag that stops a running [`scan`](Self::scan)
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run one pass over all roots and update `db`.
    pub fn scan(&self, db: &mut ScanDatabase) -> Result<ScanResult, ScanError> {
        let start = Instant::now();
        let reporter = ProgressReporter::new(self.config.show_progress, self.config.progress_interval_ms);
        reporter.report_start(&self.config);

        db.begin_verification()?;
        let index = db.load_directory_hashes()?;
        log::info!("Loaded {} stored directory fingerprints", index.len());

        let state = Arc::new(ScanState::new(&self.config, Arc::new(index), self.cancel.clone()));

        let mut collector = LibraryCollector::new(db, &reporter, start);
        let root_errors = scan_directories(
            Arc::clone(&state),
            &self.config.roots,
            self.token.clone(),
            Arc::clone(&self.importer),
            self.config.effective_threads(),
            |event| collector.apply(event),
        )?;
        let mut result = collector.finish();

        for error in root_errors {
            reporter.report_error(&error);
            result.errors.push(error);
        }
        result.cancelled = state.should_cancel();
        log::info!(
            "Visited {} directories ({} unchanged, {} imported)",
            state.visited_count(),
            result.unchanged_dirs,
            result.imported_dirs
        );

        if result.cancelled {
            log::info!("Scan cancelled, keeping unverified directories");
        } else if !result.errors.is_empty() {
            log::warn!(
                "Scan had {} errors, keeping unverified directories",
                result.error_count()
            );
        } else {
            let stale = db.unverified_directories()?;
            if !stale.is_empty() {
                log::info!("Removing {} directories that no longer exist", stale.len());
                let retired = db.purge_directories(&stale)?;
                result.purged_dirs = stale.len() as u64;
                result.deleted_files += retired.len() as u64;
                result.deleted_paths.extend(retired);
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        reporter.report_done(&result);
        Ok(result)
    }
}

/// Run one incremental pass with the default importer
pub fn scan_library(config: &ScanConfig, db: &mut ScanDatabase) -> Result<ScanResult, ScanError> {
    LibraryScanner::new(config.clone()).scan(db)
}

/// Applies scan events to the database on the collecting thread
struct LibraryCollector<'a> {
    db: &'a mut ScanDatabase,
    reporter: &'a ProgressReporter,
    start: Instant,
    result: ScanResult,
    progress: ScanProgress,
}

impl<'a> LibraryCollector<'a> {
    fn new(db: &'a mut ScanDatabase, reporter: &'a ProgressReporter, start: Instant) -> Self {
        Self {
            db,
            reporter,
            start,
            result: ScanResult::new(),
            progress: ScanProgress::default(),
        }
    }

    fn apply(&mut self, event: ScanEvent) {
        if let Err(error) = self.try_apply(event) {
            self.reporter.report_error(&error);
            self.result.errors.push(error);
        }
        self.progress.elapsed_ms = self.start.elapsed().as_millis() as u64;
        self.reporter.report_progress(ScanPhase::Scan, &self.progress);
    }

    fn try_apply(&mut self, event: ScanEvent) -> Result<(), ScanError> {
        match event {
            ScanEvent::DirectoryHashed {
                directory,
                is_new,
                fingerprint,
            } => {
                log::debug!("Hashed {:?} (new: {})", directory, is_new);
                let stale: Vec<String> = self.db.load_directory_files(&directory)?.into_keys().collect();
                self.retire(stale)?;
                self.db.upsert_directory(&directory, fingerprint)?;
                self.result.hashed_dirs += 1;
            }
            ScanEvent::DirectoryUnchanged { directory } => {
                self.db.mark_directory_verified(&directory)?;
                self.result.unchanged_dirs += 1;
                self.progress.unchanged_dirs += 1;
            }
            ScanEvent::DirectoryImported {
                directory,
                fingerprint,
                is_new,
                imported,
            } => {
                log::debug!(
                    "Imported {} files from {:?} (new: {})",
                    imported.files.len(),
                    directory,
                    is_new
                );
                let existing = self.db.load_directory_files(&directory)?;
                let files: Vec<ScannedFile> = imported
                    .files
                    .into_iter()
                    .map(|file| {
                        let status = match existing.get(&file.key()) {
                            None => FileStatus::New,
                            Some(record) if record.size != file.size || record.mtime != file.mtime => {
                                FileStatus::Modified
                            }
                            Some(_) => FileStatus::Unchanged,
                        };
                        file.with_status(status)
                    })
                    .collect();

                let present: HashSet<String> = files.iter().map(ScannedFile::key).collect();
                let gone: Vec<String> = existing
                    .into_keys()
                    .filter(|path| !present.contains(path))
                    .collect();

                self.db.upsert_files(&files)?;
                self.retire(gone)?;
                self.db.upsert_directory(&directory, fingerprint)?;
                self.db
                    .set_directory_cover(&directory, imported.cover.as_deref())?;

                self.result.imported_dirs += 1;
                self.progress.imported_dirs += 1;
                self.progress.imported_files += files.len() as u64;
                self.result.total_files += files.len() as u64;
                for file in files {
                    match file.status {
                        FileStatus::New => self.result.new_files += 1,
                        FileStatus::Modified => self.result.modified_files += 1,
                        FileStatus::Unchanged => {
                            self.result.unchanged_files += 1;
                            continue;
                        }
                    }
                    self.result.files.push(file);
                }
            }
            ScanEvent::ImportFailed { directory, error } => {
                log::warn!("Import of {:?} failed: {}", directory, error.message);
                return Err(error);
            }
            ScanEvent::TaskFinished { directory, outcome } => match outcome {
                TaskOutcome::Completed => {
                    self.result.total_dirs += 1;
                    self.progress.scanned_dirs += 1;
                    self.progress.current_dir = directory.to_string_lossy().into_owned();
                }
                TaskOutcome::Cancelled => self.result.cancelled_tasks += 1,
                TaskOutcome::Failed(error) => {
                    self.result.failed_dirs += 1;
                    return Err(error);
                }
            },
        }
        Ok(())
    }

    fn retire(&mut self, paths: Vec<String>) -> Result<(), ScanError> {
        if paths.is_empty() {
            return Ok(());
        }
        self.db.move_to_deleted(&paths)?;
        self.result.deleted_files += paths.len() as u64;
        self.result.deleted_paths.extend(paths);
        Ok(())
    }

    fn finish(self) -> ScanResult {
        self.result
    }
}
