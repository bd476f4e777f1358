//! Progress reporting module for scan operations
//!
//! Progress is written to stderr as one JSON object per line so a calling
//! process can follow a running scan.

use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::models::{ScanProgress, ScanResult};

/// Scan phase indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    /// Walking directories and importing changes
    #[default]
    Scan,
    /// Removing directories that disappeared
    Purge,
    /// Scan completed
    Done,
}

impl ScanPhase {
    /// Get string representation of the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Scan => "scan",
            ScanPhase::Purge => "purge",
            ScanPhase::Done => "done",
        }
    }
}

/// Start message sent when scan begins
#[derive(Debug, Clone, Serialize)]
pub struct StartMessage {
    /// Message type identifier
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Scan root paths
    pub roots: Vec<String>,
    /// Worker threads
    pub threads: usize,
    /// Whether file content hashes are computed on import
    pub compute_hash: bool,
}

impl StartMessage {
    /// Create a new start message
    pub fn new(seq: u64, ts: u64, roots: Vec<String>, threads: usize, compute_hash: bool) -> Self {
        Self {
            msg_type: "start",
            seq,
            ts,
            roots,
            threads,
            compute_hash,
        }
    }
}

/// Progress message sent during scan
#[derive(Debug, Clone, Serialize)]
pub struct ProgressMessage {
    /// Message type identifier ("p" for progress)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Current scan phase
    pub phase: ScanPhase,
    /// Directory tasks finished
    #[serde(rename = "d")]
    pub dirs: u64,
    /// Unchanged directories
    #[serde(rename = "u")]
    pub unchanged_dirs: u64,
    /// Imported directories
    #[serde(rename = "id")]
    pub imported_dirs: u64,
    /// Imported files
    #[serde(rename = "f")]
    pub files: u64,
    /// Last directory reported
    pub dir: String,
    /// Elapsed time in milliseconds
    pub ms: u64,
}

impl ProgressMessage {
    /// Create a progress message from a snapshot
    pub fn new(seq: u64, ts: u64, phase: ScanPhase, progress: &ScanProgress) -> Self {
        Self {
            msg_type: "p",
            seq,
            ts,
            phase,
            dirs: progress.scanned_dirs,
            unchanged_dirs: progress.unchanged_dirs,
            imported_dirs: progress.imported_dirs,
            files: progress.imported_files,
            dir: progress.current_dir.clone(),
            ms: progress.elapsed_ms,
        }
    }
}

/// Error message sent when an error occurs during scan
#[derive(Debug, Clone, Serialize)]
pub struct ErrorProgressMessage {
    /// Message type identifier ("err" for error)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Error type/category
    pub error_type: String,
    /// Error message description
    pub message: String,
    /// Path that caused the error (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorProgressMessage {
    /// Create a new error progress message
    pub fn new(seq: u64, ts: u64, error_type: String, message: String, path: Option<String>) -> Self {
        Self {
            msg_type: "err",
            seq,
            ts,
            error_type,
            message,
            path,
        }
    }
}

/// Done message sent when scan completes
#[derive(Debug, Clone, Serialize)]
pub struct DoneMessage {
    /// Message type identifier ("done" for completion)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Directory tasks completed
    #[serde(rename = "td")]
    pub total_dirs: u64,
    /// Unchanged directories
    #[serde(rename = "ud")]
    pub unchanged_dirs: u64,
    /// Imported directories
    #[serde(rename = "id")]
    pub imported_dirs: u64,
    /// Directories removed from the store
    #[serde(rename = "pd")]
    pub purged_dirs: u64,
    /// Number of new files found
    #[serde(rename = "nf")]
    pub new_files: u64,
    /// Number of modified files found
    #[serde(rename = "mf")]
    pub modified_files: u64,
    /// Number of deleted files found
    #[serde(rename = "df")]
    pub deleted_files: u64,
    /// Number of errors encountered
    #[serde(rename = "ec")]
    pub error_count: usize,
    /// Whether the scan was cancelled
    pub cancelled: bool,
    /// Total scan duration in milliseconds
    pub ms: u64,
}

impl DoneMessage {
    /// Create a done message from the final result
    pub fn new(seq: u64, ts: u64, result: &ScanResult) -> Self {
        Self {
            msg_type: "done",
            seq,
            ts,
            total_dirs: result.total_dirs,
            unchanged_dirs: result.unchanged_dirs,
            imported_dirs: result.imported_dirs,
            purged_dirs: result.purged_dirs,
            new_files: result.new_files,
            modified_files: result.modified_files,
            deleted_files: result.deleted_files,
            error_count: result.error_count(),
            cancelled: result.cancelled,
            ms: result.duration_ms,
        }
    }
}

/// Progress reporter for outputting scan progress to stderr
///
/// Lives on the collecting thread; workers never touch it.
pub struct ProgressReporter {
    /// Whether progress reporting is enabled
    enabled: bool,
    /// Reporting interval in milliseconds
    interval_ms: u64,
    /// Last report time
    last_report: std::cell::Cell<Instant>,
    /// Sequence number for messages
    seq: AtomicU64,
    /// Start time of the reporter
    start_time: Instant,
}

impl ProgressReporter {
    /// Create a new ProgressReporter
    ///
    /// # Arguments
    /// * `enabled` - Whether progress reporting is enabled
    /// * `interval_ms` - Minimum interval between progress messages in milliseconds
    pub fn new(enabled: bool, interval_ms: u64) -> Self {
        let now = Instant::now();
        Self {
            enabled,
            interval_ms,
            last_report: std::cell::Cell::new(now),
            seq: AtomicU64::new(0),
            start_time: now,
        }
    }

    /// Check if enough time has passed since the last report
    pub fn should_report(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let elapsed = self.last_report.get().elapsed().as_millis() as u64;
        elapsed >= self.interval_ms
    }

    /// Get the next sequence number (monotonically increasing)
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Get the current timestamp in milliseconds since reporter creation
    pub fn current_timestamp(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Output a serializable message to stderr as JSON
    pub fn output_to_stderr<T: Serialize>(&self, msg: &T) {
        if let Ok(json) = serde_json::to_string(msg) {
            eprintln!("{}", json);
            std::io::stderr().flush().ok();
        }
    }

    /// Report scan start
    pub fn report_start(&self, config: &ScanConfig) {
        if !self.enabled {
            return;
        }

        let roots: Vec<String> = config
            .roots
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();

        let msg = StartMessage::new(
            self.next_seq(),
            self.current_timestamp(),
            roots,
            config.effective_threads(),
            config.compute_hash,
        );

        self.output_to_stderr(&msg);
    }

    /// Report scan progress
    ///
    /// Returns true if a message was actually sent (respects interval timing).
    pub fn report_progress(&self, phase: ScanPhase, progress: &ScanProgress) -> bool {
        if !self.should_report() {
            return false;
        }

        let msg = ProgressMessage::new(self.next_seq(), self.current_timestamp(), phase, progress);
        self.output_to_stderr(&msg);
        self.last_report.set(Instant::now());
        true
    }

    /// Report an error during scan, ignoring interval timing
    pub fn report_error(&self, error: &ScanError) {
        if !self.enabled {
            return;
        }

        let msg = ErrorProgressMessage::new(
            self.next_seq(),
            self.current_timestamp(),
            format!("{:?}", error.kind),
            error.message.clone(),
            error.path.as_ref().map(|p| p.to_string_lossy().to_string()),
        );

        self.output_to_stderr(&msg);
    }

    /// Report scan completion
    pub fn report_done(&self, result: &ScanResult) {
        if !self.enabled {
            return;
        }

        let msg = DoneMessage::new(self.next_seq(), self.current_timestamp(), result);
        self.output_to_stderr(&msg);
    }

    /// Check if the reporter is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_phase_serialization() {
        assert_eq!(serde_json::to_string(&ScanPhase::Scan).unwrap(), "\"scan\"");
        assert_eq!(serde_json::to_string(&ScanPhase::Purge).unwrap(), "\"purge\"");
        assert_eq!(serde_json::to_string(&ScanPhase::Done).unwrap(), "\"done\"");
        assert_eq!(ScanPhase::Purge.as_str(), "purge");
    }

    #[test]
    fn test_start_message_serialization() {
        let msg = StartMessage::new(1, 100, vec!["/music".to_string()], 8, false);
        let parsed: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(parsed["_t"], "start");
        assert_eq!(parsed["seq"], 1);
        assert_eq!(parsed["ts"], 100);
        assert_eq!(parsed["roots"][0], "/music");
        assert_eq!(parsed["threads"], 8);
        assert_eq!(parsed["compute_hash"], false);
    }

    #[test]
    fn test_progress_message_serialization() {
        let progress = ScanProgress {
            scanned_dirs: 10,
            unchanged_dirs: 6,
            imported_dirs: 3,
            imported_files: 40,
            current_dir: "/music/album".to_string(),
            elapsed_ms: 1500,
        };
        let msg = ProgressMessage::new(2, 200, ScanPhase::Scan, &progress);
        let parsed: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(parsed["_t"], "p");
        assert_eq!(parsed["phase"], "scan");
        assert_eq!(parsed["d"], 10);
        assert_eq!(parsed["u"], 6);
        assert_eq!(parsed["id"], 3);
        assert_eq!(parsed["f"], 40);
        assert_eq!(parsed["dir"], "/music/album");
        assert_eq!(parsed["ms"], 1500);
    }

    #[test]
    fn test_error_message_without_path() {
        let msg = ErrorProgressMessage::new(3, 300, "IoError".to_string(), "boom".to_string(), None);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("\"path\""));
    }

    #[test]
    fn test_done_message_serialization() {
        let result = ScanResult {
            total_dirs: 12,
            unchanged_dirs: 9,
            imported_dirs: 2,
            purged_dirs: 1,
            new_files: 5,
            deleted_files: 1,
            cancelled: true,
            duration_ms: 4500,
            ..Default::default()
        };
        let parsed: serde_json::Value =
            serde_json::to_value(DoneMessage::new(4, 400, &result)).unwrap();

        assert_eq!(parsed["_t"], "done");
        assert_eq!(parsed["td"], 12);
        assert_eq!(parsed["ud"], 9);
        assert_eq!(parsed["id"], 2);
        assert_eq!(parsed["pd"], 1);
        assert_eq!(parsed["nf"], 5);
        assert_eq!(parsed["df"], 1);
        assert_eq!(parsed["ec"], 0);
        assert_eq!(parsed["cancelled"], true);
        assert_eq!(parsed["ms"], 4500);
    }

    #[test]
    fn test_progress_reporter_sequence_numbers() {
        let reporter = ProgressReporter::new(true, 200);
        assert_eq!(reporter.next_seq(), 0);
        assert_eq!(reporter.next_seq(), 1);
        assert_eq!(reporter.next_seq(), 2);
    }

    #[test]
    fn test_progress_reporter_should_report_timing() {
        let reporter = ProgressReporter::new(true, 10);
        reporter.last_report.set(Instant::now());
        assert!(!reporter.should_report());

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(reporter.should_report());
    }

    #[test]
    fn test_disabled_reporter_stays_silent() {
        let reporter = ProgressReporter::new(false, 0);
        assert!(!reporter.should_report());
        assert!(!reporter.report_progress(ScanPhase::Scan, &ScanProgress::default()));
        reporter.report_start(&ScanConfig::default());
        reporter.report_error(&ScanError::io_error(None, "Test error"));
        reporter.report_done(&ScanResult::default());
        assert_eq!(reporter.next_seq(), 0);
    }
}
