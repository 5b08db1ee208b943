//! Progress reporting for scan passes
//!
//! When enabled, the reporter writes one JSON object per line to stderr so a
//! parent process can follow a pass. Messages carry a monotonically
//! increasing sequence number and a timestamp relative to reporter creation.

use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::LibraryConfig;
use crate::error::LibraryError;
use crate::models::ScanSummary;

/// Default minimum interval between progress messages
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;

/// Start message sent when a pass begins
#[derive(Debug, Clone, Serialize)]
pub struct StartMessage {
    /// Message type identifier
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Library root being scanned
    pub root: String,
    /// Worker pool size
    pub concurrency: usize,
}

impl StartMessage {
    pub fn new(seq: u64, ts: u64, root: String, concurrency: usize) -> Self {
        Self {
            msg_type: "start",
            seq,
            ts,
            root,
            concurrency,
        }
    }
}

/// Periodic progress message
#[derive(Debug, Clone, Serialize)]
pub struct ProgressMessage {
    /// Message type identifier ("p" for progress)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    /// Eligible files dispatched so far
    #[serde(rename = "f")]
    pub files: u64,
    /// Files hashed in full so far
    #[serde(rename = "h")]
    pub hashed: u64,
    /// Cache hits so far
    #[serde(rename = "c")]
    pub cache_hits: u64,
    /// Directory currently being walked
    pub dir: String,
    /// Elapsed pass time in milliseconds
    pub ms: u64,
}

/// Error message sent when a file fails
#[derive(Debug, Clone, Serialize)]
pub struct ErrorProgressMessage {
    /// Message type identifier ("err" for error)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    /// Error category
    pub error_type: String,
    pub message: String,
    /// Path that caused the error (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorProgressMessage {
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

/// Done message sent when a pass commits
#[derive(Debug, Clone, Serialize)]
pub struct DoneMessage {
    /// Message type identifier ("done" for completion)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    /// Eligible files visited
    #[serde(rename = "tf")]
    pub total_files: u64,
    /// Cache hits
    #[serde(rename = "ch")]
    pub cache_hits: u64,
    /// Files hashed in full
    #[serde(rename = "hf")]
    pub hashed_files: u64,
    /// Models removed by the sweep
    #[serde(rename = "dm")]
    pub deleted_models: u64,
    /// Animations removed by the sweep
    #[serde(rename = "da")]
    pub deleted_animations: u64,
    /// Number of failed files
    #[serde(rename = "ec")]
    pub error_count: u64,
    /// Total pass duration in milliseconds
    pub ms: u64,
}

impl DoneMessage {
    pub fn from_summary(seq: u64, ts: u64, summary: &ScanSummary) -> Self {
        Self {
            msg_type: "done",
            seq,
            ts,
            total_files: summary.files_visited,
            cache_hits: summary.cache_hits,
            hashed_files: summary.files_hashed,
            deleted_models: summary.swept.models,
            deleted_animations: summary.swept.animations,
            error_count: summary.failed_files,
            ms: summary.duration_ms,
        }
    }
}

/// Progress reporter for outputting scan progress to stderr
///
/// Shared by the walking thread and the worker pool, so all mutable state is
/// atomic.
#[derive(Debug)]
pub struct ProgressReporter {
    enabled: bool,
    /// Minimum interval between progress messages in milliseconds
    interval_ms: u64,
    /// Timestamp of the last progress message
    last_report_ms: AtomicU64,
    seq: AtomicU64,
    start_time: Instant,
}

impl ProgressReporter {
    pub fn new(enabled: bool, interval_ms: u64) -> Self {
        Self {
            enabled,
            interval_ms,
            last_report_ms: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get the next sequence number (monotonically increasing)
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Milliseconds since reporter creation
    pub fn current_timestamp(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Claim the next progress slot if the interval has elapsed
    fn claim_progress_slot(&self) -> bool {
        let now = self.current_timestamp();
        let last = self.last_report_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.interval_ms {
            return false;
        }
        self.last_report_ms
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    fn output_to_stderr<T: Serialize>(&self, msg: &T) {
        if let Ok(json) = serde_json::to_string(msg) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", json);
            let _ = stderr.flush();
        }
    }

    pub fn report_start(&self, config: &LibraryConfig) {
        if !self.enabled {
            return;
        }
        let msg = StartMessage::new(
            self.next_seq(),
            self.current_timestamp(),
            config.library_dir.to_string_lossy().to_string(),
            config.effective_concurrency(),
        );
        self.output_to_stderr(&msg);
    }

    /// Report progress, throttled to one message per interval.
    ///
    /// Returns true if a message was actually sent.
    pub fn report_progress(
        &self,
        files: u64,
        hashed: u64,
        cache_hits: u64,
        dir: &str,
        elapsed_ms: u64,
    ) -> bool {
        if !self.enabled || !self.claim_progress_slot() {
            return false;
        }
        let msg = ProgressMessage {
            msg_type: "p",
            seq: self.next_seq(),
            ts: self.current_timestamp(),
            files,
            hashed,
            cache_hits,
            dir: dir.to_string(),
            ms: elapsed_ms,
        };
        self.output_to_stderr(&msg);
        true
    }

    /// Report a per-file failure immediately
    pub fn report_error(&self, error: &LibraryError) {
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

    pub fn report_done(&self, summary: &ScanSummary) {
        if !self.enabled {
            return;
        }
        let msg = DoneMessage::from_summary(self.next_seq(), self.current_timestamp(), summary);
        self.output_to_stderr(&msg);
    }
}
