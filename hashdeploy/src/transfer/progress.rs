//! Upload progress tracking for deployment runs.
//!
//! Deployments are sequential, so progress is a simple file/byte counter that
//! renders a `[i/n]` prefix for log lines and the totals for the summary.

use std::time::{Duration, Instant};

/// Progress information for the upload phase
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Total bytes to transfer
    pub total_bytes: u64,

    /// Bytes transferred so far
    pub transferred_bytes: u64,

    /// Number of files processed (successful or not)
    pub files_processed: usize,

    /// Total number of files
    pub total_files: usize,
}

impl TransferProgress {
    pub fn new(total_bytes: u64, total_files: usize) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            files_processed: 0,
            total_files,
        }
    }

    /// Percentage of bytes complete (0-100). An empty transfer is complete.
    pub fn percent_complete(&self) -> f64 {
        if self.total_bytes > 0 {
            ((self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0).min(100.0)
        } else {
            100.0
        }
    }
}

/// Progress tracker with elapsed time and average speed
pub struct ProgressTracker {
    start_time: Instant,
    progress: TransferProgress,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64, total_files: usize) -> Self {
        Self {
            start_time: Instant::now(),
            progress: TransferProgress::new(total_bytes, total_files),
        }
    }

    /// Start the next file; returns the `[i/n]` label for log lines.
    pub fn begin_file(&mut self) -> String {
        self.progress.files_processed += 1;
        format!("[{}/{}]", self.progress.files_processed, self.progress.total_files)
    }

    /// Record a finished transfer of `bytes`.
    pub fn complete_bytes(&mut self, bytes: u64) {
        self.progress.transferred_bytes += bytes;
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average speed since start in bytes/second
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.progress.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }

    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
