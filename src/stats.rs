//! Throughput accounting and human-readable sizes/durations

use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Counters updated by connections as they post
#[derive(Debug, Clone)]
pub struct TransferStats {
    started: Instant,
    /// Article bytes written to sockets
    pub bytes: u64,
    /// Articles acknowledged with 2xx
    pub posted: usize,
    /// Articles refused with 44x
    pub rejected: usize,
    /// Articles lost to transport or file errors
    pub abandoned: usize,
}

impl TransferStats {
    /// Start counting from `started`
    pub fn new(started: Instant) -> Self {
        Self {
            started,
            bytes: 0,
            posted: 0,
            rejected: 0,
            abandoned: 0,
        }
    }

    /// Time since the run started
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// Average throughput since the start in bytes per second
    pub fn rate(&self, now: Instant) -> f64 {
        let secs = self.elapsed(now).as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Outcome of one posting run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Article bytes written to the wire
    pub bytes_posted: u64,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
    /// Articles acknowledged by the server
    pub articles_posted: usize,
    /// Articles the server refused (not retried)
    pub articles_rejected: usize,
    /// Articles dropped because of transport or file errors
    pub articles_abandoned: usize,
    /// NZB files written during the run
    pub nzb_files: Vec<PathBuf>,
}

impl RunSummary {
    /// The `Posting complete - ...` line shown at the end of a run
    pub fn completion_line(&self) -> String {
        let secs = self.elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            self.bytes_posted as f64 / secs
        } else {
            0.0
        };
        format!(
            "Posting complete - {} in {} ({}/s)",
            nice_size(self.bytes_posted as f64),
            nice_time(self.elapsed),
            nice_size(rate)
        )
    }
}

const KB: f64 = 1024.0;
const MB: f64 = 1024.0 * 1024.0;

/// Render a byte count as `B`, `KB` or `MB`
pub fn nice_size(bytes: f64) -> String {
    if bytes < KB {
        format!("{}B", bytes as u64)
    } else if bytes < MB {
        format!("{:.1}KB", bytes / KB)
    } else {
        format!("{:.1}MB", bytes / MB)
    }
}

/// Render a duration as `Xh Ym Zs`, or `Ym Zs` below an hour
pub fn nice_time(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, left) = (total / 3600, total % 3600);
    let (mins, secs) = (left / 60, left % 60);
    if hours > 0 {
        format!("{hours}h {mins}m {secs}s")
    } else {
        format!("{mins}m {secs}s")
    }
}
