//! Progress bar and logging utilities.
//!
//! Provides helpers for creating progress bars and spinners, with support
//! for log-only mode where progress bars are hidden for tail-friendly output.

use crate::models::ChunkProgress;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Global flag for log-only mode (set from args in main)
pub static LOG_ONLY: AtomicBool = AtomicBool::new(false);

/// Set log-only mode globally
pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

/// Check if log-only mode is enabled
pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// Format duration in human-readable format
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

/// Create a progress bar with consistent styling.
/// In log-only mode, the progress bar is hidden.
pub fn create_progress_bar(len: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
    }
    pb.set_message(msg.to_string());
    pb
}

/// Create a spinner for indeterminate progress.
/// In log-only mode, the spinner is hidden.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{msg} {spinner} [{elapsed_precise}] {pos} matches")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb.set_message(msg.to_string());
    pb
}

/// Log chunk progress for tail-friendly output.
/// Only logs in log-only mode, every `interval` chunks and on the last one.
pub fn log_progress(phase: &str, progress: &ChunkProgress, interval: u64) {
    let last = progress.processed >= progress.total;
    if is_log_only() && (progress.chunk % interval.max(1) == 0 || last) {
        tracing::info!(
            phase,
            chunk = progress.chunk,
            processed = progress.processed,
            total = progress.total,
            skipped = progress.skipped,
            "[{}] {}/{} ({:.1}%)",
            phase,
            progress.processed,
            progress.total,
            progress.percent()
        );
    }
}

/// Chunk callback that drives a progress bar and the log-only log together.
pub fn chunk_reporter<'a>(phase: &'a str, pb: &'a ProgressBar) -> impl FnMut(&ChunkProgress) + 'a {
    move |progress| {
        pb.set_length(progress.total);
        pb.set_position(progress.processed);
        log_progress(phase, progress, 10);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5.0s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.5m");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1.5h");
    }

    #[test]
    fn test_chunk_reporter_moves_bar() {
        let pb = ProgressBar::hidden();
        {
            let mut report = chunk_reporter("test", &pb);
            report(&ChunkProgress { chunk: 1, processed: 40, total: 100, skipped: 0 });
        }
        assert_eq!(pb.position(), 40);
        assert_eq!(pb.length(), Some(100));
    }
}
