//! Shared byte accounting across all part upload workers.
//!
//! One atomic counter tracks the total; workers batch their local counts
//! before touching it and roll back their contribution on retry, so the
//! counter lands exactly on the artifact length once the upload succeeds.
//! Output strides are claimed by compare-and-swap so that only one worker
//! emits each dot or log line.

use std::io::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use log::info;

use crate::constants::MIN_PROGRESS_BATCH;

pub struct UploadProgress {
    total: u64,
    uploaded: AtomicU64,
    dot_step: AtomicI64,
    log_step: AtomicU64,
    started: Instant,
    last_log_millis: AtomicU64,
    last_log_bytes: AtomicU64,
}

impl UploadProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            uploaded: AtomicU64::new(0),
            dot_step: AtomicI64::new(-1),
            log_step: AtomicU64::new(0),
            started: Instant::now(),
            last_log_millis: AtomicU64::new(0),
            last_log_bytes: AtomicU64::new(0),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::SeqCst)
    }

    /// How many bytes a worker accumulates locally before publishing:
    /// 2% of the total, floored at 8KB.
    pub fn batch_threshold(&self) -> u64 {
        (self.total / 50).max(MIN_PROGRESS_BATCH)
    }

    /// Publish `n` freshly sent bytes and emit whatever progress output
    /// the new total crosses into.
    pub fn record(&self, n: u64) {
        let uploaded = self.uploaded.fetch_add(n, Ordering::SeqCst) + n;
        self.report(uploaded);
    }

    /// Roll back bytes a failed attempt had contributed.
    pub fn rollback(&self, n: u64) {
        if n > 0 {
            self.uploaded.fetch_sub(n, Ordering::SeqCst);
        }
    }

    fn report(&self, uploaded: u64) {
        if self.total == 0 {
            return;
        }
        let percent = uploaded.saturating_mul(100) / self.total;

        let dot = (percent / 2) as i64;
        let prev_dot = self.dot_step.load(Ordering::SeqCst);
        if dot > prev_dot
            && self
                .dot_step
                .compare_exchange(prev_dot, dot, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            print!(".");
            let _ = std::io::stdout().flush();
        }

        let log = percent / 20;
        let prev_log = self.log_step.load(Ordering::SeqCst);
        if log > prev_log
            && self
                .log_step
                .compare_exchange(prev_log, log, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let now_millis = self.started.elapsed().as_millis() as u64;
            let average = if now_millis > 0 {
                format!("{}/s", format_bytes(uploaded * 1000 / now_millis))
            } else {
                "N/A".to_string()
            };
            let prev_millis = self.last_log_millis.swap(now_millis, Ordering::SeqCst);
            let prev_bytes = self.last_log_bytes.swap(uploaded, Ordering::SeqCst);
            let interval_millis = now_millis.saturating_sub(prev_millis);
            let interval_bytes = uploaded.saturating_sub(prev_bytes);
            let instantaneous = if interval_millis > 0 {
                format!("{}/s", format_bytes(interval_bytes * 1000 / interval_millis))
            } else {
                "N/A".to_string()
            };
            println!();
            info!(
                "Upload progress: {}% ({} / {}) @ {} (avg: {})",
                log * 20,
                format_bytes(uploaded),
                format_bytes(self.total),
                instantaneous,
                average
            );
        }
    }
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    }
}
