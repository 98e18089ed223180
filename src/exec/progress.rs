// src/exec/progress.rs

//! Rolls the copy engine's per-file progress into Transfer records and the
//! Job's aggregate counters.
//!
//! Every counter only moves forward: reported bytes are clamped to the file
//! size, a terminal Transfer ignores later reports, and the Job totals never
//! exceed what enumeration found.

use std::collections::HashMap;

use chrono::Utc;

use crate::errors::ErrorKind;
use crate::exec::copy_engine::{EngineFileStatus, EngineProgress};
use crate::jobs::{Job, Transfer};
use crate::template::paths::normalize;
use crate::types::TransferStatus;

/// `part / whole` as a percentage; 0 for an empty whole.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part.min(whole) as f64 / whole as f64) * 100.0
    }
}

/// What a single progress report changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// Index into [`ProgressTracker::transfers`].
    pub index: usize,
    pub status_changed: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    job: Job,
    transfers: Vec<Transfer>,
    by_path: HashMap<String, usize>,
    first_error: Option<(ErrorKind, String)>,
}

impl ProgressTracker {
    /// Start tracking a fresh attempt: totals come from `transfers`, every
    /// transferred counter starts at zero.
    pub fn new(mut job: Job, transfers: Vec<Transfer>) -> Self {
        job.reset_progress();
        job.total_files = transfers.len() as u64;
        job.total_bytes = transfers.iter().map(|t| t.file_size).sum();

        let by_path = transfers
            .iter()
            .enumerate()
            .map(|(i, t)| (normalize(&t.file_path), i))
            .collect();

        Self {
            job,
            transfers,
            by_path,
            first_error: None,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    pub fn transfer(&self, index: usize) -> &Transfer {
        &self.transfers[index]
    }

    pub fn first_error(&self) -> Option<&(ErrorKind, String)> {
        self.first_error.as_ref()
    }

    pub fn all_completed(&self) -> bool {
        self.transfers
            .iter()
            .all(|t| t.status == TransferStatus::Completed)
    }

    /// Apply one engine report. `None` if it names a file outside this
    /// batch or a Transfer that already finished.
    pub fn apply(&mut self, report: &EngineProgress) -> Option<Applied> {
        let index = *self.by_path.get(&normalize(&report.file))?;
        if self.transfers[index].status.is_terminal() {
            return None;
        }

        let previous = self.transfers[index].status;
        let size = self.transfers[index].file_size;
        let bytes = match report.status {
            EngineFileStatus::Completed => size,
            _ => report.bytes.min(size),
        };
        self.advance_bytes(index, bytes);

        let now = Utc::now();
        let transfer = &mut self.transfers[index];
        if report.rate.is_some() {
            transfer.rate = report.rate;
        }
        if report.eta.is_some() {
            transfer.eta_seconds = report.eta;
        }
        if transfer.started_at.is_none() {
            transfer.started_at = Some(now);
        }

        match report.status {
            EngineFileStatus::InProgress => {
                transfer.status = TransferStatus::InProgress;
            }
            EngineFileStatus::Completed => {
                transfer.status = TransferStatus::Completed;
                transfer.completed_at = Some(now);
                transfer.progress_percentage = 100.0;
                transfer.eta_seconds = Some(0);
                self.job.transferred_files =
                    (self.job.transferred_files + 1).min(self.job.total_files);
            }
            EngineFileStatus::Failed => {
                let message = report
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("copy engine failed on '{}'", transfer.file_path));
                let kind = report
                    .error_kind
                    .as_deref()
                    .and_then(ErrorKind::from_engine_str)
                    .unwrap_or(ErrorKind::Transfer);
                transfer.status = TransferStatus::Failed;
                transfer.completed_at = Some(now);
                transfer.error_message = Some(message.clone());
                if self.first_error.is_none() {
                    self.first_error = Some((kind, format!("{}: {message}", transfer.file_path)));
                }
            }
        }

        Some(Applied {
            index,
            status_changed: self.transfers[index].status != previous,
        })
    }

    /// Mark every unfinished Transfer `cancelled`. Returns the indices touched.
    pub fn cancel_unfinished(&mut self) -> Vec<usize> {
        self.close_unfinished(TransferStatus::Cancelled, None)
    }

    /// Mark every unfinished Transfer `failed` with `message`. Returns the
    /// indices touched.
    pub fn fail_unfinished(&mut self, kind: ErrorKind, message: &str) -> Vec<usize> {
        let touched = self.close_unfinished(TransferStatus::Failed, Some(message));
        if let (Some(&first), None) = (touched.first(), self.first_error.as_ref()) {
            let path = self.transfers[first].file_path.clone();
            self.first_error = Some((kind, format!("{path}: {message}")));
        }
        touched
    }

    fn advance_bytes(&mut self, index: usize, bytes: u64) {
        let transfer = &mut self.transfers[index];
        if bytes <= transfer.bytes_transferred {
            return;
        }
        let delta = bytes - transfer.bytes_transferred;
        transfer.bytes_transferred = bytes;
        transfer.progress_percentage = percentage(bytes, transfer.file_size);

        self.job.transferred_bytes = (self.job.transferred_bytes + delta).min(self.job.total_bytes);
        let pct = percentage(self.job.transferred_bytes, self.job.total_bytes);
        if pct > self.job.progress_percentage {
            self.job.progress_percentage = pct;
        }
    }

    fn close_unfinished(&mut self, status: TransferStatus, message: Option<&str>) -> Vec<usize> {
        let now = Utc::now();
        let mut touched = Vec::new();
        for (i, t) in self.transfers.iter_mut().enumerate() {
            if t.status.is_terminal() {
                continue;
            }
            t.status = status;
            t.completed_at = Some(now);
            t.eta_seconds = None;
            if let Some(m) = message {
                t.error_message = Some(m.to_string());
            }
            touched.push(i);
        }
        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobType;

    const MB: u64 = 1024 * 1024;

    fn tracker() -> ProgressTracker {
        let job = Job::draft(JobType::Manual, ("in", "videos"), ("out", "raw"), "*.mp4");
        let transfers = vec![
            Transfer::pending(1, "a.mp4", 10 * MB),
            Transfer::pending(1, "b.mp4", 20 * MB),
            Transfer::pending(1, "c.mp4", 5 * MB),
        ];
        ProgressTracker::new(job, transfers)
    }

    fn report(file: &str, bytes: u64, status: EngineFileStatus) -> EngineProgress {
        EngineProgress {
            file: file.to_string(),
            bytes,
            status,
            error: None,
            error_kind: None,
            rate: None,
            eta: None,
        }
    }

    #[test]
    fn totals_come_from_enumeration() {
        let t = tracker();
        assert_eq!(t.job().total_files, 3);
        assert_eq!(t.job().total_bytes, 35 * MB);
        assert_eq!(t.job().progress_percentage, 0.0);
    }

    #[test]
    fn all_completed_reaches_full_totals() {
        let mut t = tracker();
        for (f, size) in [("a.mp4", 10 * MB), ("b.mp4", 20 * MB), ("c.mp4", 5 * MB)] {
            t.apply(&report(f, size / 2, EngineFileStatus::InProgress));
            t.apply(&report(f, size, EngineFileStatus::Completed));
        }
        assert!(t.all_completed());
        assert_eq!(t.job().transferred_files, 3);
        assert_eq!(t.job().transferred_bytes, 35 * MB);
        assert_eq!(t.job().progress_percentage, 100.0);
    }

    #[test]
    fn progress_never_goes_backwards_or_overflows() {
        let mut t = tracker();
        t.apply(&report("a.mp4", 8 * MB, EngineFileStatus::InProgress));
        let before = t.job().progress_percentage;

        // Out of order report and an oversized one.
        t.apply(&report("a.mp4", 2 * MB, EngineFileStatus::InProgress));
        assert_eq!(t.transfer(0).bytes_transferred, 8 * MB);
        assert_eq!(t.job().progress_percentage, before);

        t.apply(&report("a.mp4", 99 * MB, EngineFileStatus::InProgress));
        assert_eq!(t.transfer(0).bytes_transferred, 10 * MB);
        assert!(t.job().transferred_bytes <= t.job().total_bytes);
    }

    #[test]
    fn terminal_transfers_ignore_later_reports() {
        let mut t = tracker();
        let applied = t.apply(&report("c.mp4", 5 * MB, EngineFileStatus::Completed)).unwrap();
        assert!(applied.status_changed);
        assert!(t.apply(&report("c.mp4", 0, EngineFileStatus::Failed)).is_none());
        assert_eq!(t.transfer(2).status, TransferStatus::Completed);
        assert!(t.apply(&report("zzz.mp4", 1, EngineFileStatus::Completed)).is_none());
    }

    #[test]
    fn first_failure_is_kept_with_its_kind() {
        let mut t = tracker();
        let mut fail = report("b.mp4", 0, EngineFileStatus::Failed);
        fail.error = Some("access denied".into());
        fail.error_kind = Some("permission".into());
        t.apply(&fail);
        t.fail_unfinished(ErrorKind::Transfer, "not confirmed by copy engine");

        let (kind, message) = t.first_error().unwrap();
        assert_eq!(*kind, ErrorKind::Permission);
        assert_eq!(message, "b.mp4: access denied");
        assert_eq!(t.transfer(0).status, TransferStatus::Failed);
    }

    #[test]
    fn cancel_keeps_completed_transfers() {
        let mut t = tracker();
        t.apply(&report("a.mp4", 10 * MB, EngineFileStatus::Completed));
        t.apply(&report("b.mp4", MB, EngineFileStatus::InProgress));
        let touched = t.cancel_unfinished();
        assert_eq!(touched, vec![1, 2]);
        assert_eq!(t.transfer(0).status, TransferStatus::Completed);
        assert_eq!(t.transfer(1).status, TransferStatus::Cancelled);
    }

    #[test]
    fn empty_batch_has_zero_percentage() {
        let job = Job::draft(JobType::Manual, ("in", ""), ("out", ""), "*");
        let t = ProgressTracker::new(job, Vec::new());
        assert_eq!(t.job().progress_percentage, 0.0);
        assert!(t.all_completed());
    }
}
