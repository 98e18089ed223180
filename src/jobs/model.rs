// src/jobs/model.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;
use crate::types::{
    EndpointName, JobId, JobStatus, JobType, TemplateId, TransferId, TransferStatus,
};

/// One materialized execution unit: copy the files matching
/// `file_pattern` below `source_path` into `destination_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// `None` for manual jobs submitted without a template.
    pub template_id: Option<TemplateId>,
    pub job_type: JobType,
    pub status: JobStatus,

    /// Position in the template's hop list (0 = initial destination).
    pub hop_index: usize,
    /// Job whose completion produced this chained Job.
    pub parent_job_id: Option<JobId>,

    pub source_endpoint: EndpointName,
    pub source_path: String,
    pub destination_endpoint: EndpointName,
    pub destination_path: String,
    /// Glob relative to `source_path`.
    pub file_pattern: String,
    pub delete_source_after_transfer: bool,

    /// File that triggered the chain, kept for placeholder rendering on
    /// later hops.
    pub file_name: Option<String>,
    /// Directory of that file relative to the template's source path.
    pub file_dir: Option<String>,

    /// Identity used to make materialization idempotent.
    pub dedup_key: Option<String>,

    pub total_files: u64,
    pub transferred_files: u64,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub progress_percentage: f64,

    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,

    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,

    pub retry_count: u32,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl Job {
    /// A `pending` Job without an id; the store assigns one on create.
    pub fn draft(
        job_type: JobType,
        source: (impl Into<String>, impl Into<String>),
        destination: (impl Into<String>, impl Into<String>),
        file_pattern: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            template_id: None,
            job_type,
            status: JobStatus::Pending,
            hop_index: 0,
            parent_job_id: None,
            source_endpoint: source.0.into(),
            source_path: source.1.into(),
            destination_endpoint: destination.0.into(),
            destination_path: destination.1.into(),
            file_pattern: file_pattern.into(),
            delete_source_after_transfer: false,
            file_name: None,
            file_dir: None,
            dedup_key: None,
            total_files: 0,
            transferred_files: 0,
            total_bytes: 0,
            transferred_bytes: 0,
            progress_percentage: 0.0,
            created_at: Utc::now(),
            queued_at: None,
            started_at: None,
            completed_at: None,
            last_run: None,
            next_run: None,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            retry_count: 0,
            error_message: None,
            error_kind: None,
        }
    }

    /// Reset per-attempt counters before a (re-)run.
    pub fn reset_progress(&mut self) {
        self.total_files = 0;
        self.transferred_files = 0;
        self.total_bytes = 0;
        self.transferred_bytes = 0;
        self.progress_percentage = 0.0;
    }
}

/// Progress record of one file within a Job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub job_id: JobId,
    /// Path relative to the Job's `source_path`.
    pub file_path: String,
    pub file_size: u64,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub progress_percentage: f64,
    /// Bytes per second, as last reported by the engine.
    pub rate: Option<f64>,
    pub eta_seconds: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Transfer {
    pub fn pending(job_id: JobId, file_path: impl Into<String>, file_size: u64) -> Self {
        Self {
            id: 0,
            job_id,
            file_path: file_path.into(),
            file_size,
            status: TransferStatus::Pending,
            bytes_transferred: 0,
            progress_percentage: 0.0,
            rate: None,
            eta_seconds: None,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}
