// src/engine/mod.rs

//! Orchestration engine for ferryman.
//!
//! This module ties together:
//! - the dispatcher (admission control over global and per-endpoint limits)
//! - the retry manager (backoff policy for failed jobs)
//! - the main runtime event loop that reacts to:
//!   - trigger events from detectors and manual requests
//!   - job completion events from the executor
//!   - retry timers and cancellation requests
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell that
//! talks to the state store, the materializer and the executor is
//! implemented in [`runtime`].

use crate::detect::TriggerEvent;
use crate::errors::ErrorKind;
use crate::types::{EndpointName, JobId};

/// Final result of one execution attempt of a Job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// If true, exit the runtime once no job is queued, running or waiting
    /// for a retry (used for `--once`).
    pub exit_when_idle: bool,
}

/// Events flowing into the runtime from detectors, executors, timers and
/// the [`RuntimeHandle`].
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A detector, the schedule ticker or a manual request observed a trigger.
    TriggerObserved(TriggerEvent),
    /// A Job is now `queued` in the store and waits for admission.
    JobEnqueued {
        job_id: JobId,
        destination: EndpointName,
    },
    /// An executor finished one attempt of a Job.
    JobFinished {
        job_id: JobId,
        /// Retries already consumed before this attempt.
        retry_count: u32,
        outcome: JobOutcome,
    },
    /// Source deletion for a `completed` Job has finished (or was not
    /// asked for).
    SourcesReleased { job_id: JobId, deleted: usize },
    /// An admitted Job could not be moved to `running` (its status changed
    /// underneath the dispatcher).
    DispatchRejected { job_id: JobId },
    /// The backoff of a `retrying` Job elapsed.
    RetryDue { job_id: JobId },
    /// Cancel a Job in whatever state it is in.
    CancelRequested { job_id: JobId },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod admission;
pub mod core;
pub mod event_handlers;
pub mod handle;
pub mod retry;
pub mod runtime;

pub use admission::{AdmissionController, AdmissionLimits};
pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use handle::RuntimeHandle;
pub use retry::{RetryDecision, RetryPolicy};
pub use runtime::{enqueue_pending, Runtime, RuntimeContext};
