// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::detect::TriggerEvent;
use crate::engine::admission::AdmissionController;
use crate::engine::retry::{RetryDecision, RetryPolicy};
use crate::engine::JobOutcome;
use crate::errors::ErrorKind;
use crate::types::{EndpointName, JobId};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCommand {
    /// Materialize Jobs for every template matching this event.
    Materialize(TriggerEvent),
    /// Move these admitted Jobs to `running` and hand them to the executor.
    Dispatch(Vec<JobId>),
    /// `running -> completed`, counted as a success on the template.
    MarkCompleted { job_id: JobId },
    /// Delete the transferred sources of a committed Job if it asks for it;
    /// answered by `SourcesReleased`.
    ReleaseSources { job_id: JobId },
    /// Materialize the next hop of a completed Job, if its template has one.
    ContinueChain { job_id: JobId },
    /// `running -> failed`, recording the error. `terminal` means no retry
    /// follows and the failure is counted on the template.
    MarkFailed {
        job_id: JobId,
        kind: ErrorKind,
        message: String,
        terminal: bool,
    },
    /// `failed -> retrying`, then deliver `RetryDue` after `delay`.
    ScheduleRetry {
        job_id: JobId,
        attempt: u32,
        delay: Duration,
    },
    /// `retrying -> queued` and back into the admission queue.
    Requeue { job_id: JobId },
    /// Any non-terminal status -> `cancelled`.
    MarkCancelled { job_id: JobId },
    /// Ask the executor to stop a running Job.
    SignalCancel { job_id: JobId },
    /// Request that the process exits.
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub(crate) fn run(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }
}

/// Append a `Dispatch` for whatever the controller can admit now.
fn push_admitted(admission: &mut AdmissionController, commands: &mut Vec<CoreCommand>) {
    let admitted = admission.admit();
    if !admitted.is_empty() {
        commands.push(CoreCommand::Dispatch(admitted));
    }
}

pub fn handle_trigger(event: TriggerEvent) -> CoreStep {
    CoreStep::run(vec![CoreCommand::Materialize(event)])
}

pub fn handle_job_enqueued(
    admission: &mut AdmissionController,
    job_id: JobId,
    destination: EndpointName,
) -> CoreStep {
    let mut commands = Vec::new();
    if !admission.enqueue(job_id, destination) {
        debug!(job_id, "job already known to the dispatcher; ignoring");
    }
    push_admitted(admission, &mut commands);
    CoreStep::run(commands)
}

/// Handle the end of one execution attempt.
///
/// - `completed` releases the Job's sources and continues the chain, both
///   after the status commit.
/// - `failed` is retried or given up according to `policy`. A failure
///   reported after a cancellation was signalled counts as a cancellation.
/// - `cancelled` is final.
///
/// In every case the slot is released and admission re-evaluated.
pub fn handle_job_finished(
    admission: &mut AdmissionController,
    retrying: &mut HashSet<JobId>,
    cancelling: &mut HashSet<JobId>,
    policy: &RetryPolicy,
    job_id: JobId,
    retry_count: u32,
    outcome: JobOutcome,
) -> CoreStep {
    let mut commands = Vec::new();

    if !admission.finish(job_id) {
        warn!(job_id, ?outcome, "completion for a job that is not running; ignoring");
        return CoreStep::run(commands);
    }
    let cancel_requested = cancelling.remove(&job_id);

    match outcome {
        JobOutcome::Completed => {
            commands.push(CoreCommand::MarkCompleted { job_id });
            commands.push(CoreCommand::ReleaseSources { job_id });
            commands.push(CoreCommand::ContinueChain { job_id });
        }
        JobOutcome::Cancelled => {
            commands.push(CoreCommand::MarkCancelled { job_id });
        }
        JobOutcome::Failed { .. } if cancel_requested => {
            commands.push(CoreCommand::MarkCancelled { job_id });
        }
        JobOutcome::Failed { kind, message } => match policy.decide(retry_count, kind) {
            RetryDecision::Retry { attempt, delay } => {
                info!(job_id, attempt, delay_ms = delay.as_millis() as u64, ?kind, "job failed; retry scheduled");
                retrying.insert(job_id);
                commands.push(CoreCommand::MarkFailed {
                    job_id,
                    kind,
                    message,
                    terminal: false,
                });
                commands.push(CoreCommand::ScheduleRetry {
                    job_id,
                    attempt,
                    delay,
                });
            }
            decision => {
                info!(job_id, ?decision, ?kind, "job failed; giving up");
                commands.push(CoreCommand::MarkFailed {
                    job_id,
                    kind,
                    message,
                    terminal: true,
                });
            }
        },
    }

    push_admitted(admission, &mut commands);
    CoreStep::run(commands)
}

pub fn handle_dispatch_rejected(admission: &mut AdmissionController, job_id: JobId) -> CoreStep {
    let mut commands = Vec::new();
    admission.finish(job_id);
    push_admitted(admission, &mut commands);
    CoreStep::run(commands)
}

pub fn handle_retry_due(retrying: &mut HashSet<JobId>, job_id: JobId) -> CoreStep {
    if retrying.remove(&job_id) {
        CoreStep::run(vec![CoreCommand::Requeue { job_id }])
    } else {
        debug!(job_id, "retry timer fired for a job no longer retrying");
        CoreStep::run(Vec::new())
    }
}

/// Cancel a Job wherever it currently is.
///
/// Queued and retrying Jobs are cancelled on the spot. A running Job gets a
/// signal; its final `cancelled` status arrives with its completion.
pub fn handle_cancel(
    admission: &mut AdmissionController,
    retrying: &mut HashSet<JobId>,
    cancelling: &mut HashSet<JobId>,
    job_id: JobId,
) -> CoreStep {
    if admission.is_running(job_id) {
        if cancelling.insert(job_id) {
            return CoreStep::run(vec![CoreCommand::SignalCancel { job_id }]);
        }
        debug!(job_id, "cancellation already signalled");
        return CoreStep::run(Vec::new());
    }

    if admission.remove_queued(job_id) {
        debug!(job_id, "removed from admission queue");
    } else if retrying.remove(&job_id) {
        debug!(job_id, "retry abandoned");
    }
    // Pending Jobs are not tracked here; the store's status check decides.
    CoreStep::run(vec![CoreCommand::MarkCancelled { job_id }])
}
