// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - status transitions in the state store
//! - materializing Jobs and starting/cancelling executors
//! - retry timers and Ctrl+C / shutdown
//!
//! The core owns every piece of cross-Job mutable state (running counts,
//! the admission queue, retry and cancellation bookkeeping), so it can be
//! tested without any Tokio, channels, filesystem, or processes.

use std::collections::HashSet;

use tracing::debug;

use crate::engine::admission::{AdmissionController, AdmissionLimits};
use crate::engine::event_handlers::{
    handle_cancel, handle_dispatch_rejected, handle_job_enqueued, handle_job_finished,
    handle_retry_due, handle_trigger, CoreCommand, CoreStep,
};
use crate::engine::retry::RetryPolicy;
use crate::engine::{RuntimeEvent, RuntimeOptions};
use crate::types::JobId;

#[derive(Debug)]
pub struct CoreRuntime {
    admission: AdmissionController,
    policy: RetryPolicy,
    /// Jobs waiting for their backoff to elapse.
    retrying: HashSet<JobId>,
    /// Running Jobs whose executor was told to stop.
    cancelling: HashSet<JobId>,
    /// Completed Jobs whose source deletion has not reported back yet.
    releasing: HashSet<JobId>,
    options: RuntimeOptions,
}

impl CoreRuntime {
    pub fn new(limits: AdmissionLimits, policy: RetryPolicy, options: RuntimeOptions) -> Self {
        Self {
            admission: AdmissionController::new(limits),
            policy,
            retrying: HashSet::new(),
            cancelling: HashSet::new(),
            releasing: HashSet::new(),
            options,
        }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn is_retrying(&self, job_id: JobId) -> bool {
        self.retrying.contains(&job_id)
    }

    pub fn is_releasing(&self, job_id: JobId) -> bool {
        self.releasing.contains(&job_id)
    }

    /// Nothing queued, running, waiting for a retry or deleting sources.
    pub fn is_idle(&self) -> bool {
        self.admission.is_idle() && self.retrying.is_empty() && self.releasing.is_empty()
    }

    pub fn should_exit_when_idle(&self) -> bool {
        self.options.exit_when_idle && self.is_idle()
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::TriggerObserved(trigger) => handle_trigger(trigger),
            RuntimeEvent::JobEnqueued {
                job_id,
                destination,
            } => handle_job_enqueued(&mut self.admission, job_id, destination),
            RuntimeEvent::JobFinished {
                job_id,
                retry_count,
                outcome,
            } => {
                let step = handle_job_finished(
                    &mut self.admission,
                    &mut self.retrying,
                    &mut self.cancelling,
                    &self.policy,
                    job_id,
                    retry_count,
                    outcome,
                );
                self.releasing
                    .extend(step.commands.iter().filter_map(|c| match c {
                        CoreCommand::ReleaseSources { job_id } => Some(*job_id),
                        _ => None,
                    }));
                step
            }
            RuntimeEvent::SourcesReleased { job_id, deleted } => {
                let awaited = self.releasing.remove(&job_id);
                debug!(job_id, deleted, awaited, "sources released");
                CoreStep::run(Vec::new())
            }
            RuntimeEvent::DispatchRejected { job_id } => {
                handle_dispatch_rejected(&mut self.admission, job_id)
            }
            RuntimeEvent::RetryDue { job_id } => handle_retry_due(&mut self.retrying, job_id),
            RuntimeEvent::CancelRequested { job_id } => handle_cancel(
                &mut self.admission,
                &mut self.retrying,
                &mut self.cancelling,
                job_id,
            ),
            RuntimeEvent::ShutdownRequested => CoreStep {
                commands: vec![CoreCommand::RequestExit],
                keep_running: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::JobOutcome;

    fn core() -> CoreRuntime {
        CoreRuntime::new(
            AdmissionLimits::new(2).with_endpoint("nas", 2),
            RetryPolicy::default(),
            RuntimeOptions {
                exit_when_idle: true,
            },
        )
    }

    #[test]
    fn idle_only_when_nothing_is_pending() {
        let mut c = core();
        assert!(c.should_exit_when_idle());

        c.step(RuntimeEvent::JobEnqueued {
            job_id: 1,
            destination: "nas".into(),
        });
        assert!(!c.is_idle());

        c.step(RuntimeEvent::JobFinished {
            job_id: 1,
            retry_count: 0,
            outcome: JobOutcome::Failed {
                kind: crate::errors::ErrorKind::Transfer,
                message: "boom".into(),
            },
        });
        assert!(c.is_retrying(1));
        assert!(!c.is_idle());

        c.step(RuntimeEvent::RetryDue { job_id: 1 });
        assert!(c.is_idle());
    }

    #[test]
    fn completed_job_keeps_the_runtime_busy_until_its_sources_are_released() {
        let mut c = core();
        c.step(RuntimeEvent::JobEnqueued {
            job_id: 1,
            destination: "nas".into(),
        });
        let step = c.step(RuntimeEvent::JobFinished {
            job_id: 1,
            retry_count: 0,
            outcome: JobOutcome::Completed,
        });
        assert_eq!(
            step.commands,
            vec![
                CoreCommand::MarkCompleted { job_id: 1 },
                CoreCommand::ReleaseSources { job_id: 1 },
                CoreCommand::ContinueChain { job_id: 1 },
            ]
        );
        assert!(c.is_releasing(1));
        assert!(!c.should_exit_when_idle());

        c.step(RuntimeEvent::SourcesReleased {
            job_id: 1,
            deleted: 3,
        });
        assert!(c.should_exit_when_idle());
    }

    #[test]
    fn shutdown_stops_the_loop() {
        let mut c = core();
        let step = c.step(RuntimeEvent::ShutdownRequested);
        assert!(!step.keep_running);
        assert_eq!(step.commands, vec![CoreCommand::RequestExit]);
    }
}
