// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::errors::{FerrymanError, Result};
use crate::exec::ExecutorBackend;
use crate::jobs::{continue_chain, ChainStep, Job, Materialized, Materializer};
use crate::store::{StateStore, TemplateCounter};
use crate::template::TemplateRegistry;
use crate::types::{JobId, JobStatus};

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// Everything the shell needs besides the core and the executor.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub store: Arc<dyn StateStore>,
    pub registry: TemplateRegistry,
    pub materializer: Materializer,
}

/// Drives the dispatcher in response to `RuntimeEvent`s and delegates job
/// execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// scheduling semantics. This struct handles async IO: reading events from
/// channels, compare-and-set status transitions in the state store,
/// materialization, retry timers and dispatching Jobs to the executor.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    /// Weak so that retry timers alone never keep the channel open.
    timer_tx: mpsc::WeakSender<RuntimeEvent>,
    executor: E,
    ctx: RuntimeContext,
    timers: JoinSet<()>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

/// Move a freshly created Job from `pending` to `queued` and produce the
/// event that hands it to the dispatcher.
///
/// Returns `None` if the Job left `pending` in the meantime (e.g. it was
/// cancelled).
pub fn enqueue_pending(store: &dyn StateStore, job: &Job) -> Result<Option<RuntimeEvent>> {
    let queued = tolerate(
        store.transition_job(job.id, &[JobStatus::Pending], JobStatus::Queued),
        job.id,
        "queueing job",
    )?;
    Ok(queued.map(|job| {
        debug!(job_id = job.id, destination = %job.destination_endpoint, "job queued");
        RuntimeEvent::JobEnqueued {
            job_id: job.id,
            destination: job.destination_endpoint,
        }
    }))
}

/// Only store failures stop the runtime; anything else about a single Job
/// (lost CAS race, vanished row) is logged and skipped.
fn tolerate<T>(result: Result<T>, job_id: JobId, what: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e @ FerrymanError::StaleStatus { .. }) => {
            debug!(job_id, error = %e, "{what}: status changed concurrently; skipping");
            Ok(None)
        }
        Err(e) => {
            warn!(job_id, error = %e, "{what} failed");
            Ok(None)
        }
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_tx: &mpsc::Sender<RuntimeEvent>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        ctx: RuntimeContext,
    ) -> Self {
        Self {
            core,
            event_rx,
            timer_tx: event_tx.downgrade(),
            executor,
            ctx,
            timers: JoinSet::new(),
        }
    }

    /// Main event loop.
    ///
    /// - Re-admits Jobs left over from a previous process.
    /// - Consumes `RuntimeEvent`s from `event_rx`, plus follow-up events the
    ///   shell itself produces (newly queued Jobs, rejected dispatches).
    /// - Feeds them into the core runtime and executes the commands it
    ///   returns.
    pub async fn run(mut self) -> Result<()> {
        info!("ferryman runtime started");

        let mut followups = VecDeque::new();
        self.recover(&mut followups)?;

        loop {
            let event = match followups.pop_front() {
                Some(e) => e,
                None => {
                    if self.core.should_exit_when_idle() && self.event_rx.is_empty() {
                        info!("no jobs left to run; exiting");
                        break;
                    }
                    match self.event_rx.recv().await {
                        Some(e) => e,
                        None => {
                            info!("runtime event channel closed; exiting");
                            break;
                        }
                    }
                }
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command, &mut followups).await?;
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        info!("runtime exiting");
        Ok(())
    }

    /// Put Jobs interrupted by a previous process back in line, in id order.
    fn recover_running(&self) -> Result<usize> {
        let mut recovered = 0;
        for job in self.ctx.store.list_jobs(&[JobStatus::Running, JobStatus::Retrying])? {
            let moved = tolerate(
                self.ctx
                    .store
                    .transition_job(job.id, &[job.status], JobStatus::Queued),
                job.id,
                "recovering job",
            )?;
            if moved.is_some() {
                info!(job_id = job.id, was = %job.status, "job recovered from previous run");
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    fn recover(&mut self, followups: &mut VecDeque<RuntimeEvent>) -> Result<()> {
        let store = Arc::clone(&self.ctx.store);
        let recovered = self.recover_running()?;

        let mut waiting = 0;
        for job in store.list_jobs(&[JobStatus::Pending, JobStatus::Queued])? {
            let event = if job.status == JobStatus::Pending {
                enqueue_pending(&*store, &job)?
            } else {
                Some(RuntimeEvent::JobEnqueued {
                    job_id: job.id,
                    destination: job.destination_endpoint.clone(),
                })
            };
            if let Some(event) = event {
                followups.push_back(event);
                waiting += 1;
            }
        }

        if recovered > 0 || waiting > 0 {
            info!(recovered, waiting, "re-admitting jobs from the state store");
        }
        Ok(())
    }

    /// Execute a single command from the core.
    async fn execute_command(
        &mut self,
        command: CoreCommand,
        followups: &mut VecDeque<RuntimeEvent>,
    ) -> Result<()> {
        match command {
            CoreCommand::Materialize(event) => {
                let templates = self.ctx.registry.match_event(&event);
                if templates.is_empty() {
                    match event.template.as_deref() {
                        Some(name) => warn!(template = %name, trigger = %event.kind, "no active template with this name"),
                        None => debug!(trigger = %event.kind, path = %event.path, "no template matches event"),
                    }
                }
                for template in templates {
                    match self.ctx.materializer.materialize(&event, template) {
                        Ok(Materialized::Created(job)) => {
                            followups.extend(enqueue_pending(&*self.ctx.store, &job)?);
                        }
                        Ok(Materialized::Existing(job)) => {
                            debug!(job_id = job.id, template = %template.name, status = %job.status, "event already materialized");
                        }
                        Ok(Materialized::Skipped(reason)) => {
                            info!(template = %template.name, %reason, "trigger skipped");
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            warn!(template = %template.name, error = %e, "materialization failed; event dropped");
                        }
                    }
                }
            }
            CoreCommand::Dispatch(ids) => self.dispatch(ids, followups).await?,
            CoreCommand::MarkCompleted { job_id } => self.mark_completed(job_id)?,
            CoreCommand::ReleaseSources { job_id } => self.release_sources(job_id, followups).await?,
            CoreCommand::ContinueChain { job_id } => self.continue_chain(job_id, followups)?,
            CoreCommand::MarkFailed {
                job_id,
                kind,
                message,
                terminal,
            } => {
                let failed = tolerate(
                    self.ctx
                        .store
                        .transition_job(job_id, &[JobStatus::Running], JobStatus::Failed),
                    job_id,
                    "recording failure",
                )?;
                if let Some(mut job) = failed {
                    warn!(job_id, ?kind, error = %message, terminal, "job failed");
                    job.error_message = Some(message.clone());
                    job.error_kind = Some(kind);
                    tolerate(self.ctx.store.update_job(&job), job_id, "recording error")?;
                    if let (true, Some(tid)) = (terminal, job.template_id) {
                        let store = &self.ctx.store;
                        tolerate(
                            store
                                .bump_template_counter(tid, TemplateCounter::Failure)
                                .and_then(|()| {
                                    store.set_template_error(
                                        tid,
                                        Some(format!("job {job_id}: {message}")),
                                    )
                                }),
                            job_id,
                            "updating template",
                        )?;
                    }
                }
            }
            CoreCommand::ScheduleRetry {
                job_id,
                attempt,
                delay,
            } => self.schedule_retry(job_id, attempt, delay, followups)?,
            CoreCommand::Requeue { job_id } => {
                let requeued = tolerate(
                    self.ctx
                        .store
                        .transition_job(job_id, &[JobStatus::Retrying], JobStatus::Queued),
                    job_id,
                    "re-queueing job",
                )?;
                if let Some(job) = requeued {
                    info!(job_id, retry_count = job.retry_count, "retrying job re-queued");
                    followups.push_back(RuntimeEvent::JobEnqueued {
                        job_id,
                        destination: job.destination_endpoint,
                    });
                }
            }
            CoreCommand::MarkCancelled { job_id } => {
                let cancelled = tolerate(
                    self.ctx.store.transition_job(
                        job_id,
                        &[
                            JobStatus::Pending,
                            JobStatus::Queued,
                            JobStatus::Retrying,
                            JobStatus::Running,
                        ],
                        JobStatus::Cancelled,
                    ),
                    job_id,
                    "cancelling job",
                )?;
                if cancelled.is_some() {
                    info!(job_id, "job cancelled");
                }
            }
            CoreCommand::SignalCancel { job_id } => {
                info!(job_id, "signalling running job to stop");
                self.executor.cancel_job(job_id).await?;
            }
            CoreCommand::RequestExit => {
                info!("core issued RequestExit command");
            }
        }
        Ok(())
    }

    async fn dispatch(
        &mut self,
        ids: Vec<JobId>,
        followups: &mut VecDeque<RuntimeEvent>,
    ) -> Result<()> {
        let mut jobs = Vec::with_capacity(ids.len());
        for job_id in ids {
            match self
                .ctx
                .store
                .transition_job(job_id, &[JobStatus::Queued], JobStatus::Running)
            {
                Ok(job) => {
                    let on_destination = self
                        .ctx
                        .store
                        .running_jobs_by_destination(&job.destination_endpoint)?;
                    info!(
                        job_id,
                        src = %job.source_endpoint,
                        dst = %job.destination_endpoint,
                        attempt = job.retry_count + 1,
                        running_on_destination = on_destination,
                        "job running"
                    );
                    jobs.push(job);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(job_id, error = %e, "admitted job could not be started");
                    followups.push_back(RuntimeEvent::DispatchRejected { job_id });
                }
            }
        }

        if jobs.is_empty() {
            return Ok(());
        }
        self.executor.start_jobs(jobs).await
    }

    fn mark_completed(&self, job_id: JobId) -> Result<()> {
        let completed = tolerate(
            self.ctx
                .store
                .transition_job(job_id, &[JobStatus::Running], JobStatus::Completed),
            job_id,
            "completing job",
        )?;
        if let Some(job) = completed {
            info!(
                job_id,
                files = job.transferred_files,
                bytes = job.transferred_bytes,
                "job completed"
            );
            if let Some(tid) = job.template_id {
                tolerate(
                    self.ctx
                        .store
                        .bump_template_counter(tid, TemplateCounter::Success),
                    job_id,
                    "updating template",
                )?;
            }
        }
        Ok(())
    }

    /// Hand source deletion to the executor once the Job is committed as
    /// `completed`. Anything else answers `SourcesReleased` at once.
    async fn release_sources(
        &mut self,
        job_id: JobId,
        followups: &mut VecDeque<RuntimeEvent>,
    ) -> Result<()> {
        let job = tolerate(self.ctx.store.get_job(job_id), job_id, "loading job")?;
        match job {
            Some(job) if job.status == JobStatus::Completed && job.delete_source_after_transfer => {
                debug!(job_id, "deleting transferred sources");
                if let Err(e) = self.executor.release_sources(job).await {
                    warn!(job_id, error = %e, "source deletion not started; sources kept");
                    followups.push_back(RuntimeEvent::SourcesReleased { job_id, deleted: 0 });
                }
            }
            _ => followups.push_back(RuntimeEvent::SourcesReleased { job_id, deleted: 0 }),
        }
        Ok(())
    }

    fn continue_chain(&self, job_id: JobId, followups: &mut VecDeque<RuntimeEvent>) -> Result<()> {
        let Some(job) = tolerate(self.ctx.store.get_job(job_id), job_id, "loading job")? else {
            return Ok(());
        };
        if job.status != JobStatus::Completed {
            debug!(job_id, status = %job.status, "not continuing chain of a job that did not complete");
            return Ok(());
        }
        let Some(template) = job.template_id.and_then(|tid| self.ctx.registry.get(tid)) else {
            return Ok(());
        };

        let step = tolerate(
            continue_chain(&self.ctx.materializer, &*self.ctx.store, &job, template),
            job_id,
            "continuing chain",
        )?;
        match step {
            Some(ChainStep::Next(next)) => {
                followups.extend(enqueue_pending(&*self.ctx.store, &next)?);
            }
            Some(ChainStep::AlreadyMaterialized(existing)) => {
                debug!(job_id, next_job_id = existing.id, "next hop already materialized");
            }
            Some(ChainStep::Failed(reason)) => {
                debug!(job_id, %reason, "chain stopped");
            }
            Some(ChainStep::Finished) | None => {}
        }
        Ok(())
    }

    fn schedule_retry(
        &mut self,
        job_id: JobId,
        attempt: u32,
        delay: Duration,
        followups: &mut VecDeque<RuntimeEvent>,
    ) -> Result<()> {
        let retrying = tolerate(
            self.ctx
                .store
                .transition_job(job_id, &[JobStatus::Failed], JobStatus::Retrying),
            job_id,
            "scheduling retry",
        )?;
        let Some(mut job) = retrying else {
            // Let the core forget the retry right away.
            followups.push_back(RuntimeEvent::RetryDue { job_id });
            return Ok(());
        };

        job.retry_count = attempt;
        job.next_run = chrono::Duration::from_std(delay)
            .ok()
            .map(|d| Utc::now() + d);
        tolerate(self.ctx.store.update_job(&job), job_id, "recording retry")?;

        let tx = self.timer_tx.clone();
        self.timers.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(RuntimeEvent::RetryDue { job_id }).await;
            }
        });
        while self.timers.try_join_next().is_some() {}
        Ok(())
    }
}
