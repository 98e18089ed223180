// src/exec/executor_loop.rs

//! Main executor loop that owns the running Job attempts.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::RuntimeEvent;
use crate::exec::job_runner::{release_sources, run_job};
use crate::exec::ExecContext;
use crate::jobs::Job;
use crate::types::JobId;

/// Requests the runtime sends to the executor loop.
#[derive(Debug)]
pub enum ExecutorCommand {
    Start(Job),
    Cancel(JobId),
    /// Delete the transferred sources of a Job already `completed`.
    ReleaseSources(Job),
}

/// Internal handle for a running Job attempt.
///
/// - `cancel` asks the runner to stop the copy engine.
/// - `handle` is the Tokio task that is actually running the Job.
struct ActiveJob {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// The returned sender is what `RealExecutorBackend` forwards to. Each Job
/// runs in its own Tokio task, and **per Job id there is never more than one
/// attempt running at the same time**: a `Start` for a Job whose previous
/// attempt task is still winding down waits for that task before running.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    ctx: ExecContext,
) -> mpsc::Sender<ExecutorCommand> {
    let (tx, mut rx) = mpsc::channel::<ExecutorCommand>(32);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<JobId, ActiveJob> = HashMap::new();

        while let Some(command) = rx.recv().await {
            active.retain(|_, a| !a.handle.is_finished());
            match command {
                ExecutorCommand::Start(job) => start_job(job, &mut active, &runtime_tx, &ctx),
                ExecutorCommand::Cancel(job_id) => cancel_job(job_id, &mut active),
                ExecutorCommand::ReleaseSources(job) => {
                    tokio::spawn(release_sources(job, ctx.clone(), runtime_tx.clone()));
                }
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn start_job(
    job: Job,
    active: &mut HashMap<JobId, ActiveJob>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    ctx: &ExecContext,
) {
    let job_id = job.id;
    // The previous attempt may have reported `JobFinished` while its task is
    // still unwinding.
    let previous = active.remove(&job_id);
    if previous.is_some() {
        debug!(job_id, "previous attempt still winding down; new attempt queued behind it");
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let rt_tx = runtime_tx.clone();
    let ctx = ctx.clone();

    let handle = tokio::spawn(async move {
        if let Some(ActiveJob { cancel, handle }) = previous {
            if let Err(e) = handle.await {
                warn!(job_id, error = %e, "previous attempt task ended abnormally");
            }
            drop(cancel);
        }
        run_job(job, ctx, rt_tx, cancel_rx).await;
        debug!(job_id, "job runner future finished");
    });

    active.insert(
        job_id,
        ActiveJob {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn cancel_job(job_id: JobId, active: &mut HashMap<JobId, ActiveJob>) {
    let Some(existing) = active.get_mut(&job_id) else {
        debug!(job_id, "cancel for a job with no live attempt");
        return;
    };

    match existing.cancel.take() {
        Some(cancel) => {
            info!(job_id, "cancelling running job");
            if cancel.send(()).is_err() {
                debug!(job_id, "job attempt already finished while cancelling");
            }
        }
        None => debug!(job_id, "cancellation already sent"),
    }
}
