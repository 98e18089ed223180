// src/exec/job_runner.rs

//! Runs one attempt of one Job.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ResolvedEndpoint;
use crate::engine::{JobOutcome, RuntimeEvent};
use crate::errors::{ErrorKind, FerrymanError, Result};
use crate::exec::copy_engine::{CopyRequest, EngineExit, EngineProgress};
use crate::exec::enumerate::{delete_source_file, enumerate_source};
use crate::exec::progress::ProgressTracker;
use crate::exec::ExecContext;
use crate::jobs::{Job, Transfer};
use crate::types::TransferStatus;

/// Parallel file copies requested from the engine for one Job.
pub const ENGINE_TRANSFERS: usize = 4;

/// Minimum spacing of aggregate Job progress writes while copying.
const JOB_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Run one attempt of `job` and report its outcome to the runtime.
///
/// Firing `cancel_rx` stops the copy engine; the attempt then ends
/// `cancelled` with already completed Transfers left as they are.
pub async fn run_job(
    job: Job,
    ctx: ExecContext,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    cancel_rx: oneshot::Receiver<()>,
) {
    let job_id = job.id;
    let retry_count = job.retry_count;

    let outcome = match execute(job, &ctx, cancel_rx).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(job_id, error = %err, "job execution error");
            JobOutcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            }
        }
    };

    if runtime_tx
        .send(RuntimeEvent::JobFinished {
            job_id,
            retry_count,
            outcome,
        })
        .await
        .is_err()
    {
        debug!(job_id, "runtime gone before job completion could be reported");
    }
}

fn resolve(ctx: &ExecContext, name: &str) -> Result<ResolvedEndpoint> {
    let endpoint = ctx
        .endpoints
        .get(name)
        .ok_or_else(|| FerrymanError::Auth(format!("unknown endpoint '{name}'")))?;
    endpoint.resolve(name).map_err(FerrymanError::Auth)
}

async fn execute(
    job: Job,
    ctx: &ExecContext,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<JobOutcome> {
    let job_id = job.id;
    let source = resolve(ctx, &job.source_endpoint)?;
    let destination = resolve(ctx, &job.destination_endpoint)?;

    info!(
        job_id,
        src = %format!("{}:{}", source.name, job.source_path),
        dst = %format!("{}:{}", destination.name, job.destination_path),
        pattern = %job.file_pattern,
        attempt = job.retry_count + 1,
        "job started"
    );

    let files = match enumerate_source(&job, &source, &*ctx.engine, &*ctx.fs).await {
        Ok(files) => files,
        Err(e) => {
            // A failed enumeration leaves no Transfers behind for this attempt.
            ctx.store.replace_transfers(job_id, Vec::new())?;
            let mut job = job;
            job.reset_progress();
            ctx.store.update_job(&job)?;
            return Err(e);
        }
    };

    let transfers = ctx.store.replace_transfers(
        job_id,
        files
            .iter()
            .map(|f| Transfer::pending(job_id, &f.path, f.size))
            .collect(),
    )?;
    let mut tracker = ProgressTracker::new(job, transfers);
    ctx.store.update_job(tracker.job())?;
    info!(
        job_id,
        files = tracker.job().total_files,
        bytes = tracker.job().total_bytes,
        "batch enumerated"
    );

    if tracker.transfers().is_empty() {
        info!(job_id, "nothing matched; job has no files to copy");
        return Ok(JobOutcome::Completed);
    }

    if let Ok(()) = cancel_rx.try_recv() {
        tracker.cancel_unfinished();
        persist_all(ctx, &tracker)?;
        return Ok(JobOutcome::Cancelled);
    }

    let source_ep = ctx.endpoints.get(&tracker.job().source_endpoint);
    let bandwidth_limit = ctx
        .endpoints
        .get(&tracker.job().destination_endpoint)
        .and_then(|e| e.bandwidth_limit.clone())
        .or_else(|| source_ep.and_then(|e| e.bandwidth_limit.clone()));

    let request = CopyRequest {
        job_id,
        source,
        source_path: tracker.job().source_path.clone(),
        destination,
        destination_path: tracker.job().destination_path.clone(),
        include: tracker.job().file_pattern.clone(),
        bandwidth_limit,
        transfers: Some(ENGINE_TRANSFERS),
    };

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<EngineProgress>();
    let copy = ctx.engine.copy(request, progress_tx, cancel_rx);

    let consume = async {
        let mut last_flush = Instant::now();
        while let Some(report) = progress_rx.recv().await {
            let Some(applied) = tracker.apply(&report) else {
                debug!(job_id, file = %report.file, "progress for unknown or finished file ignored");
                continue;
            };
            if applied.status_changed {
                ctx.store.update_transfer(tracker.transfer(applied.index))?;
            }
            if applied.status_changed || last_flush.elapsed() >= JOB_FLUSH_INTERVAL {
                ctx.store.update_job(tracker.job())?;
                last_flush = Instant::now();
            }
        }
        Ok::<(), FerrymanError>(())
    };

    let (exit, consumed) = tokio::join!(copy, consume);
    consumed?;
    let exit = exit?;

    let outcome = match exit {
        EngineExit::Cancelled => {
            tracker.cancel_unfinished();
            info!(job_id, "job cancelled while copying");
            JobOutcome::Cancelled
        }
        EngineExit::Success | EngineExit::Partial => {
            tracker.fail_unfinished(ErrorKind::Transfer, "not confirmed by copy engine");
            settle(&tracker)
        }
        EngineExit::Auth(message) => {
            tracker.fail_unfinished(ErrorKind::Auth, &message);
            JobOutcome::Failed {
                kind: ErrorKind::Auth,
                message,
            }
        }
        EngineExit::Permission(message) => {
            tracker.fail_unfinished(ErrorKind::Permission, &message);
            JobOutcome::Failed {
                kind: ErrorKind::Permission,
                message,
            }
        }
        EngineExit::Failed { message, .. } => {
            tracker.fail_unfinished(ErrorKind::Transfer, &message);
            JobOutcome::Failed {
                kind: ErrorKind::Transfer,
                message,
            }
        }
    };

    persist_all(ctx, &tracker)?;
    Ok(outcome)
}

/// Outcome once the engine has exited and every Transfer is terminal.
fn settle(tracker: &ProgressTracker) -> JobOutcome {
    if tracker.all_completed() {
        return JobOutcome::Completed;
    }
    match tracker.first_error() {
        Some((kind, message)) => JobOutcome::Failed {
            kind: *kind,
            message: message.clone(),
        },
        None => JobOutcome::Failed {
            kind: ErrorKind::Transfer,
            message: "copy engine reported a partial failure".to_string(),
        },
    }
}

fn persist_all(ctx: &ExecContext, tracker: &ProgressTracker) -> Result<()> {
    for transfer in tracker.transfers() {
        ctx.store.update_transfer(transfer)?;
    }
    ctx.store.update_job(tracker.job())
}

/// Delete the source of every confirmed Transfer of a Job the runtime has
/// already committed as `completed`, then report `SourcesReleased`.
///
/// Failures are logged only; the Job stays `completed` and the files that
/// could not be removed stay in place.
pub async fn release_sources(job: Job, ctx: ExecContext, runtime_tx: mpsc::Sender<RuntimeEvent>) {
    let job_id = job.id;
    let deleted = match delete_sources(&ctx, &job).await {
        Ok(deleted) => deleted,
        Err(e) => {
            warn!(job_id, error = %e, "source files not deleted");
            0
        }
    };

    if runtime_tx
        .send(RuntimeEvent::SourcesReleased { job_id, deleted })
        .await
        .is_err()
    {
        debug!(job_id, "runtime gone before source release could be reported");
    }
}

async fn delete_sources(ctx: &ExecContext, job: &Job) -> Result<usize> {
    let source = resolve(ctx, &job.source_endpoint)?;
    let transfers = ctx.store.list_transfers(job.id)?;
    let mut deleted = 0usize;
    for transfer in transfers
        .iter()
        .filter(|t| t.status == TransferStatus::Completed)
    {
        match delete_source_file(
            &source,
            &job.source_path,
            &transfer.file_path,
            &*ctx.engine,
            &*ctx.fs,
        )
        .await
        {
            Ok(()) => deleted += 1,
            Err(e) => warn!(job_id = job.id, file = %transfer.file_path, error = %e, "could not delete source file"),
        }
    }
    info!(job_id = job.id, deleted, "source files deleted after transfer");
    Ok(deleted)
}
