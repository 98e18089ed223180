// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production executor implementation in [`executor_loop`].
//!
//! - `RealExecutorBackend` is the default implementation used by `ferryman`.
//!   It wraps the `spawn_executor` loop and forwards its requests over an
//!   mpsc channel.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which Jobs were started and directly emits `JobFinished` events.
//!
//! [`executor_loop`]: crate::exec::executor_loop

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::engine::RuntimeEvent;
use crate::errors::{FerrymanError, Result};
use crate::exec::executor_loop::{spawn_executor, ExecutorCommand};
use crate::exec::ExecContext;
use crate::jobs::Job;
use crate::types::JobId;

pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Trait abstracting how admitted Jobs are executed.
///
/// Every started Job must eventually produce exactly one
/// `RuntimeEvent::JobFinished`, and every `release_sources` call exactly one
/// `RuntimeEvent::SourcesReleased`.
pub trait ExecutorBackend: Send {
    /// Start the given Jobs, which are already `running` in the store.
    fn start_jobs(&mut self, jobs: Vec<Job>) -> BackendFuture<'_>;

    /// Ask a running Job to stop.
    fn cancel_job(&mut self, job_id: JobId) -> BackendFuture<'_>;

    /// Delete the transferred source files of a Job already committed as
    /// `completed`.
    fn release_sources(&mut self, job: Job) -> BackendFuture<'_>;
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutorCommand>,
}

impl RealExecutorBackend {
    /// Spawn the background executor loop, wired to the runtime event
    /// sender.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, ctx: ExecContext) -> Self {
        let tx = spawn_executor(runtime_tx, ctx);
        Self { tx }
    }

    fn forward(&self, command: ExecutorCommand) -> BackendFuture<'static> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();
        Box::pin(async move {
            tx.send(command)
                .await
                .map_err(|_| FerrymanError::Other(anyhow::anyhow!("executor loop stopped")))
        })
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn start_jobs(&mut self, jobs: Vec<Job>) -> BackendFuture<'_> {
        let tx = self.tx.clone();
        Box::pin(async move {
            for job in jobs {
                tx.send(ExecutorCommand::Start(job))
                    .await
                    .map_err(|_| FerrymanError::Other(anyhow::anyhow!("executor loop stopped")))?;
            }
            Ok(())
        })
    }

    fn cancel_job(&mut self, job_id: JobId) -> BackendFuture<'_> {
        self.forward(ExecutorCommand::Cancel(job_id))
    }

    fn release_sources(&mut self, job: Job) -> BackendFuture<'_> {
        self.forward(ExecutorCommand::ReleaseSources(job))
    }
}
