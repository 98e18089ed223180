use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use ferryman::engine::{JobOutcome, RuntimeEvent};
use ferryman::errors::{FerrymanError, Result};
use ferryman::exec::{BackendFuture, ExecutorBackend};
use ferryman::jobs::Job;
use ferryman::types::JobId;
use tokio::sync::mpsc;

#[derive(Default)]
struct Script {
    /// Outcomes handed out in order; `Completed` once exhausted.
    outcomes: VecDeque<JobOutcome>,
    /// Jobs that keep "running" until cancelled.
    held: HashSet<JobId>,
    /// Held Jobs that were started, with their retry count.
    parked: HashMap<JobId, u32>,
}

/// A fake executor that:
/// - records which Jobs were started, in order
/// - immediately reports `JobFinished` with the next scripted outcome, except
///   for held Jobs which only finish (as cancelled) when cancelled
/// - records source releases and answers them with `SourcesReleased`.
#[derive(Clone)]
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    started: Arc<Mutex<Vec<JobId>>>,
    released: Arc<Mutex<Vec<JobId>>>,
    script: Arc<Mutex<Script>>,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            runtime_tx,
            started: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    pub fn push_outcome(&self, outcome: JobOutcome) {
        self.script.lock().unwrap().outcomes.push_back(outcome);
    }

    pub fn hold(&self, job_id: JobId) {
        self.script.lock().unwrap().held.insert(job_id);
    }

    /// Every Job id started so far (a retried Job appears once per attempt).
    pub fn started(&self) -> Vec<JobId> {
        self.started.lock().unwrap().clone()
    }

    /// Jobs whose source deletion was requested, in order.
    pub fn released(&self) -> Vec<JobId> {
        self.released.lock().unwrap().clone()
    }

    fn finish(&self, job: &Job, outcome: JobOutcome) -> RuntimeEvent {
        RuntimeEvent::JobFinished {
            job_id: job.id,
            retry_count: job.retry_count,
            outcome,
        }
    }
}

fn stopped() -> FerrymanError {
    FerrymanError::Other(anyhow::anyhow!("runtime channel closed"))
}

impl ExecutorBackend for FakeExecutor {
    fn start_jobs(&mut self, jobs: Vec<Job>) -> BackendFuture<'_> {
        Box::pin(async move {
            for job in jobs {
                self.started.lock().unwrap().push(job.id);

                let outcome = {
                    let mut script = self.script.lock().unwrap();
                    if script.held.contains(&job.id) {
                        script.parked.insert(job.id, job.retry_count);
                        continue;
                    }
                    script.outcomes.pop_front().unwrap_or(JobOutcome::Completed)
                };

                // Reported from a separate task so the runtime is never blocked
                // on its own channel while it is dispatching.
                let tx = self.runtime_tx.clone();
                let event = self.finish(&job, outcome);
                tokio::spawn(async move {
                    let _ = tx.send(event).await;
                });
            }
            Ok(())
        })
    }

    fn cancel_job(&mut self, job_id: JobId) -> BackendFuture<'_> {
        Box::pin(async move {
            let parked = self.script.lock().unwrap().parked.remove(&job_id);
            if let Some(retry_count) = parked {
                self.runtime_tx
                    .send(RuntimeEvent::JobFinished {
                        job_id,
                        retry_count,
                        outcome: JobOutcome::Cancelled,
                    })
                    .await
                    .map_err(|_| stopped())?;
            }
            Ok(())
        })
    }

    fn release_sources(&mut self, job: Job) -> BackendFuture<'_> {
        Box::pin(async move {
            self.released.lock().unwrap().push(job.id);
            let tx = self.runtime_tx.clone();
            tokio::spawn(async move {
                let _ = tx
                    .send(RuntimeEvent::SourcesReleased {
                        job_id: job.id,
                        deleted: 0,
                    })
                    .await;
            });
            Ok(())
        })
    }
}
