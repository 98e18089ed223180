use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ferryman::engine::admission::{AdmissionController, AdmissionLimits};
use ferryman::engine::{
    CoreRuntime, JobOutcome, RetryPolicy, Runtime, RuntimeContext, RuntimeEvent, RuntimeHandle,
    RuntimeOptions,
};
use ferryman::exec::{BackendFuture, ExecutorBackend};
use ferryman::jobs::{Job, ManualJobRequest, Materializer};
use ferryman::store::{MemoryStateStore, StateStore};
use ferryman::template::TemplateRegistry;
use ferryman::types::{JobId, JobStatus};
use ferryman_test_utils::builders::ConfigFileBuilder;
use ferryman_test_utils::{eventually, with_timeout};
use proptest::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

const ENDPOINTS: [&str; 3] = ["nas", "bucket", "archive"];

#[derive(Debug, Clone)]
enum Op {
    Enqueue(usize),
    Admit,
    // Index into the currently running Jobs, taken modulo their count.
    Finish(usize),
    Cancel(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..ENDPOINTS.len()).prop_map(Op::Enqueue),
        3 => Just(Op::Admit),
        2 => any::<usize>().prop_map(Op::Finish),
        1 => any::<usize>().prop_map(Op::Cancel),
    ]
}

fn limits_strategy() -> impl Strategy<Value = AdmissionLimits> {
    (1..5usize, proptest::collection::vec(1..4usize, ENDPOINTS.len())).prop_map(|(global, per)| {
        // "archive" is left out so the default limit is exercised too.
        AdmissionLimits::new(global)
            .with_endpoint(ENDPOINTS[0], per[0])
            .with_endpoint(ENDPOINTS[1], per[1])
    })
}

proptest! {
    #[test]
    fn admission_respects_limits_and_queue_order(
        limits in limits_strategy(),
        ops in proptest::collection::vec(op_strategy(), 1..80),
    ) {
        let mut ac = AdmissionController::new(limits.clone());
        let mut next_id = 1u64;
        let mut destination: HashMap<u64, &str> = HashMap::new();
        let mut running: Vec<u64> = Vec::new();
        // Last Job admitted per endpoint; later admissions must be newer.
        let mut last_admitted: HashMap<&str, u64> = HashMap::new();

        for op in ops {
            match op {
                Op::Enqueue(e) => {
                    let id = next_id;
                    next_id += 1;
                    prop_assert!(ac.enqueue(id, ENDPOINTS[e]));
                    prop_assert!(!ac.enqueue(id, ENDPOINTS[e]), "double enqueue accepted");
                    destination.insert(id, ENDPOINTS[e]);
                }
                Op::Admit => {
                    for id in ac.admit() {
                        let ep = destination[&id];
                        if let Some(prev) = last_admitted.insert(ep, id) {
                            prop_assert!(prev < id, "job {} admitted before older job {} on {}", id, prev, ep);
                        }
                        running.push(id);
                    }

                    // Nothing left in the queue could have been started.
                    if ac.running_count() < limits.max_concurrent_jobs {
                        for id in ac.queued_ids() {
                            let ep = destination[&id];
                            prop_assert_eq!(ac.running_on(ep), limits.endpoint_limit(ep));
                        }
                    }
                }
                Op::Finish(i) => {
                    if !running.is_empty() {
                        let id = running.remove(i % running.len());
                        prop_assert!(ac.finish(id));
                        prop_assert!(!ac.finish(id), "slot released twice");
                    }
                }
                Op::Cancel(i) => {
                    let queued = ac.queued_ids();
                    if !queued.is_empty() {
                        let id = queued[i % queued.len()];
                        prop_assert!(ac.remove_queued(id));
                        prop_assert!(!ac.is_queued(id));
                    }
                }
            }

            prop_assert!(ac.running_count() <= limits.max_concurrent_jobs);
            prop_assert_eq!(ac.running_count(), running.len());
            for ep in ENDPOINTS {
                prop_assert!(ac.running_on(ep) <= limits.endpoint_limit(ep));
            }
        }
    }
}

/// What the backend saw across every `start_jobs` call.
#[derive(Debug, Default)]
struct Tally {
    running: HashMap<String, usize>,
    dispatched: usize,
    violations: Vec<String>,
}

/// Checks both its own live count and the store's `running` count against
/// the limits at every dispatch, then completes each Job after a short hold.
struct LimitCheckingExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    store: Arc<dyn StateStore>,
    limits: AdmissionLimits,
    tally: Arc<Mutex<Tally>>,
}

impl ExecutorBackend for LimitCheckingExecutor {
    fn start_jobs(&mut self, jobs: Vec<Job>) -> BackendFuture<'_> {
        Box::pin(async move {
            for job in jobs {
                let dest = job.destination_endpoint.clone();
                let limit = self.limits.endpoint_limit(&dest);
                let in_store = self.store.running_jobs_by_destination(&dest)?;
                {
                    let mut tally = self.tally.lock().unwrap();
                    tally.dispatched += 1;
                    let on_dest = {
                        let n = tally.running.entry(dest.clone()).or_default();
                        *n += 1;
                        *n
                    };
                    let total: usize = tally.running.values().sum();
                    if on_dest > limit {
                        tally.violations.push(format!("job {}: {on_dest} live on {dest}, limit {limit}", job.id));
                    }
                    if in_store > limit {
                        tally.violations.push(format!("job {}: {in_store} running on {dest} in the store, limit {limit}", job.id));
                    }
                    if total > self.limits.max_concurrent_jobs {
                        tally.violations.push(format!("job {}: {total} live overall, limit {}", job.id, self.limits.max_concurrent_jobs));
                    }
                }

                let tx = self.runtime_tx.clone();
                let tally = Arc::clone(&self.tally);
                let hold = Duration::from_millis(job.id % 4);
                tokio::spawn(async move {
                    tokio::time::sleep(hold).await;
                    {
                        let mut tally = tally.lock().unwrap();
                        if let Some(n) = tally.running.get_mut(&dest) {
                            *n -= 1;
                        }
                    }
                    let _ = tx
                        .send(RuntimeEvent::JobFinished {
                            job_id: job.id,
                            retry_count: job.retry_count,
                            outcome: JobOutcome::Completed,
                        })
                        .await;
                });
            }
            Ok(())
        })
    }

    fn cancel_job(&mut self, _job_id: JobId) -> BackendFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn release_sources(&mut self, job: Job) -> BackendFuture<'_> {
        Box::pin(async move {
            let _ = self
                .runtime_tx
                .send(RuntimeEvent::SourcesReleased {
                    job_id: job.id,
                    deleted: 0,
                })
                .await;
            Ok(())
        })
    }
}

/// Submit every wave from its own task against one live runtime and wait
/// until all Jobs completed. Returns `(dispatched, violations)`.
async fn submit_from_tasks(limits: AdmissionLimits, waves: Vec<Vec<usize>>) -> (usize, Vec<String>) {
    let cfg = ConfigFileBuilder::new()
        .with_local("inbox", "/srv/inbox")
        .with_local("nas", "/srv/nas")
        .with_local("archive", "/srv/archive")
        .with_bucket("bucket", "media")
        .build();
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let endpoints = Arc::new(cfg.endpoints().clone());
    let materializer = Materializer::new(Arc::clone(&store), Arc::clone(&endpoints));
    let registry = TemplateRegistry::from_templates(Vec::new(), &endpoints).unwrap();

    let (tx, rx) = mpsc::channel::<RuntimeEvent>(64);
    let tally = Arc::new(Mutex::new(Tally::default()));
    let executor = LimitCheckingExecutor {
        runtime_tx: tx.clone(),
        store: Arc::clone(&store),
        limits: limits.clone(),
        tally: Arc::clone(&tally),
    };
    let core = CoreRuntime::new(limits, RetryPolicy::default(), RuntimeOptions::default());
    let ctx = RuntimeContext {
        store: Arc::clone(&store),
        registry,
        materializer: materializer.clone(),
    };
    let handle = RuntimeHandle::new(tx.clone(), Arc::clone(&store), materializer);
    let runtime = tokio::spawn(Runtime::new(core, &tx, rx, executor, ctx).run());

    let submitted: usize = waves.iter().map(Vec::len).sum();
    let mut tasks = JoinSet::new();
    for wave in waves {
        let handle = handle.clone();
        tasks.spawn(async move {
            for e in wave {
                handle
                    .submit_job(ManualJobRequest {
                        source_endpoint: "inbox".to_string(),
                        source_path: "incoming".to_string(),
                        destination_endpoint: ENDPOINTS[e].to_string(),
                        destination_path: "drop".to_string(),
                        file_pattern: "*".to_string(),
                        delete_source_after_transfer: false,
                    })
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    with_timeout(eventually(|| {
        let done = store.list_jobs(&[JobStatus::Completed]).ok()?.len();
        (done == submitted).then_some(())
    }))
    .await;
    handle.shutdown().await.unwrap();
    with_timeout(runtime).await.unwrap().unwrap();

    let tally = tally.lock().unwrap();
    (tally.dispatched, tally.violations.clone())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn concurrent_submissions_never_exceed_limits(
        limits in limits_strategy(),
        waves in proptest::collection::vec(
            proptest::collection::vec(0..ENDPOINTS.len(), 1..8),
            2..5,
        ),
    ) {
        let submitted: usize = waves.iter().map(Vec::len).sum();
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        let (dispatched, violations) = rt.block_on(submit_from_tasks(limits, waves));
        prop_assert!(violations.is_empty(), "{:?}", violations);
        prop_assert_eq!(dispatched, submitted);
    }
}
