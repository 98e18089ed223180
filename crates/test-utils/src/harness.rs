use std::sync::Arc;

use ferryman::config::ConfigFile;
use ferryman::engine::{
    AdmissionLimits, CoreRuntime, RetryPolicy, Runtime, RuntimeContext, RuntimeEvent,
    RuntimeHandle, RuntimeOptions,
};
use ferryman::errors::Result;
use ferryman::exec::{ExecContext, RealExecutorBackend};
use ferryman::fs::{FileSystem, MockFileSystem};
use ferryman::jobs::{Job, Materializer, Transfer};
use ferryman::store::{MemoryStateStore, StateStore};
use ferryman::template::TemplateRegistry;
use ferryman::types::{JobId, JobStatus};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::scripted_engine::ScriptedCopyEngine;
use crate::{eventually, with_timeout};

/// A complete runtime (real executor, in-memory store, mock filesystem,
/// scripted copy engine) running on a background task.
pub struct Harness {
    pub store: Arc<dyn StateStore>,
    pub fs: Arc<MockFileSystem>,
    pub engine: Arc<ScriptedCopyEngine>,
    pub handle: RuntimeHandle,
    pub registry: TemplateRegistry,
    runtime: JoinHandle<Result<()>>,
}

impl Harness {
    pub fn start(cfg: &ConfigFile) -> Self {
        Self::start_with(
            cfg,
            Arc::new(MemoryStateStore::new()),
            Arc::new(MockFileSystem::new()),
            RuntimeOptions::default(),
        )
    }

    pub fn start_with(
        cfg: &ConfigFile,
        store: Arc<dyn StateStore>,
        fs: Arc<MockFileSystem>,
        options: RuntimeOptions,
    ) -> Self {
        let engine = Arc::new(ScriptedCopyEngine::new());
        Self::start_full(cfg, store, fs, engine, options, Vec::new())
    }

    /// Start with events already waiting in the runtime channel.
    pub fn start_full(
        cfg: &ConfigFile,
        store: Arc<dyn StateStore>,
        fs: Arc<MockFileSystem>,
        engine: Arc<ScriptedCopyEngine>,
        options: RuntimeOptions,
        initial: Vec<RuntimeEvent>,
    ) -> Self {
        let templates = cfg
            .build_templates()
            .into_iter()
            .map(|t| store.upsert_template(t).expect("upsert template"))
            .collect::<Vec<_>>();
        let registry =
            TemplateRegistry::from_templates(templates, cfg.endpoints()).expect("valid templates");

        let endpoints = Arc::new(cfg.endpoints().clone());
        let materializer = Materializer::new(Arc::clone(&store), Arc::clone(&endpoints));

        let (tx, rx) = mpsc::channel::<RuntimeEvent>(64.max(initial.len() + 1));
        for event in initial {
            tx.try_send(event).expect("room for initial events");
        }

        let fs_dyn: Arc<dyn FileSystem> = fs.clone();
        let executor = RealExecutorBackend::new(
            tx.clone(),
            ExecContext {
                store: Arc::clone(&store),
                engine: engine.clone(),
                fs: fs_dyn,
                endpoints,
            },
        );

        let core = CoreRuntime::new(
            AdmissionLimits::from_config(cfg),
            RetryPolicy::from_section(&cfg.config.retry),
            options,
        );
        let ctx = RuntimeContext {
            store: Arc::clone(&store),
            registry: registry.clone(),
            materializer: materializer.clone(),
        };
        let handle = RuntimeHandle::new(tx.clone(), Arc::clone(&store), materializer);
        let runtime = Runtime::new(core, &tx, rx, executor, ctx);
        let runtime = tokio::spawn(runtime.run());

        Self {
            store,
            fs,
            engine,
            handle,
            registry,
            runtime,
        }
    }

    pub fn template_id(&self, name: &str) -> u64 {
        self.registry.by_name(name).expect("known template").id
    }

    pub fn job(&self, id: JobId) -> Job {
        self.store.get_job(id).expect("job exists")
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.store.list_jobs(&[]).expect("list jobs")
    }

    pub fn transfers(&self, id: JobId) -> Vec<Transfer> {
        self.store.list_transfers(id).expect("list transfers")
    }

    /// Wait until `id` reaches `status`.
    pub async fn wait_for(&self, id: JobId, status: JobStatus) -> Job {
        with_timeout(eventually(|| {
            let job = self.store.get_job(id).ok()?;
            (job.status == status).then_some(job)
        }))
        .await
    }

    /// Wait until `n` Jobs exist and every one of them is terminal.
    pub async fn wait_for_terminal(&self, n: usize) -> Vec<Job> {
        with_timeout(eventually(|| {
            let jobs = self.store.list_jobs(&[]).ok()?;
            (jobs.len() == n && jobs.iter().all(|j| j.status.is_terminal())).then_some(jobs)
        }))
        .await
    }

    /// Ask the runtime to stop and wait for it.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.handle.shutdown().await;
        self.join().await
    }

    /// Wait for the runtime to exit on its own.
    pub async fn join(self) -> Result<()> {
        with_timeout(self.runtime).await.expect("runtime task panicked")
    }
}
