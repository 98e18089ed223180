#![allow(dead_code)]

use std::sync::Arc;

use ferryman::config::ConfigFile;
use ferryman::engine::{
    AdmissionLimits, CoreRuntime, RetryPolicy, Runtime, RuntimeContext, RuntimeEvent,
    RuntimeHandle, RuntimeOptions,
};
use ferryman::errors::Result;
use ferryman::jobs::Materializer;
use ferryman::store::{MemoryStateStore, StateStore};
use ferryman::template::TemplateRegistry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use ferryman_test_utils::builders::{ConfigFileBuilder, TemplateConfigBuilder};
pub use ferryman_test_utils::fake_executor::FakeExecutor;
pub use ferryman_test_utils::{eventually, init_tracing, with_timeout};

/// `inbox` (local) → `nas` (local) → `archive` (local), plus a `bucket`.
pub fn endpoints() -> ConfigFileBuilder {
    ConfigFileBuilder::new()
        .with_local("inbox", "/srv/inbox")
        .with_local("nas", "/srv/nas")
        .with_local("archive", "/srv/archive")
        .with_bucket("bucket", "media")
}

/// A runtime driven by a [`FakeExecutor`] over an in-memory store.
pub struct FakeRig {
    pub store: Arc<dyn StateStore>,
    pub executor: FakeExecutor,
    pub handle: RuntimeHandle,
    pub registry: TemplateRegistry,
    pub tx: mpsc::Sender<RuntimeEvent>,
    pub runtime: JoinHandle<Result<()>>,
}

impl FakeRig {
    /// Build the rig; `script` runs before the runtime starts so outcomes and
    /// held Jobs are in place for the first dispatch.
    pub fn start(
        cfg: &ConfigFile,
        options: RuntimeOptions,
        initial: Vec<RuntimeEvent>,
        script: impl FnOnce(&FakeExecutor),
    ) -> Self {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let templates = cfg
            .build_templates()
            .into_iter()
            .map(|t| store.upsert_template(t).unwrap())
            .collect::<Vec<_>>();
        let registry = TemplateRegistry::from_templates(templates, cfg.endpoints()).unwrap();
        let materializer =
            Materializer::new(Arc::clone(&store), Arc::new(cfg.endpoints().clone()));

        let (tx, rx) = mpsc::channel::<RuntimeEvent>(64);
        for event in initial {
            tx.try_send(event).unwrap();
        }

        let executor = FakeExecutor::new(tx.clone());
        script(&executor);

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
        let runtime = Runtime::new(core, &tx, rx, executor.clone(), ctx);

        Self {
            store,
            executor,
            handle,
            registry,
            tx,
            runtime: tokio::spawn(runtime.run()),
        }
    }
}
