// src/engine/handle.rs

//! Cloneable entry point for code outside the runtime loop (CLI start-up
//! triggers, an API layer, tests).

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::detect::TriggerEvent;
use crate::engine::runtime::enqueue_pending;
use crate::engine::RuntimeEvent;
use crate::errors::{FerrymanError, Result};
use crate::jobs::{Job, ManualJobRequest, Materializer};
use crate::store::StateStore;
use crate::types::JobId;

#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    tx: mpsc::Sender<RuntimeEvent>,
    store: Arc<dyn StateStore>,
    materializer: Materializer,
}

impl RuntimeHandle {
    pub fn new(
        tx: mpsc::Sender<RuntimeEvent>,
        store: Arc<dyn StateStore>,
        materializer: Materializer,
    ) -> Self {
        Self {
            tx,
            store,
            materializer,
        }
    }

    pub fn sender(&self) -> mpsc::Sender<RuntimeEvent> {
        self.tx.clone()
    }

    /// Fire a manual trigger for the template called `name`.
    pub async fn trigger_template(&self, name: &str) -> Result<()> {
        info!(template = %name, "manual trigger");
        self.send(RuntimeEvent::TriggerObserved(TriggerEvent::manual(name)))
            .await
    }

    /// Store a template-less manual Job and hand it to the dispatcher.
    pub async fn submit_job(&self, request: ManualJobRequest) -> Result<Job> {
        let job = self.materializer.submit_manual(request)?;
        if let Some(event) = enqueue_pending(&*self.store, &job)? {
            self.send(event).await?;
        }
        self.store.get_job(job.id)
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<()> {
        self.send(RuntimeEvent::CancelRequested { job_id }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(RuntimeEvent::ShutdownRequested).await
    }

    async fn send(&self, event: RuntimeEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| FerrymanError::Other(anyhow::anyhow!("runtime is not running")))
    }
}
