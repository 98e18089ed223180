// src/exec/mod.rs

//! Transfer execution layer.
//!
//! This module runs admitted Jobs through the external copy engine and
//! reports back to the orchestration runtime via `RuntimeEvent`s.
//!
//! - [`executor_loop`] owns the main executor loop which manages running
//!   Job attempts and their cancellation.
//! - [`job_runner`] runs one attempt (enumerate, copy, track) and deletes
//!   the sources of committed Jobs.
//! - [`enumerate`] lists the source batch and deletes transferred sources.
//! - [`progress`] folds engine progress into Transfer and Job counters.
//! - [`copy_engine`] is the boundary to the external copy engine.
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::EndpointConfig;
use crate::fs::FileSystem;
use crate::store::StateStore;

pub mod backend;
pub mod copy_engine;
pub mod enumerate;
pub mod executor_loop;
pub mod job_runner;
pub mod progress;

pub use backend::{BackendFuture, ExecutorBackend, RealExecutorBackend};
pub use copy_engine::{CopyEngine, ProcessCopyEngine};
pub use executor_loop::spawn_executor;
pub use job_runner::{release_sources, run_job};
pub use progress::ProgressTracker;

/// Shared collaborators of every Job attempt.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub store: Arc<dyn StateStore>,
    pub engine: Arc<dyn CopyEngine>,
    pub fs: Arc<dyn FileSystem>,
    pub endpoints: Arc<BTreeMap<String, EndpointConfig>>,
}
