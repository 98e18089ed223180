// src/store/mod.rs

//! State store boundary.
//!
//! Durable record of templates, jobs, transfers and endpoint status. Job
//! status only changes through [`StateStore::transition_job`], an atomic
//! compare-and-set: a transition whose expected prior status no longer
//! matches is rejected with [`FerrymanError::StaleStatus`], never
//! overwritten.
//!
//! [`FerrymanError::StaleStatus`]: crate::errors::FerrymanError::StaleStatus

use std::fmt::Debug;
use std::sync::Arc;

use crate::config::ConfigSection;
use crate::errors::Result;
use crate::fs::FileSystem;
use crate::jobs::{Job, Transfer};
use crate::template::Template;
use crate::types::{ConnectionStatus, JobId, JobStatus, JobType, StoreMode, TemplateId};

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::{MemoryStateStore, StateData};

/// Which lifetime counter of a template to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateCounter {
    Trigger,
    Success,
    Failure,
}

pub trait StateStore: Send + Sync + Debug {
    /// Insert a template, or refresh the definition of an existing template
    /// with the same name (keeping its id and counters).
    fn upsert_template(&self, template: Template) -> Result<Template>;
    fn get_template(&self, id: TemplateId) -> Result<Template>;
    fn list_templates(&self) -> Result<Vec<Template>>;
    fn bump_template_counter(&self, id: TemplateId, counter: TemplateCounter) -> Result<()>;
    fn set_template_error(&self, id: TemplateId, error: Option<String>) -> Result<()>;

    /// Store a new Job; the id on `job` is ignored and a fresh one assigned.
    fn create_job(&self, job: Job) -> Result<Job>;
    fn get_job(&self, id: JobId) -> Result<Job>;
    /// Write the fields of `job` not owned by `transition_job` (status,
    /// status timestamps and run counters are kept as stored).
    fn update_job(&self, job: &Job) -> Result<()>;
    /// Compare-and-set the status. Also maintains the timestamps and run
    /// counters tied to status entry.
    fn transition_job(&self, id: JobId, expected: &[JobStatus], next: JobStatus) -> Result<Job>;
    /// A Job with this dedup key whose status is not `failed`.
    fn find_job_by_dedup_key(&self, key: &str) -> Result<Option<Job>>;
    /// Jobs in any of `statuses` (all Jobs if empty), by id.
    fn list_jobs(&self, statuses: &[JobStatus]) -> Result<Vec<Job>>;
    fn running_jobs_by_destination(&self, endpoint: &str) -> Result<usize>;
    /// Most recent Job of `job_type` created from `template`.
    fn latest_job_for_template(
        &self,
        template: TemplateId,
        job_type: JobType,
    ) -> Result<Option<Job>>;

    /// Replace the Transfers of a Job (a re-run starts from a fresh
    /// enumeration) and return them with ids assigned.
    fn replace_transfers(&self, job_id: JobId, transfers: Vec<Transfer>) -> Result<Vec<Transfer>>;
    fn update_transfer(&self, transfer: &Transfer) -> Result<()>;
    fn list_transfers(&self, job_id: JobId) -> Result<Vec<Transfer>>;

    fn set_endpoint_status(&self, endpoint: &str, status: ConnectionStatus) -> Result<()>;
    fn endpoint_status(&self, endpoint: &str) -> Result<ConnectionStatus>;
}

/// Build the store selected by `[config].store`.
pub fn open_store(cfg: &ConfigSection, fs: Arc<dyn FileSystem>) -> Result<Arc<dyn StateStore>> {
    Ok(match cfg.store {
        StoreMode::Memory => Arc::new(MemoryStateStore::new()),
        StoreMode::File => Arc::new(FileStateStore::open(&cfg.state_dir, fs)?),
    })
}
