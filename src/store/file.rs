// src/store/file.rs

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::errors::{FerrymanError, Result};
use crate::fs::FileSystem;
use crate::jobs::{Job, Transfer};
use crate::store::memory::{MemoryStateStore, StateData};
use crate::store::{StateStore, TemplateCounter};
use crate::template::Template;
use crate::types::{ConnectionStatus, JobId, JobStatus, JobType, TemplateId};

/// Snapshot file below the state dir.
pub const STATE_FILE: &str = "state.json";

/// [`MemoryStateStore`] that writes a JSON snapshot to
/// `<state_dir>/state.json` after every mutation.
#[derive(Debug)]
pub struct FileStateStore {
    inner: MemoryStateStore,
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    /// Serialises mutate+persist so snapshots land in mutation order.
    write_lock: Mutex<()>,
}

impl FileStateStore {
    /// Open (or start) the snapshot in `state_dir`.
    pub fn open(state_dir: impl AsRef<Path>, fs: Arc<dyn FileSystem>) -> Result<Self> {
        let path = state_dir.as_ref().join(STATE_FILE);
        let data = if fs.exists(&path) {
            let contents = fs
                .read_to_string(&path)
                .map_err(|e| FerrymanError::Store(format!("reading {}: {e:#}", path.display())))?;
            let data: StateData = serde_json::from_str(&contents).map_err(|e| {
                FerrymanError::Store(format!("corrupt state file {}: {e}", path.display()))
            })?;
            info!(
                path = %path.display(),
                jobs = data.jobs.len(),
                templates = data.templates.len(),
                "state loaded"
            );
            data
        } else {
            StateData::default()
        };

        Ok(Self {
            inner: MemoryStateStore::from_data(data),
            path,
            fs,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&*self.inner.lock())?;
        self.fs
            .write(&self.path, &json)
            .map_err(|e| FerrymanError::Store(format!("writing {}: {e:#}", self.path.display())))
    }

    fn mutate<T>(&self, op: impl FnOnce(&MemoryStateStore) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let out = op(&self.inner)?;
        self.persist()?;
        Ok(out)
    }
}

impl StateStore for FileStateStore {
    fn upsert_template(&self, template: Template) -> Result<Template> {
        self.mutate(|s| s.upsert_template(template))
    }

    fn get_template(&self, id: TemplateId) -> Result<Template> {
        self.inner.get_template(id)
    }

    fn list_templates(&self) -> Result<Vec<Template>> {
        self.inner.list_templates()
    }

    fn bump_template_counter(&self, id: TemplateId, counter: TemplateCounter) -> Result<()> {
        self.mutate(|s| s.bump_template_counter(id, counter))
    }

    fn set_template_error(&self, id: TemplateId, error: Option<String>) -> Result<()> {
        self.mutate(|s| s.set_template_error(id, error))
    }

    fn create_job(&self, job: Job) -> Result<Job> {
        self.mutate(|s| s.create_job(job))
    }

    fn get_job(&self, id: JobId) -> Result<Job> {
        self.inner.get_job(id)
    }

    fn update_job(&self, job: &Job) -> Result<()> {
        self.mutate(|s| s.update_job(job))
    }

    fn transition_job(&self, id: JobId, expected: &[JobStatus], next: JobStatus) -> Result<Job> {
        self.mutate(|s| s.transition_job(id, expected, next))
    }

    fn find_job_by_dedup_key(&self, key: &str) -> Result<Option<Job>> {
        self.inner.find_job_by_dedup_key(key)
    }

    fn list_jobs(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        self.inner.list_jobs(statuses)
    }

    fn running_jobs_by_destination(&self, endpoint: &str) -> Result<usize> {
        self.inner.running_jobs_by_destination(endpoint)
    }

    fn latest_job_for_template(
        &self,
        template: TemplateId,
        job_type: JobType,
    ) -> Result<Option<Job>> {
        self.inner.latest_job_for_template(template, job_type)
    }

    fn replace_transfers(&self, job_id: JobId, transfers: Vec<Transfer>) -> Result<Vec<Transfer>> {
        self.mutate(|s| s.replace_transfers(job_id, transfers))
    }

    fn update_transfer(&self, transfer: &Transfer) -> Result<()> {
        self.mutate(|s| s.update_transfer(transfer))
    }

    fn list_transfers(&self, job_id: JobId) -> Result<Vec<Transfer>> {
        self.inner.list_transfers(job_id)
    }

    fn set_endpoint_status(&self, endpoint: &str, status: ConnectionStatus) -> Result<()> {
        self.mutate(|s| s.set_endpoint_status(endpoint, status))
    }

    fn endpoint_status(&self, endpoint: &str) -> Result<ConnectionStatus> {
        self.inner.endpoint_status(endpoint)
    }
}
