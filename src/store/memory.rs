// src/store/memory.rs

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{FerrymanError, Result};
use crate::jobs::{Job, Transfer};
use crate::store::{StateStore, TemplateCounter};
use crate::template::Template;
use crate::types::{ConnectionStatus, JobId, JobStatus, JobType, TemplateId};

/// Everything the store holds. Serialised as-is by the file store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateData {
    pub next_template_id: TemplateId,
    pub next_job_id: JobId,
    pub next_transfer_id: u64,
    pub templates: BTreeMap<TemplateId, Template>,
    pub jobs: BTreeMap<JobId, Job>,
    pub transfers: BTreeMap<JobId, Vec<Transfer>>,
    pub endpoints: BTreeMap<String, ConnectionStatus>,
}

impl StateData {
    fn job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.jobs
            .get_mut(&id)
            .ok_or_else(|| FerrymanError::NotFound(format!("job {id}")))
    }

    fn template_mut(&mut self, id: TemplateId) -> Result<&mut Template> {
        self.templates
            .get_mut(&id)
            .ok_or_else(|| FerrymanError::NotFound(format!("template {id}")))
    }

    fn upsert_template(&mut self, mut template: Template) -> Template {
        if let Some(existing) = self.templates.values_mut().find(|t| t.name == template.name) {
            template.id = existing.id;
            template.counters = existing.counters;
            template.last_error = existing.last_error.clone();
            template.created_at = existing.created_at;
            *existing = template.clone();
            return template;
        }

        // Keep ids from the definition when free so they follow file order.
        if template.id == 0 || self.templates.contains_key(&template.id) {
            template.id = self.next_template_id.max(1);
        }
        self.next_template_id = self.next_template_id.max(template.id + 1);
        self.templates.insert(template.id, template.clone());
        template
    }

    fn create_job(&mut self, mut job: Job) -> Job {
        self.next_job_id = self.next_job_id.max(1);
        job.id = self.next_job_id;
        self.next_job_id += 1;
        self.jobs.insert(job.id, job.clone());
        job
    }

    fn update_job(&mut self, job: &Job) -> Result<()> {
        let stored = self.job_mut(job.id)?;
        let owned = stored.clone();
        *stored = job.clone();
        // Fields maintained by `transition_job`.
        stored.status = owned.status;
        stored.queued_at = owned.queued_at;
        stored.started_at = owned.started_at;
        stored.completed_at = owned.completed_at;
        stored.last_run = owned.last_run;
        stored.total_runs = owned.total_runs;
        stored.successful_runs = owned.successful_runs;
        stored.failed_runs = owned.failed_runs;
        Ok(())
    }

    fn transition_job(&mut self, id: JobId, expected: &[JobStatus], next: JobStatus) -> Result<Job> {
        let job = self.job_mut(id)?;
        let actual = job.status;
        if !expected.contains(&actual) || !actual.can_transition_to(next) {
            return Err(FerrymanError::StaleStatus {
                job_id: id,
                expected: expected.to_vec(),
                actual,
            });
        }

        let now = Utc::now();
        job.status = next;
        match next {
            JobStatus::Queued => {
                job.queued_at = Some(now);
                job.completed_at = None;
                if job.job_type != JobType::Scheduled {
                    job.next_run = None;
                }
            }
            JobStatus::Running => {
                job.started_at.get_or_insert(now);
                job.last_run = Some(now);
                job.total_runs += 1;
            }
            JobStatus::Completed => {
                job.completed_at = Some(now);
                job.successful_runs += 1;
                job.progress_percentage = 100.0;
                if job.job_type != JobType::Scheduled {
                    job.next_run = None;
                }
            }
            JobStatus::Failed => {
                job.completed_at = Some(now);
                job.failed_runs += 1;
            }
            JobStatus::Cancelled => {
                job.completed_at = Some(now);
            }
            JobStatus::Pending | JobStatus::Retrying => {}
        }
        debug!(job_id = id, from = %actual, to = %next, "job status transition");
        Ok(job.clone())
    }

    fn replace_transfers(&mut self, job_id: JobId, transfers: Vec<Transfer>) -> Vec<Transfer> {
        let mut assigned = Vec::with_capacity(transfers.len());
        for mut t in transfers {
            self.next_transfer_id = self.next_transfer_id.max(1);
            t.id = self.next_transfer_id;
            t.job_id = job_id;
            self.next_transfer_id += 1;
            assigned.push(t);
        }
        self.transfers.insert(job_id, assigned.clone());
        assigned
    }

    fn update_transfer(&mut self, transfer: &Transfer) -> Result<()> {
        let slot = self
            .transfers
            .get_mut(&transfer.job_id)
            .and_then(|ts| ts.iter_mut().find(|t| t.id == transfer.id))
            .ok_or_else(|| FerrymanError::NotFound(format!("transfer {}", transfer.id)))?;
        *slot = transfer.clone();
        Ok(())
    }
}

/// In-process store. Also the engine behind [`FileStateStore`].
///
/// [`FileStateStore`]: crate::store::FileStateStore
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    data: Mutex<StateData>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(data: StateData) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StateData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> StateData {
        self.lock().clone()
    }
}

impl StateStore for MemoryStateStore {
    fn upsert_template(&self, template: Template) -> Result<Template> {
        Ok(self.lock().upsert_template(template))
    }

    fn get_template(&self, id: TemplateId) -> Result<Template> {
        self.lock()
            .templates
            .get(&id)
            .cloned()
            .ok_or_else(|| FerrymanError::NotFound(format!("template {id}")))
    }

    fn list_templates(&self) -> Result<Vec<Template>> {
        Ok(self.lock().templates.values().cloned().collect())
    }

    fn bump_template_counter(&self, id: TemplateId, counter: TemplateCounter) -> Result<()> {
        let mut data = self.lock();
        let counters = &mut data.template_mut(id)?.counters;
        match counter {
            TemplateCounter::Trigger => counters.total_triggers += 1,
            TemplateCounter::Success => counters.successful_transfers += 1,
            TemplateCounter::Failure => counters.failed_transfers += 1,
        }
        Ok(())
    }

    fn set_template_error(&self, id: TemplateId, error: Option<String>) -> Result<()> {
        self.lock().template_mut(id)?.last_error = error;
        Ok(())
    }

    fn create_job(&self, job: Job) -> Result<Job> {
        Ok(self.lock().create_job(job))
    }

    fn get_job(&self, id: JobId) -> Result<Job> {
        self.lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| FerrymanError::NotFound(format!("job {id}")))
    }

    fn update_job(&self, job: &Job) -> Result<()> {
        self.lock().update_job(job)
    }

    fn transition_job(&self, id: JobId, expected: &[JobStatus], next: JobStatus) -> Result<Job> {
        self.lock().transition_job(id, expected, next)
    }

    fn find_job_by_dedup_key(&self, key: &str) -> Result<Option<Job>> {
        Ok(self
            .lock()
            .jobs
            .values()
            .find(|j| j.dedup_key.as_deref() == Some(key) && j.status != JobStatus::Failed)
            .cloned())
    }

    fn list_jobs(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|j| statuses.is_empty() || statuses.contains(&j.status))
            .cloned()
            .collect())
    }

    fn running_jobs_by_destination(&self, endpoint: &str) -> Result<usize> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Running && j.destination_endpoint == endpoint)
            .count())
    }

    fn latest_job_for_template(
        &self,
        template: TemplateId,
        job_type: JobType,
    ) -> Result<Option<Job>> {
        Ok(self
            .lock()
            .jobs
            .values()
            .rev()
            .find(|j| j.template_id == Some(template) && j.job_type == job_type)
            .cloned())
    }

    fn replace_transfers(&self, job_id: JobId, transfers: Vec<Transfer>) -> Result<Vec<Transfer>> {
        let mut data = self.lock();
        data.job_mut(job_id)?;
        Ok(data.replace_transfers(job_id, transfers))
    }

    fn update_transfer(&self, transfer: &Transfer) -> Result<()> {
        self.lock().update_transfer(transfer)
    }

    fn list_transfers(&self, job_id: JobId) -> Result<Vec<Transfer>> {
        Ok(self
            .lock()
            .transfers
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }

    fn set_endpoint_status(&self, endpoint: &str, status: ConnectionStatus) -> Result<()> {
        self.lock().endpoints.insert(endpoint.to_string(), status);
        Ok(())
    }

    fn endpoint_status(&self, endpoint: &str) -> Result<ConnectionStatus> {
        Ok(self
            .lock()
            .endpoints
            .get(endpoint)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::draft(JobType::Manual, ("a", "in"), ("b", "out"), "*")
    }

    #[test]
    fn cas_rejects_stale_expectation() {
        let store = MemoryStateStore::new();
        let j = store.create_job(job()).unwrap();
        assert_eq!(j.id, 1);

        store
            .transition_job(j.id, &[JobStatus::Pending], JobStatus::Queued)
            .unwrap();
        let err = store
            .transition_job(j.id, &[JobStatus::Pending], JobStatus::Cancelled)
            .unwrap_err();
        assert!(matches!(
            err,
            FerrymanError::StaleStatus { actual: JobStatus::Queued, .. }
        ));
    }

    #[test]
    fn illegal_transition_is_rejected_even_if_expected_matches() {
        let store = MemoryStateStore::new();
        let j = store.create_job(job()).unwrap();
        assert!(store
            .transition_job(j.id, &[JobStatus::Pending], JobStatus::Running)
            .is_err());
    }

    #[test]
    fn run_counters_follow_status_entry() {
        let store = MemoryStateStore::new();
        let j = store.create_job(job()).unwrap();
        store.transition_job(j.id, &[JobStatus::Pending], JobStatus::Queued).unwrap();
        store.transition_job(j.id, &[JobStatus::Queued], JobStatus::Running).unwrap();
        store.transition_job(j.id, &[JobStatus::Running], JobStatus::Failed).unwrap();
        store.transition_job(j.id, &[JobStatus::Failed], JobStatus::Retrying).unwrap();
        store.transition_job(j.id, &[JobStatus::Retrying], JobStatus::Queued).unwrap();
        store.transition_job(j.id, &[JobStatus::Queued], JobStatus::Running).unwrap();
        let done = store
            .transition_job(j.id, &[JobStatus::Running], JobStatus::Completed)
            .unwrap();
        assert_eq!(done.total_runs, 2);
        assert_eq!(done.failed_runs, 1);
        assert_eq!(done.successful_runs, 1);
        assert_eq!(done.progress_percentage, 100.0);
    }

    #[test]
    fn update_job_never_touches_status() {
        let store = MemoryStateStore::new();
        let j = store.create_job(job()).unwrap();
        store.transition_job(j.id, &[JobStatus::Pending], JobStatus::Cancelled).unwrap();

        let mut stale = j.clone();
        stale.total_files = 3;
        stale.status = JobStatus::Running;
        store.update_job(&stale).unwrap();

        let stored = store.get_job(j.id).unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert_eq!(stored.total_files, 3);
    }

    #[test]
    fn dedup_lookup_ignores_failed_jobs() {
        let store = MemoryStateStore::new();
        let mut draft = job();
        draft.dedup_key = Some("k".into());
        let j = store.create_job(draft).unwrap();
        assert!(store.find_job_by_dedup_key("k").unwrap().is_some());

        store.transition_job(j.id, &[JobStatus::Pending], JobStatus::Queued).unwrap();
        store.transition_job(j.id, &[JobStatus::Queued], JobStatus::Running).unwrap();
        store.transition_job(j.id, &[JobStatus::Running], JobStatus::Failed).unwrap();
        assert!(store.find_job_by_dedup_key("k").unwrap().is_none());
    }

    #[test]
    fn running_count_is_per_destination() {
        let store = MemoryStateStore::new();
        for dest in ["b", "b", "c"] {
            let j = store
                .create_job(Job::draft(JobType::Manual, ("a", ""), (dest, ""), "*"))
                .unwrap();
            store.transition_job(j.id, &[JobStatus::Pending], JobStatus::Queued).unwrap();
            store.transition_job(j.id, &[JobStatus::Queued], JobStatus::Running).unwrap();
        }
        assert_eq!(store.running_jobs_by_destination("b").unwrap(), 2);
        assert_eq!(store.running_jobs_by_destination("c").unwrap(), 1);
        assert_eq!(store.running_jobs_by_destination("a").unwrap(), 0);
    }
}
