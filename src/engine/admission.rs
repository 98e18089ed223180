// src/engine/admission.rs

//! Admission control: the single owner of the running-job counters.

use std::collections::{BTreeMap, HashMap, VecDeque};

use tracing::debug;

use crate::config::ConfigFile;
use crate::types::{EndpointName, JobId};

/// Limit applied to destinations missing from the endpoint table.
pub const DEFAULT_ENDPOINT_LIMIT: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionLimits {
    pub max_concurrent_jobs: usize,
    /// `max_concurrent_transfers` per destination endpoint.
    pub per_endpoint: BTreeMap<EndpointName, usize>,
}

impl AdmissionLimits {
    pub fn new(max_concurrent_jobs: usize) -> Self {
        Self {
            max_concurrent_jobs,
            per_endpoint: BTreeMap::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>, limit: usize) -> Self {
        self.per_endpoint.insert(endpoint.into(), limit);
        self
    }

    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self {
            max_concurrent_jobs: cfg.config.max_concurrent_jobs,
            per_endpoint: cfg
                .endpoints()
                .iter()
                .map(|(name, ep)| (name.clone(), ep.max_concurrent_transfers))
                .collect(),
        }
    }

    pub fn endpoint_limit(&self, endpoint: &str) -> usize {
        self.per_endpoint
            .get(endpoint)
            .copied()
            .unwrap_or(DEFAULT_ENDPOINT_LIMIT)
    }
}

#[derive(Debug, Clone)]
struct Waiting {
    job_id: JobId,
    destination: EndpointName,
}

/// FIFO of queued Jobs plus the set of running ones.
///
/// [`admit`](Self::admit) walks the whole queue in order and takes every Job
/// whose destination still has room, so a saturated endpoint at the head
/// does not block Jobs bound elsewhere. Counters change only through
/// `admit` and `finish`, and a Job is counted at most once.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    limits: AdmissionLimits,
    queue: VecDeque<Waiting>,
    running: HashMap<JobId, EndpointName>,
    running_per_endpoint: HashMap<EndpointName, usize>,
}

impl AdmissionController {
    pub fn new(limits: AdmissionLimits) -> Self {
        Self {
            limits,
            queue: VecDeque::new(),
            running: HashMap::new(),
            running_per_endpoint: HashMap::new(),
        }
    }

    pub fn limits(&self) -> &AdmissionLimits {
        &self.limits
    }

    /// Append a Job to the queue. Returns `false` if it is already queued or
    /// running.
    pub fn enqueue(&mut self, job_id: JobId, destination: impl Into<String>) -> bool {
        if self.is_running(job_id) || self.is_queued(job_id) {
            return false;
        }
        self.queue.push_back(Waiting {
            job_id,
            destination: destination.into(),
        });
        true
    }

    /// Take every queued Job that fits under the limits, in queue order, and
    /// count it as running.
    pub fn admit(&mut self) -> Vec<JobId> {
        let mut admitted = Vec::new();
        let mut idx = 0;

        while idx < self.queue.len() {
            if self.running.len() >= self.limits.max_concurrent_jobs {
                break;
            }
            let destination = &self.queue[idx].destination;
            let in_use = self.running_on(destination);
            if in_use >= self.limits.endpoint_limit(destination) {
                idx += 1;
                continue;
            }

            let Some(waiting) = self.queue.remove(idx) else {
                break;
            };
            *self
                .running_per_endpoint
                .entry(waiting.destination.clone())
                .or_insert(0) += 1;
            debug!(
                job_id = waiting.job_id,
                destination = %waiting.destination,
                running = self.running.len() + 1,
                "job admitted"
            );
            self.running.insert(waiting.job_id, waiting.destination);
            admitted.push(waiting.job_id);
        }

        admitted
    }

    /// Release the slot of a running Job. Returns `false` if the Job was not
    /// running (nothing is released twice).
    pub fn finish(&mut self, job_id: JobId) -> bool {
        let Some(destination) = self.running.remove(&job_id) else {
            return false;
        };
        if let Some(count) = self.running_per_endpoint.get_mut(&destination) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.running_per_endpoint.remove(&destination);
            }
        }
        true
    }

    /// Drop a Job from the queue (cancellation). Returns `false` if it was
    /// not queued.
    pub fn remove_queued(&mut self, job_id: JobId) -> bool {
        match self.queue.iter().position(|w| w.job_id == job_id) {
            Some(pos) => {
                self.queue.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, job_id: JobId) -> bool {
        self.running.contains_key(&job_id)
    }

    pub fn is_queued(&self, job_id: JobId) -> bool {
        self.queue.iter().any(|w| w.job_id == job_id)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn running_on(&self, endpoint: &str) -> usize {
        self.running_per_endpoint.get(endpoint).copied().unwrap_or(0)
    }

    pub fn queued_ids(&self) -> Vec<JobId> {
        self.queue.iter().map(|w| w.job_id).collect()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.running.is_empty()
    }
}
