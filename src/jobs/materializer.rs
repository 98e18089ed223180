// src/jobs/materializer.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::config::EndpointConfig;
use crate::detect::TriggerEvent;
use crate::errors::{FerrymanError, Result};
use crate::jobs::model::Job;
use crate::store::{StateStore, TemplateCounter};
use crate::template::paths::{join, normalize};
use crate::template::{PathContext, PathTemplate, SourcePattern, Template};
use crate::types::{JobType, TriggerKind};

/// Outcome of a materialization attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Materialized {
    Created(Job),
    /// The same trigger already produced this (non-failed) Job.
    Existing(Job),
    /// Nothing created, with the reason (e.g. a scheduled run still busy).
    Skipped(String),
}

impl Materialized {
    pub fn created(&self) -> Option<&Job> {
        match self {
            Materialized::Created(job) => Some(job),
            _ => None,
        }
    }
}

/// A Job submitted directly, without a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualJobRequest {
    pub source_endpoint: String,
    pub source_path: String,
    pub destination_endpoint: String,
    pub destination_path: String,
    pub file_pattern: String,
    pub delete_source_after_transfer: bool,
}

/// Turns trigger events into stored `pending` Jobs.
#[derive(Debug, Clone)]
pub struct Materializer {
    store: Arc<dyn StateStore>,
    endpoints: Arc<BTreeMap<String, EndpointConfig>>,
}

impl Materializer {
    pub fn new(store: Arc<dyn StateStore>, endpoints: Arc<BTreeMap<String, EndpointConfig>>) -> Self {
        Self { store, endpoints }
    }

    /// Create the Job `event` asks of `template`.
    ///
    /// Fails with [`FerrymanError::Materialization`] when the event does
    /// not actually match the template's source, or when endpoint
    /// credentials cannot be resolved. Replays of an already materialized
    /// event return the existing Job.
    pub fn materialize(&self, event: &TriggerEvent, template: &Template) -> Result<Materialized> {
        if event.kind != template.trigger {
            return Err(FerrymanError::Materialization(format!(
                "template '{}' is not triggered by '{}' events",
                template.name, event.kind
            )));
        }

        let mut job = if event.kind.carries_file() {
            self.event_job(event, template)?
        } else {
            self.template_job(event, template)?
        };

        if let Some(key) = job.dedup_key.as_deref() {
            if let Some(existing) = self.store.find_job_by_dedup_key(key)? {
                debug!(
                    template = %template.name,
                    job_id = existing.id,
                    "trigger already materialized; reusing job"
                );
                return Ok(Materialized::Existing(existing));
            }
        }

        if event.kind == TriggerKind::Scheduled {
            if let Some(previous) = self
                .store
                .latest_job_for_template(template.id, JobType::Scheduled)?
            {
                if !previous.status.is_terminal() {
                    return Ok(Materialized::Skipped(format!(
                        "previous scheduled job {} is still {}",
                        previous.id, previous.status
                    )));
                }
            }
        }

        self.check_credentials(&job)?;
        job.next_run = event.next_run;

        let job = self.store.create_job(job)?;
        self.store
            .bump_template_counter(template.id, TemplateCounter::Trigger)?;
        info!(
            job_id = job.id,
            template = %template.name,
            trigger = %event.kind,
            src = %format!("{}:{}", job.source_endpoint, job.source_path),
            dst = %format!("{}:{}", job.destination_endpoint, job.destination_path),
            "job materialized"
        );
        Ok(Materialized::Created(job))
    }

    /// Materialize hop `parent.hop_index + 1` of `template`, sourcing from
    /// `parent`'s destination.
    pub fn materialize_next_hop(&self, parent: &Job, template: &Template) -> Result<Materialized> {
        let hop_index = parent.hop_index + 1;
        let hop = template.hop(hop_index).ok_or_else(|| {
            FerrymanError::Materialization(format!(
                "template '{}' has no hop after {}",
                template.name, parent.hop_index
            ))
        })?;

        let ctx = self.context(template, hop_index, parent.file_name.clone(), parent.file_dir.clone());
        let destination_path = render(template, &hop.path, &ctx)?;

        let mut job = Job::draft(
            JobType::Chained,
            (parent.destination_endpoint.clone(), parent.destination_path.clone()),
            (hop.endpoint.clone(), destination_path),
            parent.file_pattern.clone(),
        );
        job.template_id = Some(template.id);
        job.hop_index = hop_index;
        job.parent_job_id = Some(parent.id);
        job.file_name = parent.file_name.clone();
        job.file_dir = parent.file_dir.clone();
        let key = format!("chain:{}:{}:{}", template.id, hop_index, parent.id);
        if let Some(existing) = self.store.find_job_by_dedup_key(&key)? {
            return Ok(Materialized::Existing(existing));
        }
        job.dedup_key = Some(key);

        self.check_credentials(&job)?;
        let job = self.store.create_job(job)?;
        info!(
            job_id = job.id,
            parent_job_id = parent.id,
            template = %template.name,
            hop = hop_index + 1,
            "chained job materialized"
        );
        Ok(Materialized::Created(job))
    }

    /// Store a manual Job that has no template behind it.
    pub fn submit_manual(&self, request: ManualJobRequest) -> Result<Job> {
        SourcePattern::new(&request.source_path, &request.file_pattern)
            .map_err(FerrymanError::Materialization)?;

        let mut job = Job::draft(
            JobType::Manual,
            (request.source_endpoint, normalize(&request.source_path)),
            (request.destination_endpoint, normalize(&request.destination_path)),
            request.file_pattern,
        );
        job.delete_source_after_transfer = request.delete_source_after_transfer;

        self.check_credentials(&job)?;
        let job = self.store.create_job(job)?;
        info!(job_id = job.id, "manual job submitted");
        Ok(job)
    }

    fn event_job(&self, event: &TriggerEvent, template: &Template) -> Result<Job> {
        if event.endpoint.as_deref() != Some(template.source.endpoint.as_str()) {
            return Err(FerrymanError::Materialization(format!(
                "event on endpoint {:?} does not belong to template '{}' (source '{}')",
                event.endpoint, template.name, template.source.endpoint
            )));
        }

        let pattern = template
            .source_pattern()
            .map_err(FerrymanError::Materialization)?;
        let matched = pattern.matches(&event.path).ok_or_else(|| {
            FerrymanError::Materialization(format!(
                "path '{}' does not match source pattern '{}' of template '{}'",
                event.path,
                pattern.raw(),
                template.name
            ))
        })?;

        let ctx = self.context(
            template,
            0,
            Some(matched.filename.clone()),
            Some(matched.dir.clone()),
        );
        let destination_path = render(template, &template.destination.path, &ctx)?;

        let mut job = Job::draft(
            JobType::EventTriggered,
            (
                template.source.endpoint.clone(),
                join(pattern.base(), &matched.dir),
            ),
            (template.destination.endpoint.clone(), destination_path),
            globset::escape(&matched.filename),
        );
        job.template_id = Some(template.id);
        job.delete_source_after_transfer = template.delete_source_after_transfer;
        job.file_name = Some(matched.filename);
        job.file_dir = Some(matched.dir);
        job.dedup_key = Some(format!(
            "event:{}:{}:{}:{}",
            template.id, template.source.endpoint, matched.path, event.content_marker
        ));
        Ok(job)
    }

    fn template_job(&self, event: &TriggerEvent, template: &Template) -> Result<Job> {
        let ctx = self.context(template, 0, None, None);
        let destination_path = render(template, &template.destination.path, &ctx)?;

        let job_type = match event.kind {
            TriggerKind::Scheduled => JobType::Scheduled,
            _ => JobType::Manual,
        };
        let mut job = Job::draft(
            job_type,
            (template.source.endpoint.clone(), normalize(&template.source.path)),
            (template.destination.endpoint.clone(), destination_path),
            template.source.pattern.clone(),
        );
        job.template_id = Some(template.id);
        job.delete_source_after_transfer = template.delete_source_after_transfer;
        job.dedup_key = Some(format!(
            "{}:{}:{}",
            event.kind, template.id, event.content_marker
        ));
        Ok(job)
    }

    fn context(
        &self,
        template: &Template,
        hop_index: usize,
        filename: Option<String>,
        dir: Option<String>,
    ) -> PathContext {
        PathContext {
            filename,
            dir,
            template: template.name.clone(),
            date: Utc::now().format("%Y-%m-%d").to_string(),
            hop: hop_index + 1,
        }
    }

    /// Resolve both endpoints' credentials; each hop resolves independently.
    fn check_credentials(&self, job: &Job) -> Result<()> {
        for name in [&job.source_endpoint, &job.destination_endpoint] {
            let endpoint = self.endpoints.get(name.as_str()).ok_or_else(|| {
                FerrymanError::Materialization(format!("unknown endpoint '{name}'"))
            })?;
            endpoint
                .resolve(name)
                .map_err(FerrymanError::Materialization)?;
        }
        Ok(())
    }
}

fn render(template: &Template, raw: &str, ctx: &PathContext) -> Result<String> {
    PathTemplate::parse(raw)
        .and_then(|t| t.render(ctx))
        .map_err(|e| {
            FerrymanError::Materialization(format!("template '{}': {e}", template.name))
        })
}
