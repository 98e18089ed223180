// src/jobs/chain.rs

//! Chain continuation: a completed hop materializes the next one.

use tracing::{info, warn};

use crate::errors::Result;
use crate::jobs::materializer::{Materialized, Materializer};
use crate::jobs::model::Job;
use crate::store::{StateStore, TemplateCounter};
use crate::template::Template;

/// Index of the hop after `job`'s, if `template` declares one.
pub fn next_hop_index(template: &Template, job: &Job) -> Option<usize> {
    if job.template_id != Some(template.id) {
        return None;
    }
    template
        .has_hop_after(job.hop_index)
        .then_some(job.hop_index + 1)
}

/// What continuing a chain produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainStep {
    /// Last hop; nothing further.
    Finished,
    /// A new Job for the next hop, to be submitted to the dispatcher.
    Next(Job),
    /// The next hop already exists (replayed completion).
    AlreadyMaterialized(Job),
    /// Materializing the next hop failed. The parent stays `completed`; the
    /// failure is recorded on the template.
    Failed(String),
}

/// Continue the chain after `parent` completed.
///
/// Only store errors are returned as `Err`.
pub fn continue_chain(
    materializer: &Materializer,
    store: &dyn StateStore,
    parent: &Job,
    template: &Template,
) -> Result<ChainStep> {
    if next_hop_index(template, parent).is_none() {
        return Ok(ChainStep::Finished);
    }

    match materializer.materialize_next_hop(parent, template) {
        Ok(Materialized::Created(job)) => {
            info!(
                parent_job_id = parent.id,
                job_id = job.id,
                template = %template.name,
                "chain continued"
            );
            Ok(ChainStep::Next(job))
        }
        Ok(Materialized::Existing(job)) => Ok(ChainStep::AlreadyMaterialized(job)),
        Ok(Materialized::Skipped(reason)) => Ok(ChainStep::Failed(reason)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            let message = format!(
                "chain hop {} after job {} could not be materialized: {e}",
                parent.hop_index + 2,
                parent.id
            );
            warn!(template = %template.name, parent_job_id = parent.id, error = %e, "chain continuation failed");
            store.bump_template_counter(template.id, TemplateCounter::Failure)?;
            store.set_template_error(template.id, Some(message.clone()))?;
            Ok(ChainStep::Failed(message))
        }
    }
}
