// src/template/model.rs

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::model::TemplateConfig;
use crate::template::pattern::SourcePattern;
use crate::types::{parse_duration, EndpointName, TemplateId, TriggerKind};

/// A registered transfer template.
///
/// Read-only to the orchestration core except for [`TemplateCounters`] and
/// `last_error`, which the store updates in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub trigger: TriggerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    pub source: SourceSpec,
    pub destination: HopSpec,
    #[serde(default)]
    pub chain: Vec<HopSpec>,
    #[serde(default)]
    pub delete_source_after_transfer: bool,
    pub active: bool,
    #[serde(default)]
    pub counters: TemplateCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub endpoint: EndpointName,
    pub path: String,
    pub pattern: String,
}

/// One `(endpoint, path template)` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopSpec {
    pub endpoint: EndpointName,
    pub path: String,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateCounters {
    pub total_triggers: u64,
    pub successful_transfers: u64,
    pub failed_transfers: u64,
}

impl Template {
    pub fn from_config(id: TemplateId, cfg: &TemplateConfig) -> Self {
        Self {
            id,
            name: cfg.name.clone(),
            trigger: cfg.trigger,
            schedule: cfg.schedule.clone(),
            source: SourceSpec {
                endpoint: cfg.source.endpoint.clone(),
                path: cfg.source.path.clone(),
                pattern: cfg.source.pattern.clone(),
            },
            destination: HopSpec {
                endpoint: cfg.destination.endpoint.clone(),
                path: cfg.destination.path.clone(),
            },
            chain: cfg
                .chain
                .iter()
                .map(|h| HopSpec {
                    endpoint: h.endpoint.clone(),
                    path: h.path.clone(),
                })
                .collect(),
            delete_source_after_transfer: cfg.delete_source_after_transfer,
            active: cfg.active,
            counters: TemplateCounters::default(),
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// Hop `0` is the destination, hop `n` is `chain[n - 1]`.
    pub fn hop(&self, index: usize) -> Option<&HopSpec> {
        if index == 0 {
            Some(&self.destination)
        } else {
            self.chain.get(index - 1)
        }
    }

    pub fn hop_count(&self) -> usize {
        1 + self.chain.len()
    }

    pub fn has_hop_after(&self, index: usize) -> bool {
        index + 1 < self.hop_count()
    }

    pub fn hops(&self) -> impl Iterator<Item = &HopSpec> {
        std::iter::once(&self.destination).chain(self.chain.iter())
    }

    pub fn source_pattern(&self) -> Result<SourcePattern, String> {
        SourcePattern::new(&self.source.path, &self.source.pattern)
    }

    /// Interval of a scheduled template; `None` for every other trigger or
    /// a schedule that does not parse.
    pub fn schedule_interval(&self) -> Option<Duration> {
        if self.trigger != TriggerKind::Scheduled {
            return None;
        }
        self.schedule.as_deref().and_then(|s| parse_duration(s).ok())
    }
}
