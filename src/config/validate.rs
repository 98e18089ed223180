// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{FerrymanError, Result};
use crate::template::{self, paths::normalize, Template};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FerrymanError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.endpoint, raw.template))
    }
}

impl ConfigFile {
    /// Templates as registry entries; ids follow file order starting at 1.
    pub fn build_templates(&self) -> Vec<Template> {
        self.template
            .iter()
            .enumerate()
            .map(|(i, cfg)| Template::from_config(i as u64 + 1, cfg))
            .collect()
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_global_config(cfg)?;
    validate_endpoints(cfg)?;
    validate_templates(cfg)?;
    validate_trigger_loops(cfg)?;
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    let c = &cfg.config;

    if c.max_concurrent_jobs == 0 {
        return Err(FerrymanError::Config(
            "[config].max_concurrent_jobs must be >= 1 (got 0)".to_string(),
        ));
    }
    if c.engine.trim().is_empty() {
        return Err(FerrymanError::Config(
            "[config].engine must name the copy engine executable".to_string(),
        ));
    }
    if c.retry.base_delay.0 > c.retry.max_delay.0 {
        return Err(FerrymanError::Config(format!(
            "[config.retry].base_delay ({:?}) exceeds max_delay ({:?})",
            c.retry.base_delay.0, c.retry.max_delay.0
        )));
    }
    if c.detect.poll_interval.0.is_zero() {
        return Err(FerrymanError::Config(
            "[config.detect].poll_interval must be > 0".to_string(),
        ));
    }
    if c.detect.degraded_after == 0 {
        return Err(FerrymanError::Config(
            "[config.detect].degraded_after must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

fn validate_endpoints(cfg: &RawConfigFile) -> Result<()> {
    for (name, endpoint) in cfg.endpoint.iter() {
        endpoint
            .kind
            .validate()
            .map_err(|e| FerrymanError::Config(format!("endpoint '{name}': {e}")))?;

        if endpoint.max_concurrent_transfers == 0 {
            return Err(FerrymanError::Config(format!(
                "endpoint '{name}': max_concurrent_transfers must be >= 1 (got 0)"
            )));
        }
    }
    Ok(())
}

fn validate_templates(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for (i, tcfg) in cfg.template.iter().enumerate() {
        if !seen.insert(tcfg.name.as_str()) {
            return Err(FerrymanError::invalid_template(
                &tcfg.name,
                "duplicate template name",
            ));
        }
        let template = Template::from_config(i as u64 + 1, tcfg);
        template::validate(&template, &cfg.endpoint)?;
    }
    Ok(())
}

/// Reject event-triggered templates that feed each other.
///
/// Edge `A -> B` when one of A's hops writes somewhere B watches (same
/// endpoint, overlapping directories). Only the literal prefix of a hop
/// path (before its first placeholder) is known statically, so overlap is
/// judged on that prefix.
fn validate_trigger_loops(cfg: &RawConfigFile) -> Result<()> {
    let watched: Vec<_> = cfg
        .template
        .iter()
        .filter(|t| t.active && t.trigger.is_event())
        .collect();

    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for t in watched.iter() {
        graph.add_node(t.name.as_str());
    }

    for writer in watched.iter() {
        let hops = std::iter::once(&writer.destination).chain(writer.chain.iter());
        for hop in hops {
            let written = literal_prefix(&hop.path);
            for reader in watched.iter() {
                if reader.source.endpoint == hop.endpoint
                    && overlaps(&written, &normalize(&reader.source.path))
                {
                    graph.add_edge(writer.name.as_str(), reader.name.as_str(), ());
                }
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(FerrymanError::Config(format!(
            "trigger loop detected: template '{}' (directly or through other templates) writes into its own watched source",
            cycle.node_id()
        ))),
    }
}

fn literal_prefix(path: &str) -> String {
    let normalized = normalize(path);
    normalized
        .split('/')
        .take_while(|seg| !seg.contains('{'))
        .collect::<Vec<_>>()
        .join("/")
}

fn overlaps(a: &str, b: &str) -> bool {
    is_within(a, b) || is_within(b, a)
}

fn is_within(inner: &str, outer: &str) -> bool {
    outer.is_empty()
        || inner == outer
        || inner
            .strip_prefix(outer)
            .is_some_and(|rest| rest.starts_with('/'))
}
