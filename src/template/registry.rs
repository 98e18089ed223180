// src/template/registry.rs

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::model::EndpointConfig;
use crate::detect::TriggerEvent;
use crate::errors::{FerrymanError, Result};
use crate::template::model::Template;
use crate::template::path_template::PathTemplate;
use crate::template::pattern::SourcePattern;
use crate::types::{parse_duration, TemplateId, TriggerKind};

/// Check a template against the known endpoints.
///
/// Every failure is reported as [`FerrymanError::InvalidTemplate`].
pub fn validate(template: &Template, endpoints: &BTreeMap<String, EndpointConfig>) -> Result<()> {
    let invalid = |reason: String| FerrymanError::invalid_template(&template.name, reason);

    if template.name.trim().is_empty() {
        return Err(invalid("template name must not be empty".to_string()));
    }

    let source = endpoints.get(&template.source.endpoint).ok_or_else(|| {
        invalid(format!(
            "source references unknown endpoint '{}'",
            template.source.endpoint
        ))
    })?;

    match template.trigger {
        TriggerKind::ObjectCreated if !source.kind.is_object_store() => {
            return Err(invalid(format!(
                "trigger 'object_created' needs an object-store source, '{}' is {}",
                template.source.endpoint,
                source.kind.kind_name()
            )));
        }
        TriggerKind::FileCreated | TriggerKind::FileModified if !source.kind.is_local() => {
            return Err(invalid(format!(
                "trigger '{}' needs a local source, '{}' is {}",
                template.trigger,
                template.source.endpoint,
                source.kind.kind_name()
            )));
        }
        _ => {}
    }

    SourcePattern::new(&template.source.path, &template.source.pattern).map_err(invalid)?;

    for (index, hop) in template.hops().enumerate() {
        if !endpoints.contains_key(&hop.endpoint) {
            return Err(invalid(format!(
                "hop {} references unknown endpoint '{}'",
                index + 1,
                hop.endpoint
            )));
        }
        let path = PathTemplate::parse(&hop.path).map_err(invalid)?;
        if path.uses_file_placeholders() && !template.trigger.carries_file() {
            return Err(invalid(format!(
                "hop {} path '{}' uses a file placeholder, but '{}' triggers carry no file",
                index + 1,
                hop.path,
                template.trigger
            )));
        }
    }

    match (template.trigger, template.schedule.as_deref()) {
        (TriggerKind::Scheduled, None) => {
            return Err(invalid(
                "trigger 'scheduled' requires a `schedule` interval".to_string(),
            ));
        }
        (TriggerKind::Scheduled, Some(expr)) => {
            let every = parse_duration(expr).map_err(|e| invalid(format!("schedule: {e}")))?;
            if every.is_zero() {
                return Err(invalid("schedule interval must be > 0".to_string()));
            }
        }
        (_, Some(_)) => {
            return Err(invalid(format!(
                "`schedule` is only valid with trigger 'scheduled' (trigger is '{}')",
                template.trigger
            )));
        }
        (_, None) => {}
    }

    Ok(())
}

#[derive(Debug, Clone)]
struct Entry {
    template: Template,
    pattern: SourcePattern,
}

/// Validated templates in creation order, with their source globs compiled.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    entries: Vec<Entry>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_templates(
        templates: impl IntoIterator<Item = Template>,
        endpoints: &BTreeMap<String, EndpointConfig>,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for template in templates {
            registry.register(template, endpoints)?;
        }
        Ok(registry)
    }

    /// Validate and add a template. Names must be unique.
    pub fn register(
        &mut self,
        template: Template,
        endpoints: &BTreeMap<String, EndpointConfig>,
    ) -> Result<()> {
        validate(&template, endpoints)?;

        if self.by_name(&template.name).is_some() {
            return Err(FerrymanError::invalid_template(
                &template.name,
                "a template with this name is already registered",
            ));
        }

        let pattern = template
            .source_pattern()
            .map_err(|e| FerrymanError::invalid_template(&template.name, e))?;

        let pos = self
            .entries
            .partition_point(|e| e.template.id < template.id);
        debug!(template = %template.name, id = template.id, "template registered");
        self.entries.insert(pos, Entry { template, pattern });
        Ok(())
    }

    pub fn get(&self, id: TemplateId) -> Option<&Template> {
        self.entries
            .iter()
            .map(|e| &e.template)
            .find(|t| t.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Template> {
        self.entries
            .iter()
            .map(|e| &e.template)
            .find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.entries.iter().map(|e| &e.template)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_active(&mut self, id: TemplateId, active: bool) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.template.id == id)
            .ok_or_else(|| FerrymanError::NotFound(format!("template {id}")))?;
        entry.template.active = active;
        Ok(())
    }

    /// Active templates matching `event`, in creation order.
    ///
    /// Event triggers match on kind, source endpoint and source glob.
    /// Manual and scheduled triggers address a template by name.
    pub fn match_event(&self, event: &TriggerEvent) -> Vec<&Template> {
        self.entries
            .iter()
            .filter(|e| e.template.active && e.template.trigger == event.kind)
            .filter(|e| {
                if event.kind.carries_file() {
                    event.endpoint.as_deref() == Some(e.template.source.endpoint.as_str())
                        && e.pattern.matches(&event.path).is_some()
                } else {
                    event.template.as_deref() == Some(e.template.name.as_str())
                }
            })
            .map(|e| &e.template)
            .collect()
    }
}
