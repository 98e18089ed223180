// src/detect/object_store.rs

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::EndpointConfig;
use crate::detect::cursor::{diff, Cursor, CursorStore};
use crate::detect::{Detector, PollFuture, TriggerEvent};
use crate::exec::copy_engine::CopyEngine;
use crate::template::paths::normalize;

/// Periodically lists prefixes of an object-store endpoint and emits one
/// `object_created` event per object that is new or whose marker changed
/// since the previous listing.
pub struct ObjectStoreDetector {
    name: String,
    endpoint_name: String,
    endpoint: EndpointConfig,
    prefixes: Vec<String>,
    engine: Arc<dyn CopyEngine>,
    cursors: Box<dyn CursorStore>,
    seen: Option<Cursor>,
    loaded: bool,
    trigger_existing: bool,
    interval: Duration,
}

impl ObjectStoreDetector {
    pub fn new(
        endpoint_name: impl Into<String>,
        endpoint: EndpointConfig,
        prefixes: Vec<String>,
        engine: Arc<dyn CopyEngine>,
        cursors: Box<dyn CursorStore>,
        interval: Duration,
    ) -> Self {
        let endpoint_name = endpoint_name.into();
        let mut prefixes: Vec<String> = prefixes.iter().map(|p| normalize(p)).collect();
        prefixes.sort();
        prefixes.dedup();
        // A prefix nested inside another one would list its objects twice.
        let prefixes = prefixes
            .iter()
            .filter(|p| {
                !prefixes
                    .iter()
                    .any(|outer| outer != *p && (outer.is_empty() || p.starts_with(&format!("{outer}/"))))
            })
            .cloned()
            .collect();

        Self {
            name: format!("objects-{endpoint_name}"),
            endpoint_name,
            endpoint,
            prefixes,
            engine,
            cursors,
            seen: None,
            loaded: false,
            trigger_existing: false,
            interval,
        }
    }

    /// Emit events for objects already present on the very first listing.
    pub fn with_trigger_existing(mut self, trigger_existing: bool) -> Self {
        self.trigger_existing = trigger_existing;
        self
    }

    async fn poll_once(&mut self) -> anyhow::Result<Vec<TriggerEvent>> {
        if !self.loaded {
            self.seen = self.cursors.load(&self.name)?;
            self.loaded = true;
        }

        let resolved = self
            .endpoint
            .resolve(&self.endpoint_name)
            .map_err(anyhow::Error::msg)?;

        let mut current = Cursor::new();
        let mut sizes = std::collections::HashMap::new();
        for prefix in self.prefixes.iter() {
            for entry in self.engine.list(&resolved, prefix).await? {
                let path = normalize(&entry.path);
                sizes.insert(path.clone(), entry.size);
                current.insert(path, entry.marker());
            }
        }

        let events = match self.seen.as_ref() {
            None if !self.trigger_existing => {
                info!(
                    detector = %self.name,
                    objects = current.len(),
                    "first listing recorded as baseline"
                );
                Vec::new()
            }
            previous => {
                let empty = Cursor::new();
                let d = diff(previous.unwrap_or(&empty), &current);
                d.added
                    .iter()
                    .chain(d.changed.iter())
                    .map(|path| {
                        TriggerEvent::object_created(
                            &self.endpoint_name,
                            path,
                            current.get(path).cloned().unwrap_or_default(),
                            sizes.get(path).copied(),
                        )
                    })
                    .collect()
            }
        };

        let changed = self.seen.as_ref() != Some(&current);
        if changed {
            self.cursors.save(&self.name, &current)?;
        }
        self.seen = Some(current);

        debug!(detector = %self.name, events = events.len(), "object listing diffed");
        Ok(events)
    }
}

impl Detector for ObjectStoreDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.endpoint_name)
    }

    fn next_poll(&self) -> Duration {
        self.interval
    }

    fn poll(&mut self) -> PollFuture<'_> {
        Box::pin(self.poll_once())
    }
}
