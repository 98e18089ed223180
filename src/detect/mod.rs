// src/detect/mod.rs

//! Event detectors.
//!
//! Every detector exposes the same capability: `poll()` returns the trigger
//! events observed since the previous call (possibly none). A driver task
//! per detector calls it in a loop, forwards the events to the runtime and
//! tracks endpoint health. Detector failures never stop the process.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EndpointName, TriggerKind};

pub mod cursor;
pub mod debounce;
pub mod driver;
pub mod fs_watch;
pub mod health;
pub mod object_store;
pub mod schedule;

pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore};
pub use debounce::Debouncer;
pub use driver::{spawn_detector, DetectorHandle};
pub use fs_watch::FsWatchDetector;
pub use health::ConnectionHealth;
pub use object_store::ObjectStoreDetector;
pub use schedule::ScheduleDetector;

/// A normalised trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    /// Endpoint the event was observed on (event triggers only).
    pub endpoint: Option<EndpointName>,
    /// Endpoint-relative path of the file/object (event triggers only).
    pub path: String,
    /// ETag, content hash or size:mtime; part of the dedup key.
    pub content_marker: String,
    pub size: Option<u64>,
    pub observed_at: DateTime<Utc>,
    /// Template addressed by a manual or scheduled trigger.
    pub template: Option<String>,
    /// When the following scheduled tick is due.
    pub next_run: Option<DateTime<Utc>>,
}

impl TriggerEvent {
    pub fn file(
        kind: TriggerKind,
        endpoint: impl Into<String>,
        path: impl Into<String>,
        marker: impl Into<String>,
        size: Option<u64>,
    ) -> Self {
        Self {
            kind,
            endpoint: Some(endpoint.into()),
            path: path.into(),
            content_marker: marker.into(),
            size,
            observed_at: Utc::now(),
            template: None,
            next_run: None,
        }
    }

    pub fn object_created(
        endpoint: impl Into<String>,
        path: impl Into<String>,
        marker: impl Into<String>,
        size: Option<u64>,
    ) -> Self {
        Self::file(TriggerKind::ObjectCreated, endpoint, path, marker, size)
    }

    pub fn manual(template: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            kind: TriggerKind::Manual,
            endpoint: None,
            path: String::new(),
            content_marker: format!("manual:{}", now.timestamp_nanos_opt().unwrap_or_default()),
            size: None,
            observed_at: now,
            template: Some(template.into()),
            next_run: None,
        }
    }

    pub fn scheduled(template: impl Into<String>, next_run: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            kind: TriggerKind::Scheduled,
            endpoint: None,
            path: String::new(),
            content_marker: format!("tick:{}", now.timestamp_nanos_opt().unwrap_or_default()),
            size: None,
            observed_at: now,
            template: Some(template.into()),
            next_run: Some(next_run),
        }
    }
}

pub type PollFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<Vec<TriggerEvent>>> + Send + 'a>>;

/// A source of trigger events.
pub trait Detector: Send {
    /// Stable identifier, also the cursor key.
    fn name(&self) -> &str;

    /// Endpoint whose connection status this detector reports, if any.
    fn endpoint(&self) -> Option<&str>;

    /// Delay before the next `poll`.
    fn next_poll(&self) -> Duration;

    /// Events observed since the last call.
    fn poll(&mut self) -> PollFuture<'_>;
}
