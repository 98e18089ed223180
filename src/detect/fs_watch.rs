// src/detect/fs_watch.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::detect::cursor::{Cursor, CursorStore};
use crate::detect::debounce::Debouncer;
use crate::detect::{Detector, PollFuture, TriggerEvent};
use crate::fs::{hash_file, FileSystem};
use crate::template::paths::{normalize, strip_base};
use crate::types::TriggerKind;

/// Raw notification forwarded from the notify callback.
pub type WatchMessage = std::result::Result<PathBuf, String>;

/// Shortest delay between two polls of the notification queue.
const MIN_TICK: Duration = Duration::from_millis(50);

/// Watches directories of a local endpoint.
///
/// Change notifications are debounced per path. Once a path has settled it
/// is classified against the cursor: unknown paths yield `file_created`,
/// known paths with a different marker yield `file_modified`, removed paths
/// are forgotten. The first poll also scans the watched directories to
/// catch up on changes made while the process was not running.
pub struct FsWatchDetector {
    name: String,
    endpoint: String,
    root: PathBuf,
    /// Watched directories, relative to `root`.
    dirs: Vec<String>,
    fs: Arc<dyn FileSystem>,
    cursors: Box<dyn CursorStore>,
    seen: Cursor,
    scanned: bool,
    debouncer: Debouncer,
    quiet: Duration,
    hash_content: bool,
    trigger_existing: bool,
    rx: mpsc::UnboundedReceiver<WatchMessage>,
    tx: mpsc::UnboundedSender<WatchMessage>,
    watcher: Option<RecommendedWatcher>,
    use_notify: bool,
}

impl FsWatchDetector {
    pub fn new(
        endpoint: impl Into<String>,
        root: impl Into<PathBuf>,
        dirs: Vec<String>,
        fs: Arc<dyn FileSystem>,
        cursors: Box<dyn CursorStore>,
        quiet: Duration,
    ) -> Self {
        let endpoint = endpoint.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut dirs: Vec<String> = dirs.iter().map(|d| normalize(d)).collect();
        dirs.sort();
        dirs.dedup();

        Self {
            name: format!("fs-{endpoint}"),
            endpoint,
            root: root.into(),
            dirs,
            fs,
            cursors,
            seen: Cursor::new(),
            scanned: false,
            debouncer: Debouncer::new(quiet),
            quiet,
            hash_content: false,
            trigger_existing: false,
            rx,
            tx,
            watcher: None,
            use_notify: true,
        }
    }

    pub fn with_hash_content(mut self, hash_content: bool) -> Self {
        self.hash_content = hash_content;
        self
    }

    pub fn with_trigger_existing(mut self, trigger_existing: bool) -> Self {
        self.trigger_existing = trigger_existing;
        self
    }

    /// Do not start an OS watcher; changes are fed through [`Self::feed`].
    pub fn without_os_watcher(mut self) -> Self {
        self.use_notify = false;
        self
    }

    /// Sender for injecting change notifications (absolute paths).
    pub fn feed(&self) -> mpsc::UnboundedSender<WatchMessage> {
        self.tx.clone()
    }

    fn ensure_watcher(&mut self) -> Result<()> {
        if !self.use_notify || self.watcher.is_some() {
            return Ok(());
        }

        let tx = self.tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        return;
                    }
                    for path in event.paths {
                        let _ = tx.send(Ok(path));
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err.to_string()));
                }
            },
            Config::default(),
        )?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        info!(endpoint = %self.endpoint, root = ?self.root, dirs = ?self.dirs, "file watcher started");
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Endpoint-relative path of an absolute path, if it lies in a watched
    /// directory.
    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let rel = normalize(&rel.to_string_lossy());
        if rel.is_empty() {
            return None;
        }
        self.dirs
            .iter()
            .any(|d| strip_base(d, &rel).is_some())
            .then_some(rel)
    }

    fn marker(&self, abs: &Path) -> Result<(String, u64)> {
        let meta = self.fs.metadata(abs)?;
        let marker = if self.hash_content {
            hash_file(self.fs.as_ref(), abs)?
        } else {
            meta.marker()
        };
        Ok((marker, meta.size))
    }

    fn scan(&mut self) -> Result<Vec<TriggerEvent>> {
        let stored = self.cursors.load(&self.name)?;
        let first_run = stored.is_none();
        self.seen = stored.unwrap_or_default();

        let mut current = Cursor::new();
        let mut sizes = std::collections::HashMap::new();
        for dir in self.dirs.iter() {
            let abs = self.root.join(dir);
            if !self.fs.is_dir(&abs) {
                debug!(endpoint = %self.endpoint, dir = %dir, "watched directory does not exist yet");
                continue;
            }
            for file in self.fs.walk_files(&abs)? {
                if let Some(rel) = self.relative(&file) {
                    let (marker, size) = self.marker(&file)?;
                    sizes.insert(rel.clone(), size);
                    current.insert(rel, marker);
                }
            }
        }

        let mut events = Vec::new();
        if !first_run || self.trigger_existing {
            for (rel, marker) in current.iter() {
                let kind = match self.seen.get(rel) {
                    None => TriggerKind::FileCreated,
                    Some(old) if old != marker => TriggerKind::FileModified,
                    Some(_) => continue,
                };
                events.push(TriggerEvent::file(
                    kind,
                    &self.endpoint,
                    rel,
                    marker,
                    sizes.get(rel).copied(),
                ));
            }
        } else {
            info!(endpoint = %self.endpoint, files = current.len(), "existing files recorded as baseline");
        }

        self.seen = current;
        self.cursors.save(&self.name, &self.seen)?;
        Ok(events)
    }

    fn settle(&mut self, rel: &str) -> Result<Option<TriggerEvent>> {
        let abs = self.root.join(rel);
        if !self.fs.is_file(&abs) {
            if self.seen.remove(rel).is_some() {
                debug!(endpoint = %self.endpoint, path = %rel, "file removed");
            }
            return Ok(None);
        }

        let (marker, size) = self.marker(&abs)?;
        let kind = match self.seen.get(rel) {
            None => TriggerKind::FileCreated,
            Some(old) if *old != marker => TriggerKind::FileModified,
            Some(_) => return Ok(None),
        };
        self.seen.insert(rel.to_string(), marker.clone());
        Ok(Some(TriggerEvent::file(kind, &self.endpoint, rel, marker, Some(size))))
    }

    async fn poll_once(&mut self) -> Result<Vec<TriggerEvent>> {
        self.ensure_watcher()?;

        let mut events = Vec::new();
        if !self.scanned {
            events = self.scan()?;
            self.scanned = true;
        }

        let now = Instant::now();
        let mut watch_error = None;
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                Ok(path) => {
                    if let Some(rel) = self.relative(&path) {
                        self.debouncer.touch(rel, now);
                    }
                }
                Err(e) => watch_error = Some(e),
            }
        }

        let before = self.seen.clone();
        for rel in self.debouncer.drain_settled(Instant::now()) {
            match self.settle(&rel) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => warn!(endpoint = %self.endpoint, path = %rel, error = %e, "cannot inspect changed file"),
            }
        }
        if self.seen != before {
            self.cursors.save(&self.name, &self.seen)?;
        }

        if let Some(e) = watch_error {
            // The OS watcher may be gone; rebuild it on the next poll.
            self.watcher = None;
            self.scanned = false;
            return Err(anyhow!("file watch error on '{}': {e}", self.endpoint));
        }
        Ok(events)
    }
}

impl Detector for FsWatchDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.endpoint)
    }

    fn next_poll(&self) -> Duration {
        (self.quiet / 4).max(MIN_TICK)
    }

    fn poll(&mut self) -> PollFuture<'_> {
        Box::pin(self.poll_once())
    }
}
