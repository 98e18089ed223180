// src/detect/cursor.rs

//! Last-seen state of each detector, so a restart resumes without
//! re-triggering what was already seen.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::fs::FileSystem;

/// Directory (below the state dir) holding one cursor file per detector.
pub const CURSOR_DIR: &str = "cursors";

/// `path -> change marker` (ETag, content hash or size:mtime).
pub type Cursor = BTreeMap<String, String>;

/// Storage for detector cursors.
pub trait CursorStore: Send + Sync {
    /// `None` when this detector has never saved a cursor.
    fn load(&self, detector: &str) -> Result<Option<Cursor>>;
    fn save(&mut self, detector: &str, cursor: &Cursor) -> Result<()>;
}

/// One file per detector at `<state_dir>/cursors/<detector>`, holding the
/// cursor as a JSON object.
pub struct FileCursorStore {
    dir: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl FileCursorStore {
    pub fn new(state_dir: impl AsRef<Path>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            dir: state_dir.as_ref().join(CURSOR_DIR),
            fs,
        }
    }

    fn path_for(&self, detector: &str) -> PathBuf {
        let safe: String = detector
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(safe)
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self, detector: &str) -> Result<Option<Cursor>> {
        let path = self.path_for(detector);
        if !self.fs.exists(&path) {
            return Ok(None);
        }
        let contents = self
            .fs
            .read_to_string(&path)
            .with_context(|| format!("reading cursor for detector '{detector}'"))?;

        let cursor: Cursor = serde_json::from_str(&contents)
            .with_context(|| format!("parsing cursor for detector '{detector}'"))?;
        Ok(Some(cursor))
    }

    fn save(&mut self, detector: &str, cursor: &Cursor) -> Result<()> {
        let out = serde_json::to_vec(cursor)
            .with_context(|| format!("encoding cursor for detector '{detector}'"))?;
        self.fs
            .write(&self.path_for(detector), &out)
            .with_context(|| format!("saving cursor for detector '{detector}'"))?;
        debug!(detector = %detector, entries = cursor.len(), "cursor saved (file)");
        Ok(())
    }
}

/// Keeps cursors in memory only.
#[derive(Default)]
pub struct MemoryCursorStore {
    map: HashMap<String, Cursor>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self, detector: &str) -> Result<Option<Cursor>> {
        Ok(self.map.get(detector).cloned())
    }

    fn save(&mut self, detector: &str, cursor: &Cursor) -> Result<()> {
        self.map.insert(detector.to_string(), cursor.clone());
        Ok(())
    }
}

/// What changed between two listings.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CursorDiff {
    /// Paths not present before.
    pub added: Vec<String>,
    /// Paths present before with a different marker.
    pub changed: Vec<String>,
}

/// Compare `current` against `previous`. Removed paths need no event; they
/// disappear from the cursor when `current` replaces it.
pub fn diff(previous: &Cursor, current: &Cursor) -> CursorDiff {
    let mut out = CursorDiff::default();
    for (path, marker) in current.iter() {
        match previous.get(path) {
            None => out.added.push(path.clone()),
            Some(old) if old != marker => out.changed.push(path.clone()),
            Some(_) => {}
        }
    }
    out
}
