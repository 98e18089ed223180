// src/fs/mock.rs

use super::{FileMeta, FileSystem};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File { data: Vec<u8>, modified: SystemTime },
    Dir(Vec<String>), // List of child names
}

/// In-memory tree. Every write bumps a logical clock so modification times
/// (and therefore size/mtime markers) change on rewrite.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
    clock: Arc<AtomicU64>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut files = HashMap::new();
        files.insert(PathBuf::from("/"), MockEntry::Dir(Vec::new()));

        Self {
            files: Arc::new(Mutex::new(files)),
            clock: Arc::new(AtomicU64::new(1)),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, MockEntry>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let tick = self.clock.fetch_add(1, Ordering::SeqCst);
        let mut files = self.entries();
        files.insert(
            path.clone(),
            MockEntry::File {
                data: content.into(),
                modified: SystemTime::UNIX_EPOCH + Duration::from_secs(tick),
            },
        );
        if let Some(parent) = path.parent() {
            link_child(&mut files, parent, &path);
        }
    }

    /// Add a file of `size` zero bytes.
    pub fn add_sized_file(&self, path: impl AsRef<Path>, size: usize) {
        self.add_file(path, vec![0u8; size]);
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut files = self.entries();
        ensure_dir(&mut files, path);
    }
}

fn ensure_dir(files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
    if files.contains_key(path) {
        return;
    }
    files.insert(path.to_path_buf(), MockEntry::Dir(Vec::new()));
    if let Some(parent) = path.parent() {
        link_child(files, parent, path);
    }
}

fn link_child(files: &mut HashMap<PathBuf, MockEntry>, parent: &Path, child: &Path) {
    let parent = if parent.as_os_str().is_empty() {
        Path::new("/")
    } else {
        parent
    };
    if parent == child {
        return;
    }
    ensure_dir(files, parent);
    if let (Some(MockEntry::Dir(children)), Some(name)) = (
        files.get_mut(parent),
        child.file_name().and_then(|n| n.to_str()),
    ) {
        if !children.iter().any(|c| c == name) {
            children.push(name.to_string());
        }
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let files = self.entries();
        match files.get(path) {
            Some(MockEntry::File { data, .. }) => {
                String::from_utf8(data.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let files = self.entries();
        match files.get(path) {
            Some(MockEntry::File { data, .. }) => Ok(Box::new(Cursor::new(data.clone()))),
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut files = self.entries();
        match files.remove(path) {
            Some(MockEntry::File { .. }) => {}
            Some(dir @ MockEntry::Dir(_)) => {
                files.insert(path.to_path_buf(), dir);
                return Err(anyhow!("Is a directory: {:?}", path));
            }
            None => return Err(anyhow!("File not found: {:?}", path)),
        }
        let name = path.file_name().and_then(|n| n.to_str()).map(str::to_string);
        if let (Some(parent), Some(name)) = (path.parent(), name) {
            if let Some(MockEntry::Dir(children)) = files.get_mut(parent) {
                children.retain(|c| *c != name);
            }
        }
        Ok(())
    }

    fn metadata(&self, path: &Path) -> Result<FileMeta> {
        let files = self.entries();
        match files.get(path) {
            Some(MockEntry::File { data, modified }) => Ok(FileMeta {
                size: data.len() as u64,
                modified: Some(*modified),
            }),
            Some(MockEntry::Dir(_)) => Ok(FileMeta {
                size: 0,
                modified: None,
            }),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.entries().contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.entries().get(path), Some(MockEntry::File { .. }))
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.entries().get(path), Some(MockEntry::Dir(_)))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let files = self.entries();
        match files.get(path) {
            Some(MockEntry::Dir(children)) => {
                Ok(children.iter().map(|name| path.join(name)).collect())
            }
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }
}
