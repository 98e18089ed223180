// src/fs/mod.rs

//! Local filesystem access behind a trait, so enumeration, source deletion,
//! watcher catch-up scans and on-disk state can run against an in-memory
//! tree in tests.

use std::fmt::Debug;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

pub mod mock;

pub use mock::MockFileSystem;

/// The subset of file metadata the orchestrator looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl FileMeta {
    /// `size:mtime_nanos`, the cheap change marker used when content hashing
    /// is off.
    pub fn marker(&self) -> String {
        let nanos = self
            .modified
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!("{}:{}", self.size, nanos)
    }
}

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>>;
    /// Write a file, creating parent directories.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn metadata(&self, path: &Path) -> Result<FileMeta>;
    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;

    /// Return a list of entries in a directory.
    /// Returns full paths.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Every file below `root`, recursively, sorted.
    fn walk_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in self.read_dir(&dir)? {
                if self.is_dir(&entry) {
                    pending.push(entry);
                } else if self.is_file(&entry) {
                    out.push(entry);
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("reading file {:?}", path))
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = fs::File::open(path).with_context(|| format!("opening file {:?}", path))?;
        Ok(Box::new(file))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        // Write-then-rename so a crash never leaves a half-written file.
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).with_context(|| format!("creating file {:?}", tmp))?;
        file.write_all(contents)
            .with_context(|| format!("writing to file {:?}", tmp))?;
        file.sync_all().ok();
        fs::rename(&tmp, path).with_context(|| format!("renaming {:?} to {:?}", tmp, path))?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).with_context(|| format!("removing file {:?}", path))
    }

    fn metadata(&self, path: &Path) -> Result<FileMeta> {
        let meta = fs::metadata(path).with_context(|| format!("stat {:?}", path))?;
        Ok(FileMeta {
            size: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("reading dir {:?}", path))? {
            let entry = entry?;
            entries.push(entry.path());
        }
        Ok(entries)
    }
}

/// blake3 of a file's contents, hex encoded.
pub fn hash_file(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut reader = fs.open_read(path)?;
    let mut buf = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("hashing {:?}", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
