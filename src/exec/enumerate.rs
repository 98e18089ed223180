// src/exec/enumerate.rs

//! Source enumeration and per-file source deletion.
//!
//! Local endpoints are walked through the [`FileSystem`] abstraction; every
//! other kind is listed and deleted through the copy engine.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ResolvedEndpoint;
use crate::errors::{FerrymanError, Result};
use crate::exec::copy_engine::CopyEngine;
use crate::fs::FileSystem;
use crate::jobs::Job;
use crate::template::paths::{join, normalize, strip_base};
use crate::template::SourcePattern;

/// One file of a Job's batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Relative to the Job's `source_path`.
    pub path: String,
    pub size: u64,
}

/// Every file below the Job's source path that matches its pattern, sorted
/// by path.
///
/// Any failure is reported as [`FerrymanError::Enumeration`], except
/// credential and permission problems which keep their own kind.
pub async fn enumerate_source(
    job: &Job,
    source: &ResolvedEndpoint,
    engine: &dyn CopyEngine,
    fs: &dyn FileSystem,
) -> Result<Vec<SourceFile>> {
    let pattern = SourcePattern::new(&job.source_path, &job.file_pattern)
        .map_err(FerrymanError::Enumeration)?;

    let mut files = match source.kind.local_root() {
        Some(root) => enumerate_local(root, &job.source_path, &pattern, fs)?,
        None => enumerate_remote(source, &job.source_path, &pattern, engine).await?,
    };
    files.sort_by(|a, b| a.path.cmp(&b.path));

    debug!(
        job_id = job.id,
        endpoint = %source.name,
        path = %job.source_path,
        pattern = %job.file_pattern,
        files = files.len(),
        "source enumerated"
    );
    Ok(files)
}

fn enumerate_local(
    root: &Path,
    source_path: &str,
    pattern: &SourcePattern,
    fs: &dyn FileSystem,
) -> Result<Vec<SourceFile>> {
    let dir = local_path(root, source_path);
    if !fs.is_dir(&dir) {
        return Err(FerrymanError::Enumeration(format!(
            "source directory {} does not exist",
            dir.display()
        )));
    }

    let walked = fs
        .walk_files(&dir)
        .map_err(|e| FerrymanError::Enumeration(format!("walking {}: {e:#}", dir.display())))?;

    let mut files = Vec::new();
    for path in walked {
        let Ok(rel) = path.strip_prefix(&dir) else {
            continue;
        };
        let rel = normalize(&rel.to_string_lossy());
        if rel.is_empty() || !pattern.matches_relative(&rel) {
            continue;
        }
        let meta = fs.metadata(&path).map_err(|e| {
            FerrymanError::Enumeration(format!("reading metadata of {}: {e:#}", path.display()))
        })?;
        files.push(SourceFile {
            path: rel,
            size: meta.size,
        });
    }
    Ok(files)
}

async fn enumerate_remote(
    source: &ResolvedEndpoint,
    source_path: &str,
    pattern: &SourcePattern,
    engine: &dyn CopyEngine,
) -> Result<Vec<SourceFile>> {
    let entries = engine
        .list(source, source_path)
        .await
        .map_err(|e| match e {
            e @ (FerrymanError::Auth(_) | FerrymanError::Permission(_)) => e,
            FerrymanError::Enumeration(msg) => FerrymanError::Enumeration(msg),
            other => FerrymanError::Enumeration(other.to_string()),
        })?;

    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let rel = strip_base(source_path, &entry.path)?;
            pattern.matches_relative(&rel).then_some(SourceFile {
                path: rel,
                size: entry.size,
            })
        })
        .collect())
}

/// Delete one transferred file from the source endpoint.
pub async fn delete_source_file(
    source: &ResolvedEndpoint,
    source_path: &str,
    relative: &str,
    engine: &dyn CopyEngine,
    fs: &dyn FileSystem,
) -> Result<()> {
    let full = join(source_path, relative);
    match source.kind.local_root() {
        Some(root) => fs
            .remove_file(&local_path(root, &full))
            .map_err(|e| FerrymanError::Transfer(format!("deleting {full}: {e:#}"))),
        None => engine.delete(source, &full).await,
    }
}

/// Endpoint-relative `path` under a local endpoint `root`.
pub fn local_path(root: &Path, path: &str) -> PathBuf {
    let path = normalize(path);
    if path.is_empty() {
        root.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::EndpointConfig;
    use crate::exec::copy_engine::ProcessCopyEngine;
    use crate::fs::MockFileSystem;
    use crate::types::JobType;

    fn local(name: &str, root: &str) -> ResolvedEndpoint {
        EndpointConfig::local(root).resolve(name).unwrap()
    }

    #[tokio::test]
    async fn local_enumeration_filters_by_pattern() {
        let fs = MockFileSystem::new();
        fs.add_sized_file("/srv/in/videos/a.mp4", 10);
        fs.add_sized_file("/srv/in/videos/b.mp4", 20);
        fs.add_sized_file("/srv/in/videos/notes.txt", 1);
        fs.add_sized_file("/srv/in/videos/sub/c.mp4", 5);
        fs.add_sized_file("/srv/in/other/d.mp4", 7);

        let job = Job::draft(JobType::Manual, ("in", "videos"), ("out", ""), "**/*.mp4");
        let engine = ProcessCopyEngine::new("unused");
        let files = enumerate_source(&job, &local("in", "/srv/in"), &engine, &fs)
            .await
            .unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.mp4", "b.mp4", "sub/c.mp4"]);
        assert_eq!(files.iter().map(|f| f.size).sum::<u64>(), 35);
    }

    #[tokio::test]
    async fn missing_source_directory_is_an_enumeration_error() {
        let fs = MockFileSystem::new();
        let job = Job::draft(JobType::Manual, ("in", "nope"), ("out", ""), "*");
        let engine = ProcessCopyEngine::new("unused");
        let err = enumerate_source(&job, &local("in", "/srv/in"), &engine, &fs)
            .await
            .unwrap_err();
        assert!(matches!(err, FerrymanError::Enumeration(_)), "{err:?}");
    }

    #[tokio::test]
    async fn deleting_a_local_file_removes_only_that_file() {
        let fs = Arc::new(MockFileSystem::new());
        fs.add_sized_file("/srv/in/videos/a.mp4", 10);
        fs.add_sized_file("/srv/in/videos/b.mp4", 10);
        let engine = ProcessCopyEngine::new("unused");

        delete_source_file(&local("in", "/srv/in"), "videos", "a.mp4", &engine, &*fs)
            .await
            .unwrap();
        assert!(!fs.exists(Path::new("/srv/in/videos/a.mp4")));
        assert!(fs.exists(Path::new("/srv/in/videos/b.mp4")));
    }
}
