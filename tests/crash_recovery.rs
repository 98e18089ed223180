// tests/crash_recovery.rs

mod common;
use crate::common::{endpoints, init_tracing, TemplateConfigBuilder};

use std::error::Error;
use std::sync::Arc;

use ferryman::config::ConfigFile;
use ferryman::engine::RuntimeOptions;
use ferryman::fs::{FileSystem, MockFileSystem, RealFileSystem};
use ferryman::jobs::Job;
use ferryman::store::{FileStateStore, StateStore};
use ferryman::types::{JobStatus, JobType, TransferStatus};
use ferryman_test_utils::harness::Harness;
use ferryman_test_utils::scripted_engine::CopyScript;

type TestResult = Result<(), Box<dyn Error>>;

fn config() -> ConfigFile {
    endpoints()
        .with_template(
            TemplateConfigBuilder::manual("ingest")
                .source("inbox", "incoming", "*.mp4")
                .destination("nas", "raw")
                .build(),
        )
        .build()
}

fn open(dir: &std::path::Path) -> Arc<FileStateStore> {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    Arc::new(FileStateStore::open(dir, fs).unwrap())
}

fn job_in(store: &FileStateStore, path: &[JobStatus]) -> Job {
    let job = store
        .create_job(Job::draft(JobType::Manual, ("inbox", "incoming"), ("nas", "raw"), "*.mp4"))
        .unwrap();
    let mut from = JobStatus::Pending;
    for &next in path {
        store.transition_job(job.id, &[from], next).unwrap();
        from = next;
    }
    store.get_job(job.id).unwrap()
}

#[tokio::test]
async fn interrupted_jobs_are_resumed_after_a_restart() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    // First process: one Job mid-copy, one waiting for a retry, one never
    // queued. Then it dies.
    {
        let store = open(dir.path());
        let running = job_in(&store, &[JobStatus::Queued, JobStatus::Running]);
        let retrying = job_in(
            &store,
            &[JobStatus::Queued, JobStatus::Running, JobStatus::Failed, JobStatus::Retrying],
        );
        let pending = job_in(&store, &[]);
        assert_eq!(
            (running.status, retrying.status, pending.status),
            (JobStatus::Running, JobStatus::Retrying, JobStatus::Pending)
        );
    }

    let store = open(dir.path());
    assert_eq!(store.list_jobs(&[])?.len(), 3);

    let fs = Arc::new(MockFileSystem::new());
    fs.add_sized_file("/srv/inbox/incoming/a.mp4", 64);
    let cfg = config();
    let h = Harness::start_with(&cfg, store.clone(), fs, RuntimeOptions::default());
    for _ in 0..3 {
        h.engine.push_script(CopyScript::complete(&[("a.mp4", 64)]));
    }

    for id in 1..=3 {
        let job = h.wait_for(id, JobStatus::Completed).await;
        assert_eq!(job.transferred_bytes, 64);
        let transfers = h.transfers(id);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].status, TransferStatus::Completed);
    }
    h.shutdown().await?;

    // The outcome itself survives the next restart.
    let reopened = open(dir.path());
    let jobs = reopened.list_jobs(&[JobStatus::Completed])?;
    assert_eq!(jobs.len(), 3);
    let template = reopened.list_templates()?;
    assert_eq!(template.len(), 1);
    assert_eq!(template[0].name, "ingest");
    Ok(())
}

#[tokio::test]
async fn template_counters_survive_a_restart() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let cfg = config();

    {
        let fs = Arc::new(MockFileSystem::new());
        fs.add_sized_file("/srv/inbox/incoming/a.mp4", 8);
        let h = Harness::start_with(&cfg, open(dir.path()), fs, RuntimeOptions::default());
        h.engine.push_script(CopyScript::complete(&[("a.mp4", 8)]));
        h.handle.trigger_template("ingest").await?;
        h.wait_for(1, JobStatus::Completed).await;
        h.shutdown().await?;
    }

    let fs = Arc::new(MockFileSystem::new());
    let h = Harness::start_with(&cfg, open(dir.path()), fs, RuntimeOptions::default());
    let id = h.template_id("ingest");
    let template = h.store.get_template(id)?;
    assert_eq!(template.counters.total_triggers, 1);
    assert_eq!(template.counters.successful_transfers, 1);
    h.shutdown().await?;
    Ok(())
}
