// tests/transfer_pipeline.rs
//
// End-to-end runs through the real executor, with a scripted copy engine and
// an in-memory filesystem standing in for the outside world.

mod common;
use crate::common::{endpoints, eventually, init_tracing, with_timeout, TemplateConfigBuilder};

use std::error::Error;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ferryman::config::ConfigFile;
use ferryman::detect::TriggerEvent;
use ferryman::engine::RuntimeEvent;
use ferryman::errors::ErrorKind;
use ferryman::fs::FileSystem;
use ferryman::exec::copy_engine::EngineExit;
use ferryman::exec::job_runner::ENGINE_TRANSFERS;
use ferryman::types::{JobStatus, TransferStatus, TriggerKind};
use ferryman_test_utils::harness::Harness;
use ferryman_test_utils::scripted_engine::{completed, failed, in_progress, CopyScript};

type TestResult = Result<(), Box<dyn Error>>;

const MB: u64 = 1_000_000;

fn ingest_config(delete_source: bool) -> ConfigFile {
    endpoints()
        .retry(0, Duration::from_millis(5), Duration::from_millis(5))
        .with_template(
            TemplateConfigBuilder::manual("ingest")
                .source("inbox", "incoming", "*.mp4")
                .destination("nas", "raw")
                .hop("archive", "cold")
                .delete_source(delete_source)
                .build(),
        )
        .build()
}

fn seed_videos(h: &Harness) {
    h.fs.add_sized_file("/srv/inbox/incoming/a.mp4", (10 * MB) as usize);
    h.fs.add_sized_file("/srv/inbox/incoming/b.mp4", (20 * MB) as usize);
    h.fs.add_sized_file("/srv/inbox/incoming/c.mp4", (5 * MB) as usize);
    h.fs.add_sized_file("/srv/inbox/incoming/notes.txt", 100);
}

#[tokio::test]
async fn batch_of_videos_is_copied_with_byte_accounting() -> TestResult {
    init_tracing();
    let h = Harness::start(&ingest_config(false));
    seed_videos(&h);
    h.engine.push_script(CopyScript::complete(&[
        ("a.mp4", 10 * MB),
        ("b.mp4", 20 * MB),
        ("c.mp4", 5 * MB),
    ]));

    h.handle.trigger_template("ingest").await?;
    let job = h.wait_for(1, JobStatus::Completed).await;

    assert_eq!(job.total_files, 3);
    assert_eq!(job.transferred_files, 3);
    assert_eq!(job.total_bytes, 35 * MB);
    assert_eq!(job.transferred_bytes, 35 * MB);
    assert_eq!(job.progress_percentage, 100.0);

    let transfers = h.transfers(1);
    let paths: Vec<_> = transfers.iter().map(|t| t.file_path.as_str()).collect();
    assert_eq!(paths, vec!["a.mp4", "b.mp4", "c.mp4"]);
    assert!(transfers.iter().all(|t| t.status == TransferStatus::Completed));
    assert!(transfers.iter().all(|t| t.bytes_transferred == t.file_size));

    let copies = h.engine.copies();
    assert_eq!(copies[0].include, "*.mp4");
    assert_eq!(copies[0].source_path, "incoming");
    assert_eq!(copies[0].destination_path, "raw");
    assert_eq!(copies[0].transfers, Some(ENGINE_TRANSFERS));

    // Sources stay put without the delete flag.
    assert!(h.fs.exists(Path::new("/srv/inbox/incoming/a.mp4")));

    // The next hop reads from the nas; nothing landed there in this fake
    // world, so it fails to enumerate.
    let hop = h.wait_for(2, JobStatus::Failed).await;
    assert_eq!(hop.parent_job_id, Some(1));
    assert_eq!(hop.error_kind, Some(ErrorKind::Enumeration));

    h.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn completed_job_deletes_its_sources() -> TestResult {
    init_tracing();
    let h = Harness::start(&ingest_config(true));
    seed_videos(&h);
    h.fs.add_dir("/srv/nas/raw");
    h.engine.push_script(CopyScript::complete(&[
        ("a.mp4", 10 * MB),
        ("b.mp4", 20 * MB),
        ("c.mp4", 5 * MB),
    ]));

    h.handle.trigger_template("ingest").await?;
    h.wait_for(1, JobStatus::Completed).await;

    // Deletion follows the status commit.
    with_timeout(eventually(|| {
        (!h.fs.exists(Path::new("/srv/inbox/incoming/c.mp4"))).then_some(())
    }))
    .await;
    for name in ["a.mp4", "b.mp4", "c.mp4"] {
        let path = format!("/srv/inbox/incoming/{name}");
        assert!(!h.fs.exists(Path::new(&path)), "{path} should be deleted");
    }
    assert!(h.fs.exists(Path::new("/srv/inbox/incoming/notes.txt")));

    // The second hop finds an empty directory, completes without copying,
    // and never deletes anything from the nas.
    let hop = h.wait_for(2, JobStatus::Completed).await;
    assert!(!hop.delete_source_after_transfer);
    assert_eq!(hop.total_files, 0);
    assert_eq!(h.engine.copies().len(), 1);

    h.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn partial_failure_keeps_every_source_file() -> TestResult {
    init_tracing();
    let h = Harness::start(&ingest_config(true));
    seed_videos(&h);
    h.engine.push_script(CopyScript::with_progress(
        vec![
            in_progress("a.mp4", 4 * MB),
            completed("a.mp4", 10 * MB),
            in_progress("b.mp4", 2 * MB),
            failed("b.mp4", "disk full"),
            completed("c.mp4", 5 * MB),
        ],
        EngineExit::Partial,
    ));

    h.handle.trigger_template("ingest").await?;
    let job = h.wait_for(1, JobStatus::Failed).await;

    assert_eq!(job.error_kind, Some(ErrorKind::Transfer));
    assert!(job.error_message.as_deref().unwrap().contains("disk full"));
    assert_eq!(job.transferred_files, 2);
    assert_eq!(job.transferred_bytes, 17 * MB);

    let transfers = h.transfers(1);
    let statuses: Vec<_> = transfers.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![TransferStatus::Completed, TransferStatus::Failed, TransferStatus::Completed]
    );
    assert_eq!(transfers[1].error_message.as_deref(), Some("disk full"));

    for name in ["a.mp4", "b.mp4", "c.mp4"] {
        let path = format!("/srv/inbox/incoming/{name}");
        assert!(h.fs.exists(Path::new(&path)), "{path} must survive a failed job");
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.jobs().len(), 1, "a failed hop does not continue the chain");

    h.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn files_the_engine_never_confirmed_fail_the_job() -> TestResult {
    init_tracing();
    let h = Harness::start(&ingest_config(false));
    seed_videos(&h);
    h.engine.push_script(CopyScript::with_progress(
        vec![completed("a.mp4", 10 * MB)],
        EngineExit::Success,
    ));

    h.handle.trigger_template("ingest").await?;
    let job = h.wait_for(1, JobStatus::Failed).await;
    assert!(job.error_message.unwrap().contains("not confirmed"));

    let transfers = h.transfers(1);
    assert_eq!(transfers[0].status, TransferStatus::Completed);
    assert_eq!(transfers[1].status, TransferStatus::Failed);
    assert_eq!(transfers[2].status, TransferStatus::Failed);

    h.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn auth_failure_from_the_engine_is_not_retried() -> TestResult {
    init_tracing();
    let cfg = endpoints()
        .retry(3, Duration::from_millis(5), Duration::from_millis(5))
        .with_template(
            TemplateConfigBuilder::manual("ingest")
                .source("inbox", "incoming", "*.mp4")
                .destination("nas", "raw")
                .build(),
        )
        .build();
    let h = Harness::start(&cfg);
    seed_videos(&h);
    h.engine
        .push_script(CopyScript::exit(EngineExit::Auth("bad password".to_string())));

    h.handle.trigger_template("ingest").await?;
    let job = h.wait_for(1, JobStatus::Failed).await;
    assert_eq!(job.error_kind, Some(ErrorKind::Auth));
    assert_eq!(job.retry_count, 0);
    assert_eq!(h.engine.copies().len(), 1);

    h.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn transient_engine_failure_is_retried_with_a_fresh_enumeration() -> TestResult {
    init_tracing();
    let cfg = endpoints()
        .retry(2, Duration::from_millis(5), Duration::from_millis(10))
        .with_template(
            TemplateConfigBuilder::manual("ingest")
                .source("inbox", "incoming", "*.mp4")
                .destination("nas", "raw")
                .build(),
        )
        .build();
    let h = Harness::start(&cfg);
    h.fs.add_sized_file("/srv/inbox/incoming/a.mp4", 100);
    h.engine.push_script(CopyScript::exit(EngineExit::Failed {
        code: Some(1),
        message: "connection reset".to_string(),
    }));
    h.engine.push_script(CopyScript::complete(&[("a.mp4", 100)]));

    h.handle.trigger_template("ingest").await?;
    let job = h.wait_for(1, JobStatus::Completed).await;
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.error_message, Some("connection reset".to_string()));
    assert_eq!(h.engine.copies().len(), 2);

    let transfers = h.transfers(1);
    assert_eq!(transfers.len(), 1, "a retry starts from a fresh enumeration");
    assert_eq!(transfers[0].status, TransferStatus::Completed);

    h.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn cancelling_a_running_copy_stops_the_chain() -> TestResult {
    init_tracing();
    let h = Harness::start(&ingest_config(true));
    seed_videos(&h);
    h.engine.push_script(CopyScript::until_cancelled(vec![
        completed("a.mp4", 10 * MB),
        in_progress("b.mp4", 5 * MB),
    ]));

    h.handle.trigger_template("ingest").await?;
    with_timeout(eventually(|| {
        let transfers = h.store.list_transfers(1).ok()?;
        (transfers.len() == 3 && transfers[1].status == TransferStatus::InProgress).then_some(())
    }))
    .await;

    h.handle.cancel(1).await?;
    let job = h.wait_for(1, JobStatus::Cancelled).await;
    assert_eq!(job.transferred_files, 1);

    let statuses: Vec<_> = h.transfers(1).iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![TransferStatus::Completed, TransferStatus::Cancelled, TransferStatus::Cancelled]
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.jobs().len(), 1, "a cancelled hop does not continue the chain");
    assert!(h.fs.exists(Path::new("/srv/inbox/incoming/a.mp4")));

    h.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn nothing_to_copy_completes_without_the_engine() -> TestResult {
    init_tracing();
    let h = Harness::start(&ingest_config(false));
    h.fs.add_sized_file("/srv/inbox/incoming/notes.txt", 100);

    h.handle.trigger_template("ingest").await?;
    let job = h.wait_for(1, JobStatus::Completed).await;
    assert_eq!(job.total_files, 0);
    assert!(h.transfers(1).is_empty());
    assert!(h.engine.copies().is_empty());

    h.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn missing_source_directory_fails_enumeration() -> TestResult {
    init_tracing();
    let h = Harness::start(&ingest_config(false));

    h.handle.trigger_template("ingest").await?;
    let job = h.wait_for(1, JobStatus::Failed).await;
    assert_eq!(job.error_kind, Some(ErrorKind::Enumeration));
    assert!(h.transfers(1).is_empty());
    assert!(h.engine.copies().is_empty());

    h.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn object_created_event_copies_that_object_and_deletes_it() -> TestResult {
    init_tracing();
    let cfg = endpoints()
        .with_template(
            TemplateConfigBuilder::new("uploads", TriggerKind::ObjectCreated)
                .source("bucket", "uploads", "**/*.mov")
                .destination("nas", "{dir}/{stem}")
                .delete_source(true)
                .build(),
        )
        .build();
    let h = Harness::start(&cfg);
    h.engine.put_object("bucket", "uploads/2024/x.mov", 100, "etag-x");
    h.engine.put_object("bucket", "uploads/2024/y.mov", 200, "etag-y");
    h.engine.push_script(CopyScript::complete(&[("x.mov", 100)]));

    let event = TriggerEvent::object_created("bucket", "uploads/2024/x.mov", "etag-x", Some(100));
    h.handle.sender().send(RuntimeEvent::TriggerObserved(event)).await?;

    let job = h.wait_for(1, JobStatus::Completed).await;
    assert_eq!(job.source_path, "uploads/2024");
    assert_eq!(job.destination_path, "2024/x");
    assert_eq!(job.total_files, 1);
    assert_eq!(job.total_bytes, 100);

    let deleted = with_timeout(eventually(|| {
        let deleted = h.engine.deleted();
        (!deleted.is_empty()).then_some(deleted)
    }))
    .await;
    assert_eq!(
        deleted,
        vec![("bucket".to_string(), "uploads/2024/x.mov".to_string())]
    );

    h.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn sources_are_deleted_only_after_the_job_is_committed_completed() -> TestResult {
    init_tracing();
    let cfg = endpoints()
        .with_template(
            TemplateConfigBuilder::new("uploads", TriggerKind::ObjectCreated)
                .source("bucket", "uploads", "**/*.mov")
                .destination("nas", "{dir}/{stem}")
                .delete_source(true)
                .build(),
        )
        .build();
    let h = Harness::start(&cfg);
    h.engine.put_object("bucket", "uploads/2024/z.mov", 100, "etag-z");
    h.engine.push_script(CopyScript::complete(&[("z.mov", 100)]));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::clone(&h.store);
    let seen_in_hook = Arc::clone(&seen);
    h.engine.on_delete(move |_, _| {
        let status = store.get_job(1).map(|j| j.status).ok();
        seen_in_hook.lock().unwrap().push(status);
    });

    let event = TriggerEvent::object_created("bucket", "uploads/2024/z.mov", "etag-z", Some(100));
    h.handle.sender().send(RuntimeEvent::TriggerObserved(event)).await?;

    h.wait_for(1, JobStatus::Completed).await;
    with_timeout(eventually(|| (!h.engine.deleted().is_empty()).then_some(()))).await;
    assert_eq!(*seen.lock().unwrap(), vec![Some(JobStatus::Completed)]);

    h.shutdown().await?;
    Ok(())
}
