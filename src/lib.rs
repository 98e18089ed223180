// src/lib.rs

pub mod cli;
pub mod config;
pub mod detect;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod jobs;
pub mod logging;
pub mod store;
pub mod template;
pub mod types;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::config::{EndpointConfig, EndpointKind};
use crate::detect::{
    spawn_detector, CursorStore, Detector, DetectorHandle, FileCursorStore, FsWatchDetector,
    MemoryCursorStore, ObjectStoreDetector, ScheduleDetector, TriggerEvent,
};
use crate::engine::{
    AdmissionLimits, CoreRuntime, RetryPolicy, Runtime, RuntimeContext, RuntimeEvent,
    RuntimeOptions,
};
use crate::exec::{CopyEngine, ExecContext, ProcessCopyEngine, RealExecutorBackend};
use crate::fs::{FileSystem, RealFileSystem};
use crate::jobs::Materializer;
use crate::store::{open_store, StateStore};
use crate::template::{Template, TemplateRegistry};
use crate::types::StoreMode;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and the state store
/// - template registry and job materializer
/// - dispatcher runtime and executor
/// - (optional) event detectors and schedule tickers
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let store = open_store(&cfg.config, Arc::clone(&fs)).context("opening state store")?;

    // The store keeps ids and counters of templates across restarts.
    let mut templates = Vec::new();
    for template in cfg.build_templates() {
        templates.push(store.upsert_template(template)?);
    }
    let registry = TemplateRegistry::from_templates(templates, cfg.endpoints())?;
    info!(templates = registry.len(), endpoints = cfg.endpoints().len(), "configuration loaded");

    let endpoints = Arc::new(cfg.endpoints().clone());
    let engine: Arc<dyn CopyEngine> = Arc::new(ProcessCopyEngine::new(cfg.config.engine.clone()));
    let materializer = Materializer::new(Arc::clone(&store), Arc::clone(&endpoints));

    // Events delivered before the runtime starts: `--trigger` names and, in
    // --once mode, a single poll of every detector.
    let mut initial: Vec<RuntimeEvent> = args
        .triggers
        .iter()
        .map(|name| RuntimeEvent::TriggerObserved(TriggerEvent::manual(name.as_str())))
        .collect();

    let mut detectors = if args.no_detect {
        Vec::new()
    } else {
        build_detectors(&cfg, &registry, &fs, &engine)
    };

    if args.once {
        for detector in detectors.iter_mut() {
            match detector.poll().await {
                Ok(events) => initial.extend(events.into_iter().map(RuntimeEvent::TriggerObserved)),
                Err(e) => warn!(detector = %detector.name(), error = %e, "detector poll failed"),
            }
        }
        detectors.clear();
    }

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64.max(initial.len() + 1));

    let executor = RealExecutorBackend::new(
        rt_tx.clone(),
        ExecContext {
            store: Arc::clone(&store),
            engine: Arc::clone(&engine),
            fs: Arc::clone(&fs),
            endpoints: Arc::clone(&endpoints),
        },
    );

    let _detector_handles: Vec<DetectorHandle> = detectors
        .into_iter()
        .map(|d| {
            spawn_detector(
                d,
                rt_tx.clone(),
                Arc::clone(&store),
                cfg.config.detect.degraded_after,
            )
        })
        .collect();

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C; stop the process with a signal");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    for event in initial {
        rt_tx.send(event).await?;
    }

    let options = RuntimeOptions {
        exit_when_idle: args.once,
    };
    let core = CoreRuntime::new(
        AdmissionLimits::from_config(&cfg),
        RetryPolicy::from_section(&cfg.config.retry),
        options,
    );

    let ctx = RuntimeContext {
        store,
        registry,
        materializer,
    };
    let runtime = Runtime::new(core, &rt_tx, rt_rx, executor, ctx);
    drop(rt_tx);
    runtime.run().await?;
    Ok(())
}

/// One filesystem watcher per local endpoint and one lister per object store
/// endpoint that an active event template reads from, plus the schedule
/// ticker.
fn build_detectors(
    cfg: &ConfigFile,
    registry: &TemplateRegistry,
    fs: &Arc<dyn FileSystem>,
    engine: &Arc<dyn CopyEngine>,
) -> Vec<Box<dyn Detector>> {
    let detect = &cfg.config.detect;
    let mut watched: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for template in registry.iter().filter(|t| t.active && t.trigger.is_event()) {
        watched
            .entry(template.source.endpoint.as_str())
            .or_default()
            .push(template.source.path.clone());
    }

    let mut detectors: Vec<Box<dyn Detector>> = Vec::new();
    for (name, paths) in watched {
        let Some(endpoint) = cfg.endpoints().get(name) else {
            continue;
        };
        let cursors = cursor_store(cfg, fs);
        match &endpoint.kind {
            EndpointKind::Local(local) => {
                debug!(endpoint = %name, dirs = ?paths, "starting filesystem detector");
                detectors.push(Box::new(
                    FsWatchDetector::new(
                        name,
                        local.root.clone(),
                        paths,
                        Arc::clone(fs),
                        cursors,
                        detect.debounce.0,
                    )
                    .with_hash_content(detect.hash_content)
                    .with_trigger_existing(detect.trigger_existing),
                ));
            }
            EndpointKind::S3(_) => {
                debug!(endpoint = %name, prefixes = ?paths, "starting object store detector");
                detectors.push(Box::new(
                    ObjectStoreDetector::new(
                        name,
                        endpoint.clone(),
                        paths,
                        Arc::clone(engine),
                        cursors,
                        detect.poll_interval.0,
                    )
                    .with_trigger_existing(detect.trigger_existing),
                ));
            }
            _ => {}
        }
    }

    let schedule = ScheduleDetector::from_templates(registry.iter());
    if !schedule.is_empty() {
        detectors.push(Box::new(schedule));
    }
    detectors
}

fn cursor_store(cfg: &ConfigFile, fs: &Arc<dyn FileSystem>) -> Box<dyn CursorStore> {
    match cfg.config.store {
        StoreMode::File => Box::new(FileCursorStore::new(&cfg.config.state_dir, Arc::clone(fs))),
        StoreMode::Memory => Box::new(MemoryCursorStore::new()),
    }
}

/// Dry-run output: endpoints and templates as they would be registered.
fn print_dry_run(cfg: &ConfigFile) {
    println!("ferryman dry-run");
    println!("  config.max_concurrent_jobs = {}", cfg.config.max_concurrent_jobs);
    println!("  config.store = {:?}", cfg.config.store);
    println!("  config.engine = {}", cfg.config.engine);
    println!();

    println!("endpoints ({}):", cfg.endpoints().len());
    for (name, endpoint) in cfg.endpoints() {
        print_endpoint(name, endpoint);
    }
    println!();

    let templates = cfg.build_templates();
    println!("templates ({}):", templates.len());
    for template in &templates {
        print_template(template);
    }

    debug!("dry-run complete (no execution)");
}

fn print_endpoint(name: &str, endpoint: &EndpointConfig) {
    println!("  - {name} ({})", endpoint.kind.kind_name());
    println!("      max_concurrent_transfers: {}", endpoint.max_concurrent_transfers);
    if let Some(ref limit) = endpoint.bandwidth_limit {
        println!("      bandwidth_limit: {limit}");
    }
}

fn print_template(template: &Template) {
    println!("  - {} [{}]", template.name, template.trigger);
    if let Some(ref schedule) = template.schedule {
        println!("      every: {schedule}");
    }
    println!(
        "      source: {}:{} ({})",
        template.source.endpoint, template.source.path, template.source.pattern
    );
    println!(
        "      destination: {}:{}",
        template.destination.endpoint, template.destination.path
    );
    for (i, hop) in template.chain.iter().enumerate() {
        println!("      hop {}: {}:{}", i + 1, hop.endpoint, hop.path);
    }
    if template.delete_source_after_transfer {
        println!("      delete_source_after_transfer: true");
    }
    if !template.active {
        println!("      inactive");
    }
}
