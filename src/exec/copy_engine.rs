// src/exec/copy_engine.rs

//! Boundary to the external copy engine.
//!
//! The orchestrator never speaks a wire protocol itself. Listing, copying and
//! deleting on any endpoint go through a [`CopyEngine`]; production uses
//! [`ProcessCopyEngine`], which drives an external executable:
//!
//! ```text
//! <engine> list   --path P
//! <engine> copy   --src-path P --dst-path Q --include GLOB [--bwlimit B] [--transfers N]
//! <engine> delete --path P
//! ```
//!
//! Endpoint details travel as JSON in `FERRY_SRC_ENDPOINT` /
//! `FERRY_DST_ENDPOINT`, so secrets never appear on the command line.
//! `copy` writes one JSON progress object per line on stdout.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::ResolvedEndpoint;
use crate::errors::{FerrymanError, Result};
use crate::types::JobId;

pub const SRC_ENDPOINT_ENV: &str = "FERRY_SRC_ENDPOINT";
pub const DST_ENDPOINT_ENV: &str = "FERRY_DST_ENDPOINT";

/// Exit codes with a meaning beyond success/failure.
pub const EXIT_PARTIAL: i32 = 3;
pub const EXIT_AUTH: i32 = 4;
pub const EXIT_PERMISSION: i32 = 5;

/// How many stderr lines are kept for error messages.
const STDERR_TAIL: usize = 20;

pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One entry of a remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteEntry {
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
}

impl RemoteEntry {
    /// ETag if the store has one, else modification time, else size.
    pub fn marker(&self) -> String {
        self.etag
            .clone()
            .or_else(|| self.modified.clone())
            .unwrap_or_else(|| format!("size:{}", self.size))
    }
}

/// Everything the engine needs to copy one Job's batch.
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub job_id: JobId,
    pub source: ResolvedEndpoint,
    pub source_path: String,
    pub destination: ResolvedEndpoint,
    pub destination_path: String,
    /// Glob relative to `source_path`.
    pub include: String,
    pub bandwidth_limit: Option<String>,
    pub transfers: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineFileStatus {
    InProgress,
    Completed,
    Failed,
}

/// One line of the engine's progress stream. `bytes` is cumulative for the
/// file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineProgress {
    pub file: String,
    #[serde(default)]
    pub bytes: u64,
    pub status: EngineFileStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
    /// Bytes per second.
    #[serde(default)]
    pub rate: Option<f64>,
    /// Seconds remaining.
    #[serde(default)]
    pub eta: Option<u64>,
}

impl EngineProgress {
    pub fn parse_line(line: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Final signal of a `copy` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineExit {
    Success,
    /// Some files failed; per-file errors are on the progress stream.
    Partial,
    Auth(String),
    Permission(String),
    Failed { code: Option<i32>, message: String },
    /// Terminated on request.
    Cancelled,
}

impl EngineExit {
    pub fn from_code(code: Option<i32>, stderr: &str) -> Self {
        let message = if stderr.trim().is_empty() {
            format!("copy engine exited with status {}", fmt_code(code))
        } else {
            stderr.trim().to_string()
        };
        match code {
            Some(0) => EngineExit::Success,
            Some(EXIT_PARTIAL) => EngineExit::Partial,
            Some(EXIT_AUTH) => EngineExit::Auth(message),
            Some(EXIT_PERMISSION) => EngineExit::Permission(message),
            _ => EngineExit::Failed { code, message },
        }
    }
}

fn fmt_code(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "<signal>".to_string())
}

/// The operations the orchestrator needs from a copy engine.
pub trait CopyEngine: Send + Sync + Debug {
    /// Every file below `path` on `endpoint`, recursively.
    fn list<'a>(
        &'a self,
        endpoint: &'a ResolvedEndpoint,
        path: &'a str,
    ) -> EngineFuture<'a, Vec<RemoteEntry>>;

    /// Copy a batch, streaming per-file progress into `progress`.
    ///
    /// Resolves once the engine has exited and every progress line has been
    /// forwarded. Firing `cancel` terminates the engine and yields
    /// [`EngineExit::Cancelled`].
    fn copy<'a>(
        &'a self,
        request: CopyRequest,
        progress: mpsc::UnboundedSender<EngineProgress>,
        cancel: oneshot::Receiver<()>,
    ) -> EngineFuture<'a, EngineExit>;

    /// Delete a single file.
    fn delete<'a>(&'a self, endpoint: &'a ResolvedEndpoint, path: &'a str) -> EngineFuture<'a, ()>;
}

/// Drives an external engine executable.
#[derive(Debug, Clone)]
pub struct ProcessCopyEngine {
    program: String,
}

impl ProcessCopyEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(subcommand)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, err: std::io::Error) -> FerrymanError {
        FerrymanError::EngineUnavailable(format!(
            "cannot start copy engine '{}': {err}",
            self.program
        ))
    }

    /// Run a short command to completion and classify a failing exit.
    async fn run_simple(&self, mut cmd: Command, what: &str) -> Result<String> {
        let output = cmd.output().await.map_err(|e| self.spawn_error(e))?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        match EngineExit::from_code(output.status.code(), &stderr) {
            EngineExit::Success => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            EngineExit::Auth(msg) => Err(FerrymanError::Auth(msg)),
            EngineExit::Permission(msg) => Err(FerrymanError::Permission(msg)),
            EngineExit::Partial | EngineExit::Cancelled => Err(FerrymanError::Transfer(format!(
                "{what} failed: {}",
                stderr.trim()
            ))),
            EngineExit::Failed { message, .. } => Err(FerrymanError::Transfer(format!(
                "{what} failed: {message}"
            ))),
        }
    }
}

fn endpoint_json(endpoint: &ResolvedEndpoint) -> Result<String> {
    Ok(serde_json::to_string(endpoint)?)
}

impl CopyEngine for ProcessCopyEngine {
    fn list<'a>(
        &'a self,
        endpoint: &'a ResolvedEndpoint,
        path: &'a str,
    ) -> EngineFuture<'a, Vec<RemoteEntry>> {
        Box::pin(async move {
            let mut cmd = self.command("list");
            cmd.arg("--path")
                .arg(path)
                .env(SRC_ENDPOINT_ENV, endpoint_json(endpoint)?);

            let stdout = self
                .run_simple(cmd, &format!("listing '{path}' on '{}'", endpoint.name))
                .await
                .map_err(|e| match e {
                    FerrymanError::Transfer(msg) => FerrymanError::Enumeration(msg),
                    other => other,
                })?;

            let mut entries = Vec::new();
            for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
                let entry: RemoteEntry = serde_json::from_str(line).map_err(|e| {
                    FerrymanError::Enumeration(format!("unparseable listing line '{line}': {e}"))
                })?;
                entries.push(entry);
            }
            debug!(endpoint = %endpoint.name, path = %path, entries = entries.len(), "remote listing");
            Ok(entries)
        })
    }

    fn copy<'a>(
        &'a self,
        request: CopyRequest,
        progress: mpsc::UnboundedSender<EngineProgress>,
        mut cancel: oneshot::Receiver<()>,
    ) -> EngineFuture<'a, EngineExit> {
        Box::pin(async move {
            let mut cmd = self.command("copy");
            cmd.arg("--src-path")
                .arg(&request.source_path)
                .arg("--dst-path")
                .arg(&request.destination_path)
                .arg("--include")
                .arg(&request.include)
                .env(SRC_ENDPOINT_ENV, endpoint_json(&request.source)?)
                .env(DST_ENDPOINT_ENV, endpoint_json(&request.destination)?);
            if let Some(bw) = request.bandwidth_limit.as_deref() {
                cmd.arg("--bwlimit").arg(bw);
            }
            if let Some(n) = request.transfers {
                cmd.arg("--transfers").arg(n.to_string());
            }

            info!(
                job_id = request.job_id,
                src = %request.source.name,
                dst = %request.destination.name,
                include = %request.include,
                "starting copy engine"
            );

            let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;

            let job_id = request.job_id;
            let stdout_task = child.stdout.take().map(|stdout| {
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match EngineProgress::parse_line(&line) {
                            Ok(p) => {
                                if progress.send(p).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(job_id, error = %e, line = %line, "ignoring unparseable progress line")
                            }
                        }
                    }
                })
            });

            // Always consume stderr so buffers don't fill; keep the tail for errors.
            let stderr_task = child.stderr.take().map(|stderr| {
                tokio::spawn(async move {
                    let mut tail: Vec<String> = Vec::new();
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        debug!(job_id, "engine stderr: {}", line);
                        tail.push(line);
                        if tail.len() > STDERR_TAIL {
                            tail.remove(0);
                        }
                    }
                    tail.join("\n")
                })
            });

            let exit = tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(|e| FerrymanError::Transfer(format!(
                        "waiting for copy engine of job {job_id}: {e}"
                    )))?;
                    let stderr = match stderr_task {
                        Some(t) => t.await.unwrap_or_default(),
                        None => String::new(),
                    };
                    info!(job_id, exit_code = ?status.code(), "copy engine exited");
                    EngineExit::from_code(status.code(), &stderr)
                }
                Ok(()) = &mut cancel => {
                    info!(job_id, "cancellation requested; killing copy engine");
                    if let Err(e) = child.kill().await {
                        warn!(job_id, error = %e, "failed to kill copy engine on cancellation");
                    }
                    EngineExit::Cancelled
                }
            };

            // Deliver every progress line before reporting the exit.
            if let Some(t) = stdout_task {
                let _ = t.await;
            }

            Ok(exit)
        })
    }

    fn delete<'a>(&'a self, endpoint: &'a ResolvedEndpoint, path: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let mut cmd = self.command("delete");
            cmd.arg("--path")
                .arg(path)
                .env(SRC_ENDPOINT_ENV, endpoint_json(endpoint)?);
            self.run_simple(cmd, &format!("deleting '{path}' on '{}'", endpoint.name))
                .await?;
            Ok(())
        })
    }
}
