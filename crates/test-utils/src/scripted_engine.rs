use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use ferryman::config::ResolvedEndpoint;
use ferryman::errors::FerrymanError;
use ferryman::exec::copy_engine::{
    CopyEngine, CopyRequest, EngineExit, EngineFileStatus, EngineFuture, EngineProgress,
    RemoteEntry,
};
use ferryman::template::paths::strip_base;
use tokio::sync::{mpsc, oneshot};

/// What one `copy` call does.
#[derive(Debug, Clone)]
pub struct CopyScript {
    pub progress: Vec<EngineProgress>,
    pub exit: EngineExit,
    /// After the progress is sent, wait for cancellation instead of exiting.
    pub hold: bool,
}

impl CopyScript {
    /// Every file reported half-way, then completed; exit `Success`.
    pub fn complete(files: &[(&str, u64)]) -> Self {
        let mut progress = Vec::new();
        for (file, size) in files {
            progress.push(in_progress(file, size / 2));
            progress.push(completed(file, *size));
        }
        Self {
            progress,
            exit: EngineExit::Success,
            hold: false,
        }
    }

    pub fn exit(exit: EngineExit) -> Self {
        Self {
            progress: Vec::new(),
            exit,
            hold: false,
        }
    }

    pub fn with_progress(progress: Vec<EngineProgress>, exit: EngineExit) -> Self {
        Self {
            progress,
            exit,
            hold: false,
        }
    }

    /// Send `progress`, then keep copying until cancelled.
    pub fn until_cancelled(progress: Vec<EngineProgress>) -> Self {
        Self {
            progress,
            exit: EngineExit::Cancelled,
            hold: true,
        }
    }
}

pub fn in_progress(file: &str, bytes: u64) -> EngineProgress {
    progress(file, bytes, EngineFileStatus::InProgress, None)
}

pub fn completed(file: &str, bytes: u64) -> EngineProgress {
    progress(file, bytes, EngineFileStatus::Completed, None)
}

pub fn failed(file: &str, error: &str) -> EngineProgress {
    progress(file, 0, EngineFileStatus::Failed, Some(error.to_string()))
}

fn progress(file: &str, bytes: u64, status: EngineFileStatus, error: Option<String>) -> EngineProgress {
    EngineProgress {
        file: file.to_string(),
        bytes,
        status,
        error,
        error_kind: None,
        rate: None,
        eta: None,
    }
}

#[derive(Debug, Default)]
struct State {
    listings: BTreeMap<String, Vec<RemoteEntry>>,
    list_failures: BTreeMap<String, String>,
    scripts: VecDeque<CopyScript>,
    copies: Vec<CopyRequest>,
    deleted: Vec<(String, String)>,
}

/// In-process stand-in for the external copy engine.
///
/// - `list` serves objects registered with [`Self::put_object`].
/// - `copy` plays the next queued [`CopyScript`]; with none queued it exits
///   `Success` without reporting any file.
/// - `delete` records the path and forgets the object, after calling the
///   hook set with [`Self::on_delete`].
#[derive(Default)]
pub struct ScriptedCopyEngine {
    state: Mutex<State>,
    on_delete: Mutex<Option<DeleteHook>>,
}

/// Called with `(endpoint, path)` before a delete is recorded.
pub type DeleteHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

impl fmt::Debug for ScriptedCopyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedCopyEngine")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ScriptedCopyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_object(&self, endpoint: &str, path: &str, size: u64, etag: &str) {
        let mut state = self.state.lock().unwrap();
        let objects = state.listings.entry(endpoint.to_string()).or_default();
        objects.retain(|o| o.path != path);
        objects.push(RemoteEntry {
            path: path.to_string(),
            size,
            etag: Some(etag.to_string()),
            modified: None,
        });
    }

    /// Make listings of `endpoint` fail with `message` until cleared.
    pub fn fail_listing(&self, endpoint: &str, message: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        match message {
            Some(m) => state.list_failures.insert(endpoint.to_string(), m.to_string()),
            None => state.list_failures.remove(endpoint),
        };
    }

    pub fn push_script(&self, script: CopyScript) {
        self.state.lock().unwrap().scripts.push_back(script);
    }

    pub fn copies(&self) -> Vec<CopyRequest> {
        self.state.lock().unwrap().copies.clone()
    }

    /// Run `hook` at every `delete`, before the object is forgotten.
    pub fn on_delete(&self, hook: impl Fn(&str, &str) + Send + Sync + 'static) {
        *self.on_delete.lock().unwrap() = Some(Arc::new(hook));
    }

    /// `(endpoint, path)` of every deleted file, in order.
    pub fn deleted(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().deleted.clone()
    }
}

impl CopyEngine for ScriptedCopyEngine {
    fn list<'a>(
        &'a self,
        endpoint: &'a ResolvedEndpoint,
        path: &'a str,
    ) -> EngineFuture<'a, Vec<RemoteEntry>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            if let Some(message) = state.list_failures.get(&endpoint.name) {
                return Err(FerrymanError::Enumeration(message.clone()));
            }
            Ok(state
                .listings
                .get(&endpoint.name)
                .map(|objects| {
                    objects
                        .iter()
                        .filter(|o| path.is_empty() || strip_base(path, &o.path).is_some())
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn copy<'a>(
        &'a self,
        request: CopyRequest,
        progress: mpsc::UnboundedSender<EngineProgress>,
        cancel: oneshot::Receiver<()>,
    ) -> EngineFuture<'a, EngineExit> {
        let script = {
            let mut state = self.state.lock().unwrap();
            state.copies.push(request);
            state
                .scripts
                .pop_front()
                .unwrap_or_else(|| CopyScript::exit(EngineExit::Success))
        };

        Box::pin(async move {
            for report in script.progress {
                let _ = progress.send(report);
            }
            if script.hold {
                drop(progress);
                let _ = cancel.await;
                return Ok(EngineExit::Cancelled);
            }
            Ok(script.exit)
        })
    }

    fn delete<'a>(&'a self, endpoint: &'a ResolvedEndpoint, path: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let hook = self.on_delete.lock().unwrap().clone();
            if let Some(hook) = hook {
                hook(&endpoint.name, path);
            }
            let mut state = self.state.lock().unwrap();
            if let Some(objects) = state.listings.get_mut(&endpoint.name) {
                objects.retain(|o| o.path != path);
            }
            state.deleted.push((endpoint.name.clone(), path.to_string()));
            Ok(())
        })
    }
}
