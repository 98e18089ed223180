// src/detect/driver.rs

//! Background task that drives one [`Detector`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::detect::{ConnectionHealth, Detector};
use crate::engine::RuntimeEvent;
use crate::store::StateStore;

/// Owns the driver task; dropping the handle stops the detector.
#[derive(Debug)]
pub struct DetectorHandle {
    name: String,
    handle: JoinHandle<()>,
}

impl DetectorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for DetectorHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn a loop that polls `detector`, forwards its events to the runtime and
/// records the endpoint's connection status.
///
/// Poll failures are logged and retried on the next cycle; the loop only
/// ends when the runtime stops listening.
pub fn spawn_detector(
    mut detector: Box<dyn Detector>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    store: Arc<dyn StateStore>,
    degraded_after: u32,
) -> DetectorHandle {
    let name = detector.name().to_string();
    let task_name = name.clone();

    let handle = tokio::spawn(async move {
        info!(detector = %task_name, "detector started");
        let mut health = ConnectionHealth::new(degraded_after);

        loop {
            let changed = match detector.poll().await {
                Ok(events) => {
                    if !events.is_empty() {
                        debug!(detector = %task_name, count = events.len(), "trigger events observed");
                    }
                    for event in events {
                        if runtime_tx
                            .send(RuntimeEvent::TriggerObserved(event))
                            .await
                            .is_err()
                        {
                            info!(detector = %task_name, "runtime gone; detector stopping");
                            return;
                        }
                    }
                    health.record_success()
                }
                Err(err) => {
                    warn!(detector = %task_name, error = %format!("{err:#}"), "detector poll failed");
                    health.record_failure(&format!("{err:#}"))
                }
            };

            if let (Some(status), Some(endpoint)) = (changed, detector.endpoint()) {
                info!(detector = %task_name, endpoint = %endpoint, ?status, "endpoint status changed");
                if let Err(e) = store.set_endpoint_status(endpoint, status) {
                    warn!(detector = %task_name, error = %e, "could not record endpoint status");
                }
            }

            if runtime_tx.is_closed() {
                break;
            }
            tokio::time::sleep(detector.next_poll()).await;
        }

        info!(detector = %task_name, "detector stopped");
    });

    DetectorHandle { name, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::detect::{PollFuture, TriggerEvent};
    use crate::store::MemoryStateStore;
    use crate::types::{ConnectionStatus, TriggerKind};

    /// Fails `failures` times, then reports one event per poll. Each poll
    /// first notes the endpoint status the driver has stored so far.
    struct Flaky {
        failures: u32,
        store: Arc<MemoryStateStore>,
        seen: Arc<Mutex<Vec<ConnectionStatus>>>,
    }

    impl Detector for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn endpoint(&self) -> Option<&str> {
            Some("bucket")
        }

        fn next_poll(&self) -> Duration {
            Duration::from_millis(1)
        }

        fn poll(&mut self) -> PollFuture<'_> {
            Box::pin(async move {
                let status = self.store.endpoint_status("bucket")?;
                self.seen.lock().unwrap().push(status);
                if self.failures > 0 {
                    self.failures -= 1;
                    anyhow::bail!("connection refused");
                }
                Ok(vec![TriggerEvent::object_created("bucket", "a.mp4", "etag1", Some(1))])
            })
        }
    }

    #[tokio::test]
    async fn failures_degrade_then_recover() {
        let store = Arc::new(MemoryStateStore::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, mut rx) = mpsc::channel(8);
        let flaky = Flaky {
            failures: 2,
            store: store.clone(),
            seen: seen.clone(),
        };
        let _handle = spawn_detector(Box::new(flaky), tx, store.clone(), 2);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            RuntimeEvent::TriggerObserved(e) => assert_eq!(e.kind, TriggerKind::ObjectCreated),
            other => panic!("unexpected {other:?}"),
        }

        // One failure stays below the threshold; the second is stored as
        // degraded before the succeeding poll runs.
        let before_recovery = seen.lock().unwrap()[..3].to_vec();
        assert_eq!(
            before_recovery,
            vec![
                ConnectionStatus::Unknown,
                ConnectionStatus::Unknown,
                ConnectionStatus::Degraded {
                    consecutive_failures: 2,
                    last_error: "connection refused".to_string(),
                },
            ]
        );

        // The status write follows the send; give the task a moment.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.endpoint_status("bucket").unwrap(), ConnectionStatus::Connected);
    }
}
