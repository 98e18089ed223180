// src/detect/debounce.rs

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Collapses bursts of change notifications per path into one, released
/// after the path has been quiet for the configured window.
#[derive(Debug)]
pub struct Debouncer {
    quiet: Duration,
    pending: HashMap<String, Instant>,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: HashMap::new(),
        }
    }

    /// Record activity on `path`; restarts its quiet window.
    pub fn touch(&mut self, path: impl Into<String>, now: Instant) {
        self.pending.insert(path.into(), now);
    }

    /// Remove and return every path whose last activity is at least one
    /// quiet window old, sorted.
    pub fn drain_settled(&mut self, now: Instant) -> Vec<String> {
        let quiet = self.quiet;
        let mut settled: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= quiet)
            .map(|(path, _)| path.clone())
            .collect();
        for path in settled.iter() {
            self.pending.remove(path);
        }
        settled.sort();
        settled
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
