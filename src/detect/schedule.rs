// src/detect/schedule.rs

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::debug;

use crate::detect::{Detector, PollFuture, TriggerEvent};
use crate::template::Template;

/// Smallest sleep between two checks of the schedule.
const MIN_TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
struct Entry {
    template: String,
    every: Duration,
    due: Instant,
}

/// Emits one `scheduled` trigger per template per interval. The first
/// tick of a template fires one interval after start.
#[derive(Debug, Clone, Default)]
pub struct ScheduleDetector {
    entries: Vec<Entry>,
}

impl ScheduleDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active scheduled templates among `templates`.
    pub fn from_templates<'a>(templates: impl IntoIterator<Item = &'a Template>) -> Self {
        let mut detector = Self::new();
        for t in templates.into_iter().filter(|t| t.active) {
            if let Some(every) = t.schedule_interval() {
                detector.add(&t.name, every);
            }
        }
        detector
    }

    pub fn add(&mut self, template: impl Into<String>, every: Duration) {
        self.entries.push(Entry {
            template: template.into(),
            every,
            due: Instant::now() + every,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn collect_due(&mut self) -> Vec<TriggerEvent> {
        let now = Instant::now();
        let mut events = Vec::new();
        for entry in self.entries.iter_mut() {
            if entry.due > now {
                continue;
            }
            // Missed ticks (e.g. after a long stall) collapse into one.
            entry.due += entry.every;
            if entry.due <= now {
                entry.due = now + entry.every;
            }
            let next_run = Utc::now()
                + chrono::Duration::from_std(entry.due - now).unwrap_or_else(|_| chrono::Duration::zero());
            debug!(template = %entry.template, "scheduled tick");
            events.push(TriggerEvent::scheduled(&entry.template, next_run));
        }
        events
    }
}

impl Detector for ScheduleDetector {
    fn name(&self) -> &str {
        "schedule"
    }

    fn endpoint(&self) -> Option<&str> {
        None
    }

    fn next_poll(&self) -> Duration {
        let now = Instant::now();
        self.entries
            .iter()
            .map(|e| e.due.saturating_duration_since(now))
            .min()
            .unwrap_or(Duration::from_secs(60))
            .max(MIN_TICK)
    }

    fn poll(&mut self) -> PollFuture<'_> {
        let events = self.collect_due();
        Box::pin(async move { Ok(events) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TriggerKind;

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_interval() {
        let mut d = ScheduleDetector::new();
        d.add("nightly", Duration::from_secs(60));

        assert!(d.poll().await.unwrap().is_empty());
        assert_eq!(d.next_poll(), Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(60)).await;
        let events = d.poll().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TriggerKind::Scheduled);
        assert_eq!(events[0].template.as_deref(), Some("nightly"));
        assert!(events[0].next_run.is_some());

        assert!(d.poll().await.unwrap().is_empty());

        // A long stall produces a single catch-up tick.
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(d.poll().await.unwrap().len(), 1);
        assert!(d.poll().await.unwrap().is_empty());
    }
}
