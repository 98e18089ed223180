use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub type TemplateId = u64;
pub type JobId = u64;
pub type TransferId = u64;
pub type EndpointName = String;

/// What kind of event fires a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    ObjectCreated,
    FileCreated,
    FileModified,
    Manual,
    Scheduled,
}

impl TriggerKind {
    /// Triggers produced by an event detector watching an endpoint.
    pub fn is_event(self) -> bool {
        matches!(
            self,
            TriggerKind::ObjectCreated | TriggerKind::FileCreated | TriggerKind::FileModified
        )
    }

    /// Triggers that carry a concrete matched file.
    pub fn carries_file(self) -> bool {
        self.is_event()
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerKind::ObjectCreated => "object_created",
            TriggerKind::FileCreated => "file_created",
            TriggerKind::FileModified => "file_modified",
            TriggerKind::Manual => "manual",
            TriggerKind::Scheduled => "scheduled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Manual,
    EventTriggered,
    Scheduled,
    Chained,
}

/// Job lifecycle.
///
/// ```text
/// pending -> queued -> running -> completed | failed | cancelled
/// failed -> retrying -> queued
/// pending | queued | retrying -> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Retrying,
    Cancelled,
}

impl JobStatus {
    /// `failed` is only terminal once the retry manager has given up, which
    /// the status alone cannot tell; callers that need that distinction look
    /// at the retry decision instead.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Cancelled)
                | (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                // crash recovery: a running lease without a live executor
                | (Running, Queued)
                | (Failed, Retrying)
                | (Retrying, Queued)
                | (Retrying, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

/// Where the state store keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// JSON snapshot under `<state_dir>/state.json`.
    #[default]
    File,
    /// In process only (lost on restart).
    Memory,
}

/// Reachability of an endpoint as observed by its detector.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Connected,
    Degraded {
        consecutive_failures: u32,
        last_error: String,
    },
}

/// Parse a duration string like `"250ms"`, `"3s"`, `"5m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        unit => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

/// Wrapper so durations can be written as strings in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(pub Duration);

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(HumanDuration)
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
