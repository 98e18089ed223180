// src/detect/health.rs

use crate::types::ConnectionStatus;

/// Tracks consecutive detector failures against one endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    degraded_after: u32,
    consecutive_failures: u32,
    status: ConnectionStatus,
}

impl ConnectionHealth {
    pub fn new(degraded_after: u32) -> Self {
        Self {
            degraded_after: degraded_after.max(1),
            consecutive_failures: 0,
            status: ConnectionStatus::Unknown,
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Returns the new status if it changed.
    pub fn record_success(&mut self) -> Option<ConnectionStatus> {
        self.consecutive_failures = 0;
        self.transition(ConnectionStatus::Connected)
    }

    /// Returns the new status if it changed. Below the threshold the status
    /// is left alone; at and beyond it every failure updates the count.
    pub fn record_failure(&mut self, error: &str) -> Option<ConnectionStatus> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures < self.degraded_after {
            return None;
        }
        self.transition(ConnectionStatus::Degraded {
            consecutive_failures: self.consecutive_failures,
            last_error: error.to_string(),
        })
    }

    fn transition(&mut self, next: ConnectionStatus) -> Option<ConnectionStatus> {
        if self.status == next {
            None
        } else {
            self.status = next.clone();
            Some(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degrades_at_threshold_and_recovers() {
        let mut h = ConnectionHealth::new(3);
        assert_eq!(h.record_success(), Some(ConnectionStatus::Connected));
        assert_eq!(h.record_failure("timeout"), None);
        assert_eq!(h.record_failure("timeout"), None);
        assert!(matches!(
            h.record_failure("timeout"),
            Some(ConnectionStatus::Degraded { consecutive_failures: 3, .. })
        ));
        assert!(matches!(
            h.record_failure("timeout"),
            Some(ConnectionStatus::Degraded { consecutive_failures: 4, .. })
        ));
        assert_eq!(h.record_success(), Some(ConnectionStatus::Connected));
        assert_eq!(h.record_success(), None);
    }
}
