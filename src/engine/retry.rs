// src/engine/retry.rs

//! Retry manager policy: bounded exponential backoff, gated by error kind.

use std::time::Duration;

use crate::config::model::RetrySection;
use crate::errors::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_section(&RetrySection::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue after `delay`; `attempt` is the new `retry_count`.
    Retry { attempt: u32, delay: Duration },
    /// The error kind is never retried.
    NotRetryable(ErrorKind),
    /// `max_retries` retries already happened.
    Exhausted,
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}

impl RetryPolicy {
    pub fn from_section(section: &RetrySection) -> Self {
        Self {
            max_retries: section.max_retries,
            base_delay: section.base_delay.0,
            max_delay: section.max_delay.0,
        }
    }

    /// `base * 2^retry_count`, capped at `max_delay`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// What to do with a Job whose attempt failed after `retry_count`
    /// retries.
    pub fn decide(&self, retry_count: u32, kind: ErrorKind) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::NotRetryable(kind);
        }
        if retry_count >= self.max_retries {
            return RetryDecision::Exhausted;
        }
        RetryDecision::Retry {
            attempt: retry_count + 1,
            delay: self.backoff(retry_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(0), Duration::from_secs(5));
        assert_eq!(p.backoff(1), Duration::from_secs(10));
        assert_eq!(p.backoff(2), Duration::from_secs(20));
        assert_eq!(p.backoff(3), Duration::from_secs(30));
        assert_eq!(p.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn retryable_kinds_retry_until_the_ceiling() {
        let p = policy();
        assert_eq!(
            p.decide(0, ErrorKind::Transfer),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(5)
            }
        );
        assert!(p.decide(2, ErrorKind::EngineUnavailable).is_retry());
        assert_eq!(p.decide(3, ErrorKind::Enumeration), RetryDecision::Exhausted);
    }

    #[test]
    fn auth_and_permission_never_retry() {
        let p = policy();
        assert_eq!(
            p.decide(0, ErrorKind::Auth),
            RetryDecision::NotRetryable(ErrorKind::Auth)
        );
        assert_eq!(
            p.decide(0, ErrorKind::Permission),
            RetryDecision::NotRetryable(ErrorKind::Permission)
        );
    }

    #[test]
    fn zero_retries_gives_up_immediately() {
        let p = RetryPolicy {
            max_retries: 0,
            ..policy()
        };
        assert_eq!(p.decide(0, ErrorKind::Transfer), RetryDecision::Exhausted);
    }
}
