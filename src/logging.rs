// src/logging.rs

//! Process-wide `tracing` subscriber.
//!
//! The filter comes from, in order:
//! 1. `--log-level` on the command line;
//! 2. `FERRYMAN_LOG`, which takes full `EnvFilter` directives
//!    (`info`, `ferryman::exec=debug,warn`, ...);
//! 3. `info`.
//!
//! Output goes to stderr; stdout is reserved for `--dry-run` listings.

use anyhow::{anyhow, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "FERRYMAN_LOG";

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(LevelFilter::from(level).to_string());
    }
    env.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flag_wins_over_environment() {
        let filter = build_filter(Some(LogLevel::Debug), Some("error"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn environment_directives_and_fallback() {
        let filter = build_filter(None, Some("ferryman::exec=trace,warn"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));

        let filter = build_filter(None, Some("   "));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
    }
}
