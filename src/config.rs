//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Runtime configuration for the reminder service.
#[derive(Debug, Clone)]
pub struct ReminderConfig {
    /// Path to the libSQL database file.
    pub db_path: PathBuf,
    /// Port for the push channel HTTP/WebSocket server.
    pub ws_port: u16,
    /// How often the due sweep scans for due tasks.
    pub sweep_interval: Duration,
    /// Retry policy applied by the runner.
    pub retry: RetryPolicy,
    /// Directory for rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

/// Retry bookkeeping for a single occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum dispatch attempts per occurrence (including the first).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each one after.
    pub backoff_base: Duration,
    /// Upper bound on any single backoff delay.
    pub max_backoff: Duration,
    /// How long one attempt may run before it is cancelled.
    pub dispatch_timeout: Duration,
}

impl RetryPolicy {
    /// Exponential backoff for the given 1-indexed attempt, capped at
    /// `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.backoff_base.saturating_mul(1u32 << exponent);
        delay.min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_millis(2000),
            max_backoff: Duration::from_millis(60_000),
            dispatch_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/grow-reminder.db"),
            ws_port: 8090,
            sweep_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            log_dir: None,
        }
    }
}

impl ReminderConfig {
    /// Build config from `GROW_REMINDER_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Missing or unparseable
    /// values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse_u64 = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let db_path = lookup("GROW_REMINDER_DB_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let ws_port = lookup("GROW_REMINDER_WS_PORT")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.ws_port);

        let sweep_interval = parse_u64("GROW_REMINDER_SWEEP_INTERVAL_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        let retry = RetryPolicy {
            max_attempts: lookup("GROW_REMINDER_MAX_ATTEMPTS")
                .and_then(|s| s.trim().parse::<u32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.retry.max_attempts),
            backoff_base: parse_u64("GROW_REMINDER_BACKOFF_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.backoff_base),
            max_backoff: parse_u64("GROW_REMINDER_MAX_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_backoff),
            dispatch_timeout: parse_u64("GROW_REMINDER_DISPATCH_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry.dispatch_timeout),
        };

        let log_dir = lookup("GROW_REMINDER_LOG_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Self {
            db_path,
            ws_port,
            sweep_interval,
            retry,
            log_dir,
        }
    }

    /// Reject values the engine cannot run with. `from_lookup` never
    /// produces these, but hand-built configs can.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(invalid("sweep_interval", "must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        if self.retry.dispatch_timeout.is_zero() {
            return Err(invalid("dispatch_timeout", "must be greater than zero"));
        }
        if self.retry.max_backoff < self.retry.backoff_base {
            return Err(invalid(
                "max_backoff",
                format!(
                    "{}ms is below backoff_base {}ms",
                    self.retry.max_backoff.as_millis(),
                    self.retry.backoff_base.as_millis()
                ),
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}
