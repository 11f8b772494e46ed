//! Pool configuration

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default number of workers
pub const DEFAULT_POOL_SIZE: usize = 128;

/// Default capacity of the job queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// How job outcomes are reported back to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReporting {
    /// Outcomes are discarded; `Pool::wait` blocks until all jobs are done
    #[default]
    Disabled,
    /// Outcomes are buffered without limit
    Unbounded,
    /// Outcomes are buffered up to the given size; workers block on a full
    /// buffer until the caller drains it
    Bounded(usize),
}

impl ErrorReporting {
    /// Whether outcomes are delivered at all
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Buffer capacity; `None` means unbounded
    pub(crate) fn capacity(&self) -> Option<usize> {
        match self {
            Self::Bounded(capacity) => Some(*capacity),
            Self::Disabled | Self::Unbounded => None,
        }
    }
}

impl fmt::Display for ErrorReporting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Unbounded => write!(f, "unbounded"),
            Self::Bounded(capacity) => write!(f, "{capacity}"),
        }
    }
}

impl FromStr for ErrorReporting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disabled" | "off" | "none" => Ok(Self::Disabled),
            "unbounded" => Ok(Self::Unbounded),
            other => other
                .parse()
                .map(Self::Bounded)
                .map_err(|_| ConfigError::InvalidErrorReporting(s.to_string())),
        }
    }
}

/// What a worker does when a job panics and no interceptor recovered it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicPolicy {
    /// The panic ends the worker; the slot stays empty until the pool is
    /// stopped and started again, and no outcome is reported for the job
    #[default]
    TerminateWorker,
    /// The worker catches the panic, reports `JobError::Panicked` and keeps
    /// running
    Recover,
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Unrecognized error reporting mode
    #[error("invalid error reporting mode: {0} (expected disabled, unbounded or a capacity)")]
    InvalidErrorReporting(String),
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of concurrent workers (at least 1)
    pub pool_size: usize,

    /// Capacity of the job queue; 0 hands jobs over synchronously
    pub queue_capacity: usize,

    /// Outcome reporting
    pub errors: ErrorReporting,

    /// Handling of unrecovered job panics
    pub on_panic: PanicPolicy,

    /// Stop workers on SIGINT/SIGTERM while the pool is running
    pub watch_signals: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            errors: ErrorReporting::Disabled,
            on_panic: PanicPolicy::TerminateWorker,
            watch_signals: true,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WORKPOOL_SIZE`: number of workers (default: 128)
    /// - `WORKPOOL_QUEUE_CAPACITY`: job queue capacity (default: 256)
    /// - `WORKPOOL_ERRORS`: `disabled`, `unbounded` or a capacity (default: disabled)
    /// - `WORKPOOL_WATCH_SIGNALS`: `false` to ignore SIGINT/SIGTERM (default: true)
    ///
    /// Unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let pool_size = std::env::var("WORKPOOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.pool_size);

        let queue_capacity = std::env::var("WORKPOOL_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.queue_capacity);

        let errors = std::env::var("WORKPOOL_ERRORS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.errors);

        let watch_signals = std::env::var("WORKPOOL_WATCH_SIGNALS")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(defaults.watch_signals);

        Self {
            errors,
            watch_signals,
            ..defaults
        }
        .with_pool_size(pool_size)
        .with_queue_capacity(queue_capacity)
    }

    /// Set the number of workers
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    /// Set the job queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set outcome reporting
    pub fn with_errors(mut self, errors: ErrorReporting) -> Self {
        self.errors = errors;
        self
    }

    /// Set the panic policy
    pub fn with_panic_policy(mut self, policy: PanicPolicy) -> Self {
        self.on_panic = policy;
        self
    }

    /// Enable or disable the shutdown signal watcher
    pub fn with_signal_watch(mut self, enabled: bool) -> Self {
        self.watch_signals = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.pool_size, 128);
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.errors, ErrorReporting::Disabled);
        assert_eq!(config.on_panic, PanicPolicy::TerminateWorker);
        assert!(config.watch_signals);
    }

    #[test]
    fn test_config_builder() {
        let config = PoolConfig::new()
            .with_pool_size(4)
            .with_queue_capacity(0)
            .with_errors(ErrorReporting::Bounded(16))
            .with_panic_policy(PanicPolicy::Recover)
            .with_signal_watch(false);

        assert_eq!(config.pool_size, 4);
        assert_eq!(config.queue_capacity, 0);
        assert_eq!(config.errors, ErrorReporting::Bounded(16));
        assert_eq!(config.on_panic, PanicPolicy::Recover);
        assert!(!config.watch_signals);
    }

    #[test]
    fn test_pool_size_is_at_least_one() {
        assert_eq!(PoolConfig::new().with_pool_size(0).pool_size, 1);
    }

    #[test]
    fn test_error_reporting_parse() {
        assert_eq!("disabled".parse::<ErrorReporting>(), Ok(ErrorReporting::Disabled));
        assert_eq!("OFF".parse::<ErrorReporting>(), Ok(ErrorReporting::Disabled));
        assert_eq!("unbounded".parse::<ErrorReporting>(), Ok(ErrorReporting::Unbounded));
        assert_eq!(" 32 ".parse::<ErrorReporting>(), Ok(ErrorReporting::Bounded(32)));
        assert_eq!(
            "lots".parse::<ErrorReporting>(),
            Err(ConfigError::InvalidErrorReporting("lots".to_string()))
        );
    }

    #[test]
    fn test_error_reporting_capacity() {
        assert!(!ErrorReporting::Disabled.is_enabled());
        assert!(ErrorReporting::Unbounded.is_enabled());
        assert_eq!(ErrorReporting::Unbounded.capacity(), None);
        assert_eq!(ErrorReporting::Bounded(8).capacity(), Some(8));
        assert_eq!(ErrorReporting::Bounded(8).to_string(), "8");
    }

    #[test]
    fn test_serialization() {
        let config = PoolConfig::new()
            .with_errors(ErrorReporting::Bounded(10))
            .with_panic_policy(PanicPolicy::Recover);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PoolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_deserialize_partial() {
        let parsed: PoolConfig =
            serde_json::from_str(r#"{"pool_size": 2, "errors": "unbounded"}"#).unwrap();
        assert_eq!(parsed.pool_size, 2);
        assert_eq!(parsed.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(parsed.errors, ErrorReporting::Unbounded);
    }
}
