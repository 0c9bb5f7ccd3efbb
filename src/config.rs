//! Runtime configuration.
//!
//! [`RuntimeConfig`] holds the values a [`Runtime`](crate::runtime::Runtime)
//! is built from. Most callers go through
//! [`RuntimeBuilder`](crate::runtime::RuntimeBuilder) instead of filling the
//! struct by hand.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `worker_threads` | [`Concurrency::Auto`] |
//! | `min_threads` | 1 |
//! | `idle_timeout` | 10 s |
//! | `thread_name_prefix` | `"eventsync"` |
//! | `default_buffer_size` | 1 |
//! | `primary_concurrency` | 1 (the primary executor is serial) |
//!
//! # Environment variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `EVENTSYNC_WORKER_THREADS` | `auto`, `unrestricted` or `usize` | `worker_threads` |
//! | `EVENTSYNC_MIN_THREADS` | `usize` | `min_threads` |
//! | `EVENTSYNC_IDLE_TIMEOUT_MS` | `u64` | `idle_timeout` |
//! | `EVENTSYNC_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `EVENTSYNC_DEFAULT_BUFFER_SIZE` | `usize` | `default_buffer_size` |

use std::time::Duration;

use crate::executor::PoolOptions;
use crate::types::Concurrency;

/// Environment variable name for the worker thread count.
pub const ENV_WORKER_THREADS: &str = "EVENTSYNC_WORKER_THREADS";
/// Environment variable name for the number of threads kept alive when idle.
pub const ENV_MIN_THREADS: &str = "EVENTSYNC_MIN_THREADS";
/// Environment variable name for the idle timeout, in milliseconds.
pub const ENV_IDLE_TIMEOUT_MS: &str = "EVENTSYNC_IDLE_TIMEOUT_MS";
/// Environment variable name for the worker thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "EVENTSYNC_THREAD_NAME_PREFIX";
/// Environment variable name for the producer buffer used by `BufferSize::Default`.
pub const ENV_DEFAULT_BUFFER_SIZE: &str = "EVENTSYNC_DEFAULT_BUFFER_SIZE";

/// Default idle timeout before surplus pool threads retire.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Error raised while building or validating a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A field (or the environment variable feeding it) holds an unusable value.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field or variable name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an [`InvalidValue`](Self::InvalidValue) error.
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Width of the shared worker pool.
    pub worker_threads: Concurrency,
    /// Threads kept alive even when idle.
    pub min_threads: usize,
    /// Idle time after which threads above `min_threads` retire.
    pub idle_timeout: Duration,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Capacity that `BufferSize::Default` resolves to for runtime producers.
    pub default_buffer_size: usize,
    /// Width of the primary executor lane.
    pub primary_concurrency: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: Concurrency::Auto,
            min_threads: 1,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: "eventsync".to_string(),
            default_buffer_size: 1,
            primary_concurrency: 1,
        }
    }
}

impl RuntimeConfig {
    /// Defaults with `EVENTSYNC_*` overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_concurrency == 0 {
            return Err(ConfigError::invalid_value(
                "primary_concurrency",
                "must be at least 1",
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "thread_name_prefix",
                "must not be empty",
            ));
        }
        let max = self.worker_threads.max_threads();
        if self.min_threads > max {
            return Err(ConfigError::invalid_value(
                "min_threads",
                format!("{} exceeds worker_threads ({max})", self.min_threads),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::invalid_value("idle_timeout", "must be non-zero"));
        }
        Ok(())
    }

    pub(crate) fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            min_threads: self.min_threads,
            max_threads: self.worker_threads.max_threads(),
            idle_timeout: self.idle_timeout,
            thread_name_prefix: self.thread_name_prefix.clone(),
            ..PoolOptions::default()
        }
    }
}

/// Applies environment overrides to `config`.
///
/// Only variables that are set are applied. A variable that is set but does
/// not parse is an error.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    apply_overrides(config, |name| std::env::var(name).ok())
}

fn apply_overrides(
    config: &mut RuntimeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(val) = lookup(ENV_WORKER_THREADS) {
        config.worker_threads = parse_concurrency(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = lookup(ENV_MIN_THREADS) {
        config.min_threads = parse_usize(ENV_MIN_THREADS, &val)?;
    }
    if let Some(val) = lookup(ENV_IDLE_TIMEOUT_MS) {
        config.idle_timeout = Duration::from_millis(parse_u64(ENV_IDLE_TIMEOUT_MS, &val)?);
    }
    if let Some(val) = lookup(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = lookup(ENV_DEFAULT_BUFFER_SIZE) {
        config.default_buffer_size = parse_usize(ENV_DEFAULT_BUFFER_SIZE, &val)?;
    }
    Ok(())
}

fn parse_usize(var_name: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim().parse::<usize>().map_err(|e| {
        ConfigError::invalid_value(
            var_name,
            format!("expected unsigned integer, got {val:?} ({e})"),
        )
    })
}

fn parse_u64(var_name: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim().parse::<u64>().map_err(|e| {
        ConfigError::invalid_value(var_name, format!("expected u64, got {val:?} ({e})"))
    })
}

fn parse_concurrency(var_name: &'static str, val: &str) -> Result<Concurrency, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "auto" => Ok(Concurrency::Auto),
        "unrestricted" => Ok(Concurrency::Unrestricted),
        other => match parse_usize(var_name, other)? {
            0 => Err(ConfigError::invalid_value(var_name, "thread count must be at least 1")),
            n => Ok(Concurrency::Restricted(n)),
        },
    }
}
