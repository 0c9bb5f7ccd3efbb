//! Fluent construction of a [`Runtime`].

use std::time::Duration;

use super::Runtime;
use crate::config::{apply_env_overrides, ConfigError, RuntimeConfig};
use crate::types::Concurrency;

/// Builder for a [`Runtime`] with custom configuration.
///
/// Later calls win, so `from_env()` followed by setters lets code override
/// the environment, while setters followed by
/// [`with_env_overrides`](Self::with_env_overrides) let the environment win.
#[derive(Debug, Clone, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    env_error: Option<ConfigError>,
}

impl RuntimeBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder seeded from the `EVENTSYNC_*` environment.
    ///
    /// A variable that fails to parse is reported by [`build`](Self::build).
    #[must_use]
    pub fn from_env() -> Self {
        Self::new().with_env_overrides()
    }

    /// Applies `EVENTSYNC_*` overrides on top of the current values.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Err(e) = apply_env_overrides(&mut self.config) {
            self.env_error.get_or_insert(e);
        }
        self
    }

    /// Starts from an existing configuration.
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the worker pool width to exactly `n` threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = Concurrency::Restricted(n);
        self
    }

    /// Sets the worker pool width as a concurrency policy.
    #[must_use]
    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.config.worker_threads = concurrency;
        self
    }

    /// Sets how many threads stay alive while idle.
    #[must_use]
    pub fn min_threads(mut self, n: usize) -> Self {
        self.config.min_threads = n;
        self
    }

    /// Sets how long surplus threads idle before retiring.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the capacity `BufferSize::Default` resolves to.
    #[must_use]
    pub fn default_buffer_size(mut self, size: usize) -> Self {
        self.config.default_buffer_size = size;
        self
    }

    /// Sets the width of the primary executor lane.
    #[must_use]
    pub fn primary_concurrency(mut self, width: usize) -> Self {
        self.config.primary_concurrency = width;
        self
    }

    /// Validates the configuration and starts the runtime.
    pub fn build(self) -> Result<Runtime, ConfigError> {
        if let Some(e) = self.env_error {
            return Err(e);
        }
        Runtime::with_config(self.config)
    }
}
