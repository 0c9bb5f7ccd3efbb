//! Process-wide executors.
//!
//! A [`Runtime`] owns the shared worker pool and hands out the default
//! executors built on top of it. It is created once (usually through
//! [`RuntimeBuilder`]) and passed by reference to whatever needs it; there is
//! no ambient global.
//!
//! ```
//! use eventsync::runtime::RuntimeBuilder;
//! use eventsync::future::future_on;
//! use eventsync::source::EventSource;
//!
//! let runtime = RuntimeBuilder::new().worker_threads(2).build().unwrap();
//! let answer = future_on(&runtime.concurrent(), || Ok(6 * 7));
//! assert_eq!(answer.wait().ok(), Some(42));
//! runtime.shutdown();
//! ```

mod builder;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::channel::Producer;
use crate::config::{ConfigError, RuntimeConfig};
use crate::executor::{Executor, ThreadPool};
use crate::tracing_compat::{debug, info};
use crate::types::{BufferSize, Concurrency, Execution, Value};

pub use builder::RuntimeBuilder;

/// Owner of the worker pool and the default executors.
pub struct Runtime {
    config: RuntimeConfig,
    pool: ThreadPool,
    concurrent: Executor,
    primary: Executor,
    next_lane: AtomicU64,
}

impl Runtime {
    /// Builds a runtime from `config`.
    pub fn with_config(config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = ThreadPool::new(config.pool_options());
        let concurrent = pool.executor();
        let primary = Executor::lane(&concurrent, config.primary_concurrency, "primary");
        info!(
            workers = config.worker_threads.max_threads(),
            min_threads = config.min_threads,
            primary_concurrency = config.primary_concurrency,
            "runtime started"
        );
        Ok(Self {
            config,
            pool,
            concurrent,
            primary,
            next_lane: AtomicU64::new(0),
        })
    }

    /// Shorthand for `RuntimeBuilder::new()`.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Configuration this runtime was built from.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The default serial context. Wider if `primary_concurrency` says so.
    #[must_use]
    pub fn primary(&self) -> Executor {
        self.primary.clone()
    }

    /// Executor running blocks on the shared pool at full width.
    #[must_use]
    pub fn concurrent(&self) -> Executor {
        self.concurrent.clone()
    }

    /// A fresh serial lane, distinct from every other lane.
    #[must_use]
    pub fn serial_unique(&self) -> Executor {
        let id = self.next_lane.fetch_add(1, Ordering::Relaxed);
        Executor::lane(&self.concurrent, 1, format!("serial-{id}"))
    }

    /// A fresh lane running at most `limit` blocks at once.
    #[must_use]
    pub fn restricted(&self, limit: usize) -> Executor {
        let id = self.next_lane.fetch_add(1, Ordering::Relaxed);
        Executor::lane(&self.concurrent, limit.max(1), format!("restricted-{id}"))
    }

    /// Executor for an execution mode.
    ///
    /// `Sequential` yields a fresh serial lane. Concurrent modes narrower than
    /// the pool get their own restricted lane; the rest share the pool.
    #[must_use]
    pub fn executor(&self, execution: Execution) -> Executor {
        match execution {
            Execution::Sequential => self.serial_unique(),
            Execution::Concurrent(Concurrency::Restricted(n))
                if n.max(1) < self.config.worker_threads.max_threads() =>
            {
                self.restricted(n)
            }
            Execution::Concurrent(_) => self.concurrent(),
        }
    }

    /// A producer whose `BufferSize::Default` resolves to the configured
    /// default buffer size.
    #[must_use]
    pub fn producer<U: Value, S: Value>(&self, buffer: BufferSize) -> Producer<U, S> {
        Producer::with_capacity(
            buffer.resolve(self.config.default_buffer_size),
            "producer",
            Vec::new(),
        )
    }

    /// The pool backing every executor of this runtime.
    #[must_use]
    pub const fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Refuses new work. Queued work still runs.
    pub fn shutdown(&self) {
        debug!("runtime shutting down");
        self.pool.shutdown();
    }

    /// Shuts down and waits up to `timeout` for workers to exit.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        debug!(?timeout, "runtime shutting down; waiting for workers");
        self.pool.shutdown_and_wait(timeout)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
