//! Test utilities for eventsync.
//!
//! This module provides shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - `Fallible` assertion macros
//! - A ready-made [`ExecutionContext`] for contextual combinators
//!
//! # Example
//! ```ignore
//! use eventsync::test_utils::{init_test_logging, TestContext};
//!
//! init_test_logging();
//! let ctx = TestContext::new();
//! // ... bind combinators with `*_in(&ctx, ...)`
//! ctx.teardown();
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Once};

use tracing_subscriber::fmt::format::FmtSpan;

use crate::cx::{ErrorSink, ExecutionContext, ReleasePool};
use crate::executor::Executor;

static INIT_LOGGING: Once = Once::new();
static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that a `Fallible` succeeded with a specific value.
#[macro_export]
macro_rules! assert_fallible_ok {
    ($fallible:expr, $expected:expr) => {
        match $fallible {
            Ok(v) => assert_eq!(v, $expected),
            Err(e) => unreachable!("expected Ok({:?}), got error {}", $expected, e),
        }
    };
}

/// Assert that a `Fallible` failed with a specific [`ErrorKind`](crate::ErrorKind).
#[macro_export]
macro_rules! assert_fallible_err {
    ($fallible:expr, $kind:expr) => {
        match $fallible {
            Err(e) => assert_eq!(e.kind(), $kind, "unexpected error: {}", e),
            Ok(v) => unreachable!("expected {:?} error, got Ok({:?})", $kind, v),
        }
    };
}

/// Execution context for tests.
///
/// Runs contextual callbacks on the immediate executor, stores caught
/// failures in its own [`ErrorSink`], and can be torn down on demand.
#[derive(Debug)]
pub struct TestContext {
    id: u32,
    pool: ReleasePool,
    sink: ErrorSink,
    executor: Executor,
}

impl TestContext {
    /// A live context with a process-unique id.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::on(Executor::immediate())
    }

    /// A live context whose callbacks default to `executor`.
    #[must_use]
    pub fn on(executor: Executor) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            pool: ReleasePool::new(),
            sink: ErrorSink::new(),
            executor,
        })
    }

    /// Process-unique id, handy for asserting which context a callback saw.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Failures caught by combinators bound with `catch_into_sink`.
    #[must_use]
    pub const fn errors(&self) -> &ErrorSink {
        &self.sink
    }

    /// Drains the release pool, tearing down every binding made through
    /// this context.
    pub fn teardown(&self) {
        self.pool.drain();
    }

    /// Returns false once [`teardown`](Self::teardown) has run.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.pool.is_alive()
    }
}

impl ExecutionContext for TestContext {
    fn executor(&self) -> Executor {
        self.executor.clone()
    }

    fn release_pool(&self) -> &ReleasePool {
        &self.pool
    }

    fn error_sink(&self) -> Option<&ErrorSink> {
        Some(&self.sink)
    }
}
