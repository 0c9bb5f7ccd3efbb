//! Execution contexts and weak lifetimes.
//!
//! An execution context is any collaborator object that owns a
//! [`ReleasePool`]. Contextual combinators (the `*_in` variants) bind their
//! subscription to the context's lifetime: they hold only a [`ContextRef`],
//! check liveness before every callback, and are torn down when the context's
//! pool drains.
//!
//! ```ignore
//! struct Screen {
//!     pool: ReleasePool,
//!     executor: Executor,
//! }
//!
//! impl ExecutionContext for Screen {
//!     fn executor(&self) -> Executor { self.executor.clone() }
//!     fn release_pool(&self) -> &ReleasePool { &self.pool }
//! }
//! ```

mod scope;

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::Error;
use crate::executor::Executor;
use crate::util::ArenaIndex;

pub use scope::{ReleasePool, Scope};

/// An object that scopes subscriptions to its own lifetime.
pub trait ExecutionContext: Send + Sync + 'static {
    /// Executor contextual callbacks run on by default.
    fn executor(&self) -> Executor;

    /// Pool whose drain tears down every subscription made through this context.
    fn release_pool(&self) -> &ReleasePool;

    /// Where failures land when a combinator is told to catch them.
    fn error_sink(&self) -> Option<&ErrorSink> {
        None
    }
}

/// Single-slot store for caught failures. The latest failure wins.
#[derive(Default)]
pub struct ErrorSink {
    slot: Mutex<Option<Error>>,
}

impl ErrorSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `error`, replacing any previous one.
    pub fn store(&self, error: Error) {
        *self.slot.lock() = Some(error);
    }

    /// Returns a copy of the stored error.
    #[must_use]
    pub fn get(&self) -> Option<Error> {
        self.slot.lock().clone()
    }

    /// Removes and returns the stored error.
    pub fn take(&self) -> Option<Error> {
        self.slot.lock().take()
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("error", &*self.slot.lock())
            .finish()
    }
}

/// Weak back-reference from a subscription to its context.
pub struct ContextRef<C> {
    context: Weak<C>,
    scope: Scope,
    slot: Mutex<Option<ArenaIndex>>,
}

impl<C: ExecutionContext> ContextRef<C> {
    /// Captures a weak handle to `context` and its pool's liveness.
    #[must_use]
    pub fn new(context: &Arc<C>) -> Self {
        Self {
            context: Arc::downgrade(context),
            scope: context.release_pool().scope(),
            slot: Mutex::new(None),
        }
    }

    /// Returns the context if it is still alive and its pool not drained.
    #[must_use]
    pub fn resolve(&self) -> Option<Arc<C>> {
        if !self.scope.is_alive() {
            return None;
        }
        self.context.upgrade()
    }

    /// Returns true while the context's pool has not drained.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.scope.is_alive()
    }

    /// Liveness handle of the context's pool.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Registers the teardown of this binding with the context's pool.
    ///
    /// Runs `cleanup` immediately if the pool has already drained.
    pub fn on_teardown<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let slot = self.scope.notify_drop(cleanup);
        *self.slot.lock() = slot;
    }

    /// Withdraws the registered teardown, for bindings that ended on their own.
    pub fn release(&self) {
        if let Some(slot) = self.slot.lock().take() {
            self.scope.forget(slot);
        }
    }
}

impl<C> fmt::Debug for ContextRef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRef")
            .field("alive", &self.scope.is_alive())
            .field("slot", &*self.slot.lock())
            .finish()
    }
}
