//! Single-shot eventual values.
//!
//! A [`Future`] is a source with no updates and exactly one completion. Its
//! write side is a [`Promise`]: the first `succeed`, `fail` or `complete`
//! wins, later calls return `false` and never re-trigger handlers.
//!
//! Handlers registered after completion fire right away with the stored
//! result, so every handler observes the completion exactly once.
//!
//! These futures are callback-driven eventual values, unrelated to
//! [`std::future::Future`].

mod combinators;
mod join;

use core::fmt;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use crate::cx::{ExecutionContext, Scope};
use crate::combinator::derive::observe_in;
use crate::error::Error;
use crate::executor::Executor;
use crate::source::{EventCore, EventSource, Subscription};
use crate::tracing_compat::error;
use crate::types::{fallible, Event, Fallible, Value};

pub use join::{join_all, reduce};

/// Read side of a single-shot value.
pub struct Future<T> {
    core: Arc<EventCore<Infallible, T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Value> Future<T> {
    pub(crate) fn from_core(core: Arc<EventCore<Infallible, T>>) -> Self {
        Self { core }
    }

    /// A future that has already succeeded with `value`.
    #[must_use]
    pub fn succeeded(value: T) -> Self {
        Self::completed(Ok(value))
    }

    /// A future that has already failed with `error`.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self::completed(Err(error))
    }

    /// A future that has already completed with `result`.
    #[must_use]
    pub fn completed(result: Fallible<T>) -> Self {
        Self::from_core(EventCore::completed(result, "future"))
    }

    /// Calls `f` once with the result on `executor`.
    pub fn on_complete<F>(&self, executor: &Executor, f: F) -> Subscription
    where
        F: FnOnce(Fallible<T>) + Send + 'static,
    {
        let mut f = Some(f);
        self.subscribe(executor, move |event| {
            if let Event::Completion(result) = event {
                if let Some(f) = f.take() {
                    f(result);
                }
            }
        })
    }

    /// Context-bound form of [`on_complete`](Self::on_complete).
    ///
    /// `f` runs on the context executor, and not at all once the context is
    /// gone.
    pub fn on_complete_in<C, F>(&self, context: &Arc<C>, f: F) -> Subscription
    where
        C: ExecutionContext,
        F: FnOnce(&C, Fallible<T>) + Send + 'static,
    {
        let mut f = Some(f);
        observe_in(self, context, move |ctx, event| {
            if let Event::Completion(result) = event {
                if let Some(f) = f.take() {
                    f(ctx, result);
                }
            }
        })
    }

    /// Calls `f` with the value, if this future succeeds.
    pub fn on_success<F>(&self, executor: &Executor, f: F) -> Subscription
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.on_complete(executor, move |result| {
            if let Ok(value) = result {
                f(value);
            }
        })
    }

    /// Context-bound form of [`on_success`](Self::on_success).
    pub fn on_success_in<C, F>(&self, context: &Arc<C>, f: F) -> Subscription
    where
        C: ExecutionContext,
        F: FnOnce(&C, T) + Send + 'static,
    {
        self.on_complete_in(context, move |ctx, result| {
            if let Ok(value) = result {
                f(ctx, value);
            }
        })
    }

    /// Calls `f` with the error, if this future fails.
    pub fn on_failure<F>(&self, executor: &Executor, f: F) -> Subscription
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.on_complete(executor, move |result| {
            if let Err(error) = result {
                f(error);
            }
        })
    }

    /// Context-bound form of [`on_failure`](Self::on_failure).
    pub fn on_failure_in<C, F>(&self, context: &Arc<C>, f: F) -> Subscription
    where
        C: ExecutionContext,
        F: FnOnce(&C, Error) + Send + 'static,
    {
        self.on_complete_in(context, move |ctx, result| {
            if let Err(error) = result {
                f(ctx, error);
            }
        })
    }
}

impl<T: Value> EventSource<Infallible, T> for Future<T> {
    fn subscribe_scoped<F>(&self, executor: &Executor, scope: Option<&Scope>, handler: F) -> Subscription
    where
        F: FnMut(Event<Infallible, T>) + Send + 'static,
    {
        self.core.subscribe(executor, scope.cloned(), Box::new(handler))
    }

    fn completion(&self) -> Option<Fallible<T>> {
        self.core.completion()
    }

    fn label(&self) -> &str {
        self.core.label()
    }

    fn capacity(&self) -> usize {
        0
    }

    fn wait(&self) -> Fallible<T> {
        self.core.wait_completion(None)
    }

    fn wait_timeout(&self, timeout: Duration) -> Fallible<T> {
        self.core.wait_completion(Some(timeout))
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("label", &self.core.label())
            .finish_non_exhaustive()
    }
}

/// Write side of a [`Future`].
pub struct Promise<T> {
    core: Arc<EventCore<Infallible, T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Value> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Value> Promise<T> {
    /// Creates a pending promise.
    #[must_use]
    pub fn new() -> Self {
        Self::labeled("promise")
    }

    /// Creates a pending promise whose log lines carry `label`.
    #[must_use]
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            core: EventCore::new(0, label, Vec::new()),
        }
    }

    /// Completes successfully. Returns false if already completed.
    #[allow(clippy::must_use_candidate)]
    pub fn succeed(&self, value: T) -> bool {
        self.core.complete(Ok(value))
    }

    /// Completes with a failure. Returns false if already completed.
    #[allow(clippy::must_use_candidate)]
    pub fn fail(&self, error: Error) -> bool {
        self.core.complete(Err(error))
    }

    /// Completes with `result`. Returns false if already completed.
    #[allow(clippy::must_use_candidate)]
    pub fn complete(&self, result: Fallible<T>) -> bool {
        self.core.complete(result)
    }

    /// Completes with `result`, or fails with
    /// [`ErrorKind::AlreadyCompleted`](crate::ErrorKind::AlreadyCompleted)
    /// if another completion won.
    pub fn try_complete(&self, result: Fallible<T>) -> Fallible<()> {
        self.core.try_complete(result)
    }

    /// Returns true once completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.core.is_completed()
    }

    /// Read side of this promise.
    #[must_use]
    pub fn future(&self) -> Future<T> {
        Future::from_core(Arc::clone(&self.core))
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("label", &self.core.label())
            .finish_non_exhaustive()
    }
}

/// Runs `block` on `executor` and resolves the returned future with its result.
///
/// A panic inside `block` fails the future with
/// [`ErrorKind::Internal`](crate::ErrorKind::Internal); a refused schedule
/// fails it with the executor's error.
pub fn future_on<T, F>(executor: &Executor, block: F) -> Future<T>
where
    T: Value,
    F: FnOnce() -> Fallible<T> + Send + 'static,
{
    promise_on(executor, move |promise: Promise<T>| {
        promise.complete(fallible(block));
    })
}

/// Runs `block` on `executor` with the promise behind the returned future.
///
/// `block` may complete the promise later, from anywhere.
pub fn promise_on<T, F>(executor: &Executor, block: F) -> Future<T>
where
    T: Value,
    F: FnOnce(Promise<T>) + Send + 'static,
{
    let promise = Promise::labeled("future_on");
    let future = promise.future();
    let worker = promise.clone();
    if let Err(e) = executor.execute(move || block(worker)) {
        error!(error = %e, executor = ?executor, "future block refused");
        promise.fail(e);
    }
    future
}

/// Runs `block` on `executor` once `delay` has elapsed.
///
/// If the executor shuts down before then, the future fails with
/// [`ErrorKind::ExecutorShutdown`](crate::ErrorKind::ExecutorShutdown).
pub fn after<T, F>(executor: &Executor, delay: Duration, block: F) -> Future<T>
where
    T: Value,
    F: FnOnce() -> Fallible<T> + Send + 'static,
{
    let promise = Promise::labeled("after");
    let future = promise.future();
    let worker = promise.clone();
    let orphan = promise.clone();
    let scheduled = executor.schedule_after_or_else(
        delay,
        move || {
            worker.complete(fallible(block));
        },
        move |e| {
            orphan.fail(e);
        },
    );
    if let Err(e) = scheduled {
        error!(error = %e, executor = ?executor, "delayed block refused");
        promise.fail(e);
    }
    future
}
