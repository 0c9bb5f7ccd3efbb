//! Producer and channel handles.

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::combinator::derive::observe_in;
use crate::cx::{ExecutionContext, Scope};
use crate::error::Error;
use crate::executor::Executor;
use crate::source::{EventCore, EventSource, Subscription};
use crate::tracing_compat::error;
use crate::types::{fallible, BufferSize, CancelReason, Event, Fallible, Value};

/// Replay capacity a producer gets for [`BufferSize::Default`].
pub const DEFAULT_BUFFER_SIZE: usize = 1;

/// Write side of a stream.
///
/// Clones share the same stream. Only the first completion has an effect;
/// later calls return `false` and log a warning.
pub struct Producer<U, S> {
    core: Arc<EventCore<U, S>>,
}

impl<U, S> Clone for Producer<U, S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<U: Value, S: Value> Default for Producer<U, S> {
    fn default() -> Self {
        Self::new(BufferSize::Default)
    }
}

impl<U: Value, S: Value> Producer<U, S> {
    /// Creates a producer with the given replay buffer.
    #[must_use]
    pub fn new(buffer: BufferSize) -> Self {
        Self::labeled(buffer, "producer")
    }

    /// Creates a producer whose log lines carry `label`.
    #[must_use]
    pub fn labeled(buffer: BufferSize, label: impl Into<String>) -> Self {
        Self::with_capacity(buffer.resolve(DEFAULT_BUFFER_SIZE), label, Vec::new())
    }

    /// Creates a producer whose buffer already holds `updates`.
    ///
    /// Only the last `capacity` of them are kept.
    #[must_use]
    pub fn with_buffered(buffer: BufferSize, updates: impl IntoIterator<Item = U>) -> Self {
        Self::with_capacity(
            buffer.resolve(DEFAULT_BUFFER_SIZE),
            "producer",
            updates.into_iter().collect(),
        )
    }

    pub(crate) fn with_capacity(capacity: usize, label: impl Into<String>, seed: Vec<U>) -> Self {
        Self {
            core: EventCore::new(capacity, label, seed),
        }
    }

    /// Emits one update. Returns false once the stream has completed.
    #[allow(clippy::must_use_candidate)]
    pub fn update(&self, value: U) -> bool {
        self.core.update(value)
    }

    /// Emits updates in order. Returns how many were accepted.
    pub fn update_all(&self, values: impl IntoIterator<Item = U>) -> usize {
        let mut accepted = 0;
        for value in values {
            if !self.core.update(value) {
                break;
            }
            accepted += 1;
        }
        accepted
    }

    /// Completes successfully.
    #[allow(clippy::must_use_candidate)]
    pub fn succeed(&self, value: S) -> bool {
        self.core.complete(Ok(value))
    }

    /// Completes with a failure.
    #[allow(clippy::must_use_candidate)]
    pub fn fail(&self, error: Error) -> bool {
        self.core.complete(Err(error))
    }

    /// Completes with `result`.
    #[allow(clippy::must_use_candidate)]
    pub fn complete(&self, result: Fallible<S>) -> bool {
        self.core.complete(result)
    }

    /// Completes with `result`, or fails with
    /// [`ErrorKind::AlreadyCompleted`](crate::ErrorKind::AlreadyCompleted)
    /// if the stream already ended.
    pub fn try_complete(&self, result: Fallible<S>) -> Fallible<()> {
        self.core.try_complete(result)
    }

    /// Fails the stream with [`ErrorKind::Cancelled`](crate::ErrorKind::Cancelled).
    #[allow(clippy::must_use_candidate)]
    pub fn cancel(&self) -> bool {
        self.cancel_with(&CancelReason::user("producer cancelled"))
    }

    /// Fails the stream with a cancellation carrying `reason`.
    #[allow(clippy::must_use_candidate)]
    pub fn cancel_with(&self, reason: &CancelReason) -> bool {
        self.core.complete(Err(Error::cancelled(reason)))
    }

    /// Read-only view of this stream.
    #[must_use]
    pub fn channel(&self) -> Channel<U, S> {
        Channel {
            core: Arc::clone(&self.core),
        }
    }

    /// Snapshot of the replay buffer, oldest first.
    #[must_use]
    pub fn buffered_updates(&self) -> Vec<U> {
        self.core.buffered()
    }

    /// Returns the completion if it has been set.
    #[must_use]
    pub fn completion(&self) -> Option<Fallible<S>> {
        self.core.completion()
    }

    /// Returns true once completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.core.is_completed()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }
}

impl<U, S> fmt::Debug for Producer<U, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("label", &self.core.label())
            .finish_non_exhaustive()
    }
}

/// Read-only view of a stream.
pub struct Channel<U, S> {
    core: Arc<EventCore<U, S>>,
}

impl<U, S> Clone for Channel<U, S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<U: Value, S: Value> Channel<U, S> {
    pub(crate) fn from_core(core: Arc<EventCore<U, S>>) -> Self {
        Self { core }
    }

    /// Calls `f` with every update on `executor`.
    pub fn on_update<F>(&self, executor: &Executor, mut f: F) -> Subscription
    where
        F: FnMut(U) + Send + 'static,
    {
        self.subscribe(executor, move |event| {
            if let Event::Update(value) = event {
                f(value);
            }
        })
    }

    /// Context-bound form of [`on_update`](Self::on_update).
    pub fn on_update_in<C, F>(&self, context: &Arc<C>, mut f: F) -> Subscription
    where
        C: ExecutionContext,
        F: FnMut(&C, U) + Send + 'static,
    {
        observe_in(self, context, move |ctx, event| {
            if let Event::Update(value) = event {
                f(ctx, value);
            }
        })
    }

    /// Calls `f` once with the completion on `executor`.
    pub fn on_completion<F>(&self, executor: &Executor, f: F) -> Subscription
    where
        F: FnOnce(Fallible<S>) + Send + 'static,
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

    /// Context-bound form of [`on_completion`](Self::on_completion).
    pub fn on_completion_in<C, F>(&self, context: &Arc<C>, f: F) -> Subscription
    where
        C: ExecutionContext,
        F: FnOnce(&C, Fallible<S>) + Send + 'static,
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

    /// Calls `f` with the success value, if the stream succeeds.
    pub fn on_success<F>(&self, executor: &Executor, f: F) -> Subscription
    where
        F: FnOnce(S) + Send + 'static,
    {
        self.on_completion(executor, move |result| {
            if let Ok(value) = result {
                f(value);
            }
        })
    }

    /// Calls `f` with the error, if the stream fails.
    pub fn on_failure<F>(&self, executor: &Executor, f: F) -> Subscription
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.on_completion(executor, move |result| {
            if let Err(error) = result {
                f(error);
            }
        })
    }

    /// Blocks until completion and returns every update seen since this call
    /// started (buffered ones included) along with the completion.
    ///
    /// Must not be called from one of the executors the stream's own
    /// producers run on.
    #[must_use]
    pub fn wait_for_all(&self) -> (Vec<U>, Fallible<S>) {
        self.core
            .wait_all(None)
            .unwrap_or_else(|error| (Vec::new(), Err(error)))
    }

    /// Like [`wait_for_all`](Self::wait_for_all), giving up after `timeout`.
    ///
    /// On expiry the completion is [`ErrorKind::Timeout`](crate::ErrorKind::Timeout)
    /// and no updates are returned.
    #[must_use]
    pub fn wait_for_all_timeout(&self, timeout: Duration) -> (Vec<U>, Fallible<S>) {
        self.core
            .wait_all(Some(timeout))
            .unwrap_or_else(|error| (Vec::new(), Err(error)))
    }

    /// Fails the stream with [`ErrorKind::Cancelled`](crate::ErrorKind::Cancelled).
    ///
    /// On a derived channel this also detaches it from its upstream, which
    /// keeps running.
    #[allow(clippy::must_use_candidate)]
    pub fn cancel(&self) -> bool {
        self.core
            .complete(Err(Error::cancelled(&CancelReason::user("channel cancelled"))))
    }

    /// Snapshot of the replay buffer, oldest first.
    #[must_use]
    pub fn buffered_updates(&self) -> Vec<U> {
        self.core.buffered()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }
}

impl<U: Value, S: Value> EventSource<U, S> for Channel<U, S> {
    fn subscribe_scoped<F>(&self, executor: &Executor, scope: Option<&Scope>, handler: F) -> Subscription
    where
        F: FnMut(Event<U, S>) + Send + 'static,
    {
        self.core.subscribe(executor, scope.cloned(), Box::new(handler))
    }

    fn completion(&self) -> Option<Fallible<S>> {
        self.core.completion()
    }

    fn label(&self) -> &str {
        self.core.label()
    }

    fn capacity(&self) -> usize {
        self.core.capacity()
    }

    fn wait(&self) -> Fallible<S> {
        self.core.wait_completion(None)
    }

    fn wait_timeout(&self, timeout: Duration) -> Fallible<S> {
        self.core.wait_completion(Some(timeout))
    }
}

impl<U, S> fmt::Debug for Channel<U, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("label", &self.core.label())
            .finish_non_exhaustive()
    }
}

/// Runs `block` on `executor` with a fresh producer and completes the stream
/// with whatever it returns.
///
/// A panic inside `block` fails the stream with
/// [`ErrorKind::Internal`](crate::ErrorKind::Internal). If `executor` refuses
/// the work the stream fails with its error.
pub fn producer_on<U, S, F>(executor: &Executor, buffer: BufferSize, block: F) -> Channel<U, S>
where
    U: Value,
    S: Value,
    F: FnOnce(&Producer<U, S>) -> Fallible<S> + Send + 'static,
{
    let producer = Producer::labeled(buffer, "producer_on");
    let channel = producer.channel();
    let worker = producer.clone();
    if let Err(e) = executor.execute(move || {
        let result = fallible(|| block(&worker));
        if !worker.is_completed() {
            worker.complete(result);
        }
    }) {
        error!(error = %e, executor = ?executor, "producer block refused");
        producer.fail(e);
    }
    channel
}
