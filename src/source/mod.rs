//! Event sources: the machinery shared by futures and channels.
//!
//! - [`EventSource`]: the capability trait both [`Future`] and [`Channel`] implement
//! - [`Source`]: a value that is either one
//! - [`Subscription`]: the handle returned by every subscribe call

pub(crate) mod core;
mod subscriber;

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::channel::Channel;
use crate::cx::Scope;
use crate::executor::Executor;
use crate::future::Future;
use crate::types::{Event, Fallible, Value};

pub(crate) use self::core::{Detach, EventCore};
use self::subscriber::Control;

/// Handle to one registered handler.
///
/// Dropping the handle does not unsubscribe; call [`detach`](Self::detach).
/// The handle does not keep the handler alive: once the source has let go of
/// it the subscription reports itself detached.
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    control: Weak<dyn Control>,
    source: Weak<dyn Detach>,
    release: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(id: u64, control: Weak<dyn Control>, source: Weak<dyn Detach>) -> Self {
        Self {
            id,
            control,
            source,
            release: None,
        }
    }

    /// Runs `release` on every [`detach`](Self::detach), after the handler is
    /// removed. Used to withdraw context teardown registrations.
    pub(crate) fn on_detach(mut self, release: Arc<dyn Fn() + Send + Sync>) -> Self {
        self.release = Some(release);
        self
    }

    /// Identifier of this subscription within its source.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Stops delivery and removes the handler from its source.
    ///
    /// Events already queued for the handler are discarded. Idempotent.
    pub fn detach(&self) {
        if let Some(control) = self.control.upgrade() {
            control.close();
        }
        if let Some(source) = self.source.upgrade() {
            source.detach(self.id);
        }
        if let Some(release) = &self.release {
            release();
        }
    }

    /// Returns true once detached, or once the terminal event was delivered.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.control.upgrade().map_or(true, |control| control.is_closed())
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("detached", &self.is_detached())
            .finish()
    }
}

/// Read side shared by futures and channels.
pub trait EventSource<U: Value, S: Value>: Clone + Send + Sync + 'static {
    /// Registers `handler` to receive events on `executor`.
    ///
    /// A late subscriber first receives the replay buffer, then live events.
    /// Subscribing to a completed source replays the buffer and the stored
    /// completion.
    fn subscribe<F>(&self, executor: &Executor, handler: F) -> Subscription
    where
        F: FnMut(Event<U, S>) + Send + 'static,
    {
        self.subscribe_scoped(executor, None, handler)
    }

    /// Like [`subscribe`](Self::subscribe), but events that arrive after
    /// `scope` has died are dropped without invoking `handler`.
    fn subscribe_scoped<F>(&self, executor: &Executor, scope: Option<&Scope>, handler: F) -> Subscription
    where
        F: FnMut(Event<U, S>) + Send + 'static;

    /// Returns the completion if it has been set.
    fn completion(&self) -> Option<Fallible<S>>;

    /// Returns true once completed.
    fn is_completed(&self) -> bool {
        self.completion().is_some()
    }

    /// Trace label used in log lines.
    fn label(&self) -> &str;

    /// Replay capacity; what derived channels inherit for `BufferSize::Default`.
    fn capacity(&self) -> usize;

    /// Blocks the calling thread until completion.
    fn wait(&self) -> Fallible<S>;

    /// Blocks until completion or until `timeout` elapses.
    ///
    /// Returns [`ErrorKind::Timeout`](crate::ErrorKind::Timeout) on expiry.
    fn wait_timeout(&self, timeout: Duration) -> Fallible<S>;
}

/// Either a future or a channel.
#[derive(Clone)]
pub enum Source<U, S> {
    /// A single-shot source.
    Future(Future<S>),
    /// A multi-update source.
    Channel(Channel<U, S>),
}

impl<U: Value, S: Value> Source<U, S> {
    /// Subscribes to whichever source this is. A future contributes no updates.
    pub fn subscribe<F>(&self, executor: &Executor, handler: F) -> Subscription
    where
        F: FnMut(Event<U, S>) + Send + 'static,
    {
        self.subscribe_scoped(executor, None, handler)
    }

    /// Scoped form of [`subscribe`](Self::subscribe).
    pub fn subscribe_scoped<F>(
        &self,
        executor: &Executor,
        scope: Option<&Scope>,
        mut handler: F,
    ) -> Subscription
    where
        F: FnMut(Event<U, S>) + Send + 'static,
    {
        match self {
            Self::Future(future) => future.subscribe_scoped(executor, scope, move |event| {
                if let Event::Completion(result) = event {
                    handler(Event::Completion(result));
                }
            }),
            Self::Channel(channel) => channel.subscribe_scoped(executor, scope, handler),
        }
    }

    /// Returns true once completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completion().is_some()
    }

    /// Returns the completion if it has been set.
    #[must_use]
    pub fn completion(&self) -> Option<Fallible<S>> {
        match self {
            Self::Future(future) => future.completion(),
            Self::Channel(channel) => channel.completion(),
        }
    }

    /// Trace label of the underlying source.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Future(future) => future.label(),
            Self::Channel(channel) => channel.label(),
        }
    }

    /// Blocks until completion.
    pub fn wait(&self) -> Fallible<S> {
        match self {
            Self::Future(future) => future.wait(),
            Self::Channel(channel) => channel.wait(),
        }
    }
}

impl<U: Value, S: Value> From<Future<S>> for Source<U, S> {
    fn from(future: Future<S>) -> Self {
        Self::Future(future)
    }
}

impl<U: Value, S: Value> From<Channel<U, S>> for Source<U, S> {
    fn from(channel: Channel<U, S>) -> Self {
        Self::Channel(channel)
    }
}

impl<U, S> fmt::Debug for Source<U, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Future(_) => f.write_str("Source::Future"),
            Self::Channel(_) => f.write_str("Source::Channel"),
        }
    }
}
