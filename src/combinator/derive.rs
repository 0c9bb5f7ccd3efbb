//! Shared wiring for derived sources.
//!
//! Every combinator goes through the same steps:
//!
//! 1. Resolve a [`Plan`] from the caller's [`DeriveOptions`] (and, for the
//!    `*_in` variants, from the execution context).
//! 2. Open the downstream core. This hooks the cancellation token and the
//!    context teardown to a failing completion.
//! 3. Subscribe a handler to the upstream and hand the subscription to the
//!    downstream core, which detaches it once the downstream completes or is
//!    dropped.

use std::fmt;
use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::cx::{ContextRef, ExecutionContext, Scope};
use crate::error::Error;
use crate::executor::Executor;
use crate::source::{EventCore, EventSource, Subscription};
use crate::tracing_compat::{child_label, debug};
use crate::types::{BufferSize, CancelReason, Event, Fallible, Value};

/// Knobs shared by every combinator.
///
/// Anything that takes `impl Into<DeriveOptions>` also accepts an
/// `&Executor`, which is shorthand for `DeriveOptions::new().on(executor)`.
#[derive(Clone, Default, Debug)]
pub struct DeriveOptions {
    /// Where the combinator's handler runs. Defaults to the context executor
    /// for contextual variants and to [`Executor::immediate`] otherwise.
    pub executor: Option<Executor>,
    /// Fails the derived source with `Cancelled` when fired.
    pub cancellation: Option<CancellationToken>,
    /// Replay buffer of the derived channel. `Default` inherits the upstream's.
    pub buffer: BufferSize,
    /// Contextual variants only: divert a failed upstream completion into the
    /// context's [`ErrorSink`](crate::cx::ErrorSink) instead of propagating it.
    pub catch_into_sink: bool,
    /// Replaces the operator name in the derived source's trace label.
    pub label: Option<String>,
}

impl DeriveOptions {
    /// Options with every knob at its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the combinator's handler on `executor`.
    #[must_use]
    pub fn on(mut self, executor: &Executor) -> Self {
        self.executor = Some(executor.clone());
        self
    }

    /// Fails the derived source once `token` fires.
    #[must_use]
    pub fn cancel_on(mut self, token: &CancellationToken) -> Self {
        self.cancellation = Some(token.clone());
        self
    }

    /// Sets the derived channel's replay buffer.
    #[must_use]
    pub fn buffer(mut self, buffer: impl Into<BufferSize>) -> Self {
        self.buffer = buffer.into();
        self
    }

    /// Diverts upstream failures into the context's error sink.
    #[must_use]
    pub const fn catch_into_sink(mut self) -> Self {
        self.catch_into_sink = true;
        self
    }

    /// Overrides the operator name used in trace labels.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl From<&Executor> for DeriveOptions {
    fn from(executor: &Executor) -> Self {
        Self::new().on(executor)
    }
}

impl From<Executor> for DeriveOptions {
    fn from(executor: Executor) -> Self {
        Self {
            executor: Some(executor),
            ..Self::default()
        }
    }
}

/// Executor requirement of an operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Whatever the caller supplied.
    AsGiven,
    /// A serial lane; a concurrent executor gets wrapped in a fresh one.
    Serial,
}

/// Type-erased view of a [`ContextRef`].
pub(crate) trait Lifetime: Send + Sync {
    fn scope(&self) -> &Scope;
    fn on_teardown(&self, cleanup: Box<dyn FnOnce() + Send>);
    fn release(&self);
}

impl<C: ExecutionContext> Lifetime for ContextRef<C> {
    fn scope(&self) -> &Scope {
        Self::scope(self)
    }

    fn on_teardown(&self, cleanup: Box<dyn FnOnce() + Send>) {
        Self::on_teardown(self, cleanup);
    }

    fn release(&self) {
        Self::release(self);
    }
}

/// Returns true when the error was stored.
pub(crate) type Sink = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Resolved [`DeriveOptions`].
pub(crate) struct Plan {
    executor: Executor,
    cancellation: Option<CancellationToken>,
    buffer: BufferSize,
    op: String,
    lifetime: Option<Arc<dyn Lifetime>>,
    sink: Option<Sink>,
}

fn place(executor: Executor, placement: Placement) -> Executor {
    match placement {
        Placement::Serial if !executor.is_serial() => Executor::serial(&executor),
        _ => executor,
    }
}

impl Plan {
    pub(crate) fn new(options: DeriveOptions, op: &str, placement: Placement) -> Self {
        let op = options.label.unwrap_or_else(|| op.to_owned());
        Self {
            executor: place(options.executor.unwrap_or_default(), placement),
            cancellation: options.cancellation,
            buffer: options.buffer,
            op,
            lifetime: None,
            sink: None,
        }
    }

    /// Plan bound to `context`. The returned reference resolves the context
    /// inside handlers.
    pub(crate) fn contextual<C: ExecutionContext>(
        context: &Arc<C>,
        options: DeriveOptions,
        op: &str,
        placement: Placement,
    ) -> (Self, Arc<ContextRef<C>>) {
        let reference = Arc::new(ContextRef::new(context));
        let executor = options
            .executor
            .clone()
            .unwrap_or_else(|| context.executor());
        let sink: Option<Sink> = if options.catch_into_sink {
            let target = Arc::clone(&reference);
            Some(Arc::new(move |error: &Error| {
                target
                    .resolve()
                    .and_then(|ctx| {
                        ctx.error_sink().map(|sink| sink.store(error.clone()))
                    })
                    .is_some()
            }))
        } else {
            None
        };
        let lifetime: Arc<dyn Lifetime> = Arc::clone(&reference) as Arc<dyn Lifetime>;
        let plan = Self {
            executor: place(executor, placement),
            cancellation: options.cancellation,
            buffer: options.buffer,
            op: options.label.unwrap_or_else(|| op.to_owned()),
            lifetime: Some(lifetime),
            sink,
        };
        (plan, reference)
    }

    pub(crate) const fn executor(&self) -> &Executor {
        &self.executor
    }

    pub(crate) fn scope(&self) -> Option<&Scope> {
        self.lifetime.as_deref().map(Lifetime::scope)
    }

    /// Creates the downstream core and hooks its failure triggers.
    pub(crate) fn open<U: Value, S: Value>(&self, parent: &str, inherited: usize) -> Downstream<U, S> {
        let core = EventCore::new(
            self.buffer.resolve(inherited),
            child_label(parent, &self.op),
            Vec::new(),
        );
        debug!(label = %core.label(), executor = ?self.executor, "derived source opened");
        if let Some(token) = &self.cancellation {
            watch_token(&core, token);
        }
        if let Some(lifetime) = &self.lifetime {
            bind_lifetime(&core, lifetime);
        }
        Downstream {
            core,
            sink: self.sink.clone(),
        }
    }

    /// Subscribes `handler` to `upstream` under this plan and ties the
    /// subscription to `downstream`.
    pub(crate) fn attach<U, S, Src, H, U2, S2>(
        &self,
        upstream: &Src,
        downstream: &Downstream<U2, S2>,
        handler: H,
    ) -> Subscription
    where
        U: Value,
        S: Value,
        U2: Value,
        S2: Value,
        Src: EventSource<U, S>,
        H: FnMut(Event<U, S>) + Send + 'static,
    {
        let subscription = upstream.subscribe_scoped(&self.executor, self.scope(), handler);
        downstream.core.retain_upstream(subscription.clone());
        subscription
    }
}

fn watch_token<U: Value, S: Value>(core: &Arc<EventCore<U, S>>, token: &CancellationToken) {
    let target = Arc::downgrade(core);
    let listener = token.add_listener(move |reason: &CancelReason| {
        if let Some(core) = target.upgrade() {
            debug!(label = %core.label(), reason = %reason, "derived source cancelled");
            core.complete(Err(Error::cancelled(reason)));
        }
    });
    let token = token.clone();
    core.subscribe(
        &Executor::immediate(),
        None,
        Box::new(move |event: Event<U, S>| {
            if event.is_completion() {
                token.remove_listener(listener);
            }
        }),
    );
}

fn bind_lifetime<U: Value, S: Value>(core: &Arc<EventCore<U, S>>, lifetime: &Arc<dyn Lifetime>) {
    let target = Arc::downgrade(core);
    lifetime.on_teardown(Box::new(move || {
        if let Some(core) = target.upgrade() {
            debug!(label = %core.label(), "context gone; failing derived source");
            core.complete(Err(Error::context_dropped()));
        }
    }));
    let lifetime = Arc::clone(lifetime);
    core.subscribe(
        &Executor::immediate(),
        None,
        Box::new(move |event: Event<U, S>| {
            if event.is_completion() {
                lifetime.release();
            }
        }),
    );
}

/// Write side of a derived source, as seen from a combinator's handler.
pub(crate) struct Downstream<U, S> {
    core: Arc<EventCore<U, S>>,
    sink: Option<Sink>,
}

impl<U, S> Clone for Downstream<U, S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            sink: self.sink.clone(),
        }
    }
}

impl<U: Value, S: Value> Downstream<U, S> {
    pub(crate) fn update(&self, value: U) -> bool {
        self.core.update(value)
    }

    /// Fails the downstream. Transform errors always propagate.
    pub(crate) fn fail(&self, error: Error) -> bool {
        self.core.complete(Err(error))
    }

    pub(crate) fn succeed(&self, value: S) -> bool {
        self.core.complete(Ok(value))
    }

    /// Completes with the outcome of a transform; its failures always propagate.
    pub(crate) fn complete(&self, result: Fallible<S>) -> bool {
        self.core.complete(result)
    }

    /// Forwards an upstream completion, diverting a failure into the error
    /// sink when one is configured.
    pub(crate) fn finish(&self, result: Fallible<S>) -> bool {
        if let (Err(error), Some(sink)) = (&result, &self.sink) {
            if sink(error) {
                debug!(label = %self.core.label(), error = %error, "upstream failure diverted to error sink");
                return false;
            }
        }
        self.core.complete(result)
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.core.is_completed()
    }

    pub(crate) fn retain(&self, subscription: Subscription) {
        self.core.retain_upstream(subscription);
    }

    pub(crate) fn label(&self) -> &str {
        self.core.label()
    }

    pub(crate) fn into_core(self) -> Arc<EventCore<U, S>> {
        self.core
    }
}

impl<U, S> fmt::Debug for Downstream<U, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downstream")
            .field("sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

/// Subscribes `handler` through `context`: it runs on the context executor,
/// only while the context is alive, and is detached when the context's
/// release pool drains.
pub(crate) fn observe_in<C, U, S, Src, F>(source: &Src, context: &Arc<C>, mut handler: F) -> Subscription
where
    C: ExecutionContext,
    U: Value,
    S: Value,
    Src: EventSource<U, S>,
    F: FnMut(&C, Event<U, S>) + Send + 'static,
{
    let reference = Arc::new(ContextRef::new(context));
    let resolver = Arc::clone(&reference);
    let subscription = source.subscribe_scoped(
        &context.executor(),
        Some(reference.scope()),
        move |event: Event<U, S>| {
            let terminal = event.is_completion();
            if let Some(ctx) = resolver.resolve() {
                handler(&ctx, event);
            }
            if terminal {
                resolver.release();
            }
        },
    );
    let teardown = subscription.clone();
    reference.on_teardown(move || teardown.detach());
    subscription.on_detach(Arc::new(move || reference.release()))
}
