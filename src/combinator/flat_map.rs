//! One-to-many transforms.
//!
//! `flat_map_iter` expands each update into an iterator's items.
//! `flat_map_source` turns each update into a future or channel and splices
//! their values into the derived channel: inner sources are drained one
//! after another in upstream order, and the derived channel completes once
//! the upstream and the last inner source have both completed. Any failure
//! propagates immediately.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::derive::{DeriveOptions, Downstream, Placement, Plan};
use super::derive_channel;
use crate::channel::Channel;
use crate::cx::{ExecutionContext, Scope};
use crate::executor::Executor;
use crate::future::Future;
use crate::source::{EventSource, Subscription};
use crate::tracing_compat::trace;
use crate::types::{fallible, Event, Fallible, Value};

/// A source whose values can be spliced into a flattened channel.
pub trait InnerSource<V: Value>: Send + 'static {
    /// Subscribes `handler` to this source viewed as a stream of `V` updates
    /// that ends with `Ok(())` or the source's failure.
    fn subscribe_flat<F>(&self, executor: &Executor, scope: Option<&Scope>, handler: F) -> Subscription
    where
        F: FnMut(Event<V, ()>) + Send + 'static;
}

/// A future contributes its success value as a single update.
impl<V: Value> InnerSource<V> for Future<V> {
    fn subscribe_flat<F>(&self, executor: &Executor, scope: Option<&Scope>, mut handler: F) -> Subscription
    where
        F: FnMut(Event<V, ()>) + Send + 'static,
    {
        self.subscribe_scoped(executor, scope, move |event| {
            if let Event::Completion(result) = event {
                match result {
                    Ok(value) => {
                        handler(Event::Update(value));
                        handler(Event::success(()));
                    }
                    Err(error) => handler(Event::failure(error)),
                }
            }
        })
    }
}

/// A channel contributes its updates; its success value is dropped.
impl<V: Value, S: Value> InnerSource<V> for Channel<V, S> {
    fn subscribe_flat<F>(&self, executor: &Executor, scope: Option<&Scope>, mut handler: F) -> Subscription
    where
        F: FnMut(Event<V, ()>) + Send + 'static,
    {
        self.subscribe_scoped(executor, scope, move |event| match event {
            Event::Update(value) => handler(Event::Update(value)),
            Event::Completion(result) => handler(Event::Completion(result.map(|_| ()))),
        })
    }
}

struct ConcatState<I, S> {
    queue: VecDeque<I>,
    active: bool,
    pumping: bool,
    upstream_done: Option<Fallible<S>>,
}

/// Drains inner sources one at a time, in arrival order.
struct Concat<I, V, S> {
    down: Downstream<V, S>,
    executor: Executor,
    scope: Option<Scope>,
    state: Mutex<ConcatState<I, S>>,
}

impl<I, V, S> Concat<I, V, S>
where
    I: InnerSource<V>,
    V: Value,
    S: Value,
{
    fn new(down: Downstream<V, S>, plan: &Plan) -> Arc<Self> {
        Arc::new(Self {
            down,
            executor: plan.executor().clone(),
            scope: plan.scope().cloned(),
            state: Mutex::new(ConcatState {
                queue: VecDeque::new(),
                active: false,
                pumping: false,
                upstream_done: None,
            }),
        })
    }

    fn push(self: &Arc<Self>, inner: I) {
        self.state.lock().queue.push_back(inner);
        self.pump();
    }

    fn upstream_completed(self: &Arc<Self>, result: Fallible<S>) {
        match result {
            Err(error) => {
                self.down.finish(Err(error));
            }
            Ok(value) => {
                self.state.lock().upstream_done = Some(Ok(value));
                self.pump();
            }
        }
    }

    fn inner_completed(self: &Arc<Self>, result: Fallible<()>) {
        if let Err(error) = result {
            self.down.fail(error);
            return;
        }
        self.state.lock().active = false;
        self.pump();
    }

    /// Starts the next inner source when idle. Re-entrant calls (an inner
    /// source completing synchronously) fall through to the running loop.
    fn pump(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.pumping {
            return;
        }
        state.pumping = true;
        loop {
            if state.active || self.down.is_completed() {
                break;
            }
            if let Some(inner) = state.queue.pop_front() {
                state.active = true;
                drop(state);
                self.start(&inner);
                state = self.state.lock();
                continue;
            }
            if let Some(done) = state.upstream_done.take() {
                state.pumping = false;
                drop(state);
                trace!(label = %self.down.label(), "upstream and inner sources drained");
                self.down.finish(done);
                return;
            }
            break;
        }
        state.pumping = false;
    }

    fn start(self: &Arc<Self>, inner: &I) {
        let me = Arc::clone(self);
        let subscription = inner.subscribe_flat(&self.executor, self.scope.as_ref(), move |event| match event {
            Event::Update(value) => {
                me.down.update(value);
            }
            Event::Completion(result) => me.inner_completed(result),
        });
        self.down.retain(subscription);
    }
}

fn concat<U, S, V, I, F>(channel: &Channel<U, S>, plan: &Plan, mut step: F) -> Channel<V, S>
where
    U: Value,
    S: Value,
    V: Value,
    I: InnerSource<V>,
    F: FnMut(U) -> Option<Fallible<I>> + Send + 'static,
{
    derive_channel(channel, plan, |down: Downstream<V, S>| {
        let concat = Concat::<I, V, S>::new(down.clone(), plan);
        move |event: Event<U, S>| match event {
            Event::Update(value) => match fallible(|| step(value).transpose()) {
                Ok(Some(inner)) => concat.push(inner),
                Ok(None) => {}
                Err(error) => {
                    down.fail(error);
                }
            },
            Event::Completion(result) => concat.upstream_completed(result),
        }
    })
}

fn expand<U, S, V, I, F>(channel: &Channel<U, S>, plan: &Plan, mut step: F) -> Channel<V, S>
where
    U: Value,
    S: Value,
    V: Value,
    I: IntoIterator<Item = V>,
    F: FnMut(U) -> Option<Fallible<I>> + Send + 'static,
{
    derive_channel(channel, plan, move |down: Downstream<V, S>| {
        move |event: Event<U, S>| match event {
            Event::Update(value) => {
                let items = fallible(|| {
                    step(value)
                        .transpose()
                        .map(|items| items.map(|it| it.into_iter().collect::<Vec<V>>()))
                });
                match items {
                    Ok(Some(items)) => {
                        for item in items {
                            if !down.update(item) {
                                break;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        down.fail(error);
                    }
                }
            }
            Event::Completion(result) => {
                down.finish(result);
            }
        }
    })
}

impl<U: Value, S: Value> Channel<U, S> {
    /// Emits every item `f` returns for each update, in order.
    pub fn flat_map_iter<V, I, F>(&self, options: impl Into<DeriveOptions>, mut f: F) -> Channel<V, S>
    where
        V: Value,
        I: IntoIterator<Item = V>,
        F: FnMut(U) -> Fallible<I> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "flat_map_iter", Placement::Serial);
        expand(self, &plan, move |u| Some(f(u)))
    }

    /// Context-bound form of [`flat_map_iter`](Self::flat_map_iter).
    pub fn flat_map_iter_in<C, V, I, F>(
        &self,
        context: &Arc<C>,
        options: impl Into<DeriveOptions>,
        mut f: F,
    ) -> Channel<V, S>
    where
        C: ExecutionContext,
        V: Value,
        I: IntoIterator<Item = V>,
        F: FnMut(&C, U) -> Fallible<I> + Send + 'static,
    {
        let (plan, context) =
            Plan::contextual(context, options.into(), "flat_map_iter", Placement::Serial);
        expand(self, &plan, move |u| context.resolve().map(|ctx| f(&ctx, u)))
    }

    /// Splices the values of the future or channel `f` returns for each
    /// update into the derived channel.
    pub fn flat_map_source<V, I, F>(&self, options: impl Into<DeriveOptions>, mut f: F) -> Channel<V, S>
    where
        V: Value,
        I: InnerSource<V>,
        F: FnMut(U) -> Fallible<I> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "flat_map_source", Placement::Serial);
        concat(self, &plan, move |u| Some(f(u)))
    }

    /// Context-bound form of [`flat_map_source`](Self::flat_map_source).
    pub fn flat_map_source_in<C, V, I, F>(
        &self,
        context: &Arc<C>,
        options: impl Into<DeriveOptions>,
        mut f: F,
    ) -> Channel<V, S>
    where
        C: ExecutionContext,
        V: Value,
        I: InnerSource<V>,
        F: FnMut(&C, U) -> Fallible<I> + Send + 'static,
    {
        let (plan, context) =
            Plan::contextual(context, options.into(), "flat_map_source", Placement::Serial);
        concat(self, &plan, move |u| context.resolve().map(|ctx| f(&ctx, u)))
    }
}
