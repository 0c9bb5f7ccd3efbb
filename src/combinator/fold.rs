//! Accumulating combinators.
//!
//! The accumulator of every operator here is only touched from a serial
//! lane, so the step function never runs concurrently with itself.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;

use parking_lot::Mutex;

use super::derive::{DeriveOptions, Downstream, Placement, Plan};
use super::derive_channel;
use crate::channel::Channel;
use crate::cx::{ExecutionContext, Scope};
use crate::executor::Executor;
use crate::future::Future;
use crate::source::EventSource;
use crate::tracing_compat::trace;
use crate::types::{fallible, Event, Fallible, Value};

/// Outcome of one step. `Err` hands the accumulator back untouched, which
/// happens when a contextual step finds its context gone.
type Folded<T> = Result<Fallible<T>, T>;

struct Accumulator<T, F> {
    acc: Option<T>,
    seen: bool,
    step: F,
}

impl<T, F> Accumulator<T, F> {
    fn new(initial: T, step: F) -> Self {
        Self {
            acc: Some(initial),
            seen: false,
            step,
        }
    }

    fn apply<U>(&mut self, value: U) -> Fallible<()>
    where
        F: FnMut(T, U) -> Folded<T>,
    {
        let Some(current) = self.acc.take() else {
            return Ok(());
        };
        let step = &mut self.step;
        match fallible(|| Ok(step(current, value))) {
            Ok(Ok(Ok(next))) => {
                self.acc = Some(next);
                self.seen = true;
                Ok(())
            }
            Ok(Err(skipped)) => {
                self.acc = Some(skipped);
                Ok(())
            }
            Ok(Ok(Err(error))) | Err(error) => Err(error),
        }
    }
}

fn reduce_into<U, S, T, F>(channel: &Channel<U, S>, plan: &Plan, initial: T, step: F) -> Future<T>
where
    U: Value,
    S: Value,
    T: Value,
    F: FnMut(T, U) -> Folded<T> + Send + 'static,
{
    let down = plan.open::<Infallible, T>(channel.label(), 0);
    let target = down.clone();
    let mut state = Accumulator::new(initial, step);
    plan.attach(channel, &down, move |event: Event<U, S>| match event {
        Event::Update(value) => {
            if let Err(error) = state.apply(value) {
                target.fail(error);
            }
        }
        Event::Completion(Ok(_)) => {
            if let Some(acc) = state.acc.take() {
                target.succeed(acc);
            }
        }
        Event::Completion(Err(error)) => {
            target.finish(Err(error));
        }
    });
    Future::from_core(down.into_core())
}

fn fold_into<U, S, T, F>(channel: &Channel<U, S>, plan: &Plan, initial: T, step: F) -> Channel<T, S>
where
    U: Value,
    S: Value,
    T: Value,
    F: FnMut(T, U) -> Folded<T> + Send + 'static,
{
    derive_channel(channel, plan, move |down: Downstream<T, S>| {
        let mut state = Accumulator::new(initial, step);
        move |event: Event<U, S>| match event {
            Event::Update(value) => {
                if let Err(error) = state.apply(value) {
                    down.fail(error);
                }
            }
            Event::Completion(Ok(value)) => {
                if state.seen {
                    if let Some(acc) = state.acc.take() {
                        down.update(acc);
                    }
                }
                down.succeed(value);
            }
            Event::Completion(Err(error)) => {
                down.finish(Err(error));
            }
        }
    })
}

struct AsyncState<U, S, T> {
    /// `None` while a step's future is in flight.
    acc: Option<T>,
    queue: VecDeque<U>,
    pumping: bool,
    done: Option<S>,
}

/// Drives `reduce_async`: one step future at a time, in update order.
struct AsyncFold<U, S, T, F> {
    down: Downstream<Infallible, T>,
    executor: Executor,
    scope: Option<Scope>,
    state: Mutex<AsyncState<U, S, T>>,
    step: Mutex<F>,
}

impl<U, S, T, F> AsyncFold<U, S, T, F>
where
    U: Value,
    S: Value,
    T: Value,
    F: FnMut(T, U) -> Result<Future<T>, T> + Send + 'static,
{
    fn new(down: Downstream<Infallible, T>, plan: &Plan, initial: T, step: F) -> Arc<Self> {
        Arc::new(Self {
            down,
            executor: plan.executor().clone(),
            scope: plan.scope().cloned(),
            state: Mutex::new(AsyncState {
                acc: Some(initial),
                queue: VecDeque::new(),
                pumping: false,
                done: None,
            }),
            step: Mutex::new(step),
        })
    }

    fn on_event(self: &Arc<Self>, event: Event<U, S>) {
        match event {
            Event::Update(value) => self.state.lock().queue.push_back(value),
            Event::Completion(Ok(value)) => self.state.lock().done = Some(value),
            Event::Completion(Err(error)) => {
                self.down.finish(Err(error));
                return;
            }
        }
        self.pump();
    }

    fn settle(self: &Arc<Self>, acc: T) {
        self.state.lock().acc = Some(acc);
        self.pump();
    }

    fn pump(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.pumping {
            return;
        }
        state.pumping = true;
        loop {
            if self.down.is_completed() {
                break;
            }
            let Some(current) = state.acc.take() else {
                break;
            };
            if let Some(value) = state.queue.pop_front() {
                drop(state);
                self.launch(current, value);
                state = self.state.lock();
                continue;
            }
            if state.done.take().is_some() {
                state.pumping = false;
                drop(state);
                self.down.succeed(current);
                return;
            }
            state.acc = Some(current);
            break;
        }
        state.pumping = false;
    }

    fn launch(self: &Arc<Self>, current: T, value: U) {
        let launched = {
            let mut step = self.step.lock();
            fallible(|| Ok((*step)(current, value)))
        };
        match launched {
            Ok(Ok(future)) => {
                let me = Arc::clone(self);
                let subscription =
                    future.subscribe_scoped(&self.executor, self.scope.as_ref(), move |event| {
                        if let Event::Completion(result) = event {
                            match result {
                                Ok(next) => me.settle(next),
                                Err(error) => {
                                    me.down.fail(error);
                                }
                            }
                        }
                    });
                self.down.retain(subscription);
            }
            Ok(Err(skipped)) => {
                trace!(label = %self.down.label(), "context gone; update skipped");
                self.settle(skipped);
            }
            Err(error) => {
                self.down.fail(error);
            }
        }
    }
}

fn reduce_async_into<U, S, T, F>(channel: &Channel<U, S>, plan: &Plan, initial: T, step: F) -> Future<T>
where
    U: Value,
    S: Value,
    T: Value,
    F: FnMut(T, U) -> Result<Future<T>, T> + Send + 'static,
{
    let down = plan.open::<Infallible, T>(channel.label(), 0);
    let driver = AsyncFold::new(down.clone(), plan, initial, step);
    plan.attach(channel, &down, move |event: Event<U, S>| driver.on_event(event));
    Future::from_core(down.into_core())
}

impl<U: Value, S: Value> Channel<U, S> {
    /// Folds every update into `initial`. The future succeeds with the final
    /// accumulator once the channel succeeds.
    ///
    /// # Example
    ///
    /// ```
    /// use eventsync::{BufferSize, EventSource, Executor, Producer};
    ///
    /// let producer = Producer::<u32, ()>::new(BufferSize::Fixed(4));
    /// producer.update_all([1, 2, 3]);
    /// producer.succeed(());
    /// let sum = producer
    ///     .channel()
    ///     .reduce(&Executor::immediate(), 0, |acc, n| Ok(acc + n));
    /// assert_eq!(sum.wait().ok(), Some(6));
    /// ```
    pub fn reduce<T, F>(&self, options: impl Into<DeriveOptions>, initial: T, mut f: F) -> Future<T>
    where
        T: Value,
        F: FnMut(T, U) -> Fallible<T> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "reduce", Placement::Serial);
        reduce_into(self, &plan, initial, move |acc, u| Ok(f(acc, u)))
    }

    /// Context-bound form of [`reduce`](Self::reduce).
    pub fn reduce_in<C, T, F>(
        &self,
        context: &Arc<C>,
        options: impl Into<DeriveOptions>,
        initial: T,
        mut f: F,
    ) -> Future<T>
    where
        C: ExecutionContext,
        T: Value,
        F: FnMut(&C, T, U) -> Fallible<T> + Send + 'static,
    {
        let (plan, context) = Plan::contextual(context, options.into(), "reduce", Placement::Serial);
        reduce_into(self, &plan, initial, move |acc, u| match context.resolve() {
            Some(ctx) => Ok(f(&ctx, acc, u)),
            None => Err(acc),
        })
    }

    /// Like [`reduce`](Self::reduce), but each step yields a future. The
    /// next update waits until the previous step's future succeeds.
    pub fn reduce_async<T, F>(&self, options: impl Into<DeriveOptions>, initial: T, mut f: F) -> Future<T>
    where
        T: Value,
        F: FnMut(T, U) -> Future<T> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "reduce_async", Placement::Serial);
        reduce_async_into(self, &plan, initial, move |acc, u| Ok(f(acc, u)))
    }

    /// Context-bound form of [`reduce_async`](Self::reduce_async).
    pub fn reduce_async_in<C, T, F>(
        &self,
        context: &Arc<C>,
        options: impl Into<DeriveOptions>,
        initial: T,
        mut f: F,
    ) -> Future<T>
    where
        C: ExecutionContext,
        T: Value,
        F: FnMut(&C, T, U) -> Future<T> + Send + 'static,
    {
        let (plan, context) =
            Plan::contextual(context, options.into(), "reduce_async", Placement::Serial);
        reduce_async_into(self, &plan, initial, move |acc, u| match context.resolve() {
            Some(ctx) => Ok(f(&ctx, acc, u)),
            None => Err(acc),
        })
    }

    /// Accumulates updates and, on success, emits the accumulator as a
    /// single update before forwarding the completion. Nothing is emitted
    /// if no update arrived.
    pub fn fold<T, F>(&self, options: impl Into<DeriveOptions>, initial: T, mut f: F) -> Channel<T, S>
    where
        T: Value,
        F: FnMut(T, U) -> Fallible<T> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "fold", Placement::Serial);
        fold_into(self, &plan, initial, move |acc, u| Ok(f(acc, u)))
    }

    /// Context-bound form of [`fold`](Self::fold).
    pub fn fold_in<C, T, F>(
        &self,
        context: &Arc<C>,
        options: impl Into<DeriveOptions>,
        initial: T,
        mut f: F,
    ) -> Channel<T, S>
    where
        C: ExecutionContext,
        T: Value,
        F: FnMut(&C, T, U) -> Fallible<T> + Send + 'static,
    {
        let (plan, context) = Plan::contextual(context, options.into(), "fold", Placement::Serial);
        fold_into(self, &plan, initial, move |acc, u| match context.resolve() {
            Some(ctx) => Ok(f(&ctx, acc, u)),
            None => Err(acc),
        })
    }
}
