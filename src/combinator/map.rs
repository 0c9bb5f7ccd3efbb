//! Per-event transforms.
//!
//! `map`, `filter` and `flat_map` share one update pipeline: a step turns
//! each upstream update into zero or one downstream update, and a step
//! failure fails the downstream. Completions pass through unchanged.

use std::sync::Arc;

use super::derive::{DeriveOptions, Downstream, Placement, Plan};
use super::derive_channel;
use crate::channel::Channel;
use crate::cx::ExecutionContext;
use crate::error::Error;
use crate::types::{fallible, Event, Fallible, Value};

/// `None` means the context is gone and the update is dropped.
type Step<U, V> = Box<dyn FnMut(U) -> Option<Fallible<Option<V>>> + Send>;

fn per_update<U, S, V>(channel: &Channel<U, S>, plan: &Plan, mut step: Step<U, V>) -> Channel<V, S>
where
    U: Value,
    S: Value,
    V: Value,
{
    derive_channel(channel, plan, move |down: Downstream<V, S>| {
        move |event: Event<U, S>| match event {
            Event::Update(value) => match fallible(|| step(value).transpose()) {
                Ok(Some(Some(out))) => {
                    down.update(out);
                }
                Ok(_) => {}
                Err(error) => {
                    down.fail(error);
                }
            },
            Event::Completion(result) => {
                down.finish(result);
            }
        }
    })
}

fn per_event<U, S, V, T, F>(channel: &Channel<U, S>, plan: &Plan, mut f: F) -> Channel<V, T>
where
    U: Value,
    S: Value,
    V: Value,
    T: Value,
    F: FnMut(Event<U, S>) -> Option<Event<V, T>> + Send + 'static,
{
    derive_channel(channel, plan, move |down: Downstream<V, T>| {
        move |event: Event<U, S>| {
            let terminal = event.is_completion();
            match fallible(|| Ok(f(event))) {
                Ok(Some(Event::Update(out))) => {
                    down.update(out);
                    if terminal {
                        down.fail(Error::internal("completion mapped to an update"));
                    }
                }
                Ok(Some(Event::Completion(result))) => {
                    if terminal {
                        down.finish(result);
                    } else {
                        down.complete(result);
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    down.fail(error);
                }
            }
        }
    })
}

fn on_completion<U, S, T, F>(channel: &Channel<U, S>, plan: &Plan, f: F) -> Channel<U, T>
where
    U: Value,
    S: Value,
    T: Value,
    F: FnOnce(Fallible<S>) -> Option<Fallible<T>> + Send + 'static,
{
    let mut f = Some(f);
    per_event(channel, plan, move |event| match event {
        Event::Update(value) => Some(Event::Update(value)),
        Event::Completion(result) => f.take().and_then(|f| f(result)).map(Event::Completion),
    })
}

impl<U: Value, S: Value> Channel<U, S> {
    /// Transforms every update. A failing `f` fails the derived channel.
    pub fn map<V, F>(&self, options: impl Into<DeriveOptions>, mut f: F) -> Channel<V, S>
    where
        V: Value,
        F: FnMut(U) -> Fallible<V> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "map", Placement::AsGiven);
        per_update(self, &plan, Box::new(move |u| Some(f(u).map(Some))))
    }

    /// Context-bound form of [`map`](Self::map).
    pub fn map_in<C, V, F>(&self, context: &Arc<C>, options: impl Into<DeriveOptions>, mut f: F) -> Channel<V, S>
    where
        C: ExecutionContext,
        V: Value,
        F: FnMut(&C, U) -> Fallible<V> + Send + 'static,
    {
        let (plan, context) = Plan::contextual(context, options.into(), "map", Placement::AsGiven);
        per_update(
            self,
            &plan,
            Box::new(move |u| context.resolve().map(|ctx| f(&ctx, u).map(Some))),
        )
    }

    /// Keeps the updates `predicate` accepts.
    pub fn filter<F>(&self, options: impl Into<DeriveOptions>, mut predicate: F) -> Self
    where
        F: FnMut(&U) -> Fallible<bool> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "filter", Placement::AsGiven);
        per_update(
            self,
            &plan,
            Box::new(move |u| Some(predicate(&u).map(|keep| keep.then_some(u)))),
        )
    }

    /// Context-bound form of [`filter`](Self::filter).
    pub fn filter_in<C, F>(&self, context: &Arc<C>, options: impl Into<DeriveOptions>, mut predicate: F) -> Self
    where
        C: ExecutionContext,
        F: FnMut(&C, &U) -> Fallible<bool> + Send + 'static,
    {
        let (plan, context) = Plan::contextual(context, options.into(), "filter", Placement::AsGiven);
        per_update(
            self,
            &plan,
            Box::new(move |u| {
                context
                    .resolve()
                    .map(|ctx| predicate(&ctx, &u).map(|keep| keep.then_some(u)))
            }),
        )
    }

    /// Turns each update into zero or one update. Runs on a serial lane
    /// unless a serial executor is supplied.
    pub fn flat_map<V, F>(&self, options: impl Into<DeriveOptions>, mut f: F) -> Channel<V, S>
    where
        V: Value,
        F: FnMut(U) -> Fallible<Option<V>> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "flat_map", Placement::Serial);
        per_update(self, &plan, Box::new(move |u| Some(f(u))))
    }

    /// Context-bound form of [`flat_map`](Self::flat_map).
    pub fn flat_map_in<C, V, F>(
        &self,
        context: &Arc<C>,
        options: impl Into<DeriveOptions>,
        mut f: F,
    ) -> Channel<V, S>
    where
        C: ExecutionContext,
        V: Value,
        F: FnMut(&C, U) -> Fallible<Option<V>> + Send + 'static,
    {
        let (plan, context) = Plan::contextual(context, options.into(), "flat_map", Placement::Serial);
        per_update(
            self,
            &plan,
            Box::new(move |u| context.resolve().map(|ctx| f(&ctx, u))),
        )
    }

    /// Transforms whole events, completion included.
    ///
    /// Turning an update into a completion ends the derived channel early.
    /// Turning the completion into an update delivers it and then fails the
    /// derived channel with [`ErrorKind::Internal`](crate::ErrorKind::Internal).
    pub fn map_event<V, T, F>(&self, options: impl Into<DeriveOptions>, mut f: F) -> Channel<V, T>
    where
        V: Value,
        T: Value,
        F: FnMut(Event<U, S>) -> Event<V, T> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "map_event", Placement::AsGiven);
        per_event(self, &plan, move |event| Some(f(event)))
    }

    /// Context-bound form of [`map_event`](Self::map_event).
    pub fn map_event_in<C, V, T, F>(
        &self,
        context: &Arc<C>,
        options: impl Into<DeriveOptions>,
        mut f: F,
    ) -> Channel<V, T>
    where
        C: ExecutionContext,
        V: Value,
        T: Value,
        F: FnMut(&C, Event<U, S>) -> Event<V, T> + Send + 'static,
    {
        let (plan, context) = Plan::contextual(context, options.into(), "map_event", Placement::AsGiven);
        per_event(self, &plan, move |event| context.resolve().map(|ctx| f(&ctx, event)))
    }

    /// Forwards updates and transforms the completion.
    pub fn map_completion<T, F>(&self, options: impl Into<DeriveOptions>, f: F) -> Channel<U, T>
    where
        T: Value,
        F: FnOnce(Fallible<S>) -> Fallible<T> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "map_completion", Placement::AsGiven);
        on_completion(self, &plan, move |result| Some(f(result)))
    }

    /// Context-bound form of [`map_completion`](Self::map_completion).
    pub fn map_completion_in<C, T, F>(
        &self,
        context: &Arc<C>,
        options: impl Into<DeriveOptions>,
        f: F,
    ) -> Channel<U, T>
    where
        C: ExecutionContext,
        T: Value,
        F: FnOnce(&C, Fallible<S>) -> Fallible<T> + Send + 'static,
    {
        let (plan, context) =
            Plan::contextual(context, options.into(), "map_completion", Placement::AsGiven);
        on_completion(self, &plan, move |result| {
            context.resolve().map(|ctx| f(&ctx, result))
        })
    }

    /// Forwards updates and failures, and transforms the success value.
    pub fn map_success<T, F>(&self, options: impl Into<DeriveOptions>, f: F) -> Channel<U, T>
    where
        T: Value,
        F: FnOnce(S) -> Fallible<T> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "map_success", Placement::AsGiven);
        on_completion(self, &plan, move |result| Some(result.and_then(f)))
    }

    /// Context-bound form of [`map_success`](Self::map_success).
    pub fn map_success_in<C, T, F>(
        &self,
        context: &Arc<C>,
        options: impl Into<DeriveOptions>,
        f: F,
    ) -> Channel<U, T>
    where
        C: ExecutionContext,
        T: Value,
        F: FnOnce(&C, S) -> Fallible<T> + Send + 'static,
    {
        let (plan, context) = Plan::contextual(context, options.into(), "map_success", Placement::AsGiven);
        on_completion(self, &plan, move |result| {
            context.resolve().map(|ctx| result.and_then(|s| f(&ctx, s)))
        })
    }
}

impl<V: Value, S: Value> Channel<Fallible<V>, S> {
    /// Unwraps fallible updates; the first failed update fails the derived
    /// channel. Runs on the immediate executor.
    #[must_use]
    pub fn unwrapped(&self) -> Channel<V, S> {
        let plan = Plan::new(DeriveOptions::new(), "unwrapped", Placement::AsGiven);
        per_update(self, &plan, Box::new(|u: Fallible<V>| Some(u.map(Some))))
    }
}
