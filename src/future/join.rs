//! Combining several futures.
//!
//! The first failure observed fails the combined future. Later successes are
//! ignored and sibling futures keep running.

use std::convert::Infallible;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Future;
use crate::combinator::derive::{DeriveOptions, Downstream, Placement, Plan};
use crate::executor::Executor;
use crate::source::EventSource;
use crate::tracing_compat::trace;
use crate::types::{Event, Fallible, Value};

struct Slots<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

/// Feeds the completion of `future` into slot `index`.
fn collect_into<T: Value, R: Value>(
    future: &Future<T>,
    index: usize,
    slots: &Arc<Mutex<Slots<T>>>,
    down: &Downstream<Infallible, R>,
    finish: fn(Vec<Option<T>>) -> R,
) {
    let slots = Arc::clone(slots);
    let target = down.clone();
    let subscription = future.subscribe(&Executor::immediate(), move |event: Event<Infallible, T>| {
        let Event::Completion(result) = event else {
            return;
        };
        match result {
            Ok(value) => {
                let ready = {
                    let mut slots = slots.lock();
                    slots.values[index] = Some(value);
                    slots.remaining -= 1;
                    if slots.remaining == 0 {
                        Some(std::mem::take(&mut slots.values))
                    } else {
                        None
                    }
                };
                if let Some(values) = ready {
                    target.succeed(finish(values));
                }
            }
            Err(error) => {
                trace!(label = %target.label(), index, "member failed");
                target.fail(error);
            }
        }
    });
    down.retain(subscription);
}

impl<T: Value> Future<T> {
    /// Succeeds with both values once both futures succeed.
    pub fn zip<B: Value>(&self, other: &Future<B>) -> Future<(T, B)> {
        let plan = Plan::new(DeriveOptions::new(), "zip", Placement::AsGiven);
        let down = plan.open::<Infallible, (T, B)>(self.label(), 0);
        let left = Arc::new(Mutex::new((None::<T>, None::<B>)));

        let (state, target) = (Arc::clone(&left), down.clone());
        let first = self.subscribe(&Executor::immediate(), move |event: Event<Infallible, T>| {
            if let Event::Completion(result) = event {
                match result {
                    Ok(a) => {
                        let pair = {
                            let mut state = state.lock();
                            state.0 = Some(a);
                            take_pair(&mut state)
                        };
                        if let Some(pair) = pair {
                            target.succeed(pair);
                        }
                    }
                    Err(error) => {
                        target.fail(error);
                    }
                }
            }
        });
        down.retain(first);

        let (state, target) = (left, down.clone());
        let second = other.subscribe(&Executor::immediate(), move |event: Event<Infallible, B>| {
            if let Event::Completion(result) = event {
                match result {
                    Ok(b) => {
                        let pair = {
                            let mut state = state.lock();
                            state.1 = Some(b);
                            take_pair(&mut state)
                        };
                        if let Some(pair) = pair {
                            target.succeed(pair);
                        }
                    }
                    Err(error) => {
                        target.fail(error);
                    }
                }
            }
        });
        down.retain(second);
        Future::from_core(down.into_core())
    }
}

fn take_pair<A, B>(state: &mut (Option<A>, Option<B>)) -> Option<(A, B)> {
    if state.0.is_some() && state.1.is_some() {
        state.0.take().zip(state.1.take())
    } else {
        None
    }
}

/// Succeeds with every value, in input order, once all futures succeed.
pub fn join_all<T, I>(futures: I) -> Future<Vec<T>>
where
    T: Value,
    I: IntoIterator<Item = Future<T>>,
{
    let futures: Vec<Future<T>> = futures.into_iter().collect();
    if futures.is_empty() {
        return Future::succeeded(Vec::new());
    }
    let plan = Plan::new(DeriveOptions::new(), "join_all", Placement::AsGiven);
    let down = plan.open::<Infallible, Vec<T>>("", 0);
    let slots = Arc::new(Mutex::new(Slots {
        values: std::iter::repeat_with(|| None).take(futures.len()).collect(),
        remaining: futures.len(),
    }));
    for (index, future) in futures.iter().enumerate() {
        collect_into(future, index, &slots, &down, |values| {
            values.into_iter().flatten().collect()
        });
    }
    Future::from_core(down.into_core())
}

/// Folds the values of `futures`, in input order, once all of them succeed.
///
/// `f` runs on the executor named by `options`; its failure fails the result.
pub fn reduce<T, A, I, F>(futures: I, options: impl Into<DeriveOptions>, initial: A, mut f: F) -> Future<A>
where
    T: Value,
    A: Value,
    I: IntoIterator<Item = Future<T>>,
    F: FnMut(A, T) -> Fallible<A> + Send + 'static,
{
    join_all(futures).map(options, move |values| {
        values.into_iter().try_fold(initial, &mut f)
    })
}
