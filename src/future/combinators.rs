//! Transformations of a single future.
//!
//! Each combinator derives a new future whose handler runs on the executor
//! named by its [`DeriveOptions`]. Transforms run under
//! [`fallible`](crate::types::fallible()), so a panic becomes an
//! [`ErrorKind::Internal`](crate::ErrorKind::Internal) failure.

use std::convert::Infallible;
use std::sync::Arc;

use super::Future;
use crate::combinator::derive::{DeriveOptions, Downstream, Placement, Plan};
use crate::cx::ExecutionContext;
use crate::error::Error;
use crate::executor::Executor;
use crate::source::EventSource;
use crate::types::{fallible, Event, Fallible, Value};

/// Wires a completion handler from `future` into a fresh derived future.
fn derive_future<T, V, H>(future: &Future<T>, plan: &Plan, make: impl FnOnce(Downstream<Infallible, V>) -> H) -> Future<V>
where
    T: Value,
    V: Value,
    H: FnMut(Fallible<T>) + Send + 'static,
{
    let downstream = plan.open::<Infallible, V>(future.label(), 0);
    let mut handler = make(downstream.clone());
    plan.attach(future, &downstream, move |event: Event<Infallible, T>| {
        if let Event::Completion(result) = event {
            handler(result);
        }
    });
    Future::from_core(downstream.into_core())
}

/// Runs a one-shot transform inside a reusable handler.
fn once<A, F: FnOnce(A)>(f: F) -> impl FnMut(A) {
    let mut f = Some(f);
    move |a| {
        if let Some(f) = f.take() {
            f(a);
        }
    }
}

impl<T: Value> Future<T> {
    /// Transforms the success value. A failure of `f` fails the derived future.
    pub fn map<V, F>(&self, options: impl Into<DeriveOptions>, f: F) -> Future<V>
    where
        V: Value,
        F: FnOnce(T) -> Fallible<V> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "map", Placement::AsGiven);
        derive_future(self, &plan, |down| {
            once(move |result: Fallible<T>| match result {
                Ok(value) => {
                    down.complete(fallible(|| f(value)));
                }
                Err(error) => {
                    down.finish(Err(error));
                }
            })
        })
    }

    /// Context-bound form of [`map`](Self::map).
    pub fn map_in<C, V, F>(&self, context: &Arc<C>, options: impl Into<DeriveOptions>, f: F) -> Future<V>
    where
        C: ExecutionContext,
        V: Value,
        F: FnOnce(&C, T) -> Fallible<V> + Send + 'static,
    {
        let (plan, context) = Plan::contextual(context, options.into(), "map", Placement::AsGiven);
        derive_future(self, &plan, |down| {
            once(move |result: Fallible<T>| {
                let Some(ctx) = context.resolve() else {
                    return;
                };
                match result {
                    Ok(value) => {
                        down.complete(fallible(|| f(&ctx, value)));
                    }
                    Err(error) => {
                        down.finish(Err(error));
                    }
                }
            })
        })
    }

    /// Chains a second asynchronous step on the success value.
    pub fn flat_map<V, F>(&self, options: impl Into<DeriveOptions>, f: F) -> Future<V>
    where
        V: Value,
        F: FnOnce(T) -> Future<V> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "flat_map", Placement::AsGiven);
        let executor = plan.executor().clone();
        derive_future(self, &plan, |down| {
            once(move |result: Fallible<T>| match result {
                Ok(value) => match fallible(|| Ok(f(value))) {
                    Ok(inner) => follow(&inner, &down, &executor),
                    Err(error) => {
                        down.fail(error);
                    }
                },
                Err(error) => {
                    down.finish(Err(error));
                }
            })
        })
    }

    /// Context-bound form of [`flat_map`](Self::flat_map).
    pub fn flat_map_in<C, V, F>(&self, context: &Arc<C>, options: impl Into<DeriveOptions>, f: F) -> Future<V>
    where
        C: ExecutionContext,
        V: Value,
        F: FnOnce(&C, T) -> Future<V> + Send + 'static,
    {
        let (plan, context) = Plan::contextual(context, options.into(), "flat_map", Placement::AsGiven);
        let executor = plan.executor().clone();
        derive_future(self, &plan, |down| {
            once(move |result: Fallible<T>| {
                let Some(ctx) = context.resolve() else {
                    return;
                };
                match result {
                    Ok(value) => match fallible(|| Ok(f(&ctx, value))) {
                        Ok(inner) => follow(&inner, &down, &executor),
                        Err(error) => {
                            down.fail(error);
                        }
                    },
                    Err(error) => {
                        down.finish(Err(error));
                    }
                }
            })
        })
    }

    /// Transforms the whole result, success or failure.
    pub fn map_completion<V, F>(&self, options: impl Into<DeriveOptions>, f: F) -> Future<V>
    where
        V: Value,
        F: FnOnce(Fallible<T>) -> Fallible<V> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "map_completion", Placement::AsGiven);
        derive_future(self, &plan, |down| {
            once(move |result: Fallible<T>| {
                down.complete(fallible(|| f(result)));
            })
        })
    }

    /// Context-bound form of [`map_completion`](Self::map_completion).
    pub fn map_completion_in<C, V, F>(
        &self,
        context: &Arc<C>,
        options: impl Into<DeriveOptions>,
        f: F,
    ) -> Future<V>
    where
        C: ExecutionContext,
        V: Value,
        F: FnOnce(&C, Fallible<T>) -> Fallible<V> + Send + 'static,
    {
        let (plan, context) =
            Plan::contextual(context, options.into(), "map_completion", Placement::AsGiven);
        derive_future(self, &plan, |down| {
            once(move |result: Fallible<T>| {
                if let Some(ctx) = context.resolve() {
                    down.complete(fallible(|| f(&ctx, result)));
                }
            })
        })
    }

    /// Replaces a failure with whatever `f` returns.
    pub fn recover<F>(&self, options: impl Into<DeriveOptions>, f: F) -> Self
    where
        F: FnOnce(Error) -> Fallible<T> + Send + 'static,
    {
        let plan = Plan::new(options.into(), "recover", Placement::AsGiven);
        derive_future(self, &plan, |down| {
            once(move |result: Fallible<T>| {
                down.complete(result.or_else(|error| fallible(|| f(error))));
            })
        })
    }

    /// Context-bound form of [`recover`](Self::recover).
    pub fn recover_in<C, F>(&self, context: &Arc<C>, options: impl Into<DeriveOptions>, f: F) -> Self
    where
        C: ExecutionContext,
        F: FnOnce(&C, Error) -> Fallible<T> + Send + 'static,
    {
        let (plan, context) = Plan::contextual(context, options.into(), "recover", Placement::AsGiven);
        derive_future(self, &plan, |down| {
            once(move |result: Fallible<T>| {
                if let Some(ctx) = context.resolve() {
                    down.complete(result.or_else(|error| fallible(|| f(&ctx, error))));
                }
            })
        })
    }
}

/// Completes `down` with `inner` once it resolves.
fn follow<V: Value>(inner: &Future<V>, down: &Downstream<Infallible, V>, executor: &Executor) {
    let target = down.clone();
    let subscription = inner.subscribe(executor, move |event: Event<Infallible, V>| {
        if let Event::Completion(result) = event {
            target.finish(result);
        }
    });
    down.retain(subscription);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::error::ErrorKind;
    use crate::executor::{PoolOptions, ThreadPool};
    use crate::future::Promise;
    use crate::test_utils::{init_test_logging, TestContext};
    use crate::{test_complete, test_phase};
    use std::time::Duration;

    #[test]
    fn map_chain_on_pool() {
        init_test_logging();
        test_phase!("map_chain_on_pool");
        let pool = ThreadPool::new(PoolOptions::default());
        let exec = pool.executor();
        let promise = Promise::<u32>::new();
        let mapped = promise
            .future()
            .map(&exec, |v| Ok(v + 1))
            .map(&exec, |v| Ok(v.to_string()));
        promise.succeed(41);
        assert_eq!(mapped.wait().ok().as_deref(), Some("42"));
        test_complete!("map_chain_on_pool");
    }

    #[test]
    fn map_error_fails_derived() {
        let mapped = Future::succeeded(1_u32).map(&Executor::immediate(), |_| -> Fallible<u32> {
            Err(Error::msg("bad"))
        });
        assert_eq!(mapped.wait().expect_err("failed").message(), Some("bad"));
    }

    #[test]
    fn map_panic_becomes_internal() {
        let mapped = Future::succeeded(1_u32).map(&Executor::immediate(), |_| -> Fallible<u32> {
            panic!("transform exploded")
        });
        assert_eq!(mapped.wait().expect_err("panicked").kind(), ErrorKind::Internal);
    }

    #[test]
    fn failure_skips_map() {
        let mapped = Future::<u32>::failed(Error::msg("up")).map(&Executor::immediate(), |v| Ok(v * 2));
        assert_eq!(mapped.wait().expect_err("failed").message(), Some("up"));
    }

    #[test]
    fn flat_map_follows_inner() {
        let inner = Promise::<u32>::new();
        let handle = inner.clone();
        let chained = Future::succeeded(2_u32).flat_map(&Executor::immediate(), move |v| {
            handle.future().map(&Executor::immediate(), move |w| Ok(v * w))
        });
        assert!(chained.completion().is_none());
        inner.succeed(21);
        assert_eq!(chained.wait().ok(), Some(42));
    }

    #[test]
    fn recover_replaces_failure() {
        let recovered = Future::<u32>::failed(Error::msg("x")).recover(&Executor::immediate(), |_| Ok(0));
        assert_eq!(recovered.wait().ok(), Some(0));
        let untouched = Future::succeeded(3_u32).recover(&Executor::immediate(), |_| Ok(0));
        assert_eq!(untouched.wait().ok(), Some(3));
    }

    #[test]
    fn map_completion_sees_failure() {
        let described = Future::<u32>::failed(Error::new(ErrorKind::Timeout))
            .map_completion(&Executor::immediate(), |r| Ok(r.is_err()));
        assert_eq!(described.wait().ok(), Some(true));
    }

    #[test]
    fn cancellation_fails_pending_map() {
        let token = CancellationToken::new();
        let promise = Promise::<u32>::new();
        let mapped = promise
            .future()
            .map(DeriveOptions::new().cancel_on(&token), |v| Ok(v + 1));
        token.cancel();
        promise.succeed(1);
        assert_eq!(mapped.wait().expect_err("cancelled").kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn map_in_fails_on_teardown() {
        let ctx = TestContext::new();
        let promise = Promise::<u32>::new();
        let mapped = promise
            .future()
            .map_in(&ctx, DeriveOptions::new(), |_, v| Ok(v + 1));
        ctx.teardown();
        promise.succeed(1);
        let err = mapped
            .wait_timeout(Duration::from_secs(1))
            .expect_err("context dropped");
        assert_eq!(err.kind(), ErrorKind::ContextDropped);
    }

    #[test]
    fn recover_in_uses_context() {
        let ctx = TestContext::new();
        let recovered = Future::<u32>::failed(Error::msg("x"))
            .recover_in(&ctx, DeriveOptions::new(), |ctx, _| Ok(ctx.id()));
        assert_eq!(recovered.wait().ok(), Some(ctx.id()));
    }
}
