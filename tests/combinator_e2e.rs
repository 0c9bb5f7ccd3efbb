//! End-to-end combinator chains across real executors.

#[macro_use]
mod common;

use common::*;
use eventsync::channel::producer_on;
use eventsync::future::{future_on, join_all};
use eventsync::source::EventSource;
use eventsync::{
    cursor, BufferSize, CancellationToken, DeriveOptions, Error, ErrorKind, Event, Executor,
    Producer,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn map_doubles_then_forwards_success() {
    init_test_logging();
    test_phase!("map_doubles_then_forwards_success");
    let producer = Producer::<i32, i32>::new(BufferSize::Fixed(3));
    let doubled = producer
        .channel()
        .map(DeriveOptions::new().buffer(BufferSize::Fixed(3)), |x| Ok(x * 2));
    producer.update_all([1, 2, 3]);
    producer.succeed(0);

    let events = record(&doubled, &Executor::immediate());
    assert_eq!(
        events,
        vec![
            Event::Update(2),
            Event::Update(4),
            Event::Update(6),
            Event::success(0)
        ]
    );
    test_complete!("map_doubles_then_forwards_success");
}

#[test]
fn flat_map_failure_halts_the_chain() {
    let producer = Producer::<u32, ()>::new(BufferSize::None);
    let stepped = producer.channel().flat_map(&Executor::immediate(), |x| {
        if x == 2 {
            Err(Error::msg("two"))
        } else {
            Ok(Some(format!("t({x})")))
        }
    });
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = stepped.subscribe(&Executor::immediate(), move |e| {
        sink.lock().push(e);
    });
    producer.update_all([1, 2, 3]);
    producer.succeed(());

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], Event::Update("t(1)".to_string()));
    assert_eq!(seen[1], Event::failure(Error::msg("two")));
}

#[test]
fn cancelled_derived_stops_while_upstream_continues() {
    init_test_logging();
    let producer = Producer::<u32, ()>::new(BufferSize::None);
    let token = CancellationToken::new();
    let derived = producer
        .channel()
        .map(DeriveOptions::new().cancel_on(&token), |x| Ok(x + 100));
    let upstream_seen = Arc::new(Mutex::new(Vec::new()));
    let derived_seen = Arc::new(Mutex::new(Vec::new()));
    {
        let sink = Arc::clone(&upstream_seen);
        producer
            .channel()
            .on_update(&Executor::immediate(), move |v| sink.lock().push(v));
        let sink = Arc::clone(&derived_seen);
        derived.on_update(&Executor::immediate(), move |v| sink.lock().push(v));
    }
    producer.update(1);
    token.cancel();
    producer.update(2);
    producer.succeed(());

    assert_eq!(*upstream_seen.lock(), vec![1, 2]);
    assert_eq!(*derived_seen.lock(), vec![101]);
    assert_eq!(
        derived.wait().expect_err("cancelled").kind(),
        ErrorKind::Cancelled
    );
}

#[test]
fn pool_chain_preserves_order() {
    let rt = test_runtime(4);
    let source = producer_on(&rt.concurrent(), BufferSize::Fixed(500), |p| {
        p.update_all(0..500_u32);
        Ok(())
    });
    let chain = source
        .map(&rt.concurrent(), |x| Ok(x * 3))
        .filter(&rt.concurrent(), |x| Ok(x % 2 == 0))
        .map(&rt.serial_unique(), |x| Ok(x / 3));
    let sum = chain.reduce(&rt.concurrent(), Vec::new(), |mut acc, x| {
        acc.push(x);
        Ok(acc)
    });
    let values = sum.wait_timeout(DELIVERY_TIMEOUT).expect("reduced");
    let expected: Vec<u32> = (0..500).filter(|x| x % 2 == 0).collect();
    assert_eq!(values, expected);
    rt.shutdown();
}

#[test]
fn fold_result_is_deterministic_across_runs() {
    let rt = test_runtime(4);
    let mut results = Vec::new();
    for _ in 0..5 {
        let source = producer_on(&rt.concurrent(), BufferSize::Fixed(64), |p| {
            p.update_all(1..=64_u64);
            Ok(())
        });
        let folded = source.fold(&rt.concurrent(), 0_u64, |acc, x| {
            Ok(acc.wrapping_mul(31).wrapping_add(x))
        });
        let (updates, done) = folded.wait_for_all_timeout(DELIVERY_TIMEOUT);
        assert!(done.is_ok());
        results.push(updates);
    }
    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(results[0].len(), 1);
    rt.shutdown();
}

#[test]
fn flat_map_source_runs_inner_futures_in_upstream_order() {
    let rt = test_runtime(4);
    let exec = rt.concurrent();
    let producer = Producer::<u64, ()>::new(BufferSize::Fixed(10));
    let spliced = producer.channel().flat_map_source(
        DeriveOptions::new().buffer(BufferSize::Fixed(10)),
        move |n| {
            Ok(future_on(&exec, move || {
                std::thread::sleep(Duration::from_millis(10 - n));
                Ok(n * n)
            }))
        },
    );
    producer.update_all(0..10);
    producer.succeed(());
    let (updates, done) = spliced.wait_for_all_timeout(DELIVERY_TIMEOUT);
    assert!(done.is_ok());
    assert_eq!(updates, (0..10).map(|n| n * n).collect::<Vec<_>>());
    rt.shutdown();
}

#[test]
fn contextual_chain_fails_when_context_is_torn_down() {
    let ctx = TestContext::new();
    let producer = Producer::<u32, ()>::new(BufferSize::None);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let derived = producer
        .channel()
        .map_in(&ctx, DeriveOptions::new(), |_, x| Ok(x))
        .filter_in(&ctx, DeriveOptions::new(), |_, x| Ok(*x > 0));
    derived.on_update(&Executor::immediate(), move |v| sink.lock().push(v));
    producer.update_all([0, 1, 2]);
    ctx.teardown();
    producer.update(3);

    assert_eq!(*seen.lock(), vec![1, 2]);
    assert_eq!(
        derived.wait().expect_err("dropped").kind(),
        ErrorKind::ContextDropped
    );
    assert_eq!(producer.subscriber_count(), 0);
}

#[test]
fn cursor_walks_pages_from_a_pool() {
    let rt = test_runtime(2);
    let exec = rt.concurrent();
    let pages = cursor(
        DeriveOptions::new()
            .on(&rt.serial_unique())
            .buffer(BufferSize::Fixed(16)),
        0_u32,
        move |page| {
            producer_on(&exec, BufferSize::Fixed(4), move |p| {
                p.update_all([page * 3, page * 3 + 1, page * 3 + 2]);
                Ok((page < 3).then_some(page + 1))
            })
        },
    );
    let (updates, done) = pages.wait_for_all_timeout(DELIVERY_TIMEOUT);
    assert!(done.is_ok());
    assert_eq!(updates.len(), 4);
    assert_eq!(updates.concat(), (0..12).collect::<Vec<_>>());
    rt.shutdown();
}

#[test]
fn join_all_of_pool_futures() {
    let rt = test_runtime(4);
    let futures = (0..16_u32)
        .map(|i| future_on(&rt.concurrent(), move || Ok(i * 2)))
        .collect::<Vec<_>>();
    let joined = join_all(futures).wait_timeout(DELIVERY_TIMEOUT).expect("joined");
    assert_eq!(joined, (0..16).map(|i| i * 2).collect::<Vec<_>>());
    rt.shutdown();
}
