//! Channel and future conformance: replay, ordering and exactly-once
//! completion as seen by real subscribers.

#[macro_use]
mod common;

use common::*;
use eventsync::channel::producer_on;
use eventsync::future::{after, future_on};
use eventsync::source::EventSource;
use eventsync::{
    BufferSize, Error, ErrorKind, Event, ExecutionContext, Executor, Producer, Promise,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn fixed_two_replays_last_two_then_completion() {
    init_test_logging();
    test_phase!("fixed_two_replays_last_two_then_completion");
    let producer = Producer::<u32, bool>::new(BufferSize::Fixed(2));
    producer.update_all([1, 2, 3]);
    producer.succeed(true);

    let events = record(&producer.channel(), &Executor::immediate());
    assert_eq!(
        events,
        vec![Event::Update(2), Event::Update(3), Event::success(true)]
    );
    test_complete!("fixed_two_replays_last_two_then_completion");
}

#[test]
fn live_subscriber_sees_buffer_then_live_updates() {
    init_test_logging();
    let rt = test_runtime(4);
    let producer = Producer::<u32, ()>::new(BufferSize::Fixed(3));
    producer.update_all([1, 2]);

    let (tx, rx) = std::sync::mpsc::channel();
    let _sub = producer.channel().subscribe(&rt.concurrent(), move |event| {
        let _ = tx.send(event);
    });
    producer.update_all(3..=20);
    producer.succeed(());

    let mut updates = Vec::new();
    loop {
        match rx.recv_timeout(DELIVERY_TIMEOUT).expect("event") {
            Event::Update(v) => updates.push(v),
            Event::Completion(done) => {
                assert!(done.is_ok());
                break;
            }
        }
    }
    assert_eq!(updates, (1..=20).collect::<Vec<_>>());
    rt.shutdown();
}

#[test]
fn second_completion_is_ignored() {
    init_test_logging();
    let promise = Promise::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    promise
        .future()
        .on_complete(&Executor::immediate(), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    assert!(promise.succeed(1));
    assert!(!promise.fail(Error::msg("late")));
    assert!(!promise.succeed(2));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(promise.future().wait().ok(), Some(1));
}

#[test]
fn late_subscribers_all_replay_the_same_completion() {
    let producer = Producer::<u32, &'static str>::new(BufferSize::None);
    producer.update(9);
    producer.fail(Error::msg("closed"));
    for _ in 0..3 {
        let events = record(&producer.channel(), &Executor::immediate());
        assert_eq!(events, vec![Event::failure(Error::msg("closed"))]);
    }
    assert!(!producer.update(10));
}

#[test]
fn wait_for_all_collects_from_another_thread() {
    let rt = test_runtime(2);
    let channel = producer_on(&rt.concurrent(), BufferSize::Fixed(100), |p| {
        for i in 0..100 {
            p.update(i);
        }
        Ok("finished")
    });
    let (updates, done) = channel.wait_for_all_timeout(DELIVERY_TIMEOUT);
    assert_eq!(done.ok(), Some("finished"));
    assert_eq!(updates, (0..100).collect::<Vec<_>>());
    rt.shutdown();
}

#[test]
fn wait_timeout_on_pending_future_times_out() {
    let promise = Promise::<u32>::new();
    let started = Instant::now();
    let err = promise
        .future()
        .wait_timeout(Duration::from_millis(30))
        .expect_err("pending");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
fn shut_down_runtime_refuses_work() {
    let rt = test_runtime(1);
    rt.shutdown();
    let refused = future_on(&rt.concurrent(), || Ok(1_u32));
    assert_eq!(
        refused.wait().expect_err("refused").kind(),
        ErrorKind::ExecutorShutdown
    );
    assert!(rt.concurrent().execute(|| {}).is_err());
}

#[test]
fn after_runs_on_pool_timer() {
    let rt = test_runtime(2);
    let started = Instant::now();
    let delayed = after(&rt.concurrent(), Duration::from_millis(40), || Ok("tick"));
    assert_eq!(delayed.wait_timeout(DELIVERY_TIMEOUT).ok(), Some("tick"));
    assert!(started.elapsed() >= Duration::from_millis(40));
    rt.shutdown();
}

#[test]
fn detached_subscriber_stops_receiving() {
    let producer = Producer::<u32, ()>::new(BufferSize::None);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sub = producer
        .channel()
        .subscribe(&Executor::immediate(), move |event| {
            if let Event::Update(v) = event {
                sink.lock().push(v);
            }
        });
    producer.update(1);
    sub.detach();
    producer.update(2);
    assert!(sub.is_detached());
    assert_eq!(*seen.lock(), vec![1]);
    assert_eq!(producer.subscriber_count(), 0);
}

#[test]
fn context_teardown_runs_each_detachment_once() {
    let ctx = TestContext::new();
    let runs = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let r = Arc::clone(&runs);
        ctx.release_pool().notify_drop(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
    }
    ctx.teardown();
    ctx.teardown();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}
