//! Contention tests: many threads hammering one container or one source.

#[macro_use]
mod common;

use common::*;
use eventsync::source::EventSource;
use eventsync::{BufferSize, ErrorKind, Event, Executor, HeadChange, Producer, ThreadSafeContainer};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;
const INCREMENTS: usize = 2_000;

#[test]
fn concurrent_increments_are_linearized() {
    init_test_logging();
    test_phase!("concurrent_increments_are_linearized");
    let container = Arc::new(ThreadSafeContainer::with_head(Arc::new(0_usize)));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let container = Arc::clone(&container);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..INCREMENTS {
                    container.update_head(|head| {
                        let current = head.map_or(0, |n| **n);
                        HeadChange::Replace(Arc::new(current + 1))
                    });
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    let total = container.head().map_or(0, |n| *n);
    assert_with_log!(
        total == THREADS * INCREMENTS,
        "every increment lands exactly once",
        THREADS * INCREMENTS,
        total
    );
    test_complete!(
        "concurrent_increments_are_linearized",
        retries = container.retries()
    );
}

#[test]
fn bounded_update_reports_contention() {
    let container = ThreadSafeContainer::with_head(Arc::new(1_u32));
    // Every attempt sees a head that moved under it.
    let err = container
        .try_update_head(
            |head| {
                let current = head.map_or(0, |n| **n);
                container.update_head(|_| HeadChange::Replace(Arc::new(current + 100)));
                HeadChange::Replace(Arc::new(current + 1))
            },
            3,
        )
        .expect_err("contended");
    assert_eq!(err.kind(), ErrorKind::ContentionExceeded);
    assert_eq!(container.retries(), 3);
}

#[test]
fn bounded_update_succeeds_without_contention() {
    let container = ThreadSafeContainer::<u32>::new();
    let update = container
        .try_update_head(|_| HeadChange::Replace(Arc::new(5)), 1)
        .expect("uncontended");
    assert!(update.changed);
    assert!(update.old.is_none());
    assert_eq!(container.head().map(|n| *n), Some(5));
}

#[test]
fn concurrent_emitters_deliver_each_update_once() {
    init_test_logging();
    let producer = Producer::<usize, ()>::new(BufferSize::None);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = producer
        .channel()
        .subscribe(&Executor::immediate(), move |event| {
            if let Event::Update(v) = event {
                sink.lock().push(v);
            }
        });

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let producer = producer.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..INCREMENTS {
                    producer.update(t * INCREMENTS + i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("emitter panicked");
    }
    producer.succeed(());

    let mut values = seen.lock().clone();
    assert_eq!(values.len(), THREADS * INCREMENTS);
    // Per-thread order survives interleaving.
    for t in 0..THREADS {
        let own: Vec<_> = values
            .iter()
            .copied()
            .filter(|v| v / INCREMENTS == t)
            .collect();
        assert!(own.windows(2).all(|w| w[0] < w[1]));
    }
    values.sort_unstable();
    values.dedup();
    assert_eq!(values.len(), THREADS * INCREMENTS);
}

#[test]
fn subscribing_during_emission_misses_nothing_after_attach() {
    init_test_logging();
    let rt = test_runtime(4);
    let producer = Producer::<usize, ()>::new(BufferSize::None);
    let emitted = Arc::new(AtomicUsize::new(0));

    let emitter = {
        let producer = producer.clone();
        let emitted = Arc::clone(&emitted);
        thread::spawn(move || {
            for i in 0..10_000 {
                producer.update(i);
                emitted.store(i + 1, Ordering::Release);
            }
            producer.succeed(());
        })
    };

    let mut subscribers = Vec::new();
    for _ in 0..THREADS {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = producer.channel().subscribe(&rt.concurrent(), move |event| {
            if let Event::Update(v) = event {
                sink.lock().push(v);
            }
        });
        subscribers.push((seen, sub));
        thread::yield_now();
    }
    emitter.join().expect("emitter panicked");
    let _ = producer.channel().wait_timeout(DELIVERY_TIMEOUT);

    for (seen, sub) in &subscribers {
        // Wait for the subscriber's mailbox to drain.
        let deadline = std::time::Instant::now() + DELIVERY_TIMEOUT;
        while !sub.is_detached() && std::time::Instant::now() < deadline {
            thread::sleep(std::time::Duration::from_millis(1));
        }
        let seen = seen.lock();
        // A late attach sees a contiguous tail: no gaps and no repeats.
        assert!(seen.windows(2).all(|w| w[1] == w[0] + 1));
        if let Some(last) = seen.last() {
            assert_eq!(*last, 9_999);
        }
    }
    rt.shutdown();
}

#[test]
fn racing_subscribers_each_see_an_ordered_suffix() {
    init_test_logging();
    test_phase!("racing_subscribers_each_see_an_ordered_suffix");
    const UPDATERS: usize = 4;
    const SUBSCRIBERS: usize = 6;
    const PER_UPDATER: usize = 2_500;

    let rt = test_runtime(4);
    let producer = Producer::<usize, ()>::new(BufferSize::None);

    // Attached before any update, so it records the committed order.
    let order = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&order);
    let _witness = producer
        .channel()
        .subscribe(&Executor::immediate(), move |event| {
            if let Event::Update(v) = event {
                sink.lock().push(v);
            }
        });

    let barrier = Arc::new(Barrier::new(UPDATERS + SUBSCRIBERS));
    let (done_tx, done_rx) = std::sync::mpsc::channel();

    let updaters: Vec<_> = (0..UPDATERS)
        .map(|t| {
            let producer = producer.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_UPDATER {
                    producer.update(t * PER_UPDATER + i);
                }
            })
        })
        .collect();

    let subscribers: Vec<_> = (0..SUBSCRIBERS)
        .map(|s| {
            let channel = producer.channel();
            let executor = rt.concurrent();
            let barrier = Arc::clone(&barrier);
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                let seen = Arc::new(Mutex::new(Vec::new()));
                let sink = Arc::clone(&seen);
                barrier.wait();
                thread::sleep(std::time::Duration::from_micros(200 * s as u64));
                let _sub = channel.subscribe(&executor, move |event| match event {
                    Event::Update(v) => sink.lock().push(v),
                    Event::Completion(_) => {
                        let _ = done_tx.send(s);
                    }
                });
                seen
            })
        })
        .collect();
    drop(done_tx);

    for handle in updaters {
        handle.join().expect("updater panicked");
    }
    let seen: Vec<_> = subscribers
        .into_iter()
        .map(|handle| handle.join().expect("subscriber panicked"))
        .collect();
    producer.succeed(());
    for _ in 0..SUBSCRIBERS {
        done_rx
            .recv_timeout(DELIVERY_TIMEOUT)
            .expect("subscriber saw completion");
    }

    let order = order.lock().clone();
    assert_eq!(order.len(), UPDATERS * PER_UPDATER);
    let last = order.last().copied();
    for (s, seen) in seen.iter().enumerate() {
        let seen = seen.lock();
        let start = order.len() - seen.len();
        assert_with_log!(
            order[start..] == seen[..],
            "subscriber sees a gap-free suffix of the committed order",
            s,
            seen.len()
        );
        if !seen.is_empty() {
            assert_eq!(seen.last().copied(), last);
        }
    }
    test_complete!("racing_subscribers_each_see_an_ordered_suffix");
    rt.shutdown();
}
