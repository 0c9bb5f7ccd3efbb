//! Shared state machine behind every future and channel.
//!
//! The whole observable state of a source lives in one immutable [`Head`]
//! behind a [`ThreadSafeContainer`]:
//!
//! - `seq`: bumped by every update and by the completion
//! - `buffer`: the replay ring, at most `capacity` long
//! - `subscribers`: a persistent list of live subscribers
//! - `completion`: the terminal result, once set
//!
//! Because registration, emission and completion are all single CAS steps on
//! that head, they are totally ordered. An emitter delivers its event to
//! exactly the subscribers present in the head it committed, stamped with
//! that head's `seq`; a subscriber attaching at `seq = k` is primed with the
//! buffer as of `k`. Together with the mailbox reordering this gives every
//! subscriber the buffered updates followed by all live events, in emission
//! order, with no gaps and no duplicates.

use std::collections::VecDeque;
use std::iter::successors;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::subscriber::{Control, Handler, Subscriber};
use super::Subscription;
use crate::cx::Scope;
use crate::error::{Error, ErrorKind};
use crate::executor::{is_executor_thread, Executor};
use crate::tracing_compat::{debug, trace, warn};
use crate::types::{Event, Fallible, Value};
use crate::util::{HeadChange, ThreadSafeContainer};

pub(crate) struct Head<U, S> {
    seq: u64,
    buffer: Arc<VecDeque<U>>,
    subscribers: Option<Arc<Node<U, S>>>,
    completion: Option<Fallible<S>>,
}

struct Node<U, S> {
    subscriber: Arc<Subscriber<U, S>>,
    next: Option<Arc<Node<U, S>>>,
}

fn iter_nodes<U, S>(list: &Option<Arc<Node<U, S>>>) -> impl Iterator<Item = &Arc<Subscriber<U, S>>> {
    successors(list.as_deref(), |node| node.next.as_deref()).map(|node| &node.subscriber)
}

/// Removes subscriber `id`, sharing the untouched tail. `None` if absent.
fn without<U: Value, S: Value>(
    list: &Option<Arc<Node<U, S>>>,
    id: u64,
) -> Option<Option<Arc<Node<U, S>>>> {
    let mut prefix = Vec::new();
    let mut cursor = list.as_ref();
    while let Some(node) = cursor {
        if node.subscriber.id() == id {
            let rebuilt = prefix.into_iter().rev().fold(node.next.clone(), |next, sub| {
                Some(Arc::new(Node {
                    subscriber: sub,
                    next,
                }))
            });
            return Some(rebuilt);
        }
        prefix.push(Arc::clone(&node.subscriber));
        cursor = node.next.as_ref();
    }
    None
}

/// Something a [`Subscription`] can detach from.
pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

pub(crate) struct EventCore<U, S> {
    capacity: usize,
    head: ThreadSafeContainer<Head<U, S>>,
    upstream: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
    label: String,
}

impl<U, S> EventCore<U, S> {
    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<U: Value, S: Value> EventCore<U, S> {
    pub(crate) fn new(capacity: usize, label: impl Into<String>, seed: Vec<U>) -> Arc<Self> {
        let skip = seed.len().saturating_sub(capacity);
        let buffer: VecDeque<U> = seed.into_iter().skip(skip).collect();
        Arc::new(Self {
            capacity,
            head: ThreadSafeContainer::with_head(Arc::new(Head {
                seq: 0,
                buffer: Arc::new(buffer),
                subscribers: None,
                completion: None,
            })),
            upstream: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            label: label.into(),
        })
    }

    /// Creates a core that is already completed.
    pub(crate) fn completed(result: Fallible<S>, label: impl Into<String>) -> Arc<Self> {
        let core = Self::new(0, label, Vec::new());
        core.complete(result);
        core
    }

    fn snapshot(&self) -> Arc<Head<U, S>> {
        // The head is installed at construction and never removed.
        self.head.head().unwrap_or_else(|| {
            Arc::new(Head {
                seq: 0,
                buffer: Arc::new(VecDeque::new()),
                subscribers: None,
                completion: None,
            })
        })
    }

    pub(crate) fn completion(&self) -> Option<Fallible<S>> {
        self.snapshot().completion.clone()
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.snapshot().completion.is_some()
    }

    pub(crate) fn buffered(&self) -> Vec<U> {
        self.snapshot().buffer.iter().cloned().collect()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        iter_nodes(&self.snapshot().subscribers).count()
    }

    /// Emits one update. Returns false once completed.
    pub(crate) fn update(&self, value: U) -> bool {
        let capacity = self.capacity;
        let committed = self.head.update_head(|current| {
            let Some(cur) = current else {
                return HeadChange::Keep;
            };
            if cur.completion.is_some() {
                return HeadChange::Keep;
            }
            let buffer = if capacity == 0 {
                Arc::clone(&cur.buffer)
            } else {
                let mut ring = VecDeque::with_capacity(capacity.min(cur.buffer.len() + 1));
                let skip = (cur.buffer.len() + 1).saturating_sub(capacity);
                ring.extend(cur.buffer.iter().skip(skip).cloned());
                ring.push_back(value.clone());
                Arc::new(ring)
            };
            HeadChange::Replace(Arc::new(Head {
                seq: cur.seq + 1,
                buffer,
                subscribers: cur.subscribers.clone(),
                completion: None,
            }))
        });
        let Some(head) = committed.new.filter(|_| committed.changed) else {
            trace!(label = %self.label, "update after completion ignored");
            return false;
        };
        trace!(label = %self.label, seq = head.seq, "update");
        for subscriber in iter_nodes(&head.subscribers) {
            subscriber.enqueue(head.seq, Event::Update(value.clone()));
        }
        true
    }

    /// Like [`complete`](Self::complete), but a lost race is reported as
    /// [`ErrorKind::AlreadyCompleted`].
    pub(crate) fn try_complete(&self, result: Fallible<S>) -> Fallible<()> {
        if self.complete(result) {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::AlreadyCompleted)
                .with_message(format!("{} already completed", self.label)))
        }
    }

    /// Sets the terminal result. Only the first call has an effect.
    pub(crate) fn complete(&self, result: Fallible<S>) -> bool {
        let committed = self.head.update_head(|current| {
            let Some(cur) = current else {
                return HeadChange::Keep;
            };
            if cur.completion.is_some() {
                return HeadChange::Keep;
            }
            HeadChange::Replace(Arc::new(Head {
                seq: cur.seq + 1,
                buffer: Arc::clone(&cur.buffer),
                subscribers: None,
                completion: Some(result.clone()),
            }))
        });
        let (Some(old), Some(new), true) = (committed.old, committed.new, committed.changed) else {
            warn!(label = %self.label, "completion rejected: already completed");
            return false;
        };
        debug!(label = %self.label, success = result.is_ok(), "completed");
        for subscriber in iter_nodes(&old.subscribers) {
            subscriber.enqueue(new.seq, Event::Completion(result.clone()));
        }
        self.release_upstream();
        true
    }

    /// Registers a handler that runs on `executor`.
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        executor: &Executor,
        scope: Option<Scope>,
        handler: Handler<U, S>,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber::new(
            id,
            executor.clone(),
            scope,
            self.label.clone(),
            handler,
        ));
        let committed = self.head.update_head(|current| {
            let Some(cur) = current else {
                return HeadChange::Keep;
            };
            if cur.completion.is_some() {
                return HeadChange::Keep;
            }
            HeadChange::Replace(Arc::new(Head {
                seq: cur.seq,
                buffer: Arc::clone(&cur.buffer),
                subscribers: Some(Arc::new(Node {
                    subscriber: Arc::clone(&subscriber),
                    next: cur.subscribers.clone(),
                })),
                completion: None,
            }))
        });
        let source: Weak<dyn Detach> = Arc::downgrade(self) as Weak<dyn Detach>;
        let control: Weak<dyn Control> = Arc::downgrade(&subscriber) as Weak<dyn Control>;
        let subscription = Subscription::new(id, control, source);
        if let Some(head) = committed.new {
            if committed.changed {
                debug!(label = %self.label, subscriber = id, seq = head.seq, "subscribed");
                subscriber.prime(head.seq, &head.buffer, None);
            } else {
                debug!(label = %self.label, subscriber = id, "subscribed after completion; replaying");
                subscriber.prime(head.seq, &head.buffer, head.completion.clone());
            }
        }
        subscription
    }

    /// Keeps `subscription` alive until this source completes or is dropped.
    pub(crate) fn retain_upstream(&self, subscription: Subscription) {
        if self.is_completed() {
            subscription.detach();
            return;
        }
        {
            let mut upstream = self.upstream.lock();
            upstream.retain(|s| !s.is_detached());
            upstream.push(subscription);
        }
        // Completion may have raced the push.
        if self.is_completed() {
            self.release_upstream();
        }
    }

    fn release_upstream(&self) {
        let released: Vec<Subscription> = self.upstream.lock().drain(..).collect();
        if !released.is_empty() {
            debug!(label = %self.label, count = released.len(), "releasing upstream subscriptions");
        }
        for subscription in released {
            subscription.detach();
        }
    }

    /// Blocks until completion, or until `timeout` elapses.
    pub(crate) fn wait_completion(self: &Arc<Self>, timeout: Option<Duration>) -> Fallible<S> {
        if let Some(done) = self.completion() {
            return done;
        }
        let (_, result) = self.wait_events(timeout, false)?;
        result
    }

    /// Blocks until completion, collecting every update seen along the way.
    pub(crate) fn wait_all(self: &Arc<Self>, timeout: Option<Duration>) -> Fallible<(Vec<U>, Fallible<S>)> {
        self.wait_events(timeout, true)
    }

    fn wait_events(
        self: &Arc<Self>,
        timeout: Option<Duration>,
        collect: bool,
    ) -> Fallible<(Vec<U>, Fallible<S>)> {
        if is_executor_thread() {
            warn!(label = %self.label, "blocking wait on an executor thread");
        }
        let slot = Arc::new(WaitSlot::default());
        let sink = Arc::clone(&slot);
        let subscription = self.subscribe(
            &Executor::immediate(),
            None,
            Box::new(move |event| sink.push(event, collect)),
        );
        let outcome = slot.wait(timeout);
        if outcome.is_none() {
            subscription.detach();
        }
        outcome.ok_or_else(|| {
            Error::new(ErrorKind::Timeout).with_message(format!("{} did not complete", self.label))
        })
    }
}

impl<U: Value, S: Value> Detach for EventCore<U, S> {
    fn detach(&self, id: u64) {
        let committed = self.head.update_head(|current| {
            let Some(cur) = current else {
                return HeadChange::Keep;
            };
            match without(&cur.subscribers, id) {
                Some(rest) => HeadChange::Replace(Arc::new(Head {
                    seq: cur.seq,
                    buffer: Arc::clone(&cur.buffer),
                    subscribers: rest,
                    completion: cur.completion.clone(),
                })),
                None => HeadChange::Keep,
            }
        });
        if committed.changed {
            debug!(label = %self.label, subscriber = id, "detached");
        }
    }
}

impl<U, S> Drop for EventCore<U, S> {
    fn drop(&mut self) {
        for subscription in self.upstream.get_mut().drain(..) {
            subscription.detach();
        }
    }
}

struct WaitSlot<U, S> {
    state: Mutex<(Vec<U>, Option<Fallible<S>>)>,
    condvar: Condvar,
}

impl<U, S> Default for WaitSlot<U, S> {
    fn default() -> Self {
        Self {
            state: Mutex::new((Vec::new(), None)),
            condvar: Condvar::new(),
        }
    }
}

impl<U, S> WaitSlot<U, S> {
    fn push(&self, event: Event<U, S>, collect: bool) {
        let mut state = self.state.lock();
        match event {
            Event::Update(u) => {
                if collect {
                    state.0.push(u);
                }
            }
            Event::Completion(result) => {
                state.1 = Some(result);
                self.condvar.notify_all();
            }
        }
    }

    fn wait(&self, timeout: Option<Duration>) -> Option<(Vec<U>, Fallible<S>)> {
        // A timeout too large for an Instant waits without a deadline.
        let deadline = timeout.and_then(|d| Instant::now().checked_add(d));
        let mut state = self.state.lock();
        while state.1.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.condvar.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.condvar.wait(&mut state),
            }
        }
        let result = state.1.take()?;
        Some((std::mem::take(&mut state.0), result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn collect(core: &Arc<EventCore<u32, bool>>) -> Arc<Mutex<Vec<Event<u32, bool>>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let _sub = core.subscribe(
            &Executor::immediate(),
            None,
            Box::new(move |e| sink.lock().push(e)),
        );
        log
    }

    #[test]
    fn ring_keeps_last_capacity_updates() {
        let core = EventCore::<u32, bool>::new(2, "ring", Vec::new());
        for v in 1..=4 {
            assert!(core.update(v));
        }
        assert_eq!(core.buffered(), vec![3, 4]);
    }

    #[test]
    fn unbounded_fixed_capacity_keeps_everything() {
        let core = EventCore::<u32, bool>::new(usize::MAX, "all", vec![1]);
        for v in 2..=5 {
            assert!(core.update(v));
        }
        assert_eq!(core.buffered(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn wait_with_unbounded_timeout() {
        let core = EventCore::<u32, bool>::new(0, "forever", Vec::new());
        let waiter = Arc::clone(&core);
        let handle = std::thread::spawn(move || waiter.wait_completion(Some(Duration::MAX)));
        std::thread::sleep(Duration::from_millis(20));
        core.complete(Ok(true));
        assert_eq!(handle.join().expect("waiter panicked"), Ok(true));
        assert_eq!(core.wait_completion(Some(Duration::MAX)), Ok(true));
    }

    #[test]
    fn seed_is_trimmed_to_capacity() {
        let core = EventCore::<u32, bool>::new(2, "seed", vec![1, 2, 3]);
        assert_eq!(core.buffered(), vec![2, 3]);
    }

    #[test]
    fn late_subscriber_gets_buffer_then_live() {
        let core = EventCore::<u32, bool>::new(1, "late", Vec::new());
        core.update(1);
        core.update(2);
        let log = collect(&core);
        core.update(3);
        core.complete(Ok(true));
        assert_eq!(
            *log.lock(),
            vec![
                Event::Update(2),
                Event::Update(3),
                Event::Completion(Ok(true))
            ]
        );
    }

    #[test]
    fn second_completion_rejected() {
        let core = EventCore::<u32, bool>::new(0, "twice", Vec::new());
        let log = collect(&core);
        assert!(core.complete(Ok(true)));
        assert!(!core.complete(Ok(false)));
        assert!(!core.update(1));
        assert_eq!(*log.lock(), vec![Event::Completion(Ok(true))]);
        assert_eq!(core.completion(), Some(Ok(true)));
    }

    #[test]
    fn try_complete_reports_lost_race() {
        let core = EventCore::<u32, bool>::new(0, "raced", Vec::new());
        assert!(core.try_complete(Ok(true)).is_ok());
        let err = core.try_complete(Ok(false)).expect_err("second completion");
        assert_eq!(err.kind(), ErrorKind::AlreadyCompleted);
        assert_eq!(err.message(), Some("raced already completed"));
        assert_eq!(core.completion(), Some(Ok(true)));
    }

    #[test]
    fn detach_removes_subscriber() {
        let core = EventCore::<u32, bool>::new(0, "detach", Vec::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let sub = core.subscribe(
            &Executor::immediate(),
            None,
            Box::new(move |e| sink.lock().push(e)),
        );
        let _other = collect(&core);
        assert_eq!(core.subscriber_count(), 2);
        core.update(1);
        sub.detach();
        assert_eq!(core.subscriber_count(), 1);
        core.update(2);
        assert_eq!(*log.lock(), vec![Event::Update(1)]);
    }

    #[test]
    fn without_preserves_order() {
        let core = EventCore::<u32, bool>::new(0, "order", Vec::new());
        let subs: Vec<_> = (0..4)
            .map(|_| core.subscribe(&Executor::immediate(), None, Box::new(|_| {})))
            .collect();
        subs[2].detach();
        let ids: Vec<u64> = iter_nodes(&core.snapshot().subscribers).map(|s| s.id()).collect();
        assert_eq!(ids, vec![subs[3].id(), subs[1].id(), subs[0].id()]);
    }

    #[test]
    fn upstream_released_on_completion() {
        let upstream = EventCore::<u32, bool>::new(0, "up", Vec::new());
        let derived = EventCore::<u32, bool>::new(0, "down", Vec::new());
        let sub = upstream.subscribe(&Executor::immediate(), None, Box::new(|_| {}));
        derived.retain_upstream(sub);
        assert_eq!(upstream.subscriber_count(), 1);
        derived.complete(Ok(false));
        assert_eq!(upstream.subscriber_count(), 0);
    }

    #[test]
    fn upstream_released_on_drop() {
        let upstream = EventCore::<u32, bool>::new(0, "up", Vec::new());
        let derived = EventCore::<u32, bool>::new(0, "down", Vec::new());
        derived.retain_upstream(upstream.subscribe(&Executor::immediate(), None, Box::new(|_| {})));
        drop(derived);
        assert_eq!(upstream.subscriber_count(), 0);
    }

    #[test]
    fn wait_timeout_on_pending() {
        let core = EventCore::<u32, bool>::new(0, "pending", Vec::new());
        let err = core
            .wait_completion(Some(Duration::from_millis(20)))
            .expect_err("still pending");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(core.subscriber_count(), 0);
    }

    #[test]
    fn wait_all_collects_from_other_thread() {
        let core = EventCore::<u32, bool>::new(0, "wait", Vec::new());
        let (tx, rx) = mpsc::channel();
        let producer = Arc::clone(&core);
        let handle = std::thread::spawn(move || {
            rx.recv().expect("go");
            producer.update(1);
            producer.update(2);
            producer.complete(Ok(true));
        });
        let waiter = Arc::clone(&core);
        let waiting = std::thread::spawn(move || waiter.wait_all(None));
        while core.subscriber_count() == 0 {
            std::thread::yield_now();
        }
        tx.send(()).expect("send");
        let (updates, done) = waiting.join().expect("join").expect("completed");
        handle.join().expect("join");
        assert_eq!(updates, vec![1, 2]);
        assert_eq!(done.ok(), Some(true));
    }
}
