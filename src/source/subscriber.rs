//! Per-subscriber mailboxes.
//!
//! Producers stamp every update and completion with the sequence number of
//! the head they committed. Concurrent producers may hand those stamped
//! events to a subscriber out of order, so each subscriber parks early
//! arrivals in a pending map and releases them strictly by sequence. At most
//! one drain job per subscriber is scheduled on its executor at any time,
//! which keeps handler invocations for one subscriber sequential even on a
//! concurrent executor.
//!
//! A subscriber attaches at sequence `k`: it is primed with the replay buffer
//! as of `k` and then sees every event stamped `k + 1` onward.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cx::Scope;
use crate::executor::Executor;
use crate::tracing_compat::{error, trace};
use crate::types::fallible::panic_message;
use crate::types::{Event, Fallible, Priority, Value};

pub(crate) type Handler<U, S> = Box<dyn FnMut(Event<U, S>) + Send + 'static>;

/// Type-erased control surface handed to [`Subscription`](super::Subscription).
pub(crate) trait Control: Send + Sync {
    fn close(&self);
    fn is_closed(&self) -> bool;
}

pub(crate) struct Subscriber<U, S> {
    id: u64,
    executor: Executor,
    scope: Option<Scope>,
    label: String,
    handler: Mutex<Option<Handler<U, S>>>,
    mailbox: Mutex<Mailbox<U, S>>,
}

struct Mailbox<U, S> {
    ready: VecDeque<Event<U, S>>,
    pending: BTreeMap<u64, Event<U, S>>,
    next_seq: u64,
    primed: bool,
    draining: bool,
    closed: bool,
}

impl<U, S> Mailbox<U, S> {
    fn promote(&mut self) {
        while let Some(event) = self.pending.remove(&self.next_seq) {
            self.ready.push_back(event);
            self.next_seq += 1;
        }
    }

    /// Marks a drain as started if one is needed. Returns true if the caller
    /// must schedule it.
    fn claim_drain(&mut self) -> bool {
        if self.draining || self.ready.is_empty() {
            false
        } else {
            self.draining = true;
            true
        }
    }
}

impl<U: Value, S: Value> Subscriber<U, S> {
    pub(crate) fn new(
        id: u64,
        executor: Executor,
        scope: Option<Scope>,
        label: String,
        handler: Handler<U, S>,
    ) -> Self {
        Self {
            id,
            executor,
            scope,
            label,
            handler: Mutex::new(Some(handler)),
            mailbox: Mutex::new(Mailbox {
                ready: VecDeque::new(),
                pending: BTreeMap::new(),
                next_seq: 0,
                primed: false,
                draining: false,
                closed: false,
            }),
        }
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    /// Hands over the replay state as of sequence `attached_at`.
    ///
    /// `completion` is set when the source had already completed; it is
    /// delivered after the buffered updates and nothing follows it.
    pub(crate) fn prime(
        self: &Arc<Self>,
        attached_at: u64,
        buffer: &VecDeque<U>,
        completion: Option<Fallible<S>>,
    ) {
        let schedule = {
            let mut mb = self.mailbox.lock();
            if mb.closed {
                return;
            }
            mb.ready.extend(buffer.iter().cloned().map(Event::Update));
            if let Some(result) = completion {
                mb.ready.push_back(Event::Completion(result));
                mb.pending.clear();
            } else {
                // Anything at or below the attach point is already in the buffer.
                mb.pending = mb.pending.split_off(&(attached_at + 1));
            }
            mb.next_seq = attached_at + 1;
            mb.primed = true;
            mb.promote();
            mb.claim_drain()
        };
        if schedule {
            self.schedule_drain();
        }
    }

    /// Accepts the event committed at `seq`.
    pub(crate) fn enqueue(self: &Arc<Self>, seq: u64, event: Event<U, S>) {
        let schedule = {
            let mut mb = self.mailbox.lock();
            if mb.closed || (mb.primed && seq < mb.next_seq) {
                return;
            }
            mb.pending.insert(seq, event);
            if !mb.primed {
                return;
            }
            mb.promote();
            mb.claim_drain()
        };
        if schedule {
            self.schedule_drain();
        }
    }

    fn schedule_drain(self: &Arc<Self>) {
        let me = Arc::clone(self);
        if let Err(e) = self
            .executor
            .schedule_job(Priority::Normal, Box::new(move || me.drain()))
        {
            error!(
                label = %self.label,
                subscriber = self.id,
                error = %e,
                "executor refused delivery; closing subscriber"
            );
            self.mailbox.lock().draining = false;
            self.close();
        }
    }

    fn is_live(&self) -> bool {
        self.scope.as_ref().map_or(true, Scope::is_alive)
    }

    fn drain(&self) {
        loop {
            let event = {
                let mut mb = self.mailbox.lock();
                if let Some(event) = mb.ready.pop_front() {
                    event
                } else {
                    mb.draining = false;
                    let closed = mb.closed;
                    drop(mb);
                    if closed {
                        self.handler.lock().take();
                    }
                    return;
                }
            };
            let terminal = event.is_completion();
            if self.is_live() {
                self.invoke(event);
            } else {
                trace!(label = %self.label, subscriber = self.id, "scope gone; event dropped");
            }
            if terminal {
                self.close();
            }
        }
    }

    fn invoke(&self, event: Event<U, S>) {
        let mut guard = self.handler.lock();
        let Some(handler) = guard.as_mut() else {
            return;
        };
        trace!(label = %self.label, subscriber = self.id, "deliver");
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
            error!(
                label = %self.label,
                subscriber = self.id,
                panic = %panic_message(payload.as_ref()),
                "handler panicked"
            );
        }
    }
}

impl<U: Value, S: Value> Control for Subscriber<U, S> {
    fn close(&self) {
        let drop_now = {
            let mut mb = self.mailbox.lock();
            mb.closed = true;
            mb.ready.clear();
            mb.pending.clear();
            !mb.draining
        };
        if drop_now {
            // The handler may be the caller (detach from inside a callback).
            if let Some(mut handler) = self.handler.try_lock() {
                handler.take();
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.mailbox.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    type Log = Arc<Mutex<Vec<Event<u32, bool>>>>;

    fn recording(executor: Executor) -> (Arc<Subscriber<u32, bool>>, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let sub = Arc::new(Subscriber::new(
            1,
            executor,
            None,
            "test".into(),
            Box::new(move |event| sink.lock().push(event)),
        ));
        (sub, log)
    }

    #[test]
    fn reorders_out_of_order_arrivals() {
        let (sub, log) = recording(Executor::immediate());
        sub.prime(0, &VecDeque::new(), None);
        sub.enqueue(3, Event::Update(30));
        sub.enqueue(2, Event::Update(20));
        assert!(log.lock().is_empty());
        sub.enqueue(1, Event::Update(10));
        assert_eq!(
            *log.lock(),
            vec![Event::Update(10), Event::Update(20), Event::Update(30)]
        );
    }

    #[test]
    fn early_events_wait_for_priming() {
        let (sub, log) = recording(Executor::immediate());
        sub.enqueue(5, Event::Update(50));
        sub.enqueue(4, Event::Update(40));
        let buffer: VecDeque<u32> = [3].into_iter().collect();
        sub.prime(4, &buffer, None);
        // seq 4 is covered by the buffer snapshot.
        assert_eq!(*log.lock(), vec![Event::Update(3), Event::Update(50)]);
    }

    #[test]
    fn completion_closes_and_stops_delivery() {
        let (sub, log) = recording(Executor::immediate());
        let buffer: VecDeque<u32> = [1, 2].into_iter().collect();
        sub.prime(7, &buffer, Some(Ok(true)));
        sub.enqueue(8, Event::Update(9));
        assert_eq!(
            *log.lock(),
            vec![Event::Update(1), Event::Update(2), Event::Completion(Ok(true))]
        );
        assert!(sub.is_closed());
    }

    #[test]
    fn closed_subscriber_ignores_events() {
        let (sub, log) = recording(Executor::immediate());
        sub.prime(0, &VecDeque::new(), None);
        sub.close();
        sub.enqueue(1, Event::Update(1));
        sub.enqueue(2, Event::Completion(Err(Error::msg("late"))));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn handler_panic_does_not_wedge_mailbox() {
        let count = Arc::new(Mutex::new(0_u32));
        let c = Arc::clone(&count);
        let sub: Arc<Subscriber<u32, bool>> = Arc::new(Subscriber::new(
            1,
            Executor::immediate(),
            None,
            "test".into(),
            Box::new(move |event| {
                if event == Event::Update(1) {
                    panic!("handler failure");
                }
                *c.lock() += 1;
            }),
        ));
        sub.prime(0, &VecDeque::new(), None);
        sub.enqueue(1, Event::Update(1));
        sub.enqueue(2, Event::Update(2));
        assert_eq!(*count.lock(), 1);
    }
}
