//! Timer thread for delayed scheduling.
//!
//! Deadlines sit in a min-heap; the timer thread sleeps until the earliest one
//! and hands due jobs to their target executor. Ties fire in insertion order.
//! On shutdown every pending job is handed over at once. Targets that are
//! already shut down refuse them; the refusal is logged and passed to the
//! entry's refusal hook, if it has one.
//!
//! A delay too large to represent as an [`Instant`] never fires on its own.
//! It still gets flushed at shutdown.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::{Executor, Job, Refusal};
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::{debug, error};
use crate::types::Priority;

struct TimerEntry {
    /// `None` when the delay overflows `Instant`.
    deadline: Option<Instant>,
    /// Insertion order, for FIFO among equal deadlines.
    generation: u64,
    target: Executor,
    job: Job,
    refused: Option<Refusal>,
}

impl TimerEntry {
    /// Finite deadlines sort before unbounded ones.
    fn key(&self) -> (bool, Option<Instant>, u64) {
        (self.deadline.is_none(), self.deadline, self.generation)
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    next_generation: u64,
    shutdown: bool,
    running: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

pub(crate) struct TimerService {
    shared: Arc<TimerShared>,
}

impl TimerService {
    pub(crate) fn start(prefix: &str) -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState::default()),
            condvar: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("{prefix}-timer"))
            .spawn(move || timer_loop(&worker));
        match spawned {
            Ok(_) => shared.state.lock().running = true,
            Err(e) => {
                error!(error = %e, "failed to start timer thread");
            }
        }
        Self { shared }
    }

    pub(crate) fn schedule_at(
        &self,
        delay: Duration,
        target: Executor,
        job: Job,
        refused: Option<Refusal>,
    ) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(Error::executor_shutdown("timer"));
        }
        if !state.running {
            return Err(Error::new(ErrorKind::Internal).with_message("timer thread not running"));
        }
        let generation = state.next_generation;
        state.next_generation += 1;
        state.heap.push(TimerEntry {
            deadline: Instant::now().checked_add(delay),
            generation,
            target,
            job,
            refused,
        });
        drop(state);
        self.shared.condvar.notify_one();
        Ok(())
    }

    pub(crate) fn shutdown(&self) {
        self.shared.state.lock().shutdown = true;
        self.shared.condvar.notify_one();
    }
}

fn timer_loop(shared: &TimerShared) {
    let mut state = shared.state.lock();
    loop {
        let due = pop_due(&mut state, Instant::now());
        if !due.is_empty() {
            MutexGuard::unlocked(&mut state, || dispatch(due));
            continue;
        }
        if state.shutdown {
            break;
        }
        match state.heap.peek().and_then(|entry| entry.deadline) {
            Some(deadline) => {
                let _ = shared.condvar.wait_until(&mut state, deadline);
            }
            None => shared.condvar.wait(&mut state),
        }
    }
    debug!("timer thread exiting");
}

fn pop_due(state: &mut TimerState, now: Instant) -> Vec<TimerEntry> {
    let flush = state.shutdown;
    let mut due = Vec::new();
    while state
        .heap
        .peek()
        .is_some_and(|entry| flush || entry.deadline.is_some_and(|d| d <= now))
    {
        if let Some(entry) = state.heap.pop() {
            due.push(entry);
        }
    }
    due
}

fn dispatch(due: Vec<TimerEntry>) {
    for entry in due {
        if let Err(e) = entry.target.schedule_job(Priority::Normal, entry.job) {
            error!(error = %e, executor = ?entry.target, "delayed job refused");
            if let Some(refused) = entry.refused {
                refused(e);
            }
        }
    }
}
