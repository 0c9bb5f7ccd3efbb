//! Width-limited lanes on top of another executor.
//!
//! A lane queues blocks in FIFO order and keeps at most `limit` drainers
//! scheduled on its base executor. With `limit == 1` blocks never overlap,
//! which is what serial-unique executors and accumulator-owning combinators
//! rely on.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Executor, Job};
use crate::error::{Error, Result};
use crate::tracing_compat::error;
use crate::types::fallible::panic_message;
use crate::types::Priority;

/// Blocks a drainer runs before yielding its base thread.
const DRAIN_BATCH: usize = 64;

pub(super) struct Lane {
    base: Executor,
    limit: usize,
    name: String,
    state: Mutex<LaneState>,
}

struct LaneState {
    queue: VecDeque<Job>,
    running: usize,
}

impl Lane {
    pub(super) fn new(base: Executor, limit: usize, name: String) -> Self {
        Self {
            base,
            limit: limit.max(1),
            name,
            state: Mutex::new(LaneState {
                queue: VecDeque::new(),
                running: 0,
            }),
        }
    }

    pub(super) fn limit(&self) -> usize {
        self.limit
    }

    pub(super) fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn base(&self) -> &Executor {
        &self.base
    }

    pub(super) fn submit(self: &Arc<Self>, priority: Priority, job: Job) -> Result<()> {
        if self.base.is_shutdown() {
            return Err(Error::executor_shutdown(self.name.as_str()));
        }
        let start = {
            let mut state = self.state.lock();
            state.queue.push_back(job);
            if state.running < self.limit {
                state.running += 1;
                true
            } else {
                false
            }
        };
        if start {
            self.start_drainer(priority);
        }
        Ok(())
    }

    fn start_drainer(self: &Arc<Self>, priority: Priority) {
        if !self.hand_off(priority) {
            self.drain(priority);
        }
    }

    /// Schedules a drainer on the base. Returns false if the base refused.
    fn hand_off(self: &Arc<Self>, priority: Priority) -> bool {
        let lane = Arc::clone(self);
        match self
            .base
            .schedule_job(priority, Box::new(move || lane.drain(priority)))
        {
            Ok(()) => true,
            Err(e) => {
                // The jobs are already queued; run them here rather than lose them.
                error!(lane = %self.name, error = %e, "base executor refused drainer");
                false
            }
        }
    }

    fn drain(self: &Arc<Self>, priority: Priority) {
        let mut budget = DRAIN_BATCH;
        loop {
            let job = {
                let mut state = self.state.lock();
                if let Some(job) = state.queue.pop_front() {
                    job
                } else {
                    state.running -= 1;
                    return;
                }
            };
            if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                error!(lane = %self.name, panic = %panic_message(payload.as_ref()), "lane job panicked");
            }
            budget -= 1;
            if budget == 0 {
                budget = DRAIN_BATCH;
                // Yield the base thread; the slot stays reserved for the next drainer.
                if !self.base.is_immediate() && self.hand_off(priority) {
                    return;
                }
            }
        }
    }
}
