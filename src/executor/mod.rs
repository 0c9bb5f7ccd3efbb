//! Executors: where and when callbacks run.
//!
//! An [`Executor`] is a cheap, cloneable handle naming a scheduling strategy:
//!
//! - [`Executor::immediate`] runs the block on the caller's thread before
//!   `schedule` returns.
//! - A pool executor runs blocks on a [`ThreadPool`] with N-way parallelism.
//! - A lane executor runs at most `limit` blocks at a time on top of another
//!   executor. A lane of width one is serial: blocks run in FIFO order and
//!   never interleave.
//! - [`Executor::custom`] plugs in any [`Schedule`] implementation.
//!
//! Executors never drop work silently. Once the backing pool is shut down,
//! `schedule` returns [`ErrorKind::ExecutorShutdown`](crate::ErrorKind::ExecutorShutdown),
//! while blocks that were already queued still run.

mod lane;
mod pool;
mod timer;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::tracing_compat::error;
use crate::types::Priority;

pub use pool::{is_executor_thread, PoolOptions, ThreadPool};
pub(crate) use pool::PoolInner;

use lane::Lane;

/// A unit of scheduled work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Called with the target's error when a due delayed job is refused.
pub(crate) type Refusal = Box<dyn FnOnce(Error) + Send + 'static>;

/// Scheduling strategy supplied by a collaborator.
pub trait Schedule: Send + Sync + 'static {
    /// Enqueues `job`. Must either run it eventually or return an error.
    fn schedule(&self, priority: Priority, job: Job) -> Result<()>;

    /// Returns true if blocks never run in parallel.
    fn is_serial(&self) -> bool {
        false
    }
}

/// Handle naming a scheduling strategy.
#[derive(Clone)]
pub struct Executor {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    Immediate,
    Pool(Arc<PoolInner>),
    Lane(Arc<Lane>),
    Custom(Arc<dyn Schedule>),
}

impl Executor {
    /// Runs every block synchronously on the calling thread.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            inner: Inner::Immediate,
        }
    }

    /// Wraps a collaborator-provided strategy.
    #[must_use]
    pub fn custom(strategy: Arc<dyn Schedule>) -> Self {
        Self {
            inner: Inner::Custom(strategy),
        }
    }

    /// Builds a lane that runs at most `limit` blocks of `base` at a time.
    ///
    /// A `limit` of one makes the lane serial.
    #[must_use]
    pub fn lane(base: &Self, limit: usize, name: impl Into<String>) -> Self {
        Self {
            inner: Inner::Lane(Arc::new(Lane::new(base.clone(), limit, name.into()))),
        }
    }

    /// Builds a new serial lane on top of `base`.
    #[must_use]
    pub fn serial(base: &Self) -> Self {
        Self::lane(base, 1, "serial")
    }

    pub(crate) fn pool(inner: Arc<PoolInner>) -> Self {
        Self {
            inner: Inner::Pool(inner),
        }
    }

    /// Enqueues `block` with normal priority.
    pub fn execute<F>(&self, block: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(Priority::Normal, block)
    }

    /// Enqueues `block` under this executor's strategy.
    pub fn schedule<F>(&self, priority: Priority, block: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_job(priority, Box::new(block))
    }

    pub(crate) fn schedule_job(&self, priority: Priority, job: Job) -> Result<()> {
        match &self.inner {
            Inner::Immediate => {
                job();
                Ok(())
            }
            Inner::Pool(pool) => pool.submit(priority, job),
            Inner::Lane(lane) => lane.submit(priority, job),
            Inner::Custom(strategy) => strategy.schedule(priority, job),
        }
    }

    /// Runs `block` on this executor once `delay` has elapsed.
    ///
    /// Pool and lane executors use the pool's timer thread. The immediate
    /// executor sleeps on the calling thread. Custom executors get a helper
    /// thread that sleeps and then schedules.
    ///
    /// If the executor shuts down before the delay elapses, the job is
    /// refused and the refusal is logged. Use
    /// [`schedule_after_or_else`](Self::schedule_after_or_else) to observe it.
    pub fn schedule_after<F>(&self, delay: Duration, block: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_delayed(delay, Box::new(block), None)
    }

    /// Like [`schedule_after`](Self::schedule_after), but hands the error to
    /// `on_refused` when the executor refuses the job once it is due.
    pub fn schedule_after_or_else<F, R>(&self, delay: Duration, block: F, on_refused: R) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
        R: FnOnce(Error) + Send + 'static,
    {
        self.schedule_delayed(delay, Box::new(block), Some(Box::new(on_refused)))
    }

    fn schedule_delayed(&self, delay: Duration, job: Job, refused: Option<Refusal>) -> Result<()> {
        match &self.inner {
            Inner::Immediate => {
                std::thread::sleep(delay);
                job();
                Ok(())
            }
            Inner::Pool(pool) => pool.timer()?.schedule_at(delay, self.clone(), job, refused),
            Inner::Lane(lane) => match lane.base().pool_inner() {
                Some(pool) => pool.timer()?.schedule_at(delay, self.clone(), job, refused),
                None => self.sleep_then_schedule(delay, job, refused),
            },
            Inner::Custom(_) => self.sleep_then_schedule(delay, job, refused),
        }
    }

    fn sleep_then_schedule(&self, delay: Duration, job: Job, refused: Option<Refusal>) -> Result<()> {
        let target = self.clone();
        std::thread::Builder::new()
            .name("eventsync-delay".into())
            .spawn(move || {
                std::thread::sleep(delay);
                if let Err(e) = target.schedule_job(Priority::Normal, job) {
                    error!(error = %e, executor = ?target, "delayed job refused");
                    if let Some(refused) = refused {
                        refused(e);
                    }
                }
            })
            .map(|_| ())
            .map_err(|e| Error::internal("failed to spawn delay thread").with_source(e))
    }

    /// Returns true if blocks scheduled here never run in parallel.
    #[must_use]
    pub fn is_serial(&self) -> bool {
        match &self.inner {
            Inner::Immediate => false,
            Inner::Pool(pool) => pool.max_threads() == 1,
            Inner::Lane(lane) => lane.limit() == 1,
            Inner::Custom(strategy) => strategy.is_serial(),
        }
    }

    /// Returns true once the pool underneath this executor refuses work.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        match &self.inner {
            Inner::Immediate | Inner::Custom(_) => false,
            Inner::Pool(pool) => pool.is_shutdown(),
            Inner::Lane(lane) => lane.base().is_shutdown(),
        }
    }

    fn pool_inner(&self) -> Option<&Arc<PoolInner>> {
        match &self.inner {
            Inner::Pool(pool) => Some(pool),
            Inner::Lane(lane) => lane.base().pool_inner(),
            Inner::Immediate | Inner::Custom(_) => None,
        }
    }

    /// Returns true for [`Executor::immediate`].
    #[must_use]
    pub const fn is_immediate(&self) -> bool {
        matches!(self.inner, Inner::Immediate)
    }

    /// Returns true if both handles name the same strategy instance.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Inner::Immediate, Inner::Immediate) => true,
            (Inner::Pool(a), Inner::Pool(b)) => Arc::ptr_eq(a, b),
            (Inner::Lane(a), Inner::Lane(b)) => Arc::ptr_eq(a, b),
            (Inner::Custom(a), Inner::Custom(b)) => {
                Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
            }
            _ => false,
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::immediate()
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Immediate => f.write_str("Executor::Immediate"),
            Inner::Pool(pool) => f
                .debug_struct("Executor::Pool")
                .field("max_threads", &pool.max_threads())
                .finish(),
            Inner::Lane(lane) => f
                .debug_struct("Executor::Lane")
                .field("name", &lane.name())
                .field("limit", &lane.limit())
                .finish(),
            Inner::Custom(_) => f.write_str("Executor::Custom"),
        }
    }
}
