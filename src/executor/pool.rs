//! Thread pool backing the concurrent executors.
//!
//! Threads are spawned lazily up to `max_threads`; threads above
//! `min_threads` retire after sitting idle for `idle_timeout`. Work is kept in
//! one lock-free queue per [`Priority`] and workers always drain the highest
//! non-empty queue first.
//!
//! Shutdown is graceful: new work is refused with
//! [`ErrorKind::ExecutorShutdown`], queued work still runs, and workers exit
//! once the queues are empty.

use std::cell::Cell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use super::timer::TimerService;
use super::{Executor, Job};
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::{debug, error};
use crate::types::fallible::panic_message;
use crate::types::Priority;

/// Default idle timeout before retiring excess threads.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

thread_local! {
    static ON_EXECUTOR: Cell<bool> = const { Cell::new(false) };
}

/// Returns true when called from a pool worker thread.
///
/// Blocking waits use this to warn about likely deadlocks.
#[must_use]
pub fn is_executor_thread() -> bool {
    ON_EXECUTOR.with(Cell::get)
}

/// Configuration options for a [`ThreadPool`].
#[derive(Clone)]
pub struct PoolOptions {
    /// Threads kept alive even when idle.
    pub min_threads: usize,
    /// Upper bound on worker threads.
    pub max_threads: usize,
    /// Idle timeout before retiring threads above `min_threads`.
    pub idle_timeout: Duration,
    /// Worker thread name prefix.
    pub thread_name_prefix: String,
    /// Callback when a thread starts.
    pub on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Callback when a thread stops.
    pub on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_threads: 1,
            max_threads: 4,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: "eventsync".to_string(),
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("min_threads", &self.min_threads)
            .field("max_threads", &self.max_threads)
            .field("idle_timeout", &self.idle_timeout)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}

/// Owning handle of a worker pool. Dropping it shuts the pool down.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("min_threads", &self.inner.min_threads)
            .field("max_threads", &self.inner.max_threads)
            .field("active_threads", &self.active_threads())
            .field("pending", &self.pending_count())
            .finish()
    }
}

pub(crate) struct PoolInner {
    min_threads: usize,
    max_threads: usize,
    active_threads: AtomicUsize,
    busy_threads: AtomicUsize,
    pending_count: AtomicUsize,
    next_thread_id: AtomicUsize,
    /// One queue per priority, highest first.
    queues: [SegQueue<Job>; 3],
    shutdown: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
    idle_timeout: Duration,
    thread_name_prefix: String,
    on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
    thread_handles: Mutex<Vec<JoinHandle<()>>>,
    timer: OnceLock<TimerService>,
}

impl ThreadPool {
    /// Creates a pool and eagerly starts `min_threads` workers.
    #[must_use]
    pub fn new(options: PoolOptions) -> Self {
        let max_threads = options.max_threads.max(options.min_threads).max(1);
        let inner = Arc::new(PoolInner {
            min_threads: options.min_threads,
            max_threads,
            active_threads: AtomicUsize::new(0),
            busy_threads: AtomicUsize::new(0),
            pending_count: AtomicUsize::new(0),
            next_thread_id: AtomicUsize::new(0),
            queues: [SegQueue::new(), SegQueue::new(), SegQueue::new()],
            shutdown: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            idle_timeout: options.idle_timeout,
            thread_name_prefix: options.thread_name_prefix,
            on_thread_start: options.on_thread_start,
            on_thread_stop: options.on_thread_stop,
            thread_handles: Mutex::new(Vec::new()),
            timer: OnceLock::new(),
        });
        for _ in 0..inner.min_threads {
            if let Err(e) = spawn_worker(&inner) {
                error!(error = %e, "failed to start pool worker");
            }
        }
        Self { inner }
    }

    /// Returns an executor that schedules onto this pool.
    #[must_use]
    pub fn executor(&self) -> Executor {
        Executor::pool(Arc::clone(&self.inner))
    }

    /// Returns the number of queued jobs.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }

    /// Returns the number of live worker threads.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Relaxed)
    }

    /// Returns the number of workers currently running a job.
    #[must_use]
    pub fn busy_threads(&self) -> usize {
        self.inner.busy_threads.load(Ordering::Relaxed)
    }

    /// Returns `true` once shutdown has started.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    /// Refuses new work. Queued work still runs.
    pub fn shutdown(&self) {
        self.inner.begin_shutdown();
    }

    /// Shuts down and waits for all workers to exit.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        // No deadline when `timeout` overflows an Instant.
        let deadline = Instant::now().checked_add(timeout);
        while self.inner.active_threads.load(Ordering::Acquire) > 0 {
            let remaining = deadline.map_or(Duration::MAX, |d| {
                d.saturating_duration_since(Instant::now())
            });
            if remaining.is_zero() {
                return false;
            }
            self.inner.notify_all();
            thread::sleep(Duration::from_millis(5).min(remaining));
        }
        let handles: Vec<_> = self.inner.thread_handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        true
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Workers may be the ones dropping the last runtime handle.
        if is_executor_thread() {
            self.shutdown();
        } else {
            let _ = self.shutdown_and_wait(Duration::from_secs(5));
        }
    }
}

impl PoolInner {
    pub(crate) fn submit(self: &Arc<Self>, priority: Priority, job: Job) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::executor_shutdown(self.thread_name_prefix.as_str()));
        }
        self.queues[priority.index()].push(job);
        self.pending_count.fetch_add(1, Ordering::Relaxed);
        self.maybe_spawn()?;
        let _guard = self.mutex.lock();
        self.condvar.notify_one();
        Ok(())
    }

    pub(crate) fn max_threads(&self) -> usize {
        self.max_threads
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn timer(&self) -> Result<&TimerService> {
        if self.is_shutdown() {
            return Err(Error::executor_shutdown(self.thread_name_prefix.as_str()));
        }
        Ok(self
            .timer
            .get_or_init(|| TimerService::start(&self.thread_name_prefix)))
    }

    fn begin_shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(prefix = %self.thread_name_prefix, "pool shutting down");
        if let Some(timer) = self.timer.get() {
            timer.shutdown();
        }
        self.notify_all();
    }

    fn notify_all(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }

    fn maybe_spawn(self: &Arc<Self>) -> Result<()> {
        let active = self.active_threads.load(Ordering::Relaxed);
        let busy = self.busy_threads.load(Ordering::Relaxed);
        let pending = self.pending_count.load(Ordering::Relaxed);
        if active < self.max_threads && busy >= active && pending > 0 {
            if let Err(e) = spawn_worker(self) {
                // Existing workers will still pick the job up.
                if active == 0 {
                    return Err(e);
                }
                error!(error = %e, "failed to grow pool");
            }
        }
        Ok(())
    }

    fn pop(&self) -> Option<Job> {
        self.queues.iter().find_map(SegQueue::pop)
    }

    fn queues_empty(&self) -> bool {
        self.queues.iter().all(SegQueue::is_empty)
    }
}

fn spawn_worker(inner: &Arc<PoolInner>) -> Result<()> {
    let worker = Arc::clone(inner);
    inner.active_threads.fetch_add(1, Ordering::Relaxed);
    let id = inner.next_thread_id.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-worker-{id}", inner.thread_name_prefix);
    let spawned = thread::Builder::new().name(name).spawn(move || {
        ON_EXECUTOR.with(|flag| flag.set(true));
        if let Some(callback) = &worker.on_thread_start {
            callback();
        }
        worker_loop(&worker);
        if let Some(callback) = &worker.on_thread_stop {
            callback();
        }
        worker.active_threads.fetch_sub(1, Ordering::AcqRel);
    });
    match spawned {
        Ok(handle) => {
            inner.thread_handles.lock().push(handle);
            Ok(())
        }
        Err(e) => {
            inner.active_threads.fetch_sub(1, Ordering::Relaxed);
            Err(Error::new(ErrorKind::Internal)
                .with_message("failed to spawn pool worker")
                .with_source(e))
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(job) = inner.pop() {
            inner.pending_count.fetch_sub(1, Ordering::Relaxed);
            inner.busy_threads.fetch_add(1, Ordering::Relaxed);
            if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                error!(panic = %panic_message(payload.as_ref()), "scheduled job panicked");
            }
            inner.busy_threads.fetch_sub(1, Ordering::Relaxed);
            continue;
        }

        if inner.is_shutdown() {
            break;
        }

        let mut guard = inner.mutex.lock();
        // Re-check under the lock so a push + notify between pop and park is not missed.
        if !inner.queues_empty() || inner.is_shutdown() {
            continue;
        }
        if inner.active_threads.load(Ordering::Relaxed) > inner.min_threads {
            let timed_out = inner
                .condvar
                .wait_for(&mut guard, inner.idle_timeout)
                .timed_out();
            if timed_out
                && inner.queues_empty()
                && inner.active_threads.load(Ordering::Relaxed) > inner.min_threads
            {
                break;
            }
        } else {
            inner.condvar.wait(&mut guard);
        }
    }
}
