//! Release pools and the liveness scopes they hand out.
//!
//! A [`ReleasePool`] is owned by an execution context. Subscriptions made
//! "through" the context register a cleanup with the pool and keep a cheap
//! [`Scope`] handle whose liveness they check before every callback. When the
//! pool is drained (explicitly, or because the context is dropped) the scope
//! goes dead first and then every registered cleanup runs exactly once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::tracing_compat::debug;
use crate::util::{Arena, ArenaIndex};

type Cleanup = Box<dyn FnOnce() + Send + 'static>;

struct ScopeState {
    alive: AtomicBool,
    cleanups: Mutex<Arena<Cleanup>>,
}

/// Liveness handle of a [`ReleasePool`].
#[derive(Clone)]
pub struct Scope {
    state: Arc<ScopeState>,
}

impl Scope {
    /// Returns false once the owning pool has been drained.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state.alive.load(Ordering::Acquire)
    }

    /// Registers `cleanup` to run when the pool drains.
    ///
    /// Runs `cleanup` right away and returns `None` if the pool is already
    /// drained.
    pub fn notify_drop<F>(&self, cleanup: F) -> Option<ArenaIndex>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut cleanups = self.state.cleanups.lock();
        if self.is_alive() {
            return Some(cleanups.insert(Box::new(cleanup)));
        }
        drop(cleanups);
        cleanup();
        None
    }

    /// Unregisters a cleanup without running it. Returns false if it already
    /// ran or was removed.
    pub fn forget(&self, slot: ArenaIndex) -> bool {
        self.state.cleanups.lock().remove(slot).is_some()
    }

    /// Number of cleanups waiting for the drain.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.cleanups.lock().len()
    }

    fn drain(&self) {
        let cleanups = {
            let mut table = self.state.cleanups.lock();
            if !self.state.alive.swap(false, Ordering::AcqRel) {
                return;
            }
            table.drain()
        };
        debug!(count = cleanups.len(), "release pool draining");
        for cleanup in cleanups {
            cleanup();
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("alive", &self.is_alive())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Owner of a context's cleanups. Drains on drop.
pub struct ReleasePool {
    scope: Scope,
}

impl Default for ReleasePool {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleasePool {
    /// Creates a live pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scope: Scope {
                state: Arc::new(ScopeState {
                    alive: AtomicBool::new(true),
                    cleanups: Mutex::new(Arena::new()),
                }),
            },
        }
    }

    /// Returns a liveness handle for this pool.
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope.clone()
    }

    /// Returns false once drained.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.scope.is_alive()
    }

    /// Registers custom cleanup. See [`Scope::notify_drop`].
    pub fn notify_drop<F>(&self, cleanup: F) -> Option<ArenaIndex>
    where
        F: FnOnce() + Send + 'static,
    {
        self.scope.notify_drop(cleanup)
    }

    /// Marks the scope dead and runs every registered cleanup once.
    ///
    /// Later calls do nothing.
    pub fn drain(&self) {
        self.scope.drain();
    }
}

impl Drop for ReleasePool {
    fn drop(&mut self) {
        self.scope.drain();
    }
}

impl fmt::Debug for ReleasePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleasePool")
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn cleanups_run_once_on_drop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let pool = ReleasePool::new();
        let scope = pool.scope();
        for _ in 0..3 {
            let r = Arc::clone(&runs);
            pool.notify_drop(move || {
                r.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(scope.pending(), 3);
        drop(pool);
        assert!(!scope.is_alive());
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        scope.drain();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn late_registration_runs_immediately() {
        let pool = ReleasePool::new();
        pool.drain();
        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        assert!(pool
            .notify_drop(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn forgotten_cleanup_does_not_run() {
        let pool = ReleasePool::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        let slot = pool
            .notify_drop(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .expect("live pool");
        assert!(pool.scope().forget(slot));
        assert!(!pool.scope().forget(slot));
        pool.drain();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cleanup_may_touch_scope() {
        let pool = ReleasePool::new();
        let scope = pool.scope();
        let seen_alive = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&seen_alive);
        pool.notify_drop(move || flag.store(scope.is_alive(), Ordering::SeqCst));
        pool.drain();
        assert!(!seen_alive.load(Ordering::SeqCst));
    }
}
