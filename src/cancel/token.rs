//! Cooperative cancellation tokens.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::future::{Future, Promise};
use crate::tracing_compat::debug;
use crate::types::CancelReason;

/// Trait for cancellation listeners.
pub trait CancelListener: Send + Sync {
    /// Called once, when the token fires.
    fn on_cancel(&self, reason: &CancelReason);
}

impl<F> CancelListener for F
where
    F: Fn(&CancelReason) + Send + Sync,
{
    fn on_cancel(&self, reason: &CancelReason) {
        self(reason);
    }
}

/// Identifies a registered listener so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct TokenState {
    cancelled: AtomicBool,
    reason: RwLock<Option<CancelReason>>,
    next_listener: AtomicU64,
    children: RwLock<Vec<CancellationToken>>,
    listeners: RwLock<Vec<(u64, Box<dyn CancelListener>)>>,
}

/// An observable, one-way cancellation flag.
///
/// Clones share state. The first [`cancel`](Self::cancel) wins; listeners
/// and child tokens are notified exactly once, outside of any lock.
#[derive(Clone)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                reason: RwLock::new(None),
                next_listener: AtomicU64::new(0),
                children: RwLock::new(Vec::new()),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.state.reason.read().clone()
    }

    /// Cancels with [`CancelKind::User`](crate::CancelKind::User).
    #[allow(clippy::must_use_candidate)]
    pub fn cancel(&self) -> bool {
        self.cancel_with(&CancelReason::default())
    }

    /// Requests cancellation with the given reason.
    ///
    /// Returns true if this call triggered the cancellation (first caller wins).
    #[allow(clippy::must_use_candidate)]
    pub fn cancel_with(&self, reason: &CancelReason) -> bool {
        if self
            .state
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        *self.state.reason.write() = Some(reason.clone());
        debug!(reason = %reason, "token cancelled");

        let listeners = std::mem::take(&mut *self.state.listeners.write());
        for (_, listener) in listeners {
            listener.on_cancel(reason);
        }

        let children = std::mem::take(&mut *self.state.children.write());
        let parent_reason = CancelReason::parent_cancelled();
        for child in children {
            child.cancel_with(&parent_reason);
        }
        true
    }

    /// Creates a token that is cancelled whenever this one is.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        // cancel() sets the flag before draining children, so observing
        // !cancelled under the write lock means the drain will see the child.
        let mut children = self.state.children.write();
        if self.is_cancelled() {
            drop(children);
            child.cancel_with(&CancelReason::parent_cancelled());
        } else {
            children.push(child.clone());
        }
        child
    }

    /// Adds a listener. Runs it immediately if already cancelled.
    pub fn add_listener(&self, listener: impl CancelListener + 'static) -> ListenerId {
        let id = self.state.next_listener.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.state.listeners.write();
        if self.is_cancelled() {
            drop(listeners);
            let reason = self.reason().unwrap_or_default();
            listener.on_cancel(&reason);
        } else {
            listeners.push((id, Box::new(listener)));
        }
        ListenerId(id)
    }

    /// Removes a listener that has not fired yet. Returns false otherwise.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.state.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id.0);
        listeners.len() != before
    }

    /// A future that succeeds with the reason once the token fires.
    #[must_use]
    pub fn future(&self) -> Future<CancelReason> {
        let promise = Promise::labeled("cancellation");
        let completer = promise.clone();
        self.add_listener(move |reason: &CancelReason| {
            completer.succeed(reason.clone());
        });
        promise.future()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
