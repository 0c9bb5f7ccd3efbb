//! Lock-free single-slot container.
//!
//! A [`ThreadSafeContainer`] holds one optional reference to an immutable node.
//! Writers never mutate the node in place; they compute a replacement from the
//! current head and install it with a compare-and-swap, retrying against the
//! fresh head whenever another writer got there first.
//!
//! Every event source keeps its whole state (subscriber list, replay buffer,
//! completion) behind one of these, so registration, emission and completion
//! are linearized by the CAS alone.
//!
//! Holding the loaded `Arc` across the CAS keeps the old node alive, so a
//! pointer comparison is enough to detect a concurrent writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::error::{Error, ErrorKind, Result};

/// What a transform wants done with the current head.
#[derive(Debug)]
pub enum HeadChange<T> {
    /// Leave the head as is.
    Keep,
    /// Clear the head.
    Remove,
    /// Install a new head.
    Replace(Arc<T>),
}

/// Outcome of a head update.
#[derive(Debug)]
pub struct HeadUpdate<T> {
    /// Head the winning transform saw.
    pub old: Option<Arc<T>>,
    /// Head after the update.
    pub new: Option<Arc<T>>,
    /// False when the transform returned [`HeadChange::Keep`].
    pub changed: bool,
}

/// Lock-free container of one immutable head node.
#[derive(Debug)]
pub struct ThreadSafeContainer<T> {
    head: ArcSwapOption<T>,
    retries: AtomicU64,
}

impl<T> Default for ThreadSafeContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ThreadSafeContainer<T> {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: ArcSwapOption::empty(),
            retries: AtomicU64::new(0),
        }
    }

    /// Creates a container holding `head`.
    #[must_use]
    pub fn with_head(head: Arc<T>) -> Self {
        Self {
            head: ArcSwapOption::new(Some(head)),
            retries: AtomicU64::new(0),
        }
    }

    /// Returns a snapshot of the current head.
    #[must_use]
    pub fn head(&self) -> Option<Arc<T>> {
        self.head.load_full()
    }

    /// Number of CAS attempts that lost to a concurrent writer.
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Applies `transform` to the current head until one attempt commits.
    ///
    /// `transform` may run several times and must be free of side effects
    /// other than building the replacement.
    pub fn update_head<F>(&self, mut transform: F) -> HeadUpdate<T>
    where
        F: FnMut(Option<&Arc<T>>) -> HeadChange<T>,
    {
        loop {
            if let Some(update) = self.attempt(&mut transform) {
                return update;
            }
            std::hint::spin_loop();
        }
    }

    /// Like [`update_head`](Self::update_head) but gives up after `max_attempts`.
    ///
    /// Returns [`ErrorKind::ContentionExceeded`] when every attempt lost.
    pub fn try_update_head<F>(&self, mut transform: F, max_attempts: usize) -> Result<HeadUpdate<T>>
    where
        F: FnMut(Option<&Arc<T>>) -> HeadChange<T>,
    {
        for _ in 0..max_attempts {
            if let Some(update) = self.attempt(&mut transform) {
                return Ok(update);
            }
        }
        Err(Error::new(ErrorKind::ContentionExceeded)
            .with_message(format!("head update lost {max_attempts} times")))
    }

    fn attempt<F>(&self, transform: &mut F) -> Option<HeadUpdate<T>>
    where
        F: FnMut(Option<&Arc<T>>) -> HeadChange<T>,
    {
        let current = self.head.load_full();
        let new = match transform(current.as_ref()) {
            HeadChange::Keep => {
                return Some(HeadUpdate {
                    new: current.clone(),
                    old: current,
                    changed: false,
                })
            }
            HeadChange::Remove => None,
            HeadChange::Replace(node) => Some(node),
        };
        let previous = self.head.compare_and_swap(&current, new.clone());
        if same_node(&previous, &current) {
            Some(HeadUpdate {
                old: current,
                new,
                changed: true,
            })
        } else {
            self.retries.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

fn same_node<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}
