//! Cooperative cancellation.
//!
//! A [`CancellationToken`] handed to a combinator fails the derived producer
//! with [`ErrorKind::Cancelled`](crate::ErrorKind::Cancelled) on its first
//! signal and detaches it from its upstream. Cancellation flows from parent
//! tokens to children and from upstream sources to derived ones, never back.

mod token;

pub use token::{CancelListener, CancellationToken, ListenerId};
