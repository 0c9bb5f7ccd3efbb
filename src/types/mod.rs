//! Core value types.
//!
//! - [`fallible`]: `Fallible<T>` and its combinators
//! - [`event`]: the update/completion event delivered to subscribers
//! - [`cancel`]: cancellation reason and kind types
//! - [`policy`]: buffering, concurrency and priority policies

pub mod cancel;
pub mod event;
pub mod fallible;
pub mod policy;

pub use cancel::{CancelKind, CancelReason};
pub use event::Event;
pub use fallible::{fallible, flatten, zip2, zip3, Fallible, FallibleExt};
pub use policy::{BufferSize, Concurrency, Execution, Priority, UNRESTRICTED_THREADS};

/// Bound shared by every value that travels through a future or channel.
///
/// Values are cloned once per subscriber, so they should be cheap to clone
/// (wrap large payloads in `Arc`).
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}
