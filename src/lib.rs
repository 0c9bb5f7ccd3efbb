//! eventsync: lock-free futures, replaying channels and executor-scoped
//! combinators for in-process coordination.
//!
//! # Overview
//!
//! eventsync has two eventual-value primitives. A [`Future`] completes exactly
//! once. A [`Channel`] emits any number of updates and then exactly one
//! completion. Both are read views of a writable handle ([`Promise`] and
//! [`Producer`]) and both deliver to subscribers through an [`Executor`] the
//! subscriber chooses.
//!
//! # Core Guarantees
//!
//! - **Exactly-once completion**: the first completion wins; later attempts
//!   return `false` and never re-trigger handlers
//! - **Ordered fan-out**: every subscriber sees its source's events in
//!   emission order, even when delivered on a concurrent executor
//! - **Replay**: late subscribers receive buffered updates and the stored
//!   completion
//! - **Safe teardown**: subscriptions bound to an [`ExecutionContext`] stop
//!   before the context's resources are released
//! - **No silent drops**: executors that refuse work say so
//!
//! # Module Structure
//!
//! - [`types`]: `Fallible`, events, cancellation reasons, policies
//! - [`executor`]: immediate, pool, lane and custom executors
//! - [`future`]: `Future`/`Promise` and their combinators
//! - [`channel`]: `Channel`/`Producer` and buffering
//! - [`combinator`]: channel combinators (map, flat_map, fold, cursor)
//! - [`cancel`]: cancellation tokens
//! - [`cx`]: execution contexts and release pools
//! - [`source`]: the `EventSource` trait and subscriptions
//! - [`util`]: the lock-free container and arenas
//! - [`config`] / [`runtime`]: runtime configuration and default executors
//! - [`error`]: error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod cancel;
pub mod channel;
pub mod combinator;
pub mod config;
pub mod cx;
pub mod error;
pub mod executor;
pub mod future;
pub mod runtime;
pub mod source;
pub mod tracing_compat;
pub mod types;
pub mod util;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

// Re-exports for convenient access to core types
pub use cancel::{CancelListener, CancellationToken, ListenerId};
pub use channel::{producer_on, Channel, Producer};
pub use combinator::{cursor, cursor_in, DeriveOptions, InnerSource};
pub use config::{ConfigError, RuntimeConfig};
pub use cx::{ContextRef, ErrorSink, ExecutionContext, ReleasePool, Scope};
pub use error::{Error, ErrorCategory, ErrorKind, Recoverability, Result, ResultExt};
pub use executor::{Executor, PoolOptions, Schedule, ThreadPool};
pub use future::{after, future_on, join_all, promise_on, reduce, Future, Promise};
pub use runtime::{Runtime, RuntimeBuilder};
pub use source::{EventSource, Source, Subscription};
pub use types::{
    fallible, BufferSize, CancelKind, CancelReason, Concurrency, Event, Execution, Fallible,
    FallibleExt, Priority, Value,
};
pub use util::{HeadChange, ThreadSafeContainer};
