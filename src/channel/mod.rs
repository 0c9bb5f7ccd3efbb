//! Multi-value event streams.
//!
//! A [`Producer`] is the write side of a stream: it pushes zero or more
//! updates and then exactly one completion. A [`Channel`] is the read-only
//! view handed to consumers. Both share one lock-free core, so any number of
//! threads may update, subscribe and detach concurrently.
//!
//! # Buffering
//!
//! A producer keeps the last `capacity` updates and replays them to late
//! subscribers before any live update:
//!
//! - [`BufferSize::None`]: live updates only
//! - [`BufferSize::Fixed`]: the last `n` updates
//! - [`BufferSize::Default`]: one update for a fresh producer; derived
//!   channels inherit their upstream's capacity
//!
//! # Example
//!
//! ```ignore
//! let producer = Producer::<u32, bool>::new(BufferSize::Fixed(2));
//! producer.update_all([1, 2, 3]);
//! producer.succeed(true);
//!
//! let (updates, done) = producer.channel().wait_for_all();
//! assert_eq!(updates, vec![2, 3]);
//! ```

mod producer;

pub use producer::{producer_on, Channel, Producer, DEFAULT_BUFFER_SIZE};
