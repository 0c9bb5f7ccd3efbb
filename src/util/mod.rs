//! Internal utilities.
//!
//! - [`container`]: the lock-free CAS head every source is built on
//! - [`arena`]: generational slots for cleanup registrations

pub mod arena;
pub mod container;

pub use arena::{Arena, ArenaIndex};
pub use container::{HeadChange, ThreadSafeContainer};
