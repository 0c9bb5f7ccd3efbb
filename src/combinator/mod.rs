//! Combinators over channels.
//!
//! Every combinator owns one upstream subscription and one downstream
//! producer, and hands back the downstream's read side:
//!
//! - [`map`]: `map`, `map_event`, `map_completion`, `map_success`, `filter`,
//!   `flat_map` (to `Option`), `unwrapped`
//! - [`flat_map`](mod@flat_map): `flat_map_iter` and `flat_map_source`
//! - [`fold`]: `reduce`, `reduce_async`, `fold`
//! - [`cursor`](mod@cursor): cursor-driven pagination
//!
//! Every operator except `unwrapped` has a contextual `*_in` variant that
//! binds the derived channel to an
//! [`ExecutionContext`](crate::cx::ExecutionContext). Handlers receive the
//! context and skip events once it is gone. The derived channel fails with
//! [`ErrorKind::ContextDropped`](crate::ErrorKind::ContextDropped) when the
//! context's release pool drains.
//!
//! A failure at any stage becomes the derived channel's completion and halts
//! further updates. Transform panics surface as
//! [`ErrorKind::Internal`](crate::ErrorKind::Internal) failures.

pub mod cursor;
pub(crate) mod derive;
pub mod flat_map;
pub mod fold;
pub mod map;

pub use cursor::{cursor, cursor_in};
pub use derive::DeriveOptions;
pub use flat_map::InnerSource;

use crate::channel::Channel;
use crate::source::EventSource;
use crate::types::{Event, Value};
use derive::{Downstream, Plan};

/// Wires `make`'s handler from `channel` into a fresh derived channel.
fn derive_channel<U, S, V, T, H>(
    channel: &Channel<U, S>,
    plan: &Plan,
    make: impl FnOnce(Downstream<V, T>) -> H,
) -> Channel<V, T>
where
    U: Value,
    S: Value,
    V: Value,
    T: Value,
    H: FnMut(Event<U, S>) + Send + 'static,
{
    let down = plan.open::<V, T>(channel.label(), channel.capacity());
    let handler = make(down.clone());
    plan.attach(channel, &down, handler);
    Channel::from_core(down.into_core())
}
