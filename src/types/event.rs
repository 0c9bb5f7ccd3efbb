//! The unit of delivery on a channel.

use super::fallible::Fallible;

/// One item emitted by an event source.
///
/// A source emits zero or more `Update`s followed by exactly one `Completion`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event<U, S> {
    /// An intermediate value.
    Update(U),
    /// The terminal result.
    Completion(Fallible<S>),
}

impl<U, S> Event<U, S> {
    /// Builds a successful completion event.
    #[must_use]
    pub fn success(value: S) -> Self {
        Self::Completion(Ok(value))
    }

    /// Builds a failed completion event.
    #[must_use]
    pub fn failure(error: crate::Error) -> Self {
        Self::Completion(Err(error))
    }

    /// Returns true for the terminal event.
    #[must_use]
    pub const fn is_completion(&self) -> bool {
        matches!(self, Self::Completion(_))
    }

    /// Returns the update, if this is one.
    #[must_use]
    pub fn into_update(self) -> Option<U> {
        match self {
            Self::Update(u) => Some(u),
            Self::Completion(_) => None,
        }
    }
}
