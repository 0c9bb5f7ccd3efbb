//! Success-or-failure values and their combinators.
//!
//! [`Fallible<T>`] is a plain `Result<T, Error>`; [`FallibleExt`] adds the
//! recovery and inspection helpers futures and channels use on completions.

use std::any::{type_name, Any};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{Error, ErrorKind};

/// A completed result: a value or the error that prevented it.
pub type Fallible<T> = Result<T, Error>;

/// Extra combinators on [`Fallible`].
pub trait FallibleExt<T>: Sized {
    /// Yields the success value, returning the wrapped error otherwise.
    #[allow(clippy::missing_errors_doc)]
    fn get(self) -> crate::Result<T>;

    /// Replaces a failure with whatever `f` returns, which may fail again.
    #[must_use]
    fn try_recover<F>(self, f: F) -> Self
    where
        F: FnOnce(Error) -> Fallible<T>;

    /// Replaces a failure with a value computed from the error.
    fn recover<F>(self, f: F) -> T
    where
        F: FnOnce(Error) -> T;

    /// Replaces a failure with a fixed value.
    fn recover_with(self, value: T) -> T;

    /// Runs `f` on the success value and passes `self` through.
    #[must_use]
    fn on_success<F>(self, f: F) -> Self
    where
        F: FnOnce(&T);

    /// Runs `f` on the error and passes `self` through.
    #[must_use]
    fn on_failure<F>(self, f: F) -> Self
    where
        F: FnOnce(&Error);

    /// Returns the success value by reference, if any.
    fn success(&self) -> Option<&T>;

    /// Returns the error by reference, if any.
    fn failure(&self) -> Option<&Error>;

    /// Casts the success value to `U`.
    ///
    /// Fails with [`ErrorKind::DynamicCastFailed`] when `T` is not `U`.
    fn dynamic_cast<U: 'static>(self) -> Fallible<U>
    where
        T: 'static;
}

impl<T> FallibleExt<T> for Fallible<T> {
    fn get(self) -> crate::Result<T> {
        self
    }

    fn try_recover<F>(self, f: F) -> Self
    where
        F: FnOnce(Error) -> Fallible<T>,
    {
        self.or_else(f)
    }

    fn recover<F>(self, f: F) -> T
    where
        F: FnOnce(Error) -> T,
    {
        self.unwrap_or_else(f)
    }

    fn recover_with(self, value: T) -> T {
        self.unwrap_or(value)
    }

    fn on_success<F>(self, f: F) -> Self
    where
        F: FnOnce(&T),
    {
        if let Ok(v) = &self {
            f(v);
        }
        self
    }

    fn on_failure<F>(self, f: F) -> Self
    where
        F: FnOnce(&Error),
    {
        if let Err(e) = &self {
            f(e);
        }
        self
    }

    fn success(&self) -> Option<&T> {
        self.as_ref().ok()
    }

    fn failure(&self) -> Option<&Error> {
        self.as_ref().err()
    }

    fn dynamic_cast<U: 'static>(self) -> Fallible<U>
    where
        T: 'static,
    {
        let value = self?;
        let boxed: Box<dyn Any> = Box::new(value);
        boxed.downcast::<U>().map(|b| *b).map_err(|_| {
            Error::new(ErrorKind::DynamicCastFailed).with_message(format!(
                "{} is not {}",
                type_name::<T>(),
                type_name::<U>()
            ))
        })
    }
}

/// Collapses a nested result.
pub fn flatten<T>(nested: Fallible<Fallible<T>>) -> Fallible<T> {
    nested.and_then(|inner| inner)
}

/// Runs `block`, turning a panic into an [`ErrorKind::Internal`] failure.
pub fn fallible<T, F>(block: F) -> Fallible<T>
where
    F: FnOnce() -> Fallible<T>,
{
    match catch_unwind(AssertUnwindSafe(block)) {
        Ok(result) => result,
        Err(payload) => Err(Error::internal(format!(
            "panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Combines two results; the first failure wins.
pub fn zip2<A, B>(a: Fallible<A>, b: Fallible<B>) -> Fallible<(A, B)> {
    Ok((a?, b?))
}

/// Combines three results; the first failure wins.
pub fn zip3<A, B, C>(a: Fallible<A>, b: Fallible<B>, c: Fallible<C>) -> Fallible<(A, B, C)> {
    Ok((a?, b?, c?))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}
