//! Error types and error handling strategy for eventsync.
//!
//! Every failure that can travel through a future or channel is an [`Error`].
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Errors are cheap to clone, so one failure can be fanned out to many subscribers
//! - Transform errors raised by user closures keep their original source
//! - Nothing in the crate retries on its own; [`Recoverability`] is a hint for callers
//!
//! # Error Categories
//!
//! - **Cancellation**: a token fired, or a derived channel was cancelled
//! - **Lifecycle**: the owning context was dropped, or a slot was already completed
//! - **Scheduling**: executor shutdown, CAS contention bound, blocking-wait timeout
//! - **User**: errors returned from user-supplied transforms
//! - **Internal**: runtime bugs and invalid casts

use core::fmt;
use std::sync::Arc;

use crate::types::CancelReason;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Cancellation ===
    /// Operation was cancelled.
    Cancelled,

    // === Lifecycle ===
    /// The execution context a subscription was bound to has been dropped.
    ContextDropped,
    /// A promise or producer was completed a second time.
    AlreadyCompleted,

    // === Scheduling ===
    /// The executor refused work because it has been shut down.
    ExecutorShutdown,
    /// A bounded compare-and-swap loop gave up.
    ContentionExceeded,
    /// A blocking wait elapsed before completion.
    Timeout,

    // === Internal ===
    /// A dynamic cast of a success value failed.
    DynamicCastFailed,
    /// Internal runtime error (bug).
    Internal,

    // === User ===
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::ContextDropped | Self::AlreadyCompleted => ErrorCategory::Lifecycle,
            Self::ExecutorShutdown | Self::ContentionExceeded | Self::Timeout => {
                ErrorCategory::Scheduling
            }
            Self::DynamicCastFailed | Self::Internal => ErrorCategory::Internal,
            Self::User => ErrorCategory::User,
        }
    }

    /// Returns the recoverability classification for this error kind.
    ///
    /// Nothing in the runtime acts on this; it exists for callers that layer
    /// retry-by-resubscription on top.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::ContentionExceeded | Self::Timeout => Recoverability::Transient,

            Self::Cancelled
            | Self::ContextDropped
            | Self::AlreadyCompleted
            | Self::ExecutorShutdown
            | Self::DynamicCastFailed
            | Self::Internal => Recoverability::Permanent,

            Self::User => Recoverability::Unknown,
        }
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }
}

/// Classification of error recoverability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
    /// Recoverability depends on context and cannot be determined
    /// from the error kind alone.
    Unknown,
}

impl Recoverability {
    /// Returns true if this error is safe to retry.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Returns true if this error should never be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Cancellation-related failures.
    Cancellation,
    /// Context and completion-slot lifecycle failures.
    Lifecycle,
    /// Executor and wait failures.
    Scheduling,
    /// Internal runtime errors.
    Internal,
    /// User-originated errors.
    User,
}

/// The main error type for eventsync operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled | ErrorKind::ContextDropped)
    }

    /// Returns true if this error is a blocking-wait timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Wraps an arbitrary error raised by user code.
    #[must_use]
    pub fn user(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        let message = source.to_string();
        Self::new(ErrorKind::User)
            .with_message(message)
            .with_source(source)
    }

    /// Creates a user error from a plain message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(message)
    }

    /// Creates a cancellation error from a structured reason.
    #[must_use]
    pub fn cancelled(reason: &CancelReason) -> Self {
        Self::new(ErrorKind::Cancelled).with_message(format!("{reason}"))
    }

    /// Creates the error delivered when an owning context goes away.
    #[must_use]
    pub fn context_dropped() -> Self {
        Self::new(ErrorKind::ContextDropped)
    }

    /// Creates the error returned by executors after shutdown.
    #[must_use]
    pub fn executor_shutdown(executor: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExecutorShutdown)
            .with_message(format!("{} is shut down", executor.into()))
    }

    /// Creates an internal error (runtime bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the source as a concrete type, if it is one.
    #[must_use]
    pub fn downcast_source<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.as_deref().and_then(|e| e.downcast_ref::<E>())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for eventsync operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;
