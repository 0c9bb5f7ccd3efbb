//! Logging facade used by every module in the crate.
//!
//! - **With `tracing-integration`**: re-exports the `tracing` logging macros.
//! - **Without it**: the same names resolve to macros that log nothing and
//!   never evaluate their arguments. The arguments are still borrowed in dead
//!   code, so a binding that only feeds a log line is not reported unused.
//!
//! Runtime code always imports from here, never from `tracing` directly:
//!
//! ```rust,ignore
//! use crate::tracing_compat::{debug, trace, warn};
//!
//! debug!(label = %label, "subscribed");
//! warn!(label = %label, "completion rejected: already completed");
//! ```
//!
//! Levels used across the crate: `trace` for per-event delivery, `debug` for
//! subscription lifecycle and combinator wiring, `warn` for rejected double
//! completion and blocking waits on executor threads, `error` for work an
//! executor refused.

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! Macros that borrow their arguments inside a branch that never runs, so
    //! values bound only for logging still count as used.

    /// Walks `tracing`-style fields and borrows each value.
    #[doc(hidden)]
    #[macro_export]
    macro_rules! __eventsync_unlogged {
        () => {};
        ($name:ident = % $value:expr $(, $($rest:tt)*)?) => {
            let _ = &$value;
            $($crate::__eventsync_unlogged!($($rest)*);)?
        };
        ($name:ident = ? $value:expr $(, $($rest:tt)*)?) => {
            let _ = &$value;
            $($crate::__eventsync_unlogged!($($rest)*);)?
        };
        ($name:ident = $value:expr $(, $($rest:tt)*)?) => {
            let _ = &$value;
            $($crate::__eventsync_unlogged!($($rest)*);)?
        };
        (% $value:ident $(, $($rest:tt)*)?) => {
            let _ = &$value;
            $($crate::__eventsync_unlogged!($($rest)*);)?
        };
        (? $value:ident $(, $($rest:tt)*)?) => {
            let _ = &$value;
            $($crate::__eventsync_unlogged!($($rest)*);)?
        };
        ($message:literal $(, $arg:expr)* $(,)?) => {
            let _ = ($(&$arg,)*);
        };
        ($name:ident $(, $($rest:tt)*)?) => {
            let _ = &$name;
            $($crate::__eventsync_unlogged!($($rest)*);)?
        };
    }

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {
            if false {
                $crate::__eventsync_unlogged!($($arg)*);
            }
        };
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {
            if false {
                $crate::__eventsync_unlogged!($($arg)*);
            }
        };
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {
            if false {
                $crate::__eventsync_unlogged!($($arg)*);
            }
        };
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {
            if false {
                $crate::__eventsync_unlogged!($($arg)*);
            }
        };
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {
            if false {
                $crate::__eventsync_unlogged!($($arg)*);
            }
        };
    }

    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

/// Appends an operator name to a trace label, `upstream∙map` style.
#[must_use]
pub fn child_label(parent: &str, op: &str) -> String {
    if parent.is_empty() {
        op.to_owned()
    } else {
        format!("{parent}\u{2219}{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    #[test]
    fn macros_accept_fields() {
        init_test_logging();
        crate::test_phase!("macros_accept_fields");
        let label = "source";
        trace!(label = %label, seq = 3, "delivered");
        debug!(label = %label, "subscribed");
        info!("plain");
        warn!(label = %label, "double completion");
        error!(error = ?"refused", "executor refused job");
        crate::test_complete!("macros_accept_fields");
    }

    #[test]
    fn log_only_bindings_are_consumed() {
        let mut evaluated = 0;
        let refused: Result<(), &str> = Err("closed");
        if let Err(e) = refused {
            error!(error = %e, count = { evaluated += 1; evaluated }, "refused");
        }
        let index = 2_usize;
        let timeout = std::time::Duration::from_millis(1);
        warn!(label = %"join", index, "member failed");
        debug!(?timeout, "waiting");
        #[cfg(not(feature = "tracing-integration"))]
        assert_eq!(evaluated, 0);
        #[cfg(feature = "tracing-integration")]
        assert!(evaluated <= 1);
    }

    #[test]
    fn child_label_joins_with_bullet() {
        assert_eq!(child_label("", "map"), "map");
        assert_eq!(child_label("ticks", "map"), "ticks\u{2219}map");
        assert_eq!(
            child_label(&child_label("ticks", "map"), "filter"),
            "ticks\u{2219}map\u{2219}filter"
        );
    }
}
