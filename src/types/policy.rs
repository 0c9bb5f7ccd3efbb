//! Buffering and scheduling policies.

use std::num::NonZeroUsize;

/// Thread count used for [`Concurrency::Unrestricted`].
pub const UNRESTRICTED_THREADS: usize = 64;

/// How many updates a producer keeps for replay to late subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferSize {
    /// Late subscribers see only live updates.
    None,
    /// Keep the last `n` updates.
    Fixed(usize),
    /// Producers use the runtime default; derived channels inherit the upstream capacity.
    #[default]
    Default,
}

impl BufferSize {
    /// Resolves the policy to a concrete capacity.
    ///
    /// `inherited` is what `Default` turns into: the runtime default for a
    /// fresh producer, the upstream capacity for a derived channel.
    #[must_use]
    pub const fn resolve(self, inherited: usize) -> usize {
        match self {
            Self::None => 0,
            Self::Fixed(n) => n,
            Self::Default => inherited,
        }
    }
}

impl From<usize> for BufferSize {
    fn from(n: usize) -> Self {
        if n == 0 {
            Self::None
        } else {
            Self::Fixed(n)
        }
    }
}

/// Degree of parallelism of a concurrent executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Concurrency {
    /// Up to [`UNRESTRICTED_THREADS`] blocks at once.
    Unrestricted,
    /// At most `n` blocks at once (`n` of zero is treated as one).
    Restricted(usize),
    /// One block per available core.
    #[default]
    Auto,
}

impl Concurrency {
    /// Returns the maximum number of blocks that may run at once.
    #[must_use]
    pub fn max_threads(self) -> usize {
        match self {
            Self::Unrestricted => UNRESTRICTED_THREADS,
            Self::Restricted(n) => n.max(1),
            Self::Auto => std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
        }
    }
}

/// Whether an executor runs blocks one at a time or in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Execution {
    /// Run blocks in parallel up to the given concurrency.
    Concurrent(Concurrency),
    /// Run blocks one at a time in FIFO order.
    Sequential,
}

impl Default for Execution {
    fn default() -> Self {
        Self::Concurrent(Concurrency::Auto)
    }
}

impl Execution {
    /// Returns the lane width this execution mode implies.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Self::Concurrent(c) => c.max_threads(),
            Self::Sequential => 1,
        }
    }
}

/// Scheduling priority hint. Higher priorities are dequeued first by pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    /// Background work.
    Low,
    /// Regular work.
    #[default]
    Normal,
    /// Latency-sensitive work.
    High,
}

impl Priority {
    /// All priorities, highest first.
    pub const DESCENDING: [Self; 3] = [Self::High, Self::Normal, Self::Low];

    /// Queue index for this priority.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}
