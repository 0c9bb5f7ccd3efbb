//! Cursor-driven pagination.
//!
//! [`cursor`] calls its block with a cursor and drains the returned page
//! channel. The page's updates are emitted as one `Vec` and its success
//! value names the next cursor; `None` ends the walk. Each page is drained
//! fully before the next one is requested.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::derive::{DeriveOptions, Downstream, Placement, Plan};
use crate::channel::Channel;
use crate::cx::{ExecutionContext, Scope};
use crate::executor::{Executor, PoolOptions, ThreadPool};
use crate::source::EventSource;
use crate::tracing_compat::{debug, error, trace};
use crate::types::{fallible, Event, Fallible, Value};

type Fetch<K, U> = Box<dyn FnMut(K) -> Option<Channel<U, Option<K>>> + Send>;

struct Walk<K> {
    next: Option<K>,
    pumping: bool,
}

struct Paginator<K, U> {
    down: Downstream<Vec<U>, ()>,
    executor: Executor,
    scope: Option<Scope>,
    fetch: Mutex<Fetch<K, U>>,
    walk: Mutex<Walk<K>>,
}

impl<K: Value, U: Value> Paginator<K, U> {
    /// Queues `cursor` and fetches pages until none is pending. A page that
    /// completes synchronously hands its cursor to the running loop.
    fn request(self: &Arc<Self>, cursor: K) {
        {
            let mut walk = self.walk.lock();
            walk.next = Some(cursor);
            if walk.pumping {
                return;
            }
            walk.pumping = true;
        }
        loop {
            let cursor = {
                let mut walk = self.walk.lock();
                match walk.next.take() {
                    Some(cursor) if !self.down.is_completed() => cursor,
                    _ => {
                        walk.pumping = false;
                        return;
                    }
                }
            };
            self.fetch(cursor);
        }
    }

    fn fetch(self: &Arc<Self>, cursor: K) {
        let page = {
            let mut fetch = self.fetch.lock();
            fallible(|| Ok((*fetch)(cursor)))
        };
        let page = match page {
            Ok(Some(page)) => page,
            Ok(None) => {
                trace!(label = %self.down.label(), "context gone; pagination stopped");
                return;
            }
            Err(error) => {
                self.down.fail(error);
                return;
            }
        };
        let me = Arc::clone(self);
        let mut items = Vec::new();
        let subscription = page.subscribe_scoped(&self.executor, self.scope.as_ref(), move |event| match event {
            Event::Update(item) => items.push(item),
            Event::Completion(result) => me.page_done(std::mem::take(&mut items), result),
        });
        self.down.retain(subscription);
    }

    fn page_done(self: &Arc<Self>, items: Vec<U>, result: Fallible<Option<K>>) {
        trace!(label = %self.down.label(), items = items.len(), "page drained");
        if !items.is_empty() {
            self.down.update(items);
        }
        match result {
            Ok(Some(next)) => self.request(next),
            Ok(None) => {
                debug!(label = %self.down.label(), "pagination finished");
                self.down.succeed(());
            }
            Err(error) => {
                self.down.fail(error);
            }
        }
    }
}

/// Runs page walks that were given no executor. Its threads retire when idle.
fn pagination_executor() -> Executor {
    static PAGER: OnceLock<ThreadPool> = OnceLock::new();
    PAGER
        .get_or_init(|| {
            ThreadPool::new(PoolOptions {
                min_threads: 0,
                max_threads: 2,
                thread_name_prefix: "eventsync-cursor".to_owned(),
                ..PoolOptions::default()
            })
        })
        .executor()
}

fn paginate<K: Value, U: Value>(plan: &Plan, initial: K, fetch: Fetch<K, U>) -> Channel<Vec<U>, ()> {
    // Pages are replayed in full unless the options size the buffer.
    let down = plan.open::<Vec<U>, ()>("", usize::MAX);
    let paginator = Arc::new(Paginator {
        down: down.clone(),
        executor: plan.executor().clone(),
        scope: plan.scope().cloned(),
        fetch: Mutex::new(fetch),
        walk: Mutex::new(Walk {
            next: None,
            pumping: false,
        }),
    });
    if let Err(refused) = plan.executor().execute(move || paginator.request(initial)) {
        error!(label = %down.label(), error = %refused, "executor refused pagination");
        down.fail(refused);
    }
    Channel::from_core(down.into_core())
}

/// Walks pages starting at `initial`, emitting each non-empty page as one
/// update.
///
/// Without an explicit executor the walk runs on a serial lane over a
/// background pool, so `cursor` returns before the first page is fetched.
/// Late subscribers replay every page unless `options` sizes the buffer.
///
/// # Example
///
/// ```
/// use eventsync::{cursor, BufferSize, DeriveOptions, Producer};
///
/// let options = DeriveOptions::new().buffer(BufferSize::Fixed(8));
/// let pages = cursor(options, 0_u32, |page| {
///     let producer = Producer::<u32, Option<u32>>::new(BufferSize::Fixed(2));
///     producer.update_all([page * 2, page * 2 + 1]);
///     producer.succeed((page < 2).then_some(page + 1));
///     producer.channel()
/// });
/// let (updates, done) = pages.wait_for_all();
/// assert!(done.is_ok());
/// assert_eq!(updates.concat(), vec![0, 1, 2, 3, 4, 5]);
/// ```
pub fn cursor<K, U, F>(options: impl Into<DeriveOptions>, initial: K, mut block: F) -> Channel<Vec<U>, ()>
where
    K: Value,
    U: Value,
    F: FnMut(K) -> Channel<U, Option<K>> + Send + 'static,
{
    let mut options = options.into();
    if options.executor.is_none() {
        options.executor = Some(pagination_executor());
    }
    let plan = Plan::new(options, "cursor", Placement::Serial);
    paginate(&plan, initial, Box::new(move |cursor| Some(block(cursor))))
}

/// Context-bound form of [`cursor`]. The walk stops once the context is gone.
pub fn cursor_in<C, K, U, F>(
    context: &Arc<C>,
    options: impl Into<DeriveOptions>,
    initial: K,
    mut block: F,
) -> Channel<Vec<U>, ()>
where
    C: ExecutionContext,
    K: Value,
    U: Value,
    F: FnMut(&C, K) -> Channel<U, Option<K>> + Send + 'static,
{
    let (plan, context) = Plan::contextual(context, options.into(), "cursor", Placement::Serial);
    paginate(
        &plan,
        initial,
        Box::new(move |cursor| context.resolve().map(|ctx| block(&ctx, cursor))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{producer_on, Producer};
    use crate::error::{Error, ErrorKind};
    use crate::executor::{PoolOptions, ThreadPool};
    use crate::test_utils::{init_test_logging, TestContext};
    use crate::types::BufferSize;
    use std::time::Duration;

    fn page(items: Vec<u32>, next: Option<u32>) -> Channel<u32, Option<u32>> {
        let producer = Producer::with_buffered(BufferSize::Fixed(items.len()), items);
        producer.succeed(next);
        producer.channel()
    }

    fn replay_all() -> DeriveOptions {
        DeriveOptions::new().buffer(BufferSize::Fixed(8))
    }

    #[test]
    fn walks_until_cursor_runs_out() {
        let pages = cursor(replay_all(), 0_u32, |at| {
            page(vec![at * 10, at * 10 + 1], (at < 2).then_some(at + 1))
        });
        let (updates, done) = pages.wait_for_all();
        assert!(done.is_ok());
        assert_eq!(updates, vec![vec![0, 1], vec![10, 11], vec![20, 21]]);
    }

    #[test]
    fn default_options_walk_in_background_and_replay_every_page() {
        init_test_logging();
        let caller = std::thread::current().id();
        let walkers = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&walkers);
        let pages = cursor(DeriveOptions::new(), 0_u32, move |at| {
            seen.lock().push(std::thread::current().id());
            page(vec![at], (at < 2).then_some(at + 1))
        });
        let (updates, done) = pages.wait_for_all_timeout(Duration::from_secs(5));
        assert!(done.is_ok());
        assert_eq!(updates, vec![vec![0], vec![1], vec![2]]);
        assert_eq!(walkers.lock().len(), 3);
        assert!(walkers.lock().iter().all(|id| *id != caller));

        // A subscriber arriving after the walk still sees every page.
        let (late, _) = pages.wait_for_all();
        assert_eq!(late.len(), 3);
    }

    #[test]
    fn walk_label_has_no_leading_separator() {
        let pages = cursor(&Executor::immediate(), 0_u32, |at| page(vec![at], None));
        assert_eq!(pages.label(), "cursor");
        let named = cursor(DeriveOptions::new().label("feed"), 0_u32, |at| page(vec![at], None));
        assert_eq!(named.label(), "feed");
    }

    #[test]
    fn empty_pages_are_not_emitted() {
        let pages = cursor(replay_all(), 0_u32, |at| {
            let items = if at == 1 { Vec::new() } else { vec![at] };
            page(items, (at < 2).then_some(at + 1))
        });
        let (updates, _) = pages.wait_for_all();
        assert_eq!(updates, vec![vec![0], vec![2]]);
    }

    #[test]
    fn next_page_waits_for_previous_to_drain() {
        init_test_logging();
        let pool = ThreadPool::new(PoolOptions::default());
        let exec = pool.executor();
        let requested = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requested);
        let pages = cursor(replay_all(), 0_u32, move |at| {
            seen.lock().push(at);
            producer_on(&exec, BufferSize::Fixed(4), move |p| {
                std::thread::sleep(Duration::from_millis(5));
                p.update_all([at, at]);
                Ok((at < 3).then_some(at + 1))
            })
        });
        let (updates, done) = pages.wait_for_all_timeout(Duration::from_secs(5));
        assert!(done.is_ok());
        assert_eq!(updates.len(), 4);
        assert_eq!(*requested.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn page_failure_fails_walk() {
        let pages = cursor(replay_all(), 0_u32, |at| {
            if at == 1 {
                let producer = Producer::<u32, Option<u32>>::new(BufferSize::None);
                producer.fail(Error::msg("page 1"));
                producer.channel()
            } else {
                page(vec![at], Some(at + 1))
            }
        });
        let (updates, done) = pages.wait_for_all();
        assert_eq!(updates, vec![vec![0]]);
        assert_eq!(done.expect_err("failed").message(), Some("page 1"));
    }

    #[test]
    fn block_panic_fails_walk() {
        let pages = cursor(&Executor::immediate(), 0_u32, |_| -> Channel<u32, Option<u32>> {
            panic!("no pages")
        });
        assert_eq!(pages.wait().expect_err("failed").kind(), ErrorKind::Internal);
    }

    #[test]
    fn cursor_in_fails_when_context_is_gone() {
        let ctx = TestContext::new();
        let pending = Producer::<u32, Option<u32>>::new(BufferSize::None);
        let handle = pending.channel();
        let pages = cursor_in(&ctx, DeriveOptions::new(), 0_u32, move |_ctx: &TestContext, _| {
            handle.clone()
        });
        ctx.teardown();
        assert_eq!(pages.wait().expect_err("failed").kind(), ErrorKind::ContextDropped);
    }
}
