//! Property tests for channel replay and combinator ordering.

#[macro_use]
mod common;

use common::*;
use eventsync::source::EventSource;
use eventsync::{BufferSize, DeriveOptions, Event, Executor, Producer};
use proptest::prelude::*;

proptest! {
    #![proptest_config(test_proptest_config(64))]

    #[test]
    fn fixed_buffer_replays_the_newest_updates(
        capacity in 1_usize..16,
        values in proptest::collection::vec(any::<u32>(), 0..40),
    ) {
        init_test_logging();
        let producer = Producer::<u32, ()>::new(BufferSize::Fixed(capacity));
        producer.update_all(values.clone());
        producer.succeed(());

        let events = record(&producer.channel(), &Executor::immediate());
        let kept = values.len().min(capacity);
        let expected_updates = values[values.len() - kept..].to_vec();

        prop_assert_eq!(events.len(), kept + 1);
        let updates: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                Event::Update(v) => Some(*v),
                Event::Completion(_) => None,
            })
            .collect();
        prop_assert_eq!(updates, expected_updates);
        prop_assert!(events.last().is_some_and(Event::is_completion));
    }

    #[test]
    fn unbuffered_channel_replays_only_completion(
        values in proptest::collection::vec(any::<u16>(), 0..20),
    ) {
        let producer = Producer::<u16, u8>::new(BufferSize::None);
        producer.update_all(values);
        producer.succeed(7);

        let events = record(&producer.channel(), &Executor::immediate());
        prop_assert_eq!(events, vec![Event::success(7)]);
    }

    #[test]
    fn map_preserves_order_and_count(
        values in proptest::collection::vec(any::<i32>(), 0..60),
    ) {
        let producer = Producer::<i32, ()>::new(BufferSize::Fixed(100));
        let mapped = producer
            .channel()
            .map(DeriveOptions::new().buffer(BufferSize::Fixed(100)), |x| {
                Ok(i64::from(x) * 2)
            });
        producer.update_all(values.clone());
        producer.succeed(());

        let (updates, done) = mapped.wait_for_all_timeout(DELIVERY_TIMEOUT);
        prop_assert!(done.is_ok());
        let expected: Vec<i64> = values.iter().map(|x| i64::from(*x) * 2).collect();
        prop_assert_eq!(updates, expected);
    }

    #[test]
    fn filter_keeps_relative_order(
        values in proptest::collection::vec(0_u32..1000, 0..60),
        modulus in 1_u32..7,
    ) {
        let producer = Producer::<u32, ()>::new(BufferSize::Fixed(100));
        let kept = producer
            .channel()
            .filter(DeriveOptions::new().buffer(BufferSize::Fixed(100)), move |x| {
                Ok(x % modulus == 0)
            });
        producer.update_all(values.clone());
        producer.succeed(());

        let (updates, _) = kept.wait_for_all_timeout(DELIVERY_TIMEOUT);
        let expected: Vec<u32> = values.into_iter().filter(|x| x % modulus == 0).collect();
        prop_assert_eq!(updates, expected);
    }

    #[test]
    fn reduce_matches_sequential_fold(
        values in proptest::collection::vec(any::<u64>(), 0..80),
    ) {
        let producer = Producer::<u64, ()>::new(BufferSize::Fixed(100));
        let reduced = producer.channel().reduce(&Executor::immediate(), 17_u64, |acc, x| {
            Ok(acc.wrapping_mul(1_000_003).wrapping_add(x))
        });
        producer.update_all(values.clone());
        producer.succeed(());

        let expected = values
            .iter()
            .fold(17_u64, |acc, x| acc.wrapping_mul(1_000_003).wrapping_add(*x));
        prop_assert_eq!(reduced.wait_timeout(DELIVERY_TIMEOUT).ok(), Some(expected));
    }

    #[test]
    fn completion_wins_exactly_once(
        attempts in proptest::collection::vec(any::<bool>(), 1..10),
    ) {
        let producer = Producer::<u8, usize>::new(BufferSize::None);
        let mut winners = 0;
        for (i, succeed) in attempts.iter().enumerate() {
            let won = if *succeed {
                producer.succeed(i)
            } else {
                producer.fail(eventsync::Error::msg("attempt"))
            };
            if won {
                winners += 1;
            }
        }
        prop_assert_eq!(winners, 1);
        let first = if attempts[0] { Some(0) } else { None };
        prop_assert_eq!(producer.completion().and_then(Result::ok), first);
    }
}
