//! Property-based tests for the status machines and API key hashing.

use proptest::prelude::*;
use sea_orm::Iterable;

use freightlink::models::{BookingStatus, MatchStatus, PaymentStatus};
use freightlink::services::api_keys::{generate_key, hash_secret, split_key, verify_secret};
use freightlink::state_machine::{ensure_transition, replay_trail, StatusMachine};

/// A walk from `initial` that only follows allowed edges, steered by `choices`.
fn walk<S: StatusMachine>(initial: S, choices: &[usize]) -> Vec<S> {
    let mut trail = vec![initial];
    let mut state = initial;
    for choice in choices {
        let targets = state.allowed_targets();
        if targets.is_empty() {
            break;
        }
        state = targets[choice % targets.len()];
        trail.push(state);
    }
    trail
}

fn pepper_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 32..64)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn valid_booking_walks_replay(choices in prop::collection::vec(0usize..8, 0..6)) {
        let trail = walk(BookingStatus::Pending, &choices);
        let last = *trail.last().unwrap();
        prop_assert!(replay_trail(BookingStatus::Pending, &trail, last).is_ok());
    }

    #[test]
    fn replay_rejects_a_trail_that_ends_elsewhere(
        choices in prop::collection::vec(0usize..8, 0..6),
    ) {
        let trail = walk(BookingStatus::Pending, &choices);
        let last = *trail.last().unwrap();
        for other in BookingStatus::iter().filter(|s| *s != last) {
            prop_assert!(replay_trail(BookingStatus::Pending, &trail, other).is_err());
        }
    }

    #[test]
    fn inserting_a_foreign_step_breaks_the_replay(
        choices in prop::collection::vec(0usize..8, 1..6),
        position in 0usize..6,
    ) {
        let mut trail = walk(BookingStatus::Pending, &choices);
        let at = 1 + position % trail.len();
        let before = trail[at - 1];
        // the first state the previous one cannot reach
        let Some(bad) = BookingStatus::iter().find(|s| !before.can_transition_to(*s)) else {
            return Ok(());
        };
        trail.insert(at, bad);
        let last = *trail.last().unwrap();
        prop_assert!(replay_trail(BookingStatus::Pending, &trail, last).is_err());
    }

    #[test]
    fn match_and_payment_walks_stay_on_known_edges(
        choices in prop::collection::vec(0usize..8, 0..4),
    ) {
        for pair in walk(MatchStatus::Pending, &choices).windows(2) {
            prop_assert!(ensure_transition(pair[0], pair[1]).is_ok());
        }
        for pair in walk(PaymentStatus::Pending, &choices).windows(2) {
            prop_assert!(ensure_transition(pair[0], pair[1]).is_ok());
        }
    }

    #[test]
    fn issued_secret_reproduces_its_hash(
        pepper in pepper_strategy(),
        other in "[A-Za-z0-9_-]{1,64}",
    ) {
        let key = generate_key();
        let stored = hash_secret(&pepper, &key.secret).unwrap();

        prop_assert_eq!(&hash_secret(&pepper, &key.secret).unwrap(), &stored);
        prop_assert!(verify_secret(&pepper, &key.secret, &stored));
        if other != key.secret {
            prop_assert!(!verify_secret(&pepper, &other, &stored));
        }
    }

    #[test]
    fn full_keys_split_back_into_their_parts(_seed in any::<u8>()) {
        let key = generate_key();
        let full = key.full_key();
        prop_assert_eq!(split_key(&full), Some((key.prefix.as_str(), key.secret.as_str())));
    }
}

#[test]
fn terminal_states_have_no_exits() {
    for status in BookingStatus::iter() {
        assert_eq!(status.is_terminal(), status.allowed_targets().is_empty());
        assert!(!status.can_transition_to(status), "{} must not loop", status);
    }
}
