//! Property-based tests for matching and consent resolution
//!
//! These run against the pure state machine, without a database, so each
//! case is cheap and proptest can explore pickup offsets, fares and consent
//! orderings freely.

use chrono::{Duration, Utc};
use proptest::prelude::*;
use ride_pool::{
    consent::resolve_consent,
    matching::{MatchPolicy, join},
    ride::{Consent, RideOrder, RideRecord, RideRequest, RideStatus, TimeStamp},
};

// PROPERTY TEST STRATEGIES

/// A fixed reference pickup, so the window arithmetic stays readable.
fn base_pickup() -> TimeStamp<Utc> {
    TimeStamp::new_with(2025, 9, 15, 18, 0, 0)
}

/// Pickup offsets up to an hour either side, to the second.
fn offset_strategy() -> impl Strategy<Value = i64> {
    -3600i64..=3600
}

fn fare_strategy() -> impl Strategy<Value = u64> {
    0u64..=1_000_000
}

/// A step in a consent run: a new rider joins, or party `n` (mod party count) accepts.
#[derive(Debug, Clone)]
enum Step {
    Join,
    Accept(usize),
}

fn steps_strategy() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![1 => Just(Step::Join), 3 => (0usize..4).prop_map(Step::Accept)],
        1..24,
    )
}

fn order(source: &str, pickup: TimeStamp<Utc>, fare: u64) -> RideOrder {
    RideRequest::new()
        .set_source(source)
        .set_destination("Airport")
        .set_ride_type("shared")
        .set_pickup_time(pickup)
        .set_fare(fare)
        .validate_and_finalise()
        .expect("fixture order is valid")
}

fn waiting(id: &str, owner: &str, pickup: TimeStamp<Utc>, booked: TimeStamp<Utc>) -> RideRecord {
    RideRecord::open(id.to_string(), owner, &order("Dorm", pickup, 100), booked)
}

fn accept(ride: RideRecord, user: &str) -> RideRecord {
    resolve_consent(ride, user, Consent::Accepted, "ride_unused".into(), TimeStamp::new())
        .expect("party may accept")
        .ride
}

// PROPERTY TESTS

proptest! {
    /// A second request matches the first exactly when their pickups are at
    /// most fifteen minutes apart.
    #[test]
    fn match_window_is_fifteen_minutes_inclusive(offset in offset_strategy()) {
        let policy = MatchPolicy::default();
        let first = waiting("ride_a", "alice", base_pickup(), TimeStamp::new());
        let request = order("Library", base_pickup().shifted(Duration::seconds(offset)), 100);

        let filter = policy.filter_for("bob", &request);
        let candidates: Vec<_> = std::iter::once(first).filter(|r| filter.matches(r)).collect();
        let chosen = policy.select("bob", candidates);

        prop_assert_eq!(chosen.is_some(), offset.abs() <= 15 * 60);
    }

    /// Requesters never match their own waiting ride, however close the pickup.
    #[test]
    fn never_matches_own_ride(offset in -900i64..=900) {
        let policy = MatchPolicy::default();
        let mine = waiting("ride_a", "alice", base_pickup(), TimeStamp::new());
        let request = order("Library", base_pickup().shifted(Duration::seconds(offset)), 100);

        prop_assert!(!policy.filter_for("alice", &request).matches(&mine));
    }

    /// Confirmed exactly when every party has accepted, whatever the order
    /// of joins and acceptances.
    #[test]
    fn confirmed_iff_every_party_accepted(steps in steps_strategy()) {
        let policy = MatchPolicy::default();
        let now = TimeStamp::new();
        let mut ride = waiting("ride_a", "owner", base_pickup(), now);
        let mut joined = 0;

        for step in steps {
            match step {
                // only waiting rides with a free seat are offered to newcomers
                Step::Join if ride.status == RideStatus::Waiting && ride.matched_with.len() < policy.max_co_riders => {
                    joined += 1;
                    let rider = format!("rider{joined}");
                    join(&mut ride, &rider, &order(&rider, base_pickup(), 100), now);
                    prop_assert_eq!(ride.consent_status.get(&rider), Some(&Consent::Pending));
                }
                Step::Join => {}
                Step::Accept(_) if ride.matched_with.is_empty() => {}
                Step::Accept(n) => {
                    let parties: Vec<String> = ride.parties().map(str::to_string).collect();
                    let user = &parties[n % parties.len()];
                    ride = accept(ride, user);
                }
            }

            let everyone = ride
                .parties()
                .all(|p| ride.consent_status.get(p) == Some(&Consent::Accepted));
            prop_assert_eq!(ride.status == RideStatus::Confirmed, !ride.matched_with.is_empty() && everyone);
        }
    }

    /// Extra acceptances after confirmation leave the halved fare alone, and
    /// the undiscounted fare is recorded once.
    #[test]
    fn fare_is_halved_once(fare in fare_strategy(), repeats in 1usize..6) {
        let now = TimeStamp::new();
        let mut ride = RideRecord::open("ride_a".into(), "alice", &order("Dorm", base_pickup(), fare), now);
        join(&mut ride, "bob", &order("Lab", base_pickup(), fare), now);

        let mut ride = accept(accept(ride, "alice"), "bob");
        prop_assert_eq!(ride.status, RideStatus::Confirmed);
        prop_assert_eq!(ride.original_fare, Some(fare));
        prop_assert_eq!(ride.fare, fare.div_ceil(2));

        for i in 0..repeats {
            let user = if i % 2 == 0 { "alice" } else { "bob" };
            ride = accept(ride, user);
            prop_assert_eq!(ride.original_fare, Some(fare));
            prop_assert_eq!(ride.fare, fare.div_ceil(2));
        }
    }

    /// The chosen ride depends only on the candidates, not the scan order.
    #[test]
    fn selection_ignores_scan_order(
        booked in prop::collection::vec(0i64..120, 1..8).prop_shuffle(),
        seed in any::<u64>(),
    ) {
        let policy = MatchPolicy::default();
        let epoch = TimeStamp::new_with(2025, 9, 1, 0, 0, 0);
        let candidates: Vec<RideRecord> = booked
            .iter()
            .enumerate()
            .map(|(i, minutes)| {
                waiting(&format!("ride_{i:02}"), &format!("owner{i}"), base_pickup(), epoch.shifted(Duration::minutes(*minutes)))
            })
            .collect();

        let forward = policy.select("zed", candidates.clone()).map(|r| r.id);
        let mut rotated = candidates.clone();
        let len = rotated.len();
        rotated.rotate_left((seed as usize) % len);
        let backward: Vec<_> = rotated.into_iter().rev().collect();

        prop_assert_eq!(forward.clone(), policy.select("zed", backward).map(|r| r.id));

        // and it is the earliest booking, lowest id on ties
        let earliest = candidates
            .iter()
            .min_by(|a, b| a.booking_time.cmp(&b.booking_time).then_with(|| a.id.cmp(&b.id)))
            .map(|r| r.id.clone());
        prop_assert_eq!(forward, earliest);
    }
}
