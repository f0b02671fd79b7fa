//! Finding a waiting shared ride for a new request
use chrono::{Duration, Utc};

use super::history::EventKind;
use super::ride::{Consent, MatchedRider, RideOrder, RideRecord, RideStatus, RideType, TimeStamp};
use super::store::RideFilter;

pub const DEFAULT_WINDOW_MINUTES: i64 = 15;
pub const DEFAULT_MAX_CO_RIDERS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    /// Pickup times may differ by at most this much, either way.
    pub window: Duration,
    /// Upper bound on `matched_with`. Full rides are not offered.
    pub max_co_riders: usize,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            window: Duration::minutes(DEFAULT_WINDOW_MINUTES),
            max_co_riders: DEFAULT_MAX_CO_RIDERS,
        }
    }
}

impl MatchPolicy {
    pub fn new(window_minutes: i64, max_co_riders: usize) -> Self {
        Self {
            window: Duration::minutes(window_minutes),
            max_co_riders,
        }
    }

    /// Store-side predicate: same destination, shared, waiting, within the
    /// window, owned by somebody else.
    pub fn filter_for(&self, requester_id: &str, order: &RideOrder) -> RideFilter {
        let (from, to) = order.pickup_time.window(self.window);
        RideFilter::new()
            .destination(&order.destination)
            .ride_type(RideType::Shared)
            .status(RideStatus::Waiting)
            .pickup_between(from, to)
            .owner_not(requester_id)
    }

    /// Picks the earliest booked candidate with a free seat that the
    /// requester has not already joined. Ties go to the smaller ride id.
    pub fn select(&self, requester_id: &str, candidates: Vec<RideRecord>) -> Option<RideRecord> {
        candidates
            .into_iter()
            .filter(|ride| ride.matched_with.len() < self.max_co_riders)
            .filter(|ride| !ride.is_party(requester_id))
            .min_by(|a, b| {
                a.booking_time
                    .cmp(&b.booking_time)
                    .then_with(|| a.id.cmp(&b.id))
            })
    }
}

/// Adds the requester to `ride` with their own pickup point. Both the owner
/// and the newcomer are asked for consent.
pub fn join(ride: &mut RideRecord, requester_id: &str, order: &RideOrder, now: TimeStamp<Utc>) {
    ride.matched_with.push(MatchedRider {
        user_id: requester_id.to_string(),
        source: order.source.clone(),
        source_coordinates: order.source_coordinates,
    });
    ride.consent_status
        .entry(ride.owner_id.clone())
        .or_insert(Consent::Pending);
    ride.consent_status
        .insert(requester_id.to_string(), Consent::Pending);
    ride.witness(requester_id, EventKind::Joined, now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ride::RideRequest;

    fn order(source: &str, pickup: TimeStamp<Utc>) -> RideOrder {
        RideRequest::new()
            .set_source(source)
            .set_destination("Central Station")
            .set_ride_type("shared")
            .set_pickup_time(pickup)
            .set_source_coordinates(28.54, 77.19)
            .set_fare(120)
            .validate_and_finalise()
            .unwrap()
    }

    fn waiting(id: &str, owner: &str, booked: TimeStamp<Utc>) -> RideRecord {
        let pickup = TimeStamp::new_with(2025, 4, 10, 18, 0, 0);
        RideRecord::open(id.into(), owner, &order("Hostel 4", pickup), booked)
    }

    #[test]
    fn filter_covers_symmetric_window() {
        let pickup = TimeStamp::new_with(2025, 4, 10, 18, 0, 0);
        let filter = MatchPolicy::default().filter_for("bob", &order("Gate", pickup));

        let ride = waiting("ride_a", "alice", TimeStamp::new());
        assert!(filter.matches(&ride));

        let mut early = ride.clone();
        early.pickup_time = pickup.shifted(Duration::minutes(-15));
        assert!(filter.matches(&early));

        let mut late = ride.clone();
        late.pickup_time = pickup.shifted(Duration::minutes(16));
        assert!(!filter.matches(&late));

        let own = waiting("ride_b", "bob", TimeStamp::new());
        assert!(!filter.matches(&own));
    }

    #[test]
    fn select_prefers_earliest_booking_then_id() {
        let t0 = TimeStamp::new_with(2025, 4, 1, 9, 0, 0);
        let t1 = TimeStamp::new_with(2025, 4, 1, 10, 0, 0);
        let candidates = vec![
            waiting("ride_c", "carol", t1),
            waiting("ride_b", "bob", t0),
            waiting("ride_a", "alice", t0),
        ];

        let chosen = MatchPolicy::default().select("dave", candidates).unwrap();

        assert_eq!(chosen.id, "ride_a");
    }

    #[test]
    fn select_skips_full_and_already_joined_rides() {
        let policy = MatchPolicy::new(15, 1);
        let t = TimeStamp::new();
        let order = order("Gate", TimeStamp::new_with(2025, 4, 10, 18, 0, 0));

        let mut full = waiting("ride_a", "alice", t);
        join(&mut full, "erin", &order, t);
        let open = waiting("ride_b", "bob", t);
        let mut mine = waiting("ride_0", "carol", t);
        join(&mut mine, "dave", &order, t);

        // ride_0 sorts first but dave is already on it
        let chosen = MatchPolicy::new(15, 2).select("dave", vec![mine, open]);
        assert_eq!(chosen.map(|r| r.id), Some("ride_b".to_string()));

        assert!(policy.select("dave", vec![full]).is_none());
    }

    #[test]
    fn join_requests_consent_from_both_sides() {
        let t = TimeStamp::new();
        let mut ride = waiting("ride_a", "alice", t);

        join(&mut ride, "bob", &order("Block C", t), t);

        assert_eq!(ride.matched_with.len(), 1);
        assert_eq!(ride.matched_with[0].source, "Block C");
        assert_eq!(ride.consent_status.get("alice"), Some(&Consent::Pending));
        assert_eq!(ride.consent_status.get("bob"), Some(&Consent::Pending));
        assert_eq!(ride.status, RideStatus::Waiting);
    }

    #[test]
    fn join_keeps_existing_owner_answer() {
        let t = TimeStamp::new();
        let mut ride = waiting("ride_a", "alice", t);
        ride.consent_status.insert("alice".into(), Consent::Accepted);

        join(&mut ride, "bob", &order("Block C", t), t);

        assert_eq!(ride.consent_status.get("alice"), Some(&Consent::Accepted));
        assert!(!ride.all_accepted());
    }
}
