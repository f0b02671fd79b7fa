//! Service layer API for ride workflow operations
//!
//! Every mutation is a read-modify-write of one ride record (plus at most
//! one spun-off record) committed as a single versioned transaction. A
//! commit that loses a race is re-run from the read, up to `write_retries`
//! times.
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use super::cancel::{CancelOutcome, resolve_cancellation};
use super::consent::{ConsentOutcome, Transition, resolve_consent};
use super::error::RideError;
use super::history::{EventKind, RideEvent};
use super::matching::{MatchPolicy, join};
use super::notify::{RideNotifier, TracingNotifier};
use super::profile::{ProfileDirectory, RideView};
use super::ride::{Consent, RideRecord, RideRequest, RideStatus, RideType, TimeStamp};
use super::store::{RideFilter, RideStore};
use super::utils::{new_ride_id, validate_ride_id};

pub const DEFAULT_WRITE_RETRIES: usize = 3;

pub struct RideService {
    store: Arc<RideStore>,
    profiles: Arc<dyn ProfileDirectory>,
    notifier: Arc<dyn RideNotifier>,
    policy: MatchPolicy,
    write_retries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingOutcome {
    Private,
    Waiting,
    Matched,
}

#[derive(Debug, Clone)]
pub struct Booking {
    pub ride: RideRecord,
    pub outcome: BookingOutcome,
}

impl BookingOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Private => "Private ride created successfully",
            Self::Waiting => "Created new shared ride in waiting status",
            Self::Matched => "Found matching shared ride",
        }
    }
}

impl RideService {
    pub fn new(store: Arc<RideStore>) -> Self {
        Self {
            profiles: store.clone(),
            store,
            notifier: Arc::new(TracingNotifier),
            policy: MatchPolicy::default(),
            write_retries: DEFAULT_WRITE_RETRIES,
        }
    }
    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }
    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileDirectory>) -> Self {
        self.profiles = profiles;
        self
    }
    pub fn with_notifier(mut self, notifier: Arc<dyn RideNotifier>) -> Self {
        self.notifier = notifier;
        self
    }
    pub fn with_write_retries(mut self, write_retries: usize) -> Self {
        self.write_retries = write_retries;
        self
    }
    pub fn store(&self) -> &Arc<RideStore> {
        &self.store
    }

    /// Books a private ride, or joins / opens a shared one.
    pub fn request_ride(&self, requester_id: &str, request: &RideRequest) -> Result<Booking, RideError> {
        let order = request.validate_and_finalise()?;

        if order.ride_type == RideType::Private {
            let ride = RideRecord::open(new_ride_id()?, requester_id, &order, TimeStamp::new());
            let ride = self.store.create(ride)?;
            self.notifier.notify(&ride.history);
            return Ok(Booking {
                ride,
                outcome: BookingOutcome::Private,
            });
        }

        self.retrying("request_ride", || {
            let now = TimeStamp::new();
            let candidates = self.store.find(&self.policy.filter_for(requester_id, &order))?;

            match self.policy.select(requester_id, candidates) {
                Some(mut ride) => {
                    let seen = ride.history.len();
                    join(&mut ride, requester_id, &order, now);
                    // fails with Conflict if someone else wrote the ride since the scan
                    let ride = self.store.save(ride)?;
                    info!(ride_id = %ride.id, requester_id, "matched into waiting ride");
                    self.notifier.notify(new_events(&ride, seen));
                    Ok(Booking {
                        ride,
                        outcome: BookingOutcome::Matched,
                    })
                }
                None => {
                    let ride = RideRecord::open(new_ride_id()?, requester_id, &order, now);
                    let ride = self.store.create(ride)?;
                    info!(ride_id = %ride.id, requester_id, "no match, ride is waiting");
                    self.notifier.notify(&ride.history);
                    Ok(Booking {
                        ride,
                        outcome: BookingOutcome::Waiting,
                    })
                }
            }
        })
    }

    /// Fetches a ride for one of its parties, with their public profiles when available.
    pub fn get_ride(&self, requester_id: &str, ride_id: &str) -> Result<RideView, RideError> {
        let ride = self.load(ride_id)?;
        ride.ensure_party(requester_id)?;
        Ok(RideView::enrich(ride, self.profiles.as_ref()))
    }

    /// Rides the user owns or rides on, latest pickup first.
    pub fn list_rides_for_user(&self, requester_id: &str) -> Result<Vec<RideRecord>, RideError> {
        let mut rides = self.store.find(&RideFilter::new().party(requester_id))?;
        rides.sort_by(|a, b| b.pickup_time.cmp(&a.pickup_time));
        Ok(rides)
    }

    pub fn set_consent(
        &self,
        requester_id: &str,
        ride_id: &str,
        consent: Consent,
    ) -> Result<Transition<ConsentOutcome>, RideError> {
        self.retrying("set_consent", || {
            let ride = self.load(ride_id)?;
            let seen = ride.history.len();
            let step = resolve_consent(ride, requester_id, consent, new_ride_id()?, TimeStamp::new())?;
            self.commit(step, seen)
        })
    }

    pub fn cancel_ride(&self, requester_id: &str, ride_id: &str) -> Result<Transition<CancelOutcome>, RideError> {
        self.retrying("cancel_ride", || {
            let ride = self.load(ride_id)?;
            let seen = ride.history.len();
            let step = resolve_cancellation(ride, requester_id, new_ride_id()?, TimeStamp::new())?;
            self.commit(step, seen)
        })
    }

    /// Cancels waiting rides whose pickup time passed more than `max_wait` ago.
    /// Rides that change under the sweep are left for the next one.
    pub fn expire_waiting(&self, now: TimeStamp<Utc>, max_wait: Duration) -> Result<usize, RideError> {
        let stale = self.store.find(
            &RideFilter::new()
                .ride_type(RideType::Shared)
                .status(RideStatus::Waiting),
        )?;

        let mut expired = 0;
        for mut ride in stale {
            if ride.pickup_time.shifted(max_wait) >= now {
                continue;
            }
            let seen = ride.history.len();
            ride.status = RideStatus::Cancelled;
            let owner = ride.owner_id.clone();
            ride.witness(&owner, EventKind::Expired, now);

            match self.store.save(ride) {
                Ok(ride) => {
                    self.notifier.notify(new_events(&ride, seen));
                    expired += 1;
                }
                Err(RideError::Conflict(id)) => warn!(ride_id = %id, "ride changed during expiry sweep, skipping"),
                Err(e) => return Err(e),
            }
        }
        if expired > 0 {
            info!(expired, "expired stale waiting rides");
        }
        Ok(expired)
    }

    fn load(&self, ride_id: &str) -> Result<RideRecord, RideError> {
        validate_ride_id(ride_id)?;
        self.store
            .find_by_id(ride_id)?
            .ok_or_else(|| RideError::NotFound(ride_id.to_string()))
    }

    fn commit<O>(&self, step: Transition<O>, seen: usize) -> Result<Transition<O>, RideError> {
        let mut stored = self.store.commit(step.writes())?.into_iter();
        let ride = stored
            .next()
            .ok_or_else(|| RideError::Dependency("commit returned no records".into()))?;
        let spin_off = stored.next();

        let mut events = new_events(&ride, seen).to_vec();
        if let Some(spin_off) = &spin_off {
            events.extend(spin_off.history.iter().cloned());
        }
        self.notifier.notify(&events);

        Ok(Transition {
            ride,
            spin_off,
            outcome: step.outcome,
        })
    }

    fn retrying<T>(&self, operation: &str, mut attempt: impl FnMut() -> Result<T, RideError>) -> Result<T, RideError> {
        let mut conflicts = 0;
        loop {
            match attempt() {
                Err(RideError::Conflict(ride_id)) if conflicts < self.write_retries => {
                    conflicts += 1;
                    warn!(operation, %ride_id, conflicts, "write conflict, retrying");
                }
                result => return result,
            }
        }
    }
}

fn new_events(ride: &RideRecord, seen: usize) -> &[RideEvent] {
    ride.history.get(seen..).unwrap_or_default()
}
