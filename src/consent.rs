//! Consent resolution: the per-party accept/decline state machine
//!
//! A shared ride confirms only once every party (owner and all matched
//! riders) has accepted; confirmation halves the fare. A decline splits the
//! decliner off into their own private ride. When the decliner owned the
//! ride, the first matched rider inherits it together with their pickup point.
use chrono::Utc;
use tracing::info;

use super::error::{RideError, ValidationError};
use super::history::EventKind;
use super::ride::{Consent, RideRecord, RideStatus, RideType, TimeStamp};
use super::store::RideWrite;

/// The outcome of one state-machine step: the mutated record, and possibly
/// a new record spun off from it. Both are committed together.
#[derive(Debug, Clone)]
pub struct Transition<O> {
    pub ride: RideRecord,
    pub spin_off: Option<RideRecord>,
    pub outcome: O,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentOutcome {
    /// Answer stored, still waiting on somebody.
    Recorded,
    Confirmed,
    /// Former owner split off; `new_owner` now holds the record.
    OwnerDeclined { new_owner: String },
    RiderDeclined,
}

impl<O> Transition<O> {
    pub fn writes(&self) -> Vec<RideWrite> {
        let mut writes = vec![RideWrite::Update(self.ride.clone())];
        if let Some(spin_off) = &self.spin_off {
            writes.push(RideWrite::Create(spin_off.clone()));
        }
        writes
    }
}

impl ConsentOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Recorded => "Ride consent updated to accepted",
            Self::Confirmed => "All riders accepted, ride confirmed",
            Self::OwnerDeclined { .. } => "Ride consent updated to declined, ownership transferred",
            Self::RiderDeclined => "Ride consent updated to declined",
        }
    }
}

/// Only a shared ride with at least one co-rider, still waiting or already
/// confirmed, has anything to consent to.
pub fn awaiting_consent(ride: &RideRecord) -> bool {
    ride.ride_type == RideType::Shared
        && !ride.matched_with.is_empty()
        && matches!(ride.status, RideStatus::Waiting | RideStatus::Confirmed)
}

/// Applies `user_id`'s answer to `ride`. `spin_off_id` names the record
/// created if the answer is a decline.
pub fn resolve_consent(
    mut ride: RideRecord,
    user_id: &str,
    consent: Consent,
    spin_off_id: String,
    now: TimeStamp<Utc>,
) -> Result<Transition<ConsentOutcome>, RideError> {
    ride.ensure_party(user_id)?;
    if consent == Consent::Pending {
        return Err(ValidationError::InvalidConsent("pending".into()).into());
    }
    if !awaiting_consent(&ride) {
        return Err(ValidationError::NotAwaitingConsent(ride.id.clone()).into());
    }

    ride.consent_status.insert(user_id.to_string(), consent);
    ride.witness(user_id, EventKind::ConsentGiven { consent }, now);

    match consent {
        Consent::Accepted => Ok(accept(ride, user_id, now)),
        _ if ride.is_owner(user_id) => Ok(owner_declines(ride, spin_off_id, now)),
        _ => Ok(rider_declines(ride, user_id, spin_off_id, now)),
    }
}

fn accept(mut ride: RideRecord, user_id: &str, now: TimeStamp<Utc>) -> Transition<ConsentOutcome> {
    if !ride.all_accepted() {
        return Transition {
            ride,
            spin_off: None,
            outcome: ConsentOutcome::Recorded,
        };
    }

    let newly_confirmed = ride.status != RideStatus::Confirmed;
    ride.status = RideStatus::Confirmed;
    ride.apply_shared_discount();
    if newly_confirmed {
        info!(ride_id = %ride.id, fare = ride.fare, "shared ride confirmed");
        ride.witness(user_id, EventKind::Confirmed { fare: ride.fare }, now);
    }
    Transition {
        ride,
        spin_off: None,
        outcome: ConsentOutcome::Confirmed,
    }
}

fn owner_declines(mut ride: RideRecord, spin_off_id: String, now: TimeStamp<Utc>) -> Transition<ConsentOutcome> {
    let former = ride.owner_leg();
    let spin_off = ride.spin_off(spin_off_id, former.clone(), RideStatus::Private, now);
    ride.witness(
        &former.user_id,
        EventKind::SpunOff {
            record_id: spin_off.id.clone(),
        },
        now,
    );

    // awaiting_consent guarantees a matched rider to promote
    let new_owner = ride.promote_first_rider(now).unwrap_or_default();
    info!(ride_id = %ride.id, from = %former.user_id, to = %new_owner, "owner declined, ride handed over");

    Transition {
        ride,
        spin_off: Some(spin_off),
        outcome: ConsentOutcome::OwnerDeclined { new_owner },
    }
}

fn rider_declines(
    mut ride: RideRecord,
    user_id: &str,
    spin_off_id: String,
    now: TimeStamp<Utc>,
) -> Transition<ConsentOutcome> {
    // capture the rider's own leg before it leaves matched_with
    let leg = ride.remove_rider(user_id);
    let spin_off = leg.map(|leg| ride.spin_off(spin_off_id, leg, RideStatus::Private, now));
    if let Some(spin_off) = &spin_off {
        ride.witness(
            user_id,
            EventKind::SpunOff {
                record_id: spin_off.id.clone(),
            },
            now,
        );
    }

    if ride.matched_with.is_empty() {
        ride.revert_to_private();
        let owner = ride.owner_id.clone();
        ride.witness(&owner, EventKind::ConvertedToPrivate, now);
    }
    info!(ride_id = %ride.id, user_id, "rider declined and split off");

    Transition {
        ride,
        spin_off,
        outcome: ConsentOutcome::RiderDeclined,
    }
}
