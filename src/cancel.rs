use chrono::Utc;
use tracing::info;

use super::consent::Transition;
use super::error::{RideError, ValidationError};
use super::history::EventKind;
use super::ride::{RideRecord, RideStatus, RideType, TimeStamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A matched rider stepped out; the ride goes on without them.
    Left,
    /// The owner left a shared ride. `audit_id` is the cancelled record kept
    /// in their name.
    OwnershipTransferred { new_owner: String, audit_id: String },
    Cancelled,
}

impl CancelOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Left => "You have been removed from this shared ride",
            Self::OwnershipTransferred { .. } => "Ride cancelled and ownership transferred",
            Self::Cancelled => "Ride cancelled successfully",
        }
    }
}

/// Cancels `user_id`'s part in `ride`. Unlike a decline, a leaving rider
/// gets no replacement ride, and a leaving owner's copy is kept as `cancelled`.
pub fn resolve_cancellation(
    mut ride: RideRecord,
    user_id: &str,
    audit_id: String,
    now: TimeStamp<Utc>,
) -> Result<Transition<CancelOutcome>, RideError> {
    ride.ensure_party(user_id)?;
    if ride.status == RideStatus::Cancelled {
        return Err(ValidationError::AlreadyCancelled(ride.id.clone()).into());
    }

    if !ride.is_owner(user_id) {
        ride.remove_rider(user_id);
        ride.witness(user_id, EventKind::RiderLeft, now);
        if ride.ride_type == RideType::Shared && ride.matched_with.is_empty() {
            ride.revert_to_private();
            let owner = ride.owner_id.clone();
            ride.witness(&owner, EventKind::ConvertedToPrivate, now);
        }
        info!(ride_id = %ride.id, user_id, "rider left shared ride");
        return Ok(Transition {
            ride,
            spin_off: None,
            outcome: CancelOutcome::Left,
        });
    }

    if ride.ride_type == RideType::Shared && !ride.matched_with.is_empty() {
        let mut audit = ride.spin_off(audit_id, ride.owner_leg(), RideStatus::Cancelled, now);
        audit.witness(user_id, EventKind::Cancelled, now);
        ride.witness(
            user_id,
            EventKind::SpunOff {
                record_id: audit.id.clone(),
            },
            now,
        );
        let new_owner = ride.promote_first_rider(now).unwrap_or_default();
        info!(ride_id = %ride.id, from = user_id, to = %new_owner, "owner cancelled, ride handed over");

        return Ok(Transition {
            ride,
            outcome: CancelOutcome::OwnershipTransferred {
                new_owner,
                audit_id: audit.id.clone(),
            },
            spin_off: Some(audit),
        });
    }

    ride.status = RideStatus::Cancelled;
    ride.witness(user_id, EventKind::Cancelled, now);
    info!(ride_id = %ride.id, user_id, "ride cancelled");
    Ok(Transition {
        ride,
        spin_off: None,
        outcome: CancelOutcome::Cancelled,
    })
}
