//! Append-only event trail kept on every ride record
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::ride::{Consent, RideType, TimeStamp};

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideEvent {
    #[n(0)]
    pub ride_id: String,
    #[n(1)]
    pub user_id: String, // who caused the event
    #[n(2)]
    pub timestamp: TimeStamp<Utc>,
    #[n(3)]
    pub kind: EventKind,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventKind {
    #[n(0)]
    Requested {
        #[n(0)]
        ride_type: RideType,
    },
    #[n(1)]
    Joined,
    #[n(2)]
    ConsentGiven {
        #[n(0)]
        consent: Consent,
    },
    #[n(3)]
    Confirmed {
        #[n(0)]
        fare: u64,
    },
    #[n(4)]
    OwnershipTransferred {
        #[n(0)]
        from: String,
        #[n(1)]
        to: String,
    },
    #[n(5)]
    ConvertedToPrivate,
    #[n(6)]
    SpunOff {
        #[n(0)]
        record_id: String,
    },
    #[n(7)]
    SplitFrom {
        #[n(0)]
        origin_id: String,
    },
    #[n(8)]
    RiderLeft,
    #[n(9)]
    Cancelled,
    #[n(10)]
    Expired,
}

impl RideEvent {
    pub fn new(ride_id: String, user_id: String, timestamp: TimeStamp<Utc>, kind: EventKind) -> Self {
        Self {
            ride_id,
            user_id,
            timestamp,
            kind,
        }
    }

    pub fn describe(&self) -> String {
        let what = match &self.kind {
            EventKind::Requested { ride_type } => format!("requested a {ride_type:?} ride"),
            EventKind::Joined => "joined as a co-rider".to_string(),
            EventKind::ConsentGiven { consent } => format!("answered {consent:?}"),
            EventKind::Confirmed { fare } => format!("confirmed the ride at fare {fare}"),
            EventKind::OwnershipTransferred { from, to } => {
                format!("handed ownership from {from} to {to}")
            }
            EventKind::ConvertedToPrivate => "now rides privately".to_string(),
            EventKind::SpunOff { record_id } => format!("continues separately as {record_id}"),
            EventKind::SplitFrom { origin_id } => format!("split off from {origin_id}"),
            EventKind::RiderLeft => "left the ride".to_string(),
            EventKind::Cancelled => "cancelled the ride".to_string(),
            EventKind::Expired => "ride expired without a match".to_string(),
        };
        format!(
            "[{}] {} {}: {}",
            self.timestamp.to_datetime_utc().to_rfc3339(),
            self.ride_id,
            self.user_id,
            what
        )
    }
}
