//! Core ride record, request and timestamp types
use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::{RideError, ValidationError};
use super::history::{EventKind, RideEvent};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RideType {
    #[n(0)]
    Private,
    #[n(1)]
    Shared,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    #[n(0)]
    Waiting,
    #[n(1)]
    Confirmed,
    #[n(2)]
    Private,
    #[n(3)]
    Completed,
    #[n(4)]
    Cancelled,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consent {
    #[n(0)]
    Pending,
    #[n(1)]
    Accepted,
    #[n(2)]
    Declined,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    #[n(0)]
    pub latitude: f64,
    #[n(1)]
    pub longitude: f64,
}

/// A co-rider on somebody else's ride, with their own pickup point.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedRider {
    #[n(0)]
    pub user_id: String,
    #[n(1)]
    pub source: String,
    #[n(2)]
    pub source_coordinates: Option<Coordinates>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>)
where
    T::Offset: Copy;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub owner_id: String,
    #[n(2)]
    pub ride_type: RideType,
    #[n(3)]
    pub source: String,
    #[n(4)]
    pub destination: String,
    #[n(5)]
    pub source_coordinates: Option<Coordinates>,
    #[n(6)]
    pub destination_coordinates: Option<Coordinates>,
    #[n(7)]
    pub pickup_time: TimeStamp<Utc>,
    #[n(8)]
    pub booking_time: TimeStamp<Utc>,
    #[n(9)]
    pub status: RideStatus,
    #[n(10)]
    pub matched_with: Vec<MatchedRider>,
    #[n(11)]
    pub consent_status: BTreeMap<String, Consent>,
    #[n(12)]
    pub fare: u64,
    #[n(13)]
    pub original_fare: Option<u64>,
    // bumped by the store on every committed write
    #[n(14)]
    pub version: u64,
    #[n(15)]
    pub history: Vec<RideEvent>,
}

// Draft of a ride request as it arrives from a caller. Every field is
// optional so that missing input surfaces as a validation error.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRequest {
    source: Option<String>,
    destination: Option<String>,
    ride_type: Option<String>,
    pickup_time: Option<TimeStamp<Utc>>,
    source_coordinates: Option<Coordinates>,
    destination_coordinates: Option<Coordinates>,
    fare: Option<u64>,
}

/// A validated [`RideRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct RideOrder {
    pub source: String,
    pub destination: String,
    pub ride_type: RideType,
    pub pickup_time: TimeStamp<Utc>,
    pub source_coordinates: Option<Coordinates>,
    pub destination_coordinates: Option<Coordinates>,
    pub fare: u64,
}

impl FromStr for RideType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "shared" => Ok(Self::Shared),
            other => Err(ValidationError::InvalidRideType(other.to_string())),
        }
    }
}

impl Consent {
    /// Parses a caller's decision. `pending` is not a decision.
    pub fn decision(s: &str) -> Result<Self, ValidationError> {
        match s {
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            other => Err(ValidationError::InvalidConsent(other.to_string())),
        }
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    /// Panics on an impossible calendar date; meant for fixtures.
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .expect("calendar date out of range")
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// Records store nanoseconds since the epoch as an i64, roughly 1677 to 2262.
    pub fn is_storable(&self) -> bool {
        self.0.timestamp_nanos_opt().is_some()
    }
    /// Shifts by `offset`, saturating at the representable range.
    pub fn shifted(&self, offset: Duration) -> Self {
        let shifted = self.0.checked_add_signed(offset).unwrap_or(if offset < Duration::zero() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        });
        Self(shifted)
    }
    /// Inclusive window of `radius` either side of this instant.
    pub fn window(&self, radius: Duration) -> (Self, Self) {
        (self.shifted(-radius), self.shifted(radius))
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl RideRequest {
    /// Construct an empty draft
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }
    pub fn set_destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.to_string());
        self
    }
    pub fn set_ride_type(mut self, ride_type: &str) -> Self {
        self.ride_type = Some(ride_type.to_string());
        self
    }
    pub fn set_pickup_time(mut self, pickup_time: TimeStamp<Utc>) -> Self {
        self.pickup_time = Some(pickup_time);
        self
    }
    pub fn set_source_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.source_coordinates = Some(Coordinates { latitude, longitude });
        self
    }
    pub fn set_destination_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.destination_coordinates = Some(Coordinates { latitude, longitude });
        self
    }
    pub fn set_fare(mut self, fare: u64) -> Self {
        self.fare = Some(fare);
        self
    }
    // Checks mandatory fields and the ride type. Empty strings count as missing.
    pub fn validate_and_finalise(&self) -> Result<RideOrder, ValidationError> {
        let source = required_text(&self.source, "source")?;
        let destination = required_text(&self.destination, "destination")?;
        let ride_type = required_text(&self.ride_type, "rideType")?.parse::<RideType>()?;
        let pickup_time = self
            .pickup_time
            .ok_or(ValidationError::MissingField("pickupTime"))?;
        if !pickup_time.is_storable() {
            return Err(ValidationError::PickupTimeOutOfRange(
                pickup_time.to_datetime_utc().to_rfc3339(),
            ));
        }

        Ok(RideOrder {
            source,
            destination,
            ride_type,
            pickup_time,
            source_coordinates: self.source_coordinates,
            destination_coordinates: self.destination_coordinates,
            fare: self.fare.unwrap_or(0),
        })
    }
}

fn required_text(value: &Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(ValidationError::MissingField(field)),
    }
}

impl RideRecord {
    /// A fresh record for `owner_id`: `private` for private orders, `waiting` for shared ones.
    pub fn open(id: String, owner_id: &str, order: &RideOrder, now: TimeStamp<Utc>) -> Self {
        let status = match order.ride_type {
            RideType::Private => RideStatus::Private,
            RideType::Shared => RideStatus::Waiting,
        };
        let mut record = Self {
            id,
            owner_id: owner_id.to_string(),
            ride_type: order.ride_type,
            source: order.source.clone(),
            destination: order.destination.clone(),
            source_coordinates: order.source_coordinates,
            destination_coordinates: order.destination_coordinates,
            pickup_time: order.pickup_time,
            booking_time: now,
            status,
            matched_with: vec![],
            consent_status: BTreeMap::new(),
            fare: order.fare,
            original_fare: None,
            version: 0,
            history: vec![],
        };
        record.witness(
            owner_id,
            EventKind::Requested {
                ride_type: order.ride_type,
            },
            now,
        );
        record
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    pub fn is_matched(&self, user_id: &str) -> bool {
        self.matched_with.iter().any(|rider| rider.user_id == user_id)
    }

    pub fn is_party(&self, user_id: &str) -> bool {
        self.is_owner(user_id) || self.is_matched(user_id)
    }

    pub fn ensure_party(&self, user_id: &str) -> Result<(), RideError> {
        if self.is_party(user_id) {
            Ok(())
        } else {
            Err(RideError::forbidden(user_id, &self.id))
        }
    }

    /// Owner first, then matched riders in join order.
    pub fn parties(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.owner_id.as_str())
            .chain(self.matched_with.iter().map(|rider| rider.user_id.as_str()))
    }

    /// Missing consent entries count as not accepted.
    pub fn all_accepted(&self) -> bool {
        self.parties()
            .all(|party| self.consent_status.get(party) == Some(&Consent::Accepted))
    }

    /// The undiscounted fare.
    pub fn base_fare(&self) -> u64 {
        self.original_fare.unwrap_or(self.fare)
    }

    /// Halves the fare, always from `original_fare` so repeated calls are stable.
    pub fn apply_shared_discount(&mut self) {
        let original = *self.original_fare.get_or_insert(self.fare);
        self.fare = original.div_ceil(2);
    }

    pub fn revert_to_private(&mut self) {
        self.matched_with.clear();
        self.consent_status.clear();
        self.ride_type = RideType::Private;
        self.status = RideStatus::Private;
        self.fare = self.base_fare();
    }

    /// Removes a matched rider and their consent entry.
    pub fn remove_rider(&mut self, user_id: &str) -> Option<MatchedRider> {
        let position = self
            .matched_with
            .iter()
            .position(|rider| rider.user_id == user_id)?;
        self.consent_status.remove(user_id);
        Some(self.matched_with.remove(position))
    }

    /// Hands the record to the first matched rider, who brings their pickup point.
    /// Reverts to private when nobody else is left. Returns the new owner.
    pub fn promote_first_rider(&mut self, now: TimeStamp<Utc>) -> Option<String> {
        if self.matched_with.is_empty() {
            return None;
        }
        let heir = self.matched_with.remove(0);
        let former = std::mem::replace(&mut self.owner_id, heir.user_id.clone());
        self.consent_status.remove(&former);
        self.source = heir.source;
        self.source_coordinates = heir.source_coordinates;
        self.witness(
            &former,
            EventKind::OwnershipTransferred {
                from: former.clone(),
                to: heir.user_id.clone(),
            },
            now,
        );

        if self.matched_with.is_empty() {
            self.revert_to_private();
            self.witness(&heir.user_id, EventKind::ConvertedToPrivate, now);
        }
        Some(heir.user_id)
    }

    /// A standalone private-type copy of this trip for one party.
    pub fn spin_off(
        &self,
        id: String,
        rider: MatchedRider,
        status: RideStatus,
        now: TimeStamp<Utc>,
    ) -> RideRecord {
        let mut record = Self {
            id,
            owner_id: rider.user_id,
            ride_type: RideType::Private,
            source: rider.source,
            destination: self.destination.clone(),
            source_coordinates: rider.source_coordinates,
            destination_coordinates: self.destination_coordinates,
            pickup_time: self.pickup_time,
            booking_time: self.booking_time,
            status,
            matched_with: vec![],
            consent_status: BTreeMap::new(),
            fare: self.base_fare(),
            original_fare: None,
            version: 0,
            history: vec![],
        };
        let owner = record.owner_id.clone();
        record.witness(
            &owner,
            EventKind::SplitFrom {
                origin_id: self.id.clone(),
            },
            now,
        );
        record
    }

    /// The owner's leg of this ride, in the same shape as a matched rider.
    pub fn owner_leg(&self) -> MatchedRider {
        MatchedRider {
            user_id: self.owner_id.clone(),
            source: self.source.clone(),
            source_coordinates: self.source_coordinates,
        }
    }

    pub fn witness(&mut self, user_id: &str, kind: EventKind, now: TimeStamp<Utc>) {
        self.history
            .push(RideEvent::new(self.id.clone(), user_id.to_string(), now, kind));
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T>
where
    T::Offset: Copy,
{
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}
// Utc itself is not ordered, so the derive would not apply.
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}
impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}
impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
impl Serialize for TimeStamp<Utc> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}
impl<'de> Deserialize<'de> for TimeStamp<Utc> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        DateTime::<Utc>::deserialize(deserializer).map(TimeStamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_order(source: &str) -> RideOrder {
        RideRequest::new()
            .set_source(source)
            .set_destination("Airport")
            .set_ride_type("shared")
            .set_pickup_time(TimeStamp::new_with(2025, 3, 1, 9, 0, 0))
            .set_fare(101)
            .validate_and_finalise()
            .unwrap()
    }

    fn rider(user_id: &str) -> MatchedRider {
        MatchedRider {
            user_id: user_id.to_string(),
            source: format!("{user_id} hostel"),
            source_coordinates: Some(Coordinates {
                latitude: 12.9,
                longitude: 77.6,
            }),
        }
    }

    fn group(owner: &str, riders: &[&str]) -> RideRecord {
        let mut record = RideRecord::open("ride_x".into(), owner, &shared_order("Gate 1"), TimeStamp::new());
        for id in riders {
            record.matched_with.push(rider(id));
            record.consent_status.insert(id.to_string(), Consent::Pending);
        }
        record.consent_status.insert(owner.to_string(), Consent::Pending);
        record
    }

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn timestamp_window_is_symmetric() {
        let t = TimeStamp::new_with(2025, 3, 1, 9, 0, 0);
        let (lo, hi) = t.window(Duration::minutes(15));

        assert_eq!(lo, TimeStamp::new_with(2025, 3, 1, 8, 45, 0));
        assert_eq!(hi, TimeStamp::new_with(2025, 3, 1, 9, 15, 0));
    }

    #[test]
    fn timestamps_order_chronologically() {
        let early = TimeStamp::new_with(2025, 3, 1, 8, 59, 59);
        let late = TimeStamp::new_with(2025, 3, 1, 9, 0, 0);

        assert!(early < late);
        assert_eq!(late.cmp(&early), std::cmp::Ordering::Greater);
        let mut times = vec![late, early];
        times.sort();
        assert_eq!(times, vec![early, late]);
    }

    #[test]
    fn pickup_beyond_storable_range_is_rejected() {
        let request = RideRequest::new()
            .set_source("Gate 1")
            .set_destination("Airport")
            .set_ride_type("shared")
            .set_pickup_time(TimeStamp::new_with(2300, 1, 1, 0, 0, 0));

        assert!(matches!(
            request.validate_and_finalise(),
            Err(ValidationError::PickupTimeOutOfRange(_))
        ));
        assert!(TimeStamp::new_with(2262, 1, 1, 0, 0, 0).is_storable());
    }

    #[test]
    fn request_requires_mandatory_fields() {
        let missing_source = RideRequest::new()
            .set_destination("Airport")
            .set_ride_type("shared")
            .set_pickup_time(TimeStamp::new());
        assert_eq!(
            missing_source.validate_and_finalise(),
            Err(ValidationError::MissingField("source"))
        );

        let blank_destination = RideRequest::new()
            .set_source("Gate 1")
            .set_destination("  ")
            .set_ride_type("shared")
            .set_pickup_time(TimeStamp::new());
        assert_eq!(
            blank_destination.validate_and_finalise(),
            Err(ValidationError::MissingField("destination"))
        );

        let no_time = RideRequest::new()
            .set_source("Gate 1")
            .set_destination("Airport")
            .set_ride_type("private");
        assert_eq!(
            no_time.validate_and_finalise(),
            Err(ValidationError::MissingField("pickupTime"))
        );
    }

    #[test]
    fn request_rejects_unknown_ride_type() {
        let request = RideRequest::new()
            .set_source("Gate 1")
            .set_destination("Airport")
            .set_ride_type("pooled")
            .set_pickup_time(TimeStamp::new());

        assert_eq!(
            request.validate_and_finalise(),
            Err(ValidationError::InvalidRideType("pooled".into()))
        );
    }

    #[test]
    fn consent_decision_excludes_pending() {
        assert_eq!(Consent::decision("accepted"), Ok(Consent::Accepted));
        assert_eq!(Consent::decision("declined"), Ok(Consent::Declined));
        assert!(Consent::decision("pending").is_err());
    }

    #[test]
    fn open_sets_status_from_ride_type() {
        let shared = RideRecord::open("ride_a".into(), "alice", &shared_order("Gate 1"), TimeStamp::new());
        assert_eq!(shared.status, RideStatus::Waiting);
        assert!(shared.matched_with.is_empty());
        assert!(shared.consent_status.is_empty());

        let mut order = shared_order("Gate 1");
        order.ride_type = RideType::Private;
        let private = RideRecord::open("ride_b".into(), "alice", &order, TimeStamp::new());
        assert_eq!(private.status, RideStatus::Private);
    }

    #[test]
    fn all_accepted_needs_every_party() {
        let mut record = group("alice", &["bob"]);
        assert!(!record.all_accepted());

        record.consent_status.insert("alice".into(), Consent::Accepted);
        assert!(!record.all_accepted());

        record.consent_status.insert("bob".into(), Consent::Accepted);
        assert!(record.all_accepted());

        record.consent_status.remove("bob");
        assert!(!record.all_accepted());
    }

    #[test]
    fn discount_rounds_half_up_and_is_idempotent() {
        let mut record = group("alice", &["bob"]);
        record.apply_shared_discount();
        assert_eq!(record.original_fare, Some(101));
        assert_eq!(record.fare, 51);

        record.apply_shared_discount();
        assert_eq!(record.original_fare, Some(101));
        assert_eq!(record.fare, 51);
    }

    #[test]
    fn promote_single_rider_reverts_to_private() {
        let mut record = group("alice", &["bob"]);
        record.apply_shared_discount();

        let heir = record.promote_first_rider(TimeStamp::new());

        assert_eq!(heir.as_deref(), Some("bob"));
        assert_eq!(record.owner_id, "bob");
        assert_eq!(record.source, "bob hostel");
        assert_eq!(record.status, RideStatus::Private);
        assert_eq!(record.ride_type, RideType::Private);
        assert!(record.matched_with.is_empty());
        assert!(record.consent_status.is_empty());
        assert_eq!(record.fare, 101);
    }

    #[test]
    fn promote_keeps_group_shared_when_riders_remain() {
        let mut record = group("alice", &["bob", "carol"]);

        record.promote_first_rider(TimeStamp::new());

        assert_eq!(record.owner_id, "bob");
        assert_eq!(record.ride_type, RideType::Shared);
        assert_eq!(record.status, RideStatus::Waiting);
        assert_eq!(record.matched_with.len(), 1);
        assert!(!record.consent_status.contains_key("alice"));
        assert!(record.consent_status.contains_key("bob"));
        assert!(record.consent_status.contains_key("carol"));
    }

    #[test]
    fn remove_rider_drops_consent_entry() {
        let mut record = group("alice", &["bob", "carol"]);

        let removed = record.remove_rider("bob").unwrap();

        assert_eq!(removed.source, "bob hostel");
        assert!(!record.is_matched("bob"));
        assert!(!record.consent_status.contains_key("bob"));
        assert!(record.remove_rider("bob").is_none());
    }

    #[test]
    fn spin_off_is_private_and_undiscounted() {
        let mut record = group("alice", &["bob"]);
        record.apply_shared_discount();

        let copy = record.spin_off("ride_y".into(), rider("bob"), RideStatus::Private, TimeStamp::new());

        assert_eq!(copy.owner_id, "bob");
        assert_eq!(copy.source, "bob hostel");
        assert_eq!(copy.destination, record.destination);
        assert_eq!(copy.pickup_time, record.pickup_time);
        assert_eq!(copy.booking_time, record.booking_time);
        assert_eq!(copy.ride_type, RideType::Private);
        assert_eq!(copy.fare, 101);
        assert!(matches!(
            copy.history.last().map(|e| &e.kind),
            Some(EventKind::SplitFrom { origin_id }) if origin_id == "ride_x"
        ));
    }

    #[test]
    fn record_cbor_roundtrip() {
        let record = group("alice", &["bob"]);

        let bytes = minicbor::to_vec(&record).unwrap();
        let decoded: RideRecord = minicbor::decode(&bytes).unwrap();

        assert_eq!(record, decoded);
    }
}
