//! Sled backed record store for rides and public profiles
use std::sync::Arc;

use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use tracing::debug;

use super::error::RideError;
use super::profile::{ProfileDirectory, UserProfile};
use super::ride::{RideRecord, RideStatus, RideType, TimeStamp};

const RIDES_TREE: &str = "rides";
const PROFILES_TREE: &str = "profiles";

pub struct RideStore {
    rides: sled::Tree,
    profiles: sled::Tree,
}

/// Equality, range and membership predicates over ride records.
/// Unset fields match everything.
#[derive(Debug, Default, Clone)]
pub struct RideFilter {
    pub destination: Option<String>,
    pub ride_type: Option<RideType>,
    pub status: Option<RideStatus>,
    pub pickup_between: Option<(TimeStamp<Utc>, TimeStamp<Utc>)>,
    pub owner_not: Option<String>,
    pub party: Option<String>,
}

/// One write inside an atomic [`RideStore::commit`].
#[derive(Debug, Clone)]
pub enum RideWrite {
    /// Fails if a record with the same id exists.
    Create(RideRecord),
    /// Fails unless the stored version equals `record.version`.
    Update(RideRecord),
}

impl RideFilter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.to_string());
        self
    }
    pub fn ride_type(mut self, ride_type: RideType) -> Self {
        self.ride_type = Some(ride_type);
        self
    }
    pub fn status(mut self, status: RideStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn pickup_between(mut self, from: TimeStamp<Utc>, to: TimeStamp<Utc>) -> Self {
        self.pickup_between = Some((from, to));
        self
    }
    pub fn owner_not(mut self, user_id: &str) -> Self {
        self.owner_not = Some(user_id.to_string());
        self
    }
    pub fn party(mut self, user_id: &str) -> Self {
        self.party = Some(user_id.to_string());
        self
    }

    pub fn matches(&self, record: &RideRecord) -> bool {
        self.destination
            .as_ref()
            .is_none_or(|d| &record.destination == d)
            && self.ride_type.is_none_or(|t| record.ride_type == t)
            && self.status.is_none_or(|s| record.status == s)
            && self
                .pickup_between
                .is_none_or(|(from, to)| from <= record.pickup_time && record.pickup_time <= to)
            && self.owner_not.as_ref().is_none_or(|o| &record.owner_id != o)
            && self.party.as_ref().is_none_or(|p| record.is_party(p))
    }
}

impl RideWrite {
    fn record(&self) -> &RideRecord {
        match self {
            RideWrite::Create(record) | RideWrite::Update(record) => record,
        }
    }
}

impl RideStore {
    pub fn new(db: &sled::Db) -> Result<Self, RideError> {
        Ok(Self {
            rides: db.open_tree(RIDES_TREE)?,
            profiles: db.open_tree(PROFILES_TREE)?,
        })
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Arc<Self>, RideError> {
        let db = sled::open(path)?;
        Ok(Arc::new(Self::new(&db)?))
    }

    /// Linear scan in key order.
    pub fn find(&self, filter: &RideFilter) -> Result<Vec<RideRecord>, RideError> {
        let mut found = vec![];
        for entry in self.rides.iter() {
            let (_, bytes) = entry?;
            let record = decode_record(&bytes)?;
            if filter.matches(&record) {
                found.push(record);
            }
        }
        debug!(?filter, hits = found.len(), "scanned rides");
        Ok(found)
    }

    /// First match in key order.
    pub fn find_one(&self, filter: &RideFilter) -> Result<Option<RideRecord>, RideError> {
        for entry in self.rides.iter() {
            let (_, bytes) = entry?;
            let record = decode_record(&bytes)?;
            if filter.matches(&record) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<RideRecord>, RideError> {
        self.rides
            .get(id.as_bytes())?
            .map(|bytes| decode_record(&bytes))
            .transpose()
    }

    pub fn create(&self, record: RideRecord) -> Result<RideRecord, RideError> {
        self.commit(vec![RideWrite::Create(record)])
            .map(|mut written| written.remove(0))
    }

    pub fn save(&self, record: RideRecord) -> Result<RideRecord, RideError> {
        self.commit(vec![RideWrite::Update(record)])
            .map(|mut written| written.remove(0))
    }

    /// Applies every write in one transaction, or none of them.
    /// Returns the records as stored, with their new versions.
    pub fn commit(&self, writes: Vec<RideWrite>) -> Result<Vec<RideRecord>, RideError> {
        let result = self.rides.transaction(|tx| {
            let mut written = Vec::with_capacity(writes.len());
            for write in &writes {
                let record = write.record();
                let stored = tx
                    .get(record.id.as_bytes())?
                    .map(|bytes| decode_record(&bytes))
                    .transpose()
                    .map_err(ConflictableTransactionError::Abort)?;

                let version = match (write, stored) {
                    (RideWrite::Create(_), None) => 0,
                    (RideWrite::Update(_), Some(current)) if current.version == record.version => {
                        record.version + 1
                    }
                    (RideWrite::Update(_), None) => {
                        return Err(ConflictableTransactionError::Abort(RideError::NotFound(
                            record.id.clone(),
                        )));
                    }
                    _ => {
                        return Err(ConflictableTransactionError::Abort(RideError::Conflict(
                            record.id.clone(),
                        )));
                    }
                };

                let mut next = record.clone();
                next.version = version;
                let bytes = encode_record(&next).map_err(ConflictableTransactionError::Abort)?;
                tx.insert(next.id.as_bytes(), bytes)?;
                written.push(next);
            }
            Ok(written)
        });

        match result {
            Ok(written) => Ok(written),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(RideError::Storage(e)),
        }
    }

    pub fn put_profile(&self, profile: &UserProfile) -> Result<(), RideError> {
        let bytes = minicbor::to_vec(profile).map_err(|e| RideError::Codec(e.to_string()))?;
        self.profiles.insert(profile.id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), RideError> {
        self.rides.flush()?;
        self.profiles.flush()?;
        Ok(())
    }
}

impl ProfileDirectory for RideStore {
    fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>, RideError> {
        self.profiles
            .get(user_id.as_bytes())?
            .map(|bytes| minicbor::decode(&bytes).map_err(|e| RideError::Codec(e.to_string())))
            .transpose()
    }
}

fn encode_record(record: &RideRecord) -> Result<Vec<u8>, RideError> {
    minicbor::to_vec(record).map_err(|e| RideError::Codec(e.to_string()))
}

fn decode_record(bytes: &[u8]) -> Result<RideRecord, RideError> {
    minicbor::decode(bytes).map_err(|e| RideError::Codec(e.to_string()))
}
