//! Public rider profiles and best-effort enrichment of ride records
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::RideError;
use super::ride::RideRecord;

pub const ENRICHMENT_NOTE: &str = "Unable to load related user details";

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub full_name: String,
    #[n(2)]
    pub email: String,
    #[n(3)]
    pub college_name: String,
}

/// Source of public profile data. Lookups may fail independently of the ride store.
pub trait ProfileDirectory: Send + Sync {
    fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>, RideError>;
}

/// A ride as shown to one of its parties.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RideView {
    #[serde(flatten)]
    pub ride: RideRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserProfile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub riders: Vec<UserProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl UserProfile {
    pub fn new(id: &str, full_name: &str, email: &str, college_name: &str) -> Self {
        Self {
            id: id.to_string(),
            full_name: full_name.to_string(),
            email: email.to_string(),
            college_name: college_name.to_string(),
        }
    }
}

impl RideView {
    pub fn bare(ride: RideRecord) -> Self {
        Self {
            ride,
            owner: None,
            riders: vec![],
            note: None,
        }
    }

    /// Attaches profiles for the owner and every matched rider. Any lookup
    /// failure yields the bare record with a note instead of an error.
    pub fn enrich(ride: RideRecord, directory: &dyn ProfileDirectory) -> Self {
        match Self::lookup_all(&ride, directory) {
            Ok((owner, riders)) => Self {
                ride,
                owner,
                riders,
                note: None,
            },
            Err(e) => {
                warn!(ride_id = %ride.id, error = %e, "profile enrichment failed, returning bare ride");
                Self {
                    note: Some(ENRICHMENT_NOTE.to_string()),
                    ..Self::bare(ride)
                }
            }
        }
    }

    fn lookup_all(
        ride: &RideRecord,
        directory: &dyn ProfileDirectory,
    ) -> Result<(Option<UserProfile>, Vec<UserProfile>), RideError> {
        let owner = directory.lookup(&ride.owner_id)?;
        let mut riders = Vec::with_capacity(ride.matched_with.len());
        for rider in &ride.matched_with {
            if let Some(profile) = directory.lookup(&rider.user_id)? {
                riders.push(profile);
            }
        }
        Ok((owner, riders))
    }
}
