//! Identifier helpers

use bech32::{Bech32m, Hrp};
use uuid7::uuid7;

use crate::error::{RideError, ValidationError};

pub const RIDE_HRP: &str = "ride_";
pub const USER_HRP: &str = "user_";

// construct a unique time-ordered id then encode using bech32m
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String, RideError> {
    let hrp = Hrp::parse(hrp).map_err(|e| RideError::Codec(e.to_string()))?;
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes()).map_err(|e| RideError::Codec(e.to_string()))
}

pub fn new_ride_id() -> Result<String, RideError> {
    new_uuid_to_bech32(RIDE_HRP)
}

pub fn new_user_id() -> Result<String, RideError> {
    new_uuid_to_bech32(USER_HRP)
}

/// Checks that `id` decodes as a `ride_` prefixed uuid.
pub fn validate_ride_id(id: &str) -> Result<(), ValidationError> {
    match bech32::decode(id) {
        Ok((hrp, data)) if hrp.as_str() == RIDE_HRP && data.len() == 16 => Ok(()),
        _ => Err(ValidationError::InvalidRideId(id.to_string())),
    }
}
