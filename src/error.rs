/// Caller-correctable mistakes. Never retried.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid ride type: {0}")]
    InvalidRideType(String),
    #[error("Consent must be either accepted or declined, got: {0}")]
    InvalidConsent(String),
    #[error("Invalid ride ID format: {0}")]
    InvalidRideId(String),
    #[error("Ride {0} is not awaiting consent")]
    NotAwaitingConsent(String),
    #[error("Ride {0} is already cancelled")]
    AlreadyCancelled(String),
    #[error("Pickup time out of range: {0}")]
    PickupTimeOutOfRange(String),
    #[error("Malformed request body: {0}")]
    MalformedBody(String),
}

#[derive(thiserror::Error, Debug)]
pub enum RideError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("User {user_id} is not a party to ride {ride_id}")]
    Forbidden { user_id: String, ride_id: String },
    #[error("Ride not found: {0}")]
    NotFound(String),
    #[error("Ride {0} was modified concurrently")]
    Conflict(String),
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode or decode record: {0}")]
    Codec(String),
    #[error("Dependency failure: {0}")]
    Dependency(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RideError {
    pub fn forbidden(user_id: &str, ride_id: &str) -> Self {
        Self::Forbidden {
            user_id: user_id.to_string(),
            ride_id: ride_id.to_string(),
        }
    }

    /// True for errors the caller cannot fix by changing the request.
    pub fn is_dependency(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Codec(_) | Self::Dependency(_) | Self::Config(_)
        )
    }
}
