//! Signed, time-bound identity tokens
//!
//! Tokens are HS256 JWTs carrying the user id and email. Credential checks
//! (password, OTP) happen before a token is issued and are not handled here.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::error::RideError;

const DEV_SECRET: &str = "dev-mode-secret-not-for-production-use-123456";
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub email: String,
    pub iat: u64,
    pub exp: u64,
}

/// The caller, as resolved from a verified token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub email: String,
}

#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    expiry_seconds: u64,
}

impl TokenIssuer {
    /// Returns an error if the secret is shorter than 32 bytes.
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, RideError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(RideError::Config(format!(
                "JWT secret must be at least {MIN_SECRET_LEN} characters"
            )));
        }
        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    pub fn new_dev() -> Self {
        Self {
            secret: DEV_SECRET.into(),
            expiry_seconds: 24 * 60 * 60,
        }
    }

    pub fn issue(&self, user_id: &str, email: &str) -> Result<String, RideError> {
        let now = unix_now()?;
        let claims = Claims {
            id: user_id.to_string(),
            email: email.to_string(),
            iat: now,
            exp: now.saturating_add(self.expiry_seconds),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| RideError::Authentication(format!("Failed to generate token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Identity, RideError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| RideError::Authentication(format!("Token is invalid: {e}")))?;

        Ok(Identity {
            user_id: data.claims.id,
            email: data.claims.email,
        })
    }
}

fn unix_now() -> Result<u64, RideError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| RideError::Dependency(format!("System time error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let issuer = TokenIssuer::new_dev();
        let token = issuer.issue("user_abc", "abc@campus.edu").unwrap();

        let identity = issuer.verify(&token).unwrap();

        assert_eq!(identity.user_id, "user_abc");
        assert_eq!(identity.email, "abc@campus.edu");
    }

    #[test]
    fn short_secret_rejected() {
        assert!(matches!(
            TokenIssuer::new("short".into(), 60),
            Err(RideError::Config(_))
        ));
    }

    #[test]
    fn huge_expiry_saturates() {
        let issuer = TokenIssuer::new("another-secret-that-is-long-enough-123".into(), u64::MAX).unwrap();

        let token = issuer.issue("user_abc", "abc@campus.edu").unwrap();

        assert_eq!(issuer.verify(&token).unwrap().user_id, "user_abc");
    }

    #[test]
    fn foreign_signature_rejected() {
        let ours = TokenIssuer::new_dev();
        let theirs = TokenIssuer::new("another-secret-that-is-long-enough-123".into(), 60).unwrap();
        let token = theirs.issue("user_abc", "abc@campus.edu").unwrap();

        assert!(matches!(ours.verify(&token), Err(RideError::Authentication(_))));
    }

    #[test]
    fn expired_token_rejected() {
        let issuer = TokenIssuer::new_dev();
        let now = unix_now().unwrap();
        let claims = Claims {
            id: "user_abc".into(),
            email: "abc@campus.edu".into(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(DEV_SECRET.as_bytes()),
        )
        .unwrap();

        assert!(issuer.verify(&token).is_err());
    }

    #[test]
    fn garbage_rejected() {
        assert!(TokenIssuer::new_dev().verify("not.a.jwt").is_err());
    }
}
