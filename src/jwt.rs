//! Access token inspection.
//!
//! Tokens are opaque to the client except for one thing: the `exp` claim is
//! read at startup so a stale session can be dropped without a network round
//! trip. The signature is not verified here; the backend remains the only
//! authority on whether a token is accepted.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    exp: u64,
}

/// Errors that can occur while inspecting a token.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Failed to decode token: {0}")]
    Decoding(#[from] jsonwebtoken::errors::Error),
    #[error("System time error")]
    TimeError,
}

/// Read the expiry (Unix seconds) embedded in an access token.
pub fn access_expiry(token: &str) -> Result<u64, JwtError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    let data = jsonwebtoken::decode::<ExpiryClaims>(
        token,
        &DecodingKey::from_secret(&[]),
        &validation,
    )?;
    Ok(data.claims.exp)
}

/// Whether the token's expiry is at or before `now` (Unix seconds).
pub fn is_expired_at(token: &str, now: u64) -> Result<bool, JwtError> {
    Ok(access_expiry(token)? <= now)
}

/// Whether the token is already expired according to the system clock.
pub fn is_expired(token: &str) -> Result<bool, JwtError> {
    is_expired_at(token, now_secs()?)
}

pub fn now_secs() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}
