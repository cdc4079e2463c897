//! Access credential inspection.
//!
//! The client only reads the `exp` claim to decide whether a stored
//! credential is still usable. Signatures are the server's business and are
//! never checked here.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed credential: {0}")]
    Malformed(String),

    #[error("credential has no expiry claim")]
    MissingExpiry,

    #[error("credential expiry is out of range")]
    InvalidExpiry,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<f64>,
}

/// Decodes the expiry instant embedded in a JWT-shaped credential.
pub fn decode_expiry(token: &str) -> Result<DateTime<Utc>, TokenError> {
    let mut parts = token.trim().split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
        _ => return Err(TokenError::Malformed("expected three segments".to_string())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|err| TokenError::Malformed(err.to_string()))?;
    let claims: Claims =
        serde_json::from_slice(&bytes).map_err(|err| TokenError::Malformed(err.to_string()))?;

    let exp = claims.exp.ok_or(TokenError::MissingExpiry)?;
    if !exp.is_finite() {
        return Err(TokenError::InvalidExpiry);
    }
    DateTime::from_timestamp(exp.floor() as i64, 0).ok_or(TokenError::InvalidExpiry)
}

/// True when the credential decodes and its expiry is strictly after `now`.
pub fn is_live(token: &str, now: DateTime<Utc>) -> Result<bool, TokenError> {
    Ok(decode_expiry(token)? > now)
}
