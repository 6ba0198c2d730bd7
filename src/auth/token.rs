//! Credential claim parsing
//!
//! The client never holds the signing secret, so tokens are decoded with
//! signature validation disabled. Parsing only answers two questions: is this
//! a structurally valid JWT, and when does it expire. Verification stays with
//! the backend.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Claims the client cares about. Everything else is carried opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Expiration time (Unix timestamp, fractional NumericDates floored)
    #[serde(deserialize_with = "numeric_date")]
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default, deserialize_with = "optional_numeric_date")]
    pub iat: Option<u64>,
    /// Subject (user id)
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// NumericDate may be an integer or a float; anything negative or
/// non-finite is rejected
fn numeric_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value < 0.0 {
        return Err(serde::de::Error::custom("exp must be a non-negative NumericDate"));
    }
    Ok(value.floor() as u64)
}

fn optional_numeric_date<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<f64>::deserialize(deserializer)? {
        Some(value) if value.is_finite() && value >= 0.0 => Ok(Some(value.floor() as u64)),
        Some(_) => Err(serde::de::Error::custom("iat must be a non-negative NumericDate")),
        None => Ok(None),
    }
}

/// Current Unix time in seconds
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Decode claims without verifying the signature.
///
/// Returns `None` for anything that is not a three-part JWT with a JSON
/// payload carrying a numeric `exp`.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    let header = jsonwebtoken::decode_header(token).ok()?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    // `exp` presence is enforced by TokenClaims, which also accepts float dates
    validation.required_spec_claims.clear();

    decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .ok()
}

/// Embedded expiry of `token`, or `None` if it is malformed
pub fn expiry_of(token: &str) -> Option<u64> {
    decode_claims(token).map(|claims| claims.exp)
}

/// Whether `token` parses as a credential this client can manage
pub fn is_well_formed(token: &str) -> bool {
    decode_claims(token).is_some()
}

/// Expired when `exp <= now`. Malformed tokens count as expired.
pub fn is_expired(token: &str, now: u64) -> bool {
    match expiry_of(token) {
        Some(exp) => exp <= now,
        None => true,
    }
}

/// Whether `token` expires within `window` of `now` (or already has)
pub fn expires_within(token: &str, window: Duration, now: u64) -> bool {
    match expiry_of(token) {
        Some(exp) => exp.saturating_sub(now) <= window.as_secs(),
        None => true,
    }
}
