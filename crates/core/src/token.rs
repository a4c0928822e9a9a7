//! Token pair and claim decoding
//!
//! The client never holds the backend's signing key, so tokens are decoded
//! without signature verification. The claims are only used to decide when to
//! refresh and to expose the current identity; the backend remains the
//! authority on whether a token is acceptable.

use std::fmt;

use chrono::Utc;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// Access and refresh token issued by login, signup or refresh
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    /// Short-lived bearer credential for individual requests
    pub access_token: String,
    /// Longer-lived credential used only against the refresh endpoint
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Claims decoded from the access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Subject (user ID)
    pub subject: String,
    /// Expiration time (as UTC timestamp)
    pub expires_at: i64,
    /// Every claim in the token, including `sub` and `exp`
    pub claims: Map<String, Value>,
}

impl Identity {
    /// Look up an arbitrary claim
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }
}

/// Decode the payload of a JWT without verifying its signature
pub fn decode_claims(token: &str) -> Result<Map<String, Value>, DecodeError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<Map<String, Value>>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Decode the identity carried by an access token
pub fn decode_identity(token: &str) -> Result<Identity, DecodeError> {
    let claims = decode_claims(token)?;
    let expires_at = expiry_claim(&claims).ok_or(DecodeError::MissingClaim("exp"))?;
    let subject = match claims.get("sub") {
        Some(Value::String(sub)) => sub.clone(),
        Some(Value::Number(sub)) => sub.to_string(),
        _ => return Err(DecodeError::MissingClaim("sub")),
    };

    Ok(Identity {
        subject,
        expires_at,
        claims,
    })
}

/// Read the `exp` claim of a token
pub fn expires_at(token: &str) -> Result<i64, DecodeError> {
    let claims = decode_claims(token)?;
    expiry_claim(&claims).ok_or(DecodeError::MissingClaim("exp"))
}

#[allow(clippy::cast_possible_truncation)]
fn expiry_claim(claims: &Map<String, Value>) -> Option<i64> {
    let exp = claims.get("exp")?;
    exp.as_i64().or_else(|| exp.as_f64().map(|secs| secs as i64))
}

/// Whether a token is expired, or about to be within `leeway_secs`
///
/// Tokens that cannot be decoded count as expired.
pub fn is_expired(token: &str, leeway_secs: i64) -> bool {
    is_expired_at(token, Utc::now().timestamp(), leeway_secs)
}

/// [`is_expired`] evaluated against an explicit clock
pub fn is_expired_at(token: &str, now: i64, leeway_secs: i64) -> bool {
    expires_at(token).map_or(true, |exp| exp <= now.saturating_add(leeway_secs))
}
