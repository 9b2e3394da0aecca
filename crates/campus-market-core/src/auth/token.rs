//! Client-side inspection of access tokens.
//!
//! Tokens are JWT-shaped (`header.payload.signature`). Only the payload is
//! decoded, and only to estimate expiry; the signature is never verified.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

/// Tokens expiring within this window are treated as already expired (5 minutes)
pub const EXPIRY_MARGIN_SECS: i64 = 300;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    pub exp: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
}

/// Decode the payload segment of a token.
///
/// Returns `None` for anything that is not three dot-separated segments with
/// a base64url JSON payload.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    // Some encoders keep the padding; the URL-safe engine here rejects it.
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Expiry instant of a token, if it carries a readable `exp` claim
pub fn expires_at(token: &str) -> Option<DateTime<Utc>> {
    let exp = decode_claims(token)?.exp?;
    DateTime::from_timestamp(exp, 0)
}

/// Whether `token` should be considered expired at `now` (seconds since epoch).
pub fn is_expired_at(token: Option<&str>, now: i64) -> bool {
    let Some(token) = token else {
        return true;
    };
    match decode_claims(token).and_then(|claims| claims.exp) {
        Some(exp) => exp <= now.saturating_add(EXPIRY_MARGIN_SECS),
        None => {
            debug!("Token payload unreadable or missing exp, treating as expired");
            true
        }
    }
}

/// Whether `token` should be considered expired now.
///
/// Absent, malformed and soon-to-expire tokens all count as expired.
pub fn is_token_expired(token: Option<&str>) -> bool {
    is_expired_at(token, Utc::now().timestamp())
}

#[cfg(test)]
pub(crate) fn make_token(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.signature", header, body)
}

#[cfg(test)]
pub(crate) fn token_expiring_in(secs: i64) -> String {
    make_token(&serde_json::json!({ "exp": Utc::now().timestamp() + secs, "sub": "a@rit.edu" }))
}
