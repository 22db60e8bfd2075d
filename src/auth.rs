//! Bearer token handling.
//!
//! The sync core never logs in by itself: the host hands it a token issued by
//! the backend. The token is kept in zeroizing memory, redacted in `Debug`
//! output, and its optional JWT `exp` claim is checked before a session is
//! opened so an expired token fails fast with `SyncError::Auth` instead of a
//! burst of 401s.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::fmt;
use zeroize::Zeroizing;

use crate::error::SyncError;

#[derive(Clone)]
pub struct AuthToken {
    raw: Zeroizing<String>,
}

impl AuthToken {
    pub fn new(raw: &str) -> Result<Self, SyncError> {
        let trimmed = raw.trim();
        let trimmed = match trimmed.strip_prefix("Bearer") {
            Some(rest) if rest.is_empty() || rest.starts_with(' ') => rest.trim(),
            _ => trimmed,
        };
        if trimmed.is_empty() {
            return Err(SyncError::Auth("missing bearer token".to_string()));
        }
        Ok(Self {
            raw: Zeroizing::new(trimmed.to_string()),
        })
    }

    pub fn as_str(&self) -> &str {
        self.raw.as_str()
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.raw.as_str())
    }

    /// `exp` claim of a JWT token, if the token is a JWT and carries one.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let exp = jwt_claims(self.as_str())?.get("exp")?.as_i64()?;
        Utc.timestamp_opt(exp, 0).single()
    }

    /// `sub` claim (the account email for this backend), if present.
    pub fn subject(&self) -> Option<String> {
        jwt_claims(self.as_str())?
            .get("sub")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map(|exp| exp <= now).unwrap_or(false)
    }

    /// Reject tokens whose `exp` claim is already in the past.
    pub fn ensure_valid(&self) -> Result<(), SyncError> {
        if self.is_expired_at(Utc::now()) {
            return Err(SyncError::Auth("token has expired".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("raw", &"<redacted>")
            .field("expires_at", &self.expires_at())
            .finish()
    }
}

fn jwt_claims(token: &str) -> Option<Value> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&decoded).ok()
}

#[cfg(test)]
pub(crate) fn make_jwt(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}
