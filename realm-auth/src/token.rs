//! Unverified token inspection.
//!
//! Nothing read here is trusted. It only drives key lookup, issuer resolution
//! and the early expiry check, and feeds the debug endpoint.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::Header;
use serde_json::{Map, Value};

use crate::claims::numeric_date;
use crate::error::AuthError;

/// Header and payload of a compact JWS, decoded without checking the signature.
#[derive(Debug, Clone)]
pub struct UnverifiedToken {
    pub header: Header,
    pub claims: Map<String, Value>,
}

impl UnverifiedToken {
    /// Split and decode a compact token.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidTokenStructure`] if the token does not have three
    /// segments or the header/payload are not base64url-encoded JSON objects.
    pub fn parse(token: &str) -> Result<Self, AuthError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::InvalidTokenStructure(e.to_string()))?;

        let mut segments = token.split('.');
        let (Some(_), Some(payload), Some(_), None) =
            (segments.next(), segments.next(), segments.next(), segments.next())
        else {
            return Err(AuthError::InvalidTokenStructure("expected three segments".into()));
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| {
                AuthError::InvalidTokenStructure(format!("payload is not base64url: {e}"))
            })?;
        let claims: Map<String, Value> = serde_json::from_slice(&bytes)
            .map_err(|e| {
                AuthError::InvalidTokenStructure(format!("payload is not a JSON object: {e}"))
            })?;

        Ok(Self { header, claims })
    }

    pub fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    pub fn issuer(&self) -> Option<&str> {
        self.claims.get("iss").and_then(Value::as_str)
    }

    pub fn audience(&self) -> Option<&Value> {
        self.claims.get("aud")
    }

    pub fn preferred_username(&self) -> Option<&str> {
        self.claims.get("preferred_username").and_then(Value::as_str)
    }

    /// `exp` as whole seconds. Fractional timestamps are truncated.
    pub fn expires_at(&self) -> Option<u64> {
        self.claims.get("exp").and_then(numeric_date)
    }

    /// Header and payload as JSON, for diagnostics.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "header": serde_json::to_value(&self.header).unwrap_or_default(),
            "payload": Value::Object(self.claims.clone()),
        })
    }
}

/// Decode a token's header and payload without verifying it.
pub fn inspect_unverified(token: &str) -> Result<UnverifiedToken, AuthError> {
    UnverifiedToken::parse(token)
}
