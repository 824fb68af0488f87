//! axum integration: bearer extraction and error responses.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::{StatusCode, header, request::Parts};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::claims::TokenClaims;
use crate::error::AuthError;
use crate::verifier::TokenVerifier;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let detail = match &self {
            // Upstream details stay in the logs.
            AuthError::Unavailable(_) => "Authentication service unavailable".to_string(),
            other => other.to_string(),
        };
        let body = Json(json!({ "detail": detail, "kind": self.kind() }));
        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Raw bearer token from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

impl BearerToken {
    /// Parse an `Authorization` header value.
    pub fn from_header_value(value: &str) -> Result<Self, AuthError> {
        let (scheme, token) = value.split_once(' ').ok_or_else(|| {
            AuthError::InvalidTokenStructure("malformed Authorization header".into())
        })?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::InvalidTokenStructure("expected Bearer scheme".into()));
        }
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidTokenStructure("empty bearer token".into()));
        }
        Ok(Self(token.to_string()))
    }
}

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or_else(|| AuthError::InvalidTokenStructure("missing Authorization header".into()))?
            .to_str()
            .map_err(|_| {
                AuthError::InvalidTokenStructure("malformed Authorization header".into())
            })?;
        Self::from_header_value(value)
    }
}

/// Claims of the caller, verified against the state's [`TokenVerifier`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub TokenClaims);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    Arc<TokenVerifier>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let verifier = Arc::<TokenVerifier>::from_ref(state);
        verifier.verify_token(&token).await.map(AuthenticatedUser)
    }
}
