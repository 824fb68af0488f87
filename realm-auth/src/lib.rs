//! Bearer token verification for Keycloak realms.
//!
//! This crate keeps a cache of a realm's public signing keys, converts the
//! published JWKs into verification keys, resolves which issuer a token is
//! checked against and enforces RS256 signature, expiry and issuer checks.
//! An unknown key id triggers one key refresh before the token is rejected.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use realm_auth::{AuthConfig, TokenVerifier, require_role};
//!
//! let verifier = TokenVerifier::new(AuthConfig::from_env()?).await?;
//!
//! let claims = verifier.verify_token(token).await?;
//! require_role(&claims, "admin")?;
//! println!("User: {}", claims.username());
//! ```
//!
//! # Features
//!
//! - `axum`: `IntoResponse` for [`AuthError`] plus the `BearerToken` and
//!   `AuthenticatedUser` extractors.

pub mod claims;
pub mod config;
pub mod convert;
pub mod error;
pub mod issuer;
pub mod jwks;
pub mod roles;
pub mod token;
pub mod verifier;

#[cfg(feature = "axum")]
pub mod http;

pub use claims::{Audience, RealmAccess, TokenClaims};
pub use config::{AuthConfig, AuthConfigBuilder};
pub use convert::{ConversionError, VerificationKey, to_verification_key};
pub use error::{AuthError, ConfigError, Result};
pub use issuer::{IssuerResolver, ResolvedIssuer};
pub use jwks::{HttpKeyFetcher, Jwk, KeyFetcher, KeySet, KeyStore};
pub use roles::require_role;
pub use token::{UnverifiedToken, inspect_unverified};
pub use verifier::TokenVerifier;

#[cfg(feature = "axum")]
pub use http::{AuthenticatedUser, BearerToken};
