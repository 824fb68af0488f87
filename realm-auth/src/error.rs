//! Error types for token verification and configuration.

use thiserror::Error;

/// Errors that can occur while verifying a bearer token or gating on roles.
///
/// Every variant carries enough detail to produce a human-readable message,
/// and [`AuthError::kind`] gives a stable machine-readable code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The identity provider could not be reached or returned garbage.
    #[error("Authentication service unavailable: {0}")]
    Unavailable(String),

    /// The token is not a well-formed JWT, or lacks a required header field.
    #[error("Invalid token: {0}")]
    InvalidTokenStructure(String),

    /// No key with the token's `kid` exists, even after a refresh.
    #[error("Invalid token: key not found (kid={0})")]
    KeyNotFound(String),

    /// Signature, algorithm or claim validation failed.
    #[error("Invalid token: {0}")]
    SignatureInvalid(String),

    /// The token's issuer cannot be reconciled with the configured issuers.
    #[error("Invalid issuer: expected '{expected}', got '{actual}'")]
    IssuerMismatchUnrecoverable {
        /// The configured primary issuer.
        expected: String,
        /// The issuer the token claims.
        actual: String,
    },

    /// The token's `exp` lies in the past.
    #[error("Invalid token: signature has expired")]
    Expired,

    /// Authenticated, but missing the required realm role.
    #[error("Role '{0}' required")]
    Forbidden(String),
}

impl AuthError {
    /// Stable identifier for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Unavailable(_) => "unavailable",
            AuthError::InvalidTokenStructure(_) => "invalid_token_structure",
            AuthError::KeyNotFound(_) => "key_not_found",
            AuthError::SignatureInvalid(_) => "signature_invalid",
            AuthError::IssuerMismatchUnrecoverable { .. } => "issuer_mismatch",
            AuthError::Expired => "expired",
            AuthError::Forbidden(_) => "forbidden",
        }
    }

    /// HTTP status code a caller should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::Unavailable(_) => 503,
            AuthError::Forbidden(_) => 403,
            _ => 401,
        }
    }

    /// Whether the failure is caused by the upstream provider rather than the client.
    pub fn is_service_error(&self) -> bool {
        matches!(self, AuthError::Unavailable(_))
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    /// Maps failures from the verifying decode pass.
    ///
    /// Issuer mismatches need both issuers, which the error does not carry,
    /// so the verifier maps `InvalidIssuer` itself. Here it is a plain
    /// validation failure.
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::SignatureInvalid(err.to_string()),
        }
    }
}

/// Errors raised while loading or validating [`AuthConfig`](crate::AuthConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required setting is empty.
    #[error("Configuration error: {0} is required")]
    Missing(&'static str),

    /// A setting is present but unusable.
    #[error("Configuration error: {field}: {message}")]
    Invalid {
        /// Name of the offending setting.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// A convenience result type for verification operations.
pub type Result<T> = std::result::Result<T, AuthError>;
