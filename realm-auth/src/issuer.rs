//! Issuer resolution.
//!
//! Keycloak stamps `iss` with whatever hostname the client used to reach it,
//! so a token minted through a public URL carries a different issuer than the
//! one this service sees internally. The resolver picks the issuer a token is
//! finally checked against.

use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::error::AuthError;

/// Outcome of issuer resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedIssuer {
    /// Token matches the primary issuer.
    Primary(String),
    /// Token matches the alternate issuer.
    Alternate(String),
    /// Token matches neither; its own claim is used.
    TokenClaimed(String),
}

impl ResolvedIssuer {
    pub fn as_str(&self) -> &str {
        match self {
            ResolvedIssuer::Primary(s)
            | ResolvedIssuer::Alternate(s)
            | ResolvedIssuer::TokenClaimed(s) => s,
        }
    }

    /// Whether the issuer came from configuration rather than the token.
    pub fn is_configured(&self) -> bool {
        !matches!(self, ResolvedIssuer::TokenClaimed(_))
    }
}

/// Decides which issuer string a token is validated against.
#[derive(Debug, Clone)]
pub struct IssuerResolver {
    primary: String,
    alternate: String,
    trust_token_issuer: bool,
}

impl IssuerResolver {
    pub fn new(
        primary: impl Into<String>,
        alternate: impl Into<String>,
        trust_token_issuer: bool,
    ) -> Self {
        Self { primary: primary.into(), alternate: alternate.into(), trust_token_issuer }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.primary_issuer(), config.alternate_issuer(), config.trust_token_issuer)
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn alternate(&self) -> &str {
        &self.alternate
    }

    /// Resolve the issuer for a token claiming `token_issuer`.
    ///
    /// With `trust_token_issuer` enabled an unknown issuer is accepted as-is,
    /// so the final `iss` check can never fail on its account. Otherwise it is
    /// rejected with [`AuthError::IssuerMismatchUnrecoverable`].
    pub fn resolve(&self, token_issuer: &str) -> Result<ResolvedIssuer, AuthError> {
        if token_issuer == self.primary {
            return Ok(ResolvedIssuer::Primary(self.primary.clone()));
        }
        if token_issuer == self.alternate {
            return Ok(ResolvedIssuer::Alternate(self.alternate.clone()));
        }

        warn!(token = %token_issuer, expected = %self.primary, "Issuer mismatch");
        if !self.trust_token_issuer {
            return Err(AuthError::IssuerMismatchUnrecoverable {
                expected: self.primary.clone(),
                actual: token_issuer.to_string(),
            });
        }

        info!("Using token issuer for verification");
        Ok(ResolvedIssuer::TokenClaimed(token_issuer.to_string()))
    }
}
