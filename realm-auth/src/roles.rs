//! Realm role gate.

use tracing::debug;

use crate::claims::TokenClaims;
use crate::error::AuthError;

/// Require `role` among the realm roles of verified claims.
///
/// Absent `realm_access` counts as having no roles.
pub fn require_role(claims: &TokenClaims, role: &str) -> Result<(), AuthError> {
    if claims.has_realm_role(role) {
        return Ok(());
    }
    debug!(user = %claims.username(), role = %role, "Missing required role");
    Err(AuthError::Forbidden(role.to_string()))
}
