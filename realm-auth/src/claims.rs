//! Claims extracted from verified Keycloak access tokens.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Claims of a verified token.
///
/// Fields the service relies on are typed; everything else lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user identifier).
    #[serde(default)]
    pub sub: String,

    /// Issuer URL.
    #[serde(default)]
    pub iss: String,

    /// Audience (client IDs this token is intended for).
    #[serde(default, skip_serializing_if = "Audience::is_none")]
    pub aud: Audience,

    /// Expiration time (Unix timestamp).
    #[serde(default)]
    pub exp: u64,

    /// Issued at time (Unix timestamp).
    #[serde(default)]
    pub iat: u64,

    /// User's preferred username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    /// Email address (if available).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Whether email is verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,

    /// User's full name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// User's given (first) name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    /// User's family (last) name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    /// Group paths, when the realm maps them into the token.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    /// Realm-level roles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm_access: Option<RealmAccess>,

    /// Client-level roles keyed by client id.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub resource_access: HashMap<String, RealmAccess>,

    /// Unrecognised claims.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl TokenClaims {
    /// Build claims from a verified payload.
    ///
    /// Numeric dates may be fractional. A registered claim whose value does
    /// not fit its field is kept in `extra` under its own name instead of
    /// failing the whole token.
    pub fn from_payload(payload: Map<String, Value>) -> Self {
        let mut claims = TokenClaims::default();
        for (key, value) in payload {
            if !claims.absorb(&key, &value) {
                claims.extra.insert(key, value);
            }
        }
        claims
    }

    fn absorb(&mut self, key: &str, value: &Value) -> bool {
        match key {
            "sub" => assign(&mut self.sub, value),
            "iss" => assign(&mut self.iss, value),
            "aud" => assign(&mut self.aud, value),
            "exp" => numeric_date(value).map(|t| self.exp = t).is_some(),
            "iat" => numeric_date(value).map(|t| self.iat = t).is_some(),
            "preferred_username" => assign(&mut self.preferred_username, value),
            "email" => assign(&mut self.email, value),
            "email_verified" => assign(&mut self.email_verified, value),
            "name" => assign(&mut self.name, value),
            "given_name" => assign(&mut self.given_name, value),
            "family_name" => assign(&mut self.family_name, value),
            "groups" => assign(&mut self.groups, value),
            "realm_access" => assign(&mut self.realm_access, value),
            "resource_access" => assign(&mut self.resource_access, value),
            _ => false,
        }
    }

    /// Realm roles, empty when `realm_access` is absent.
    pub fn realm_roles(&self) -> &[String] {
        self.realm_access.as_ref().map(|r| r.roles.as_slice()).unwrap_or_default()
    }

    /// Check for a realm role.
    pub fn has_realm_role(&self, role: &str) -> bool {
        self.realm_roles().iter().any(|r| r == role)
    }

    /// Check for a client role.
    pub fn has_client_role(&self, client_id: &str, role: &str) -> bool {
        self.resource_access.get(client_id).is_some_and(|a| a.roles.iter().any(|r| r == role))
    }

    /// Username, falling back to the subject.
    pub fn username(&self) -> &str {
        self.preferred_username.as_deref().unwrap_or(&self.sub)
    }

    /// Get an unrecognised claim by key.
    pub fn get_extra<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.extra.get(key).and_then(|v| T::deserialize(v).ok())
    }
}

fn assign<T: DeserializeOwned>(slot: &mut T, value: &Value) -> bool {
    match T::deserialize(value) {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(_) => false,
    }
}

/// NumericDate as whole seconds; fractional values are truncated.
pub(crate) fn numeric_date(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Role container used by `realm_access` and `resource_access`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Audience can be a single string or array of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    /// Check if audience contains a specific value.
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Audience::None => false,
            Audience::Single(s) => s == value,
            Audience::Multiple(v) => v.iter().any(|s| s == value),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Audience::None)
    }

    /// Get all audiences as a vector.
    pub fn as_vec(&self) -> Vec<&str> {
        match self {
            Audience::None => vec![],
            Audience::Single(s) => vec![s.as_str()],
            Audience::Multiple(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }
}
