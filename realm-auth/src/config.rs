//! Identity provider configuration.

use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

/// Upper bound for the key-set fetch timeout.
pub const MAX_FETCH_TIMEOUT_SECS: u64 = 10;

/// Static configuration for token verification against one Keycloak realm.
///
/// Loaded once at startup (see [`AuthConfig::from_env`]) and never mutated.
#[derive(Clone, PartialEq)]
pub struct AuthConfig {
    /// Base URL of the identity provider as this service reaches it.
    pub server_url: String,
    /// Externally visible base URL; tokens minted through it carry this issuer.
    pub alternate_server_url: String,
    /// Realm name.
    pub realm: String,
    /// Client id, used as the expected audience.
    pub client_id: String,
    /// Client secret. Not used for verification.
    pub client_secret: Option<String>,
    /// Require `aud` to contain `client_id`.
    pub verify_audience: bool,
    /// Accept a token's own `iss` when it matches neither configured issuer.
    pub trust_token_issuer: bool,
    /// Fail at conversion time when a JWK cannot be turned into a public key.
    pub strict_key_conversion: bool,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_secs: u64,
    /// Timeout for the key-set request, in seconds.
    pub fetch_timeout_secs: u64,
}

fn default_fetch_timeout() -> u64 {
    MAX_FETCH_TIMEOUT_SECS
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            server_url: "http://keycloak:8080".to_string(),
            alternate_server_url: "http://keycloak:8080".to_string(),
            realm: "testrealm".to_string(),
            client_id: "test-client".to_string(),
            client_secret: None,
            verify_audience: false,
            trust_token_issuer: true,
            strict_key_conversion: false,
            leeway_secs: 0,
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("server_url", &self.server_url)
            .field("alternate_server_url", &self.alternate_server_url)
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("verify_audience", &self.verify_audience)
            .field("trust_token_issuer", &self.trust_token_issuer)
            .field("strict_key_conversion", &self.strict_key_conversion)
            .field("leeway_secs", &self.leeway_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .finish()
    }
}

impl AuthConfig {
    /// Create a new builder seeded with defaults.
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }

    /// Load configuration from process environment variables.
    ///
    /// Unset variables fall back to the defaults; see [`AuthConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// Recognised names: `KEYCLOAK_SERVER_URL`, `ALTERNATE_KEYCLOAK_SERVER_URL`,
    /// `KEYCLOAK_REALM`, `KEYCLOAK_CLIENT_ID`, `KEYCLOAK_CLIENT_SECRET`,
    /// `KEYCLOAK_VERIFY_AUDIENCE`, `KEYCLOAK_TRUST_TOKEN_ISSUER`,
    /// `KEYCLOAK_STRICT_KEY_CONVERSION`, `KEYCLOAK_LEEWAY_SECS`,
    /// `KEYCLOAK_FETCH_TIMEOUT_SECS`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = AuthConfig::builder();

        if let Some(url) = lookup("KEYCLOAK_SERVER_URL") {
            builder = builder.server_url(url);
        }
        if let Some(url) = lookup("ALTERNATE_KEYCLOAK_SERVER_URL") {
            builder = builder.alternate_server_url(url);
        }
        if let Some(realm) = lookup("KEYCLOAK_REALM") {
            builder = builder.realm(realm);
        }
        if let Some(client_id) = lookup("KEYCLOAK_CLIENT_ID") {
            builder = builder.client_id(client_id);
        }
        if let Some(secret) = lookup("KEYCLOAK_CLIENT_SECRET") {
            builder = builder.client_secret(secret);
        }
        if let Some(raw) = lookup("KEYCLOAK_VERIFY_AUDIENCE") {
            builder = builder.verify_audience(parse_flag("KEYCLOAK_VERIFY_AUDIENCE", &raw)?);
        }
        if let Some(raw) = lookup("KEYCLOAK_TRUST_TOKEN_ISSUER") {
            builder = builder.trust_token_issuer(parse_flag("KEYCLOAK_TRUST_TOKEN_ISSUER", &raw)?);
        }
        if let Some(raw) = lookup("KEYCLOAK_STRICT_KEY_CONVERSION") {
            builder =
                builder.strict_key_conversion(parse_flag("KEYCLOAK_STRICT_KEY_CONVERSION", &raw)?);
        }
        if let Some(raw) = lookup("KEYCLOAK_LEEWAY_SECS") {
            builder = builder.leeway_secs(parse_secs("KEYCLOAK_LEEWAY_SECS", &raw)?);
        }
        if let Some(raw) = lookup("KEYCLOAK_FETCH_TIMEOUT_SECS") {
            builder = builder.fetch_timeout_secs(parse_secs("KEYCLOAK_FETCH_TIMEOUT_SECS", &raw)?);
        }

        builder.build()
    }

    /// Issuer the provider stamps on tokens minted through `server_url`.
    pub fn primary_issuer(&self) -> String {
        realm_url(&self.server_url, &self.realm)
    }

    /// Issuer the provider stamps on tokens minted through `alternate_server_url`.
    pub fn alternate_issuer(&self) -> String {
        realm_url(&self.alternate_server_url, &self.realm)
    }

    /// Published key-set endpoint for the realm.
    pub fn jwks_url(&self) -> String {
        format!("{}/protocol/openid-connect/certs", self.primary_issuer())
    }

    /// Timeout applied to the key-set request.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("server_url", &self.server_url)?;
        check_url("alternate_server_url", &self.alternate_server_url)?;

        if self.realm.trim().is_empty() {
            return Err(ConfigError::Missing("realm"));
        }
        if self.realm.contains('/') {
            return Err(ConfigError::Invalid {
                field: "realm",
                message: format!("'{}' must not contain '/'", self.realm),
            });
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("client_id"));
        }
        if self.fetch_timeout_secs == 0 || self.fetch_timeout_secs > MAX_FETCH_TIMEOUT_SECS {
            return Err(ConfigError::Invalid {
                field: "fetch_timeout_secs",
                message: format!(
                    "must be between 1 and {MAX_FETCH_TIMEOUT_SECS}, got {}",
                    self.fetch_timeout_secs
                ),
            });
        }

        Ok(())
    }
}

fn realm_url(base: &str, realm: &str) -> String {
    format!("{}/realms/{}", base.trim_end_matches('/'), realm)
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(field));
    }
    if !value.starts_with("https://") && !value.starts_with("http://") {
        return Err(ConfigError::Invalid {
            field,
            message: format!("'{value}' must be a valid HTTP(S) URL"),
        });
    }
    Ok(())
}

fn parse_flag(field: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            field,
            message: format!("'{other}' is not a boolean"),
        }),
    }
}

fn parse_secs(field: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid { field, message: e.to_string() })
}

/// Builder for constructing a validated [`AuthConfig`].
#[derive(Debug, Clone, Default)]
pub struct AuthConfigBuilder {
    config: AuthConfig,
}

impl AuthConfigBuilder {
    /// Set the provider base URL.
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server_url = url.into();
        self
    }

    /// Set the externally visible provider base URL.
    pub fn alternate_server_url(mut self, url: impl Into<String>) -> Self {
        self.config.alternate_server_url = url.into();
        self
    }

    /// Set the realm name.
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.config.realm = realm.into();
        self
    }

    /// Set the client id (expected audience).
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    /// Set the client secret.
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.client_secret = Some(secret.into());
        self
    }

    pub fn verify_audience(mut self, enabled: bool) -> Self {
        self.config.verify_audience = enabled;
        self
    }

    pub fn trust_token_issuer(mut self, enabled: bool) -> Self {
        self.config.trust_token_issuer = enabled;
        self
    }

    pub fn strict_key_conversion(mut self, enabled: bool) -> Self {
        self.config.strict_key_conversion = enabled;
        self
    }

    pub fn leeway_secs(mut self, secs: u64) -> Self {
        self.config.leeway_secs = secs;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    /// Build the [`AuthConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a URL is malformed, the realm or client id
    /// is empty, or the fetch timeout is outside `1..=10` seconds.
    pub fn build(self) -> Result<AuthConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.primary_issuer(), "http://keycloak:8080/realms/testrealm");
        assert_eq!(
            config.jwks_url(),
            "http://keycloak:8080/realms/testrealm/protocol/openid-connect/certs"
        );
        assert!(!config.verify_audience);
        assert!(config.trust_token_issuer);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let config = AuthConfig::builder()
            .server_url("https://sso.example.com/")
            .alternate_server_url("https://login.example.com")
            .realm("acme")
            .build()
            .unwrap();
        assert_eq!(config.primary_issuer(), "https://sso.example.com/realms/acme");
        assert_eq!(config.alternate_issuer(), "https://login.example.com/realms/acme");
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            AuthConfig::builder().realm("").build().unwrap_err(),
            ConfigError::Missing("realm")
        );
        assert_eq!(
            AuthConfig::builder().client_id(" ").build().unwrap_err(),
            ConfigError::Missing("client_id")
        );
        assert!(matches!(
            AuthConfig::builder().server_url("keycloak:8080").build(),
            Err(ConfigError::Invalid { field: "server_url", .. })
        ));
        assert!(matches!(
            AuthConfig::builder().fetch_timeout_secs(30).build(),
            Err(ConfigError::Invalid { field: "fetch_timeout_secs", .. })
        ));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("KEYCLOAK_SERVER_URL", "http://keycloak:8080"),
            ("ALTERNATE_KEYCLOAK_SERVER_URL", "http://localhost:8080"),
            ("KEYCLOAK_REALM", "demo"),
            ("KEYCLOAK_CLIENT_ID", "demo-api"),
            ("KEYCLOAK_CLIENT_SECRET", "s3cret"),
            ("KEYCLOAK_VERIFY_AUDIENCE", "true"),
            ("KEYCLOAK_LEEWAY_SECS", "15"),
        ]);

        let config =
            AuthConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.alternate_issuer(), "http://localhost:8080/realms/demo");
        assert_eq!(config.client_id, "demo-api");
        assert_eq!(config.client_secret.as_deref(), Some("s3cret"));
        assert!(config.verify_audience);
        assert!(config.trust_token_issuer); // unchanged
        assert_eq!(config.leeway_secs, 15);
    }

    #[test]
    fn test_from_lookup_rejects_bad_flag() {
        let err = AuthConfig::from_lookup(|name| {
            (name == "KEYCLOAK_TRUST_TOKEN_ISSUER").then(|| "maybe".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "KEYCLOAK_TRUST_TOKEN_ISSUER", .. }));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = AuthConfig::builder().client_secret("hunter2").build().unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
