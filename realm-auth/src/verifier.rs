//! Bearer token verification against the realm's published keys.

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::claims::TokenClaims;
use crate::config::AuthConfig;
use crate::convert::{self, VerificationKey};
use crate::error::{AuthError, Result};
use crate::issuer::{IssuerResolver, ResolvedIssuer};
use crate::jwks::{HttpKeyFetcher, Jwk, KeyFetcher, KeySet, KeyStore};
use crate::token::UnverifiedToken;

/// Verifies RS256 access tokens issued by one Keycloak realm.
///
/// Construct once at startup and share behind an `Arc`; all methods take
/// `&self` and are safe to call from many request tasks at once.
///
/// ```rust,ignore
/// use realm_auth::{AuthConfig, TokenVerifier, require_role};
///
/// let verifier = TokenVerifier::new(AuthConfig::from_env()?).await?;
/// let claims = verifier.verify_token(bearer).await?;
/// require_role(&claims, "admin")?;
/// ```
pub struct TokenVerifier {
    config: AuthConfig,
    resolver: IssuerResolver,
    store: KeyStore,
    fetcher: Arc<dyn KeyFetcher>,
}

impl TokenVerifier {
    /// Create a verifier that fetches keys from the realm's certs endpoint.
    ///
    /// Performs the initial key fetch; fails with [`AuthError::Unavailable`]
    /// if the provider cannot be reached.
    pub async fn new(config: AuthConfig) -> Result<Self> {
        let fetcher = HttpKeyFetcher::new(config.jwks_url(), config.fetch_timeout())?;
        Self::with_fetcher(config, Arc::new(fetcher)).await
    }

    /// Create a verifier with a custom key source. Performs the initial fetch.
    pub async fn with_fetcher(
        config: AuthConfig,
        fetcher: Arc<dyn KeyFetcher>,
    ) -> Result<Self> {
        let verifier = Self::with_key_set(config, fetcher, KeySet::default());
        verifier.refresh_keys().await?;
        Ok(verifier)
    }

    /// Create a verifier seeded with `keys`, without fetching.
    pub fn with_key_set(config: AuthConfig, fetcher: Arc<dyn KeyFetcher>, keys: KeySet) -> Self {
        Self {
            resolver: IssuerResolver::from_config(&config),
            config,
            store: KeyStore::new(keys),
            fetcher,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.store
    }

    /// URL keys are fetched from.
    pub fn key_endpoint(&self) -> &str {
        self.fetcher.endpoint()
    }

    /// Fetch the current key set and replace the cached one.
    ///
    /// On failure the cached set is left untouched.
    pub async fn refresh_keys(&self) -> Result<()> {
        let keys = self.fetcher.fetch().await.inspect_err(|e| {
            error!(url = %self.fetcher.endpoint(), error = %e, "Failed to refresh public keys");
        })?;
        let count = keys.len();
        self.store.replace(keys);
        info!(key_count = count, "Public keys refreshed successfully");
        Ok(())
    }

    /// Verify a bearer token and return its claims.
    ///
    /// An unknown `kid` triggers exactly one refresh before giving up with
    /// [`AuthError::KeyNotFound`].
    pub async fn verify_token(&self, token: &str) -> Result<TokenClaims> {
        let unverified = UnverifiedToken::parse(token)?;
        debug!(
            token_issuer = ?unverified.issuer(),
            expected_issuer = %self.resolver.primary(),
            token_audience = ?unverified.audience(),
            expected_audience = %self.config.client_id,
            "Verifying token"
        );

        let kid = unverified
            .kid()
            .ok_or_else(|| AuthError::InvalidTokenStructure("missing key ID".into()))?;
        let jwk = self.resolve_key(kid).await?;
        let key = self.convert_key(&jwk)?;

        let token_issuer = unverified
            .issuer()
            .ok_or_else(|| AuthError::InvalidTokenStructure("missing issuer claim".into()))?;
        let issuer = self.resolver.resolve(token_issuer)?;

        let claims = self
            .verify_signed(token, &unverified, &key, &issuer)
            .inspect_err(|e| error!(kid = %kid, error = %e, "JWT verification failed"))?;

        info!(user = ?claims.preferred_username, "Token verified successfully");
        Ok(claims)
    }

    async fn resolve_key(&self, kid: &str) -> Result<Jwk> {
        if let Some(jwk) = self.store.get(kid) {
            return Ok(jwk);
        }

        info!(kid = %kid, "Key not found, refreshing public keys");
        self.refresh_keys().await?;

        self.store.get(kid).ok_or_else(|| AuthError::KeyNotFound(kid.to_string()))
    }

    fn convert_key(&self, jwk: &Jwk) -> Result<VerificationKey> {
        if self.config.strict_key_conversion {
            return convert::try_to_verification_key(jwk).map_err(|e| {
                AuthError::SignatureInvalid(format!("unusable key '{}': {e}", jwk.kid))
            });
        }
        Ok(convert::to_verification_key(jwk))
    }

    fn verify_signed(
        &self,
        token: &str,
        unverified: &UnverifiedToken,
        key: &VerificationKey,
        issuer: &ResolvedIssuer,
    ) -> Result<TokenClaims> {
        // Checked before the signature so an expired token reports `Expired`
        // whatever its signature.
        if let Some(exp) = unverified.expires_at() {
            let now = jsonwebtoken::get_current_timestamp();
            if exp < now.saturating_sub(self.config.leeway_secs) {
                return Err(AuthError::Expired);
            }
        }

        let decoding_key = key.decoding_key()?;
        let validation = self.validation(issuer);
        let data = jsonwebtoken::decode::<Map<String, Value>>(token, &decoding_key, &validation)
            .map_err(|e| {
                if matches!(e.kind(), ErrorKind::InvalidIssuer) {
                    AuthError::IssuerMismatchUnrecoverable {
                        expected: issuer.as_str().to_string(),
                        actual: unverified.issuer().unwrap_or_default().to_string(),
                    }
                } else {
                    AuthError::from(e)
                }
            })?;

        Ok(TokenClaims::from_payload(data.claims))
    }

    fn validation(&self, issuer: &ResolvedIssuer) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.config.leeway_secs;
        validation.validate_exp = true;
        validation.set_issuer(&[issuer.as_str()]);
        if self.config.verify_audience {
            validation.set_audience(&[&self.config.client_id]);
        } else {
            validation.validate_aud = false;
        }
        validation
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("config", &self.config)
            .field("endpoint", &self.fetcher.endpoint())
            .field("key_count", &self.store.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEYS: &str = include_str!("../tests/fixtures/jwks.json");
    const SIGNING_KEY: &str = include_str!("../tests/fixtures/primary.pem");
    const KID: &str = "primary-rs256";

    struct StaticFetcher {
        body: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KeyFetcher for StaticFetcher {
        async fn fetch(&self) -> Result<KeySet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            KeySet::from_json(self.body.as_bytes())
        }

        fn endpoint(&self) -> &str {
            "memory://jwks"
        }
    }

    fn sign(kid: Option<&str>, claims: serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_string);
        let key = EncodingKey::from_rsa_pem(SIGNING_KEY.as_bytes()).unwrap();
        jsonwebtoken::encode(&header, &claims, &key).unwrap()
    }

    fn claims(iss: &str, exp_offset: i64) -> serde_json::Value {
        let now = jsonwebtoken::get_current_timestamp() as i64;
        json!({
            "sub": "user-1",
            "iss": iss,
            "exp": now + exp_offset,
            "iat": now,
            "preferred_username": "alice",
            "realm_access": { "roles": ["admin"] }
        })
    }

    async fn verifier(config: AuthConfig) -> (TokenVerifier, Arc<StaticFetcher>) {
        let fetcher = Arc::new(StaticFetcher { body: KEYS, calls: AtomicUsize::new(0) });
        let verifier = TokenVerifier::with_fetcher(config, fetcher.clone()).await.unwrap();
        (verifier, fetcher)
    }

    #[tokio::test]
    async fn test_initial_fetch_populates_store() {
        let (verifier, fetcher) = verifier(AuthConfig::default()).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(verifier.key_store().len(), 1);
    }

    #[tokio::test]
    async fn test_valid_token() {
        let (verifier, _) = verifier(AuthConfig::default()).await;
        let token = sign(Some(KID), claims("http://keycloak:8080/realms/testrealm", 300));

        let claims = verifier.verify_token(&token).await.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.preferred_username.as_deref(), Some("alice"));
        assert!(claims.has_realm_role("admin"));
    }

    #[tokio::test]
    async fn test_missing_kid() {
        let (verifier, fetcher) = verifier(AuthConfig::default()).await;
        let token = sign(None, claims("http://keycloak:8080/realms/testrealm", 300));

        let err = verifier.verify_token(&token).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidTokenStructure("missing key ID".into()));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_issuer() {
        let (verifier, _) = verifier(AuthConfig::default()).await;
        let exp = jsonwebtoken::get_current_timestamp() + 60;
        let token = sign(Some(KID), json!({"sub": "u", "exp": exp}));

        let err = verifier.verify_token(&token).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_token_structure");
    }

    #[tokio::test]
    async fn test_audience_toggle() {
        let token = sign(Some(KID), claims("http://keycloak:8080/realms/testrealm", 300));

        let (lenient, _) = verifier(AuthConfig::default()).await;
        assert!(lenient.verify_token(&token).await.is_ok());

        let strict_config = AuthConfig::builder().verify_audience(true).build().unwrap();
        let (strict, _) = verifier(strict_config).await;
        let err = strict.verify_token(&token).await.unwrap_err();
        assert_eq!(err.kind(), "signature_invalid");
    }

    #[tokio::test]
    async fn test_leeway_accepts_recently_expired() {
        let config = AuthConfig::builder().leeway_secs(120).build().unwrap();
        let (verifier, _) = verifier(config).await;
        let token = sign(Some(KID), claims("http://keycloak:8080/realms/testrealm", -30));
        assert!(verifier.verify_token(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_loosely_typed_claims_are_accepted() {
        let (verifier, _) = verifier(AuthConfig::default()).await;
        let now = jsonwebtoken::get_current_timestamp();
        let mut payload = claims("http://keycloak:8080/realms/testrealm", 300);
        payload["exp"] = json!(now as f64 + 300.5);
        payload["iat"] = json!(now as f64 + 0.25);
        payload["email_verified"] = json!("true");
        payload["groups"] = json!("/admins");
        let token = sign(Some(KID), payload);

        let claims = verifier.verify_token(&token).await.unwrap();
        assert_eq!(claims.exp, now + 300);
        assert_eq!(claims.iat, now);
        assert_eq!(claims.email_verified, None);
        assert_eq!(claims.extra["email_verified"], json!("true"));
        assert_eq!(claims.extra["groups"], json!("/admins"));
        assert!(claims.has_realm_role("admin"));
    }

    fn broken_key_verifier(strict: bool) -> TokenVerifier {
        let broken: Jwk = serde_json::from_value(json!({
            "kid": "broken",
            "kty": "RSA",
            "n": "!!not-base64!!",
            "e": "AQAB"
        }))
        .unwrap();
        let config = AuthConfig::builder().strict_key_conversion(strict).build().unwrap();
        let fetcher = Arc::new(StaticFetcher { body: KEYS, calls: AtomicUsize::new(0) });
        TokenVerifier::with_key_set(config, fetcher, KeySet::new([broken]))
    }

    #[tokio::test]
    async fn test_strict_key_conversion_rejects_unusable_key() {
        let verifier = broken_key_verifier(true);
        let token = sign(Some("broken"), claims("http://keycloak:8080/realms/testrealm", 300));

        match verifier.verify_token(&token).await.unwrap_err() {
            AuthError::SignatureInvalid(detail) => {
                assert!(detail.starts_with("unusable key 'broken'"), "{detail}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lenient_key_conversion_fails_at_decode() {
        let verifier = broken_key_verifier(false);
        let token = sign(Some("broken"), claims("http://keycloak:8080/realms/testrealm", 300));

        match verifier.verify_token(&token).await.unwrap_err() {
            AuthError::SignatureInvalid(detail) => {
                assert!(!detail.starts_with("unusable key"), "{detail}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
