//! JWKS (JSON Web Key Set) fetching and storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AuthError, Result};

/// Individual JSON Web Key.
///
/// Only RSA keys with a key id are representable; anything else is dropped
/// while the key set is parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key ID
    pub kid: String,
    /// Key type (RSA)
    pub kty: String,
    /// Algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Key use (sig, enc)
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url)
    pub n: String,
    /// RSA exponent (base64url)
    pub e: String,
    /// Members we do not interpret (x5c, x5t, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Raw key-set document as published by the provider.
#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<serde_json::Value>,
}

/// Immutable snapshot of the trusted keys, indexed by key id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeySet {
    keys: HashMap<String, Jwk>,
}

impl KeySet {
    /// Build a key set from already-validated keys. Later duplicates win.
    pub fn new(keys: impl IntoIterator<Item = Jwk>) -> Self {
        Self { keys: keys.into_iter().map(|k| (k.kid.clone(), k)).collect() }
    }

    /// Parse a `{"keys": [...]}` document.
    ///
    /// Entries that are not usable signing keys are skipped with a warning;
    /// only a document without a `keys` array is an error.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let doc: JwksDocument = serde_json::from_slice(body)
            .map_err(|e| AuthError::Unavailable(format!("malformed key set: {e}")))?;
        Ok(Self::from_document(doc))
    }

    fn from_document(doc: JwksDocument) -> Self {
        let mut keys = HashMap::with_capacity(doc.keys.len());
        for raw in doc.keys {
            let jwk: Jwk = match serde_json::from_value(raw) {
                Ok(jwk) => jwk,
                Err(e) => {
                    warn!(error = %e, "Skipping unusable JWK");
                    continue;
                }
            };

            // Skip encryption keys
            if jwk.key_use.as_deref() == Some("enc") {
                debug!(kid = %jwk.kid, "Skipping encryption key");
                continue;
            }

            debug!(kid = %jwk.kid, kty = %jwk.kty, alg = ?jwk.alg, "Loaded JWK");
            keys.insert(jwk.kid.clone(), jwk);
        }
        Self { keys }
    }

    pub fn get(&self, kid: &str) -> Option<&Jwk> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key ids in sorted order.
    pub fn key_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// Shared slot holding the current [`KeySet`].
///
/// Readers take a short read lock to clone the `Arc`; [`KeyStore::replace`]
/// swaps the whole set under the write lock. The lock is never held across
/// an `.await`.
#[derive(Debug, Default)]
pub struct KeyStore {
    current: RwLock<Arc<KeySet>>,
}

impl KeyStore {
    pub fn new(initial: KeySet) -> Self {
        Self { current: RwLock::new(Arc::new(initial)) }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<KeySet> {
        // A poisoned lock still guards a fully-formed Arc.
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Look up a key by id in the current snapshot.
    pub fn get(&self, kid: &str) -> Option<Jwk> {
        self.snapshot().get(kid).cloned()
    }

    /// Replace the whole set.
    pub fn replace(&self, keys: KeySet) {
        let next = Arc::new(keys);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = next;
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

/// Source of the provider's current key set.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    /// Fetch the key set once. Implementations must not retry.
    async fn fetch(&self) -> Result<KeySet>;

    /// Where keys come from, for logging.
    fn endpoint(&self) -> &str;
}

/// Fetches the key set over HTTP with a bounded timeout.
#[derive(Debug, Clone)]
pub struct HttpKeyFetcher {
    url: String,
    client: reqwest::Client,
}

impl HttpKeyFetcher {
    /// Create a fetcher for `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Unavailable(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { url: url.into(), client })
    }
}

#[async_trait]
impl KeyFetcher for HttpKeyFetcher {
    async fn fetch(&self) -> Result<KeySet> {
        info!(url = %self.url, "Fetching public keys");

        let response = self.client.get(&self.url).send().await.map_err(|e| {
            warn!(url = %self.url, error = %e, "Failed to fetch public keys");
            AuthError::Unavailable(format!("failed to fetch key set: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %self.url, status = %status, "Key set endpoint returned an error");
            return Err(AuthError::Unavailable(format!(
                "key set endpoint returned status {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::Unavailable(format!("failed to read key set: {e}")))?;
        let keys = KeySet::from_json(&body)?;

        info!(url = %self.url, key_count = keys.len(), "Public keys fetched");
        Ok(keys)
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = include_str!("../tests/fixtures/jwks.json");

    #[test]
    fn test_jwk_parsing() {
        let jwk_json = r#"{
            "kty": "RSA",
            "kid": "test-key-1",
            "alg": "RS256",
            "use": "sig",
            "n": "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw",
            "e": "AQAB",
            "x5t": "abc"
        }"#;

        let jwk: Jwk = serde_json::from_str(jwk_json).unwrap();
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.kid, "test-key-1");
        assert_eq!(jwk.key_use.as_deref(), Some("sig"));
        assert_eq!(jwk.extra.get("x5t").and_then(|v| v.as_str()), Some("abc"));
    }

    #[test]
    fn test_key_set_skips_enc_and_unusable_keys() {
        let keys = KeySet::from_json(FIXTURE.as_bytes()).unwrap();
        assert_eq!(keys.key_ids(), vec!["primary-rs256"]);
        assert!(keys.get("primary-enc").is_none());
    }

    #[test]
    fn test_key_set_rejects_malformed_document() {
        assert!(matches!(KeySet::from_json(b"not json"), Err(AuthError::Unavailable(_))));
        assert!(matches!(KeySet::from_json(br#"{"kids": []}"#), Err(AuthError::Unavailable(_))));
        assert!(KeySet::from_json(br#"{"keys": []}"#).unwrap().is_empty());
    }

    #[test]
    fn test_store_replace_is_wholesale() {
        let store = KeyStore::new(KeySet::from_json(FIXTURE.as_bytes()).unwrap());
        let before = store.snapshot();
        assert!(store.get("primary-rs256").is_some());

        store.replace(KeySet::default());

        assert!(store.get("primary-rs256").is_none());
        assert!(store.is_empty());
        // Snapshots taken earlier are unaffected.
        assert_eq!(before.len(), 1);
    }
}
