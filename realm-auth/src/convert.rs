//! Conversion of JWK key material into verification keys.
//!
//! The modulus and exponent are decoded into big-endian integers, assembled
//! into an RSA public key and serialized as SubjectPublicKeyInfo PEM, which
//! is what the JWT library loads for RS256 verification.
//!
//! If any step fails, [`to_verification_key`] does not report an error.
//! It hands back the raw JWK as [`VerificationKey::Passthrough`] and the
//! failure surfaces later as a signature error. Callers that want the
//! failure at conversion time use [`try_to_verification_key`].

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::DecodingKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{BigUint, RsaPublicKey};
use thiserror::Error;
use tracing::{debug, error};

use crate::error::AuthError;
use crate::jwks::Jwk;

/// Why a JWK could not be turned into a public key.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("unsupported key type '{0}'")]
    UnsupportedKeyType(String),

    #[error("invalid base64url in '{field}': {source}")]
    Base64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("invalid RSA public key: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("failed to encode public key: {0}")]
    Encoding(#[from] rsa::pkcs8::spki::Error),
}

/// Key material ready for signature verification.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationKey {
    /// SubjectPublicKeyInfo PEM built from the JWK.
    Pem(String),
    /// Conversion failed; the JWK is passed through untouched.
    Passthrough(Jwk),
}

impl VerificationKey {
    /// Load the key into the JWT library.
    ///
    /// For a passthrough key the raw JWK components are handed to the library
    /// as-is, so a key the converter could not handle is rejected here.
    pub fn decoding_key(&self) -> Result<DecodingKey, AuthError> {
        match self {
            VerificationKey::Pem(pem) => DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| AuthError::SignatureInvalid(e.to_string())),
            VerificationKey::Passthrough(jwk) => DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
                .map_err(|e| AuthError::SignatureInvalid(e.to_string())),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, VerificationKey::Passthrough(_))
    }
}

/// Convert a JWK, falling back to passthrough on failure.
pub fn to_verification_key(jwk: &Jwk) -> VerificationKey {
    match rsa_public_key_pem(jwk) {
        Ok(pem) => {
            debug!(kid = %jwk.kid, "Converted JWK to PEM");
            VerificationKey::Pem(pem)
        }
        Err(e) => {
            error!(kid = %jwk.kid, error = %e, "Failed to convert JWK to PEM, passing JWK through");
            VerificationKey::Passthrough(jwk.clone())
        }
    }
}

/// Convert a JWK, failing on any conversion error.
pub fn try_to_verification_key(jwk: &Jwk) -> Result<VerificationKey, ConversionError> {
    rsa_public_key_pem(jwk).map(VerificationKey::Pem)
}

/// Build the SubjectPublicKeyInfo PEM for an RSA JWK.
pub fn rsa_public_key_pem(jwk: &Jwk) -> Result<String, ConversionError> {
    if jwk.kty != "RSA" {
        return Err(ConversionError::UnsupportedKeyType(jwk.kty.clone()));
    }

    let n = decode_uint("n", &jwk.n)?;
    let e = decode_uint("e", &jwk.e)?;
    let key = RsaPublicKey::new(n, e)?;

    Ok(key.to_public_key_pem(LineEnding::LF)?)
}

fn decode_uint(field: &'static str, value: &str) -> Result<BigUint, ConversionError> {
    // Some providers pad their base64url output.
    let bytes = URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|source| ConversionError::Base64 { field, source })?;
    Ok(BigUint::from_bytes_be(&bytes))
}
