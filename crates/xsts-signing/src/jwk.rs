//! EC proof-key JSON Web Key
//!
//! The service-token request embeds the public half of the proof key so the
//! issuer can bind the returned token to it.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use p256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::errors::SigningError;

/// Public P-256 key in the shape the token service expects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofKeyJwk {
    /// Always `ES256`
    pub alg: String,
    /// Always `EC`
    pub kty: String,
    /// Always `sig`
    #[serde(rename = "use")]
    pub key_use: String,
    /// Always `P-256`
    pub crv: String,
    /// Base64url x coordinate
    pub x: String,
    /// Base64url y coordinate
    pub y: String,
}

impl ProofKeyJwk {
    /// Build the JWK for a P-256 verifying key
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::CryptographicError`] if the point has no affine
    /// coordinates (the identity point).
    pub fn from_verifying_key(key: &VerifyingKey) -> Result<Self, SigningError> {
        let point = key.to_encoded_point(false);
        let x = point.x().ok_or_else(|| SigningError::CryptographicError {
            reason: "Failed to extract x coordinate from P-256 public key".to_string(),
        })?;
        let y = point.y().ok_or_else(|| SigningError::CryptographicError {
            reason: "Failed to extract y coordinate from P-256 public key".to_string(),
        })?;

        Ok(Self {
            alg: "ES256".to_string(),
            kty: "EC".to_string(),
            key_use: "sig".to_string(),
            crv: "P-256".to_string(),
            x: URL_SAFE_NO_PAD.encode(x),
            y: URL_SAFE_NO_PAD.encode(y),
        })
    }

    /// Recover the verifying key described by this JWK
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::KeyEncoding`] if the coordinates do not decode
    /// to a point on P-256.
    pub fn to_verifying_key(&self) -> Result<VerifyingKey, SigningError> {
        let decode = |value: &str| {
            URL_SAFE_NO_PAD
                .decode(value)
                .map_err(|e| SigningError::KeyEncoding {
                    reason: format!("Invalid JWK coordinate: {e}"),
                })
        };
        let x = decode(&self.x)?;
        let y = decode(&self.y)?;
        if x.len() != 32 || y.len() != 32 {
            return Err(SigningError::KeyEncoding {
                reason: "P-256 coordinates must be 32 bytes".to_string(),
            });
        }

        let mut sec1 = Vec::with_capacity(65);
        sec1.push(0x04);
        sec1.extend_from_slice(&x);
        sec1.extend_from_slice(&y);
        VerifyingKey::from_sec1_bytes(&sec1).map_err(|e| SigningError::KeyEncoding {
            reason: format!("JWK does not describe a P-256 point: {e}"),
        })
    }
}
