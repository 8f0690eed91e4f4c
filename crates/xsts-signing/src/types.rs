//! Proof keys and platform timestamps
//!
//! A [`ProofKey`] is the asymmetric key bound to a token for its whole
//! lifetime. Requests presenting the token are signed with it. A
//! [`PlatformTime`] is the 100-nanosecond Windows file time carried in every
//! signature header.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _};
use rand::rngs::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::errors::SigningError;
use crate::jwk::ProofKeyJwk;

/// Signature algorithms understood by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// ECDSA with the P-256 curve and SHA-256
    #[serde(rename = "ES256")]
    ES256,

    /// RSA with PKCS#1 v1.5 padding and SHA-256
    #[serde(rename = "RS256")]
    RS256,
}

impl SignatureAlgorithm {
    /// Algorithm name as used in signature policies
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ES256 => "ES256",
            Self::RS256 => "RS256",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Private half of a token's proof key
///
/// The key travels with the token it was used to obtain; a freshly issued
/// token always comes with a freshly generated key.
#[derive(Clone)]
pub enum ProofKey {
    /// ECDSA P-256 key (the platform default)
    EcdsaP256(SigningKey),
    /// RSA key
    Rsa(RsaPrivateKey),
}

impl ProofKey {
    /// Generate a fresh ephemeral P-256 proof key
    #[must_use]
    pub fn generate_p256() -> Self {
        Self::EcdsaP256(SigningKey::random(&mut OsRng))
    }

    /// Signature algorithm implied by the key type
    #[must_use]
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            Self::EcdsaP256(_) => SignatureAlgorithm::ES256,
            Self::Rsa(_) => SignatureAlgorithm::RS256,
        }
    }

    /// Public half of the key
    #[must_use]
    pub fn verifying_key(&self) -> ProofVerifyingKey {
        match self {
            Self::EcdsaP256(key) => ProofVerifyingKey::EcdsaP256(VerifyingKey::from(key)),
            Self::Rsa(key) => ProofVerifyingKey::Rsa(RsaPublicKey::from(key)),
        }
    }

    /// JSON Web Key form of the public half, as sent when requesting a token
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::KeyEncoding`] for RSA keys; the token service
    /// only accepts EC proof keys.
    pub fn to_jwk(&self) -> Result<ProofKeyJwk, SigningError> {
        match self {
            Self::EcdsaP256(key) => ProofKeyJwk::from_verifying_key(key.verifying_key()),
            Self::Rsa(_) => Err(SigningError::KeyEncoding {
                reason: "RSA proof keys have no EC JWK representation".to_string(),
            }),
        }
    }

    /// PKCS#8 DER encoding of the private key
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::KeyEncoding`] if the key cannot be serialised.
    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, SigningError> {
        let document = match self {
            Self::EcdsaP256(key) => key.to_pkcs8_der(),
            Self::Rsa(key) => rsa::pkcs8::EncodePrivateKey::to_pkcs8_der(key),
        }
        .map_err(|e| SigningError::KeyEncoding {
            reason: format!("Failed to encode proof key: {e}"),
        })?;
        Ok(Zeroizing::new(document.as_bytes().to_vec()))
    }

    /// Rebuild a proof key from its PKCS#8 DER encoding
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::KeyEncoding`] if the bytes hold neither a
    /// P-256 nor an RSA private key.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, SigningError> {
        if let Ok(key) = SigningKey::from_pkcs8_der(der) {
            return Ok(Self::EcdsaP256(key));
        }
        rsa::pkcs8::DecodePrivateKey::from_pkcs8_der(der)
            .map(Self::Rsa)
            .map_err(|e| SigningError::KeyEncoding {
                reason: format!("Unrecognised proof key encoding: {e}"),
            })
    }
}

impl fmt::Debug for ProofKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofKey")
            .field("algorithm", &self.algorithm())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Public half of a proof key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofVerifyingKey {
    /// ECDSA P-256 public key
    EcdsaP256(VerifyingKey),
    /// RSA public key
    Rsa(RsaPublicKey),
}

/// Seconds between 1601-01-01 and 1970-01-01
const UNIX_EPOCH_OFFSET_SECONDS: i64 = 11_644_473_600;

/// 100-nanosecond ticks per second
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Largest file time the platform accepts (9999-12-31T23:59:59.9999999Z)
const MAX_FILE_TIME: i64 = 2_650_467_743_999_999_999;

/// Timestamp in Windows file time: 100 ns ticks since 1601-01-01 UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlatformTime(i64);

impl PlatformTime {
    /// Wrap a raw tick count
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::InvalidTimestamp`] when the value lies outside
    /// the representable file-time range.
    pub fn from_ticks(ticks: i64) -> Result<Self, SigningError> {
        if (0..=MAX_FILE_TIME).contains(&ticks) {
            Ok(Self(ticks))
        } else {
            Err(SigningError::InvalidTimestamp { ticks })
        }
    }

    /// Convert a wall-clock instant
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::InvalidTimestamp`] for instants before 1601 or
    /// after year 9999.
    pub fn from_system_time(time: SystemTime) -> Result<Self, SigningError> {
        let since_unix: i128 = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => i128::try_from(after.as_nanos() / 100).unwrap_or(i128::MAX),
            Err(before) => -i128::try_from(before.duration().as_nanos() / 100).unwrap_or(i128::MAX),
        };
        let ticks = since_unix + i128::from(UNIX_EPOCH_OFFSET_SECONDS * TICKS_PER_SECOND);
        let ticks = i64::try_from(ticks).map_err(|_| SigningError::InvalidTimestamp { ticks: i64::MAX })?;
        Self::from_ticks(ticks)
    }

    /// Convert a chrono timestamp
    ///
    /// # Errors
    ///
    /// See [`PlatformTime::from_system_time`].
    pub fn from_datetime(time: DateTime<Utc>) -> Result<Self, SigningError> {
        Self::from_system_time(time.into())
    }

    /// Current wall-clock time
    ///
    /// # Errors
    ///
    /// Only fails if the system clock is set outside the file-time range.
    pub fn now() -> Result<Self, SigningError> {
        Self::from_system_time(SystemTime::now())
    }

    /// Raw tick count
    #[must_use]
    pub fn ticks(self) -> i64 {
        self.0
    }

    /// Equivalent wall-clock instant
    #[must_use]
    pub fn to_system_time(self) -> SystemTime {
        let unix_ticks = self.0 - UNIX_EPOCH_OFFSET_SECONDS * TICKS_PER_SECOND;
        let magnitude = ticks_to_duration(unix_ticks.unsigned_abs());
        if unix_ticks >= 0 {
            UNIX_EPOCH + magnitude
        } else {
            UNIX_EPOCH - magnitude
        }
    }

    /// Absolute distance between two timestamps
    #[must_use]
    pub fn abs_diff(self, other: Self) -> Duration {
        ticks_to_duration(self.0.abs_diff(other.0))
    }
}

fn ticks_to_duration(ticks: u64) -> Duration {
    let per_second = TICKS_PER_SECOND.unsigned_abs();
    Duration::new(ticks / per_second, ((ticks % per_second) * 100) as u32)
}

impl fmt::Display for PlatformTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_epoch_maps_to_known_file_time() {
        let time = PlatformTime::from_system_time(UNIX_EPOCH).unwrap();
        assert_eq!(time.ticks(), 116_444_736_000_000_000);
        assert_eq!(time.to_system_time(), UNIX_EPOCH);
    }

    #[test]
    fn test_file_time_range_is_enforced() {
        assert!(PlatformTime::from_ticks(-1).is_err());
        assert!(PlatformTime::from_ticks(0).is_ok());
        assert!(PlatformTime::from_ticks(MAX_FILE_TIME).is_ok());
        assert!(PlatformTime::from_ticks(MAX_FILE_TIME + 1).is_err());
    }

    #[test]
    fn test_abs_diff_is_symmetric() {
        let a = PlatformTime::from_ticks(1_000 * TICKS_PER_SECOND).unwrap();
        let b = PlatformTime::from_ticks(1_300 * TICKS_PER_SECOND).unwrap();
        assert_eq!(a.abs_diff(b), Duration::from_secs(300));
        assert_eq!(b.abs_diff(a), Duration::from_secs(300));
    }

    #[test]
    fn test_abs_diff_across_full_range() {
        let first = PlatformTime::from_ticks(0).unwrap();
        let last = PlatformTime::from_ticks(MAX_FILE_TIME).unwrap();
        let span = Duration::new(265_046_774_399, 999_999_900);
        assert_eq!(first.abs_diff(last), span);
        assert_eq!(last.abs_diff(first), span);
    }

    #[test]
    fn test_system_time_at_range_bounds() {
        let first = PlatformTime::from_ticks(0).unwrap();
        let last = PlatformTime::from_ticks(MAX_FILE_TIME).unwrap();
        assert_eq!(
            UNIX_EPOCH.duration_since(first.to_system_time()).unwrap(),
            Duration::from_secs(11_644_473_600)
        );
        assert_eq!(
            last.to_system_time().duration_since(UNIX_EPOCH).unwrap(),
            Duration::new(253_402_300_799, 999_999_900)
        );
        assert_eq!(PlatformTime::from_system_time(last.to_system_time()).unwrap(), last);
    }

    #[test]
    fn test_p256_proof_key_roundtrips_through_pkcs8() {
        let key = ProofKey::generate_p256();
        let der = key.to_pkcs8_der().unwrap();
        let restored = ProofKey::from_pkcs8_der(&der).unwrap();
        assert_eq!(restored.verifying_key(), key.verifying_key());
        assert_eq!(restored.algorithm(), SignatureAlgorithm::ES256);
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let rendered = format!("{:?}", ProofKey::generate_p256());
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("ES256"));
    }
}
