//! Canonical request signatures
//!
//! The signed byte sequence is built from a [`SignaturePolicy`] and the facts
//! of one request. Every element is followed by a single zero byte:
//!
//! 1. policy version (4 bytes, big endian)
//! 2. timestamp (8 bytes, big endian platform file time)
//! 3. upper-cased HTTP method
//! 4. path and query
//! 5. `Authorization` header value, or empty
//! 6. each policy extra header value in policy order, or empty
//! 7. at most `max_body_bytes` of the body
//!
//! The sequence is hashed with SHA-256 and signed with the proof key. The
//! header value is `base64(version ++ timestamp ++ signature)`.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use http::HeaderMap;
use http::header::AUTHORIZATION;
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use tracing::debug;

use crate::errors::SigningError;
use crate::policy::SignaturePolicy;
use crate::types::{PlatformTime, ProofKey, ProofVerifyingKey};

/// Length of the version and timestamp prefix in a signature header
const HEADER_PREFIX_LEN: usize = 4 + 8;

/// The parts of a request covered by a signature
#[derive(Debug, Clone, Copy)]
pub struct RequestFacts<'a> {
    /// HTTP method, any case
    pub method: &'a str,
    /// Path plus query string, exactly as sent
    pub path_and_query: &'a str,
    /// Request headers
    pub headers: &'a HeaderMap,
    /// Full request body
    pub body: &'a [u8],
}

impl<'a> RequestFacts<'a> {
    /// Collect request facts
    #[must_use]
    pub fn new(method: &'a str, path_and_query: &'a str, headers: &'a HeaderMap, body: &'a [u8]) -> Self {
        Self {
            method,
            path_and_query,
            headers,
            body,
        }
    }
}

/// Decoded `Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Policy version the signer used
    pub version: u32,
    /// Signing time
    pub timestamp: PlatformTime,
    /// Raw signature bytes (`r ++ s` for ECDSA)
    pub signature: Vec<u8>,
}

impl SignatureHeader {
    /// Encode as the header value
    #[must_use]
    pub fn encode(&self) -> String {
        let mut raw = Vec::with_capacity(HEADER_PREFIX_LEN + self.signature.len());
        raw.extend_from_slice(&self.version.to_be_bytes());
        raw.extend_from_slice(&self.timestamp.ticks().to_be_bytes());
        raw.extend_from_slice(&self.signature);
        STANDARD.encode(raw)
    }

    /// Decode a header value
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::MalformedHeader`] if the value is not base64,
    /// is too short to hold a signature, or carries an invalid timestamp.
    pub fn parse(value: &str) -> Result<Self, SigningError> {
        let raw = STANDARD
            .decode(value.trim())
            .map_err(|e| SigningError::MalformedHeader {
                reason: format!("not base64: {e}"),
            })?;
        if raw.len() <= HEADER_PREFIX_LEN {
            return Err(SigningError::MalformedHeader {
                reason: format!("{} bytes is too short", raw.len()),
            });
        }

        let (version, rest) = raw.split_at(4);
        let (timestamp, signature) = rest.split_at(8);
        let version = u32::from_be_bytes(version.try_into().map_err(|_| SigningError::MalformedHeader {
            reason: "truncated version".to_string(),
        })?);
        let ticks = i64::from_be_bytes(timestamp.try_into().map_err(|_| SigningError::MalformedHeader {
            reason: "truncated timestamp".to_string(),
        })?);
        let timestamp = PlatformTime::from_ticks(ticks).map_err(|e| SigningError::MalformedHeader {
            reason: e.to_string(),
        })?;

        Ok(Self {
            version,
            timestamp,
            signature: signature.to_vec(),
        })
    }
}

fn push_element(out: &mut Vec<u8>, element: &[u8]) {
    out.extend_from_slice(element);
    out.push(0);
}

/// Build the canonical byte sequence for a request
///
/// # Errors
///
/// Returns [`SigningError::EmptyMethod`] if the method is empty.
pub fn canonical_bytes(
    policy: &SignaturePolicy,
    timestamp: PlatformTime,
    request: &RequestFacts<'_>,
) -> Result<Vec<u8>, SigningError> {
    if request.method.is_empty() {
        return Err(SigningError::EmptyMethod);
    }

    let header_value = |name: &str| request.headers.get(name).map_or(&[][..], |v| v.as_bytes());
    let body = &request.body[..policy.signed_body_len(request.body.len())];

    let mut out = Vec::with_capacity(64 + request.path_and_query.len() + body.len());
    push_element(&mut out, &policy.version.to_be_bytes());
    push_element(&mut out, &timestamp.ticks().to_be_bytes());
    push_element(&mut out, request.method.to_ascii_uppercase().as_bytes());
    push_element(&mut out, request.path_and_query.as_bytes());
    push_element(&mut out, header_value(AUTHORIZATION.as_str()));
    for name in &policy.extra_headers {
        push_element(&mut out, header_value(name));
    }
    push_element(&mut out, body);
    Ok(out)
}

fn digest(policy: &SignaturePolicy, timestamp: PlatformTime, request: &RequestFacts<'_>) -> Result<Vec<u8>, SigningError> {
    Ok(Sha256::digest(canonical_bytes(policy, timestamp, request)?).to_vec())
}

/// Sign a request and return the `Signature` header value
///
/// Signing is deterministic: the same inputs always yield the same header.
///
/// # Errors
///
/// Returns [`SigningError::UnsupportedAlgorithm`] when the policy does not
/// accept the key's algorithm, [`SigningError::EmptyMethod`] for an empty
/// method, or [`SigningError::CryptographicError`] if the key fails to sign.
pub fn sign(
    policy: &SignaturePolicy,
    key: &ProofKey,
    timestamp: PlatformTime,
    request: &RequestFacts<'_>,
) -> Result<String, SigningError> {
    let algorithm = key.algorithm();
    if !policy.supports(algorithm) {
        return Err(SigningError::UnsupportedAlgorithm {
            algorithm: algorithm.to_string(),
            version: policy.version,
        });
    }

    let hash = digest(policy, timestamp, request)?;
    let signature = match key {
        ProofKey::EcdsaP256(signing_key) => {
            let signature: p256::ecdsa::Signature =
                signing_key
                    .sign_prehash(&hash)
                    .map_err(|e| SigningError::CryptographicError {
                        reason: format!("ECDSA signing failed: {e}"),
                    })?;
            signature.to_bytes().to_vec()
        }
        ProofKey::Rsa(private_key) => private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &hash)
            .map_err(|e| SigningError::CryptographicError {
                reason: format!("RSA signing failed: {e}"),
            })?,
    };

    debug!(
        algorithm = %algorithm,
        version = policy.version,
        method = request.method,
        path = request.path_and_query,
        "Signed request"
    );

    Ok(SignatureHeader {
        version: policy.version,
        timestamp,
        signature,
    }
    .encode())
}

/// Verify a `Signature` header against a request
///
/// When `now` is supplied and the policy enforces clock skew, a timestamp
/// further than `clock_skew_seconds` from `now` fails verification.
///
/// # Errors
///
/// Returns [`SigningError::MalformedHeader`] if the header cannot be decoded
/// and [`SigningError::EmptyMethod`] for an empty method. A well-formed header
/// that does not match yields `Ok(false)`.
pub fn verify(
    policy: &SignaturePolicy,
    key: &ProofVerifyingKey,
    header: &str,
    request: &RequestFacts<'_>,
    now: Option<PlatformTime>,
) -> Result<bool, SigningError> {
    let parsed = SignatureHeader::parse(header)?;
    if parsed.version != policy.version {
        debug!(expected = policy.version, actual = parsed.version, "Signature version mismatch");
        return Ok(false);
    }

    if let Some(now) = now
        && !policy.ignore_clock_skew
        && parsed.timestamp.abs_diff(now).as_secs() > policy.clock_skew_seconds
    {
        debug!(
            timestamp = %parsed.timestamp,
            now = %now,
            skew_seconds = policy.clock_skew_seconds,
            "Signature timestamp outside allowed clock skew"
        );
        return Ok(false);
    }

    let hash = digest(policy, parsed.timestamp, request)?;
    let valid = match key {
        ProofVerifyingKey::EcdsaP256(verifying_key) => p256::ecdsa::Signature::from_slice(&parsed.signature)
            .is_ok_and(|signature| verifying_key.verify_prehash(&hash, &signature).is_ok()),
        ProofVerifyingKey::Rsa(public_key) => public_key
            .verify(Pkcs1v15Sign::new::<Sha256>(), &hash, &parsed.signature)
            .is_ok(),
    };
    Ok(valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use pretty_assertions::assert_eq;

    fn timestamp(seconds: i64) -> PlatformTime {
        PlatformTime::from_ticks(133_000_000_000_000_000 + seconds * 10_000_000).unwrap()
    }

    #[test]
    fn test_canonical_layout() {
        let policy = SignaturePolicy {
            extra_headers: vec!["x-xbl-contract-version".to_string(), "x-missing".to_string()],
            max_body_bytes: 3,
            ..SignaturePolicy::default()
        };
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("XBL3.0 x=1;t"));
        headers.insert("x-xbl-contract-version", HeaderValue::from_static("1"));
        let request = RequestFacts::new("post", "/a?b=c", &headers, b"abcdef");
        let ts = PlatformTime::from_ticks(0x0102_0304_0506_0708).unwrap();

        let bytes = canonical_bytes(&policy, ts, &request).unwrap();

        let mut expected = vec![0, 0, 0, 1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 0];
        expected.extend_from_slice(b"POST\0/a?b=c\0XBL3.0 x=1;t\0");
        expected.extend_from_slice(b"1\0\0abc\0");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_empty_method_rejected() {
        let headers = HeaderMap::new();
        let request = RequestFacts::new("", "/", &headers, b"");
        let result = canonical_bytes(&SignaturePolicy::default(), timestamp(0), &request);
        assert_eq!(result, Err(SigningError::EmptyMethod));
    }

    #[test]
    fn test_header_prefix_carries_version_and_timestamp() {
        let policy = SignaturePolicy::default();
        let key = ProofKey::generate_p256();
        let headers = HeaderMap::new();
        let request = RequestFacts::new("GET", "/", &headers, b"");

        let header = sign(&policy, &key, timestamp(7), &request).unwrap();
        let parsed = SignatureHeader::parse(&header).unwrap();

        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.timestamp, timestamp(7));
        assert_eq!(parsed.signature.len(), 64);
    }

    #[test]
    fn test_clock_skew_enforced_on_verify() {
        let policy = SignaturePolicy::default();
        let key = ProofKey::generate_p256();
        let headers = HeaderMap::new();
        let request = RequestFacts::new("GET", "/", &headers, b"");
        let header = sign(&policy, &key, timestamp(0), &request).unwrap();
        let public = key.verifying_key();

        assert!(verify(&policy, &public, &header, &request, Some(timestamp(300))).unwrap());
        assert!(!verify(&policy, &public, &header, &request, Some(timestamp(301))).unwrap());

        let relaxed = SignaturePolicy {
            ignore_clock_skew: true,
            ..SignaturePolicy::default()
        };
        assert!(verify(&relaxed, &public, &header, &request, Some(timestamp(10_000))).unwrap());
    }

    #[test]
    fn test_far_timestamps_fail_skew_check() {
        let policy = SignaturePolicy::default();
        let key = ProofKey::generate_p256();
        let headers = HeaderMap::new();
        let request = RequestFacts::new("GET", "/", &headers, b"");
        let public = key.verifying_key();

        // 2^64 / 100 ticks ahead: the nanosecond distance no longer fits in u64
        let wrapping = PlatformTime::from_ticks(timestamp(0).ticks() + 184_467_440_737_095_517).unwrap();
        let first = PlatformTime::from_ticks(0).unwrap();
        let last = PlatformTime::from_ticks(2_650_467_743_999_999_999).unwrap();
        for signed_at in [wrapping, first, last] {
            let header = sign(&policy, &key, signed_at, &request).unwrap();
            assert!(!verify(&policy, &public, &header, &request, Some(timestamp(0))).unwrap());
            assert!(verify(&policy, &public, &header, &request, Some(signed_at)).unwrap());
        }
    }

    #[test]
    fn test_unsupported_algorithm_rejected() {
        let policy = SignaturePolicy {
            supported_algorithms: vec!["RS256".to_string()],
            ..SignaturePolicy::default()
        };
        let headers = HeaderMap::new();
        let request = RequestFacts::new("GET", "/", &headers, b"");

        let result = sign(&policy, &ProofKey::generate_p256(), timestamp(0), &request);
        assert!(matches!(result, Err(SigningError::UnsupportedAlgorithm { .. })));
    }

    #[test]
    fn test_version_mismatch_fails_verification() {
        let key = ProofKey::generate_p256();
        let headers = HeaderMap::new();
        let request = RequestFacts::new("GET", "/", &headers, b"");
        let header = sign(&SignaturePolicy::default(), &key, timestamp(0), &request).unwrap();

        let v2 = SignaturePolicy {
            version: 2,
            ..SignaturePolicy::default()
        };
        assert!(!verify(&v2, &key.verifying_key(), &header, &request, None).unwrap());
    }

    #[test]
    fn test_malformed_header_is_an_error() {
        let headers = HeaderMap::new();
        let request = RequestFacts::new("GET", "/", &headers, b"");
        let key = ProofKey::generate_p256().verifying_key();
        let result = verify(&SignaturePolicy::default(), &key, "AAAA", &request, None);
        assert!(matches!(result, Err(SigningError::MalformedHeader { .. })));
    }
}
