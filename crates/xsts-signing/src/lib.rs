//! # XSTS Signing - Canonical Request Signatures
//!
//! Every service-to-service call made against Xbox Live carries a `Signature`
//! header computed over a canonical byte sequence of the request. The signature
//! is produced with the proof key bound to the token presented in the
//! `Authorization` header, so a stolen token cannot be replayed without the key.
//!
//! ## Core Features
//!
//! - **Canonical signatures** - deterministic serialisation of a request as
//!   dictated by a [`SignaturePolicy`]
//! - **ES256 and RS256** - ECDSA P-256 and RSA PKCS#1 v1.5, both over SHA-256
//! - **Proof keys** - ephemeral P-256 keys with their JWK projection
//! - **Platform time** - Windows FILETIME timestamps as used on the wire
//!
//! ## Architecture
//!
//! - `errors` - signing error types
//! - `types` - proof keys and platform time
//! - `policy` - signature policy model
//! - `canonical` - canonicalisation, signing and verification
//! - `jwk` - EC proof-key JSON Web Key
//!
//! ## Example
//!
//! ```rust
//! use http::HeaderMap;
//! use xsts_signing::{PlatformTime, ProofKey, RequestFacts, SignaturePolicy};
//!
//! # fn main() -> xsts_signing::Result<()> {
//! let policy = SignaturePolicy::default();
//! let key = ProofKey::generate_p256();
//! let headers = HeaderMap::new();
//! let request = RequestFacts::new("POST", "/xsts/authorize", &headers, b"{}");
//!
//! let timestamp = PlatformTime::now()?;
//! let header = xsts_signing::sign(&policy, &key, timestamp, &request)?;
//! assert!(xsts_signing::verify(&policy, &key.verifying_key(), &header, &request, None)?);
//! # Ok(())
//! # }
//! ```

pub mod canonical;
pub mod errors;
pub mod jwk;
pub mod policy;
pub mod types;

pub use canonical::{RequestFacts, SignatureHeader, canonical_bytes, sign, verify};
pub use errors::*;
pub use jwk::ProofKeyJwk;
pub use policy::SignaturePolicy;
pub use types::*;

/// Signing result type
pub type Result<T> = std::result::Result<T, SigningError>;

/// Name of the request header carrying the canonical signature
pub const SIGNATURE_HEADER: &str = "Signature";

/// Default allowed clock skew between signer and verifier (5 minutes)
pub const DEFAULT_CLOCK_SKEW_SECONDS: u64 = 300;

/// Default number of body bytes covered by a signature (8 KiB)
pub const DEFAULT_MAX_BODY_BYTES: u64 = 8192;
