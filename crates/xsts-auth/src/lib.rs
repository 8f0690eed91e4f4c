//! # XSTS Auth - Xbox Live Service Trust Layer
//!
//! Server-side handling of XSTS tokens for game services: validation of the
//! encrypted tokens clients present, and acquisition of the service and
//! delegated tokens the service needs to call platform APIs.
//!
//! ## Key Features
//!
//! - **Inbound validation** - RSA-OAEP key unwrap, HMAC tag check, AES-CBC
//!   decryption, DEFLATE, and RS256 verification of the inner token
//! - **Certificate cache** - permanent thumbprint cache with known-missing
//!   markers for the local store
//! - **Endpoint directory** - host to relying party and signature policy
//! - **Service tokens** - mutual-TLS issuance with a fresh proof key
//! - **Delegated tokens** - per user, relying party and sandbox, cached for
//!   their issued lifetime
//! - **Signed requests** - canonical `Signature` headers via `xsts-signing`
//!
//! ## Architecture
//!
//! - [`error`] - error taxonomy and caller-facing rejections
//! - [`config`] - configuration with production defaults
//! - [`certs`] - thumbprints, certificates, local store and resolver
//! - [`envelope`] - compact encrypted envelope
//! - [`claims`] - token payload and validated claims
//! - [`pipeline`] - inbound token validation
//! - [`endpoints`] - endpoint and signature policy directory
//! - [`service_token`] - service token manager
//! - [`delegated`] - delegated and service-auth token manager
//! - [`client`] - signed outbound requests
//! - [`bootstrap`] - start-up wiring
//! - [`tower`] - Tower middleware (feature `middleware`)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use xsts_auth::{MemoryCertificateStore, XstsConfig, XstsServices};
//!
//! let mut store = MemoryCertificateStore::new();
//! let rp = store.load_pem_files("rp.pem".as_ref(), "rp.key".as_ref())?;
//! let bp = store.load_pem_files("bp.pem".as_ref(), "bp.key".as_ref())?;
//!
//! let config = XstsConfig::default()
//!     .with_relying_party_thumbprint(rp.as_str())
//!     .with_business_partner_thumbprint(bp.as_str());
//! let services = XstsServices::bootstrap(config, Arc::new(store)).await?;
//!
//! let app = axum::Router::new().layer(services.layer());
//! ```
//!
//! ## Feature Flags
//!
//! - `middleware` (default) - Tower layer and service

pub mod bootstrap;
pub mod certs;
pub mod claims;
pub mod client;
pub mod config;
pub mod delegated;
pub mod endpoints;
pub mod envelope;
pub mod error;
pub mod pipeline;
pub mod service_token;

#[cfg(feature = "middleware")]
pub mod tower;

pub use bootstrap::XstsServices;
pub use certs::{Certificate, CertificateResolver, CertificateStore, MemoryCertificateStore, Thumbprint};
pub use claims::{ClientClaims, DeviceClaims, TitleClaims, UserClaims, XstsPayload};
pub use client::XblClient;
pub use config::{CertificateSource, XstsConfig};
pub use delegated::{CachedToken, DelegatedToken, DelegatedTokenManager, DisplayUser, TokenCacheKey, TokenSubject};
pub use endpoints::{Endpoint, EndpointDirectory, EndpointManifest, HostType};
pub use error::AuthError;
pub use pipeline::TokenValidator;
pub use service_token::{ServiceToken, ServiceTokenManager};

pub use xsts_signing::{PlatformTime, ProofKey, SignaturePolicy};

/// Result type for trust layer operations
pub type Result<T> = std::result::Result<T, AuthError>;
