//! Trust layer configuration
//!
//! Every field has a production default, so an empty configuration source
//! yields a working setup once the certificate thumbprints are supplied.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AuthError;

/// Remote authority publishing certificates for inner-token signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateSource {
    /// XSTS signing-key listing: a JSON map of `x5t` to PEM body
    SigningKeys,
    /// License-signing endpoint: `{"Certificate": "<base64 DER>"}`
    LicenseSigning,
}

/// Hosts whose endpoints are kept from the platform manifest
pub const DEFAULT_TARGET_ENDPOINTS: &[&str] = &[
    "*.xboxlive.com",
    "privileges.xboxlive.com",
    "inventory.xboxlive.com",
    "licensing.xboxlive.com",
    "licensing.mp.microsoft.com",
    "collections.mp.microsoft.com",
];

/// Configuration for the XSTS trust layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XstsConfig {
    /// Name the service uses when caching its own service-auth tokens
    pub service_name: String,

    /// Service token issuance endpoint (mutual TLS)
    pub service_token_url: String,

    /// Relying party requested for the service token
    pub service_token_relying_party: String,

    /// XSTS authorize endpoint for delegated and service-auth tokens
    pub xsts_authorize_url: String,

    /// Platform endpoint and signature policy manifest
    pub endpoints_url: String,

    /// Listing of current XSTS signing certificates, loaded at start-up
    pub signing_keys_url: String,

    /// Hosts allowed in an inner token's `x5u`, and how to read them
    pub trusted_issuers: BTreeMap<String, CertificateSource>,

    /// Manifest hosts to retain
    pub target_endpoints: Vec<String>,

    /// How long a service token is cached; shorter than its real validity
    pub service_token_ttl_seconds: u64,

    /// Timeout for every outbound HTTP call
    pub http_timeout_seconds: u64,

    /// Thumbprint of the relying-party certificate that decrypts inbound tokens
    pub relying_party_thumbprint: Option<String>,

    /// Thumbprint of the business-partner certificate used for mutual TLS
    pub business_partner_thumbprint: Option<String>,
}

impl Default for XstsConfig {
    fn default() -> Self {
        let trusted_issuers = BTreeMap::from([
            ("xsts.auth.xboxlive.com".to_string(), CertificateSource::SigningKeys),
            ("licensing.mp.microsoft.com".to_string(), CertificateSource::LicenseSigning),
        ]);

        Self {
            service_name: "GameServiceSample".to_string(),
            service_token_url: "https://service.auth.xboxlive.com/service/authenticate".to_string(),
            service_token_relying_party: "http://auth.xboxlive.com".to_string(),
            xsts_authorize_url: "https://xsts.auth.xboxlive.com/xsts/authorize".to_string(),
            endpoints_url: "https://title.mgt.xboxlive.com/titles/default/endpoints?type=1".to_string(),
            signing_keys_url: "https://xsts.auth.xboxlive.com/xsts/signingkeys".to_string(),
            trusted_issuers,
            target_endpoints: DEFAULT_TARGET_ENDPOINTS.iter().map(ToString::to_string).collect(),
            service_token_ttl_seconds: 12 * 24 * 60 * 60,
            http_timeout_seconds: 10,
            relying_party_thumbprint: None,
            business_partner_thumbprint: None,
        }
    }
}

impl XstsConfig {
    /// Set the service name
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the service token endpoint
    #[must_use]
    pub fn with_service_token_url(mut self, url: impl Into<String>) -> Self {
        self.service_token_url = url.into();
        self
    }

    /// Set the XSTS authorize endpoint
    #[must_use]
    pub fn with_xsts_authorize_url(mut self, url: impl Into<String>) -> Self {
        self.xsts_authorize_url = url.into();
        self
    }

    /// Set the endpoint manifest URL
    #[must_use]
    pub fn with_endpoints_url(mut self, url: impl Into<String>) -> Self {
        self.endpoints_url = url.into();
        self
    }

    /// Set the signing-key listing URL
    #[must_use]
    pub fn with_signing_keys_url(mut self, url: impl Into<String>) -> Self {
        self.signing_keys_url = url.into();
        self
    }

    /// Trust an additional issuer host
    #[must_use]
    pub fn trust_issuer(mut self, host: impl Into<String>, source: CertificateSource) -> Self {
        self.trusted_issuers.insert(host.into().to_ascii_lowercase(), source);
        self
    }

    /// Replace the trusted issuer hosts
    #[must_use]
    pub fn with_trusted_issuers(mut self, issuers: BTreeMap<String, CertificateSource>) -> Self {
        self.trusted_issuers = issuers;
        self
    }

    /// Replace the retained manifest hosts
    #[must_use]
    pub fn with_target_endpoints<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_endpoints = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Set the service token cache lifetime
    #[must_use]
    pub fn with_service_token_ttl(mut self, ttl: Duration) -> Self {
        self.service_token_ttl_seconds = ttl.as_secs();
        self
    }

    /// Set the relying-party certificate thumbprint
    #[must_use]
    pub fn with_relying_party_thumbprint(mut self, thumbprint: impl Into<String>) -> Self {
        self.relying_party_thumbprint = Some(thumbprint.into());
        self
    }

    /// Set the business-partner certificate thumbprint
    #[must_use]
    pub fn with_business_partner_thumbprint(mut self, thumbprint: impl Into<String>) -> Self {
        self.business_partner_thumbprint = Some(thumbprint.into());
        self
    }

    /// Service token cache lifetime
    #[must_use]
    pub fn service_token_ttl(&self) -> Duration {
        Duration::from_secs(self.service_token_ttl_seconds)
    }

    /// Outbound HTTP timeout
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// Certificate source for an `x5u` URL
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UntrustedIssuer`] when the URL does not parse or
    /// its host is not on the trusted list.
    pub fn certificate_source(&self, x5u: &str) -> Result<CertificateSource, AuthError> {
        let untrusted = || AuthError::UntrustedIssuer { url: x5u.to_string() };
        let url = Url::parse(x5u).map_err(|_| untrusted())?;
        let host = url.host_str().ok_or_else(untrusted)?.to_ascii_lowercase();
        self.trusted_issuers.get(&host).copied().ok_or_else(untrusted)
    }

    /// Build the shared HTTP client for certificate and manifest fetches
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the TLS backend cannot start.
    pub fn http_client(&self) -> Result<reqwest::Client, AuthError> {
        reqwest::Client::builder()
            .timeout(self.http_timeout())
            .build()
            .map_err(|e| AuthError::configuration(format!("Failed to create HTTP client: {e}")))
    }

    /// Check the configuration for obvious mistakes
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<(), AuthError> {
        for (name, value) in [
            ("service_token_url", &self.service_token_url),
            ("xsts_authorize_url", &self.xsts_authorize_url),
            ("endpoints_url", &self.endpoints_url),
            ("signing_keys_url", &self.signing_keys_url),
        ] {
            Url::parse(value).map_err(|e| AuthError::configuration(format!("{name} is not a valid URL: {e}")))?;
        }
        if self.service_token_ttl_seconds == 0 {
            return Err(AuthError::configuration("service_token_ttl_seconds must be positive"));
        }
        if self.service_name.is_empty() {
            return Err(AuthError::configuration("service_name must not be empty"));
        }
        Ok(())
    }
}
