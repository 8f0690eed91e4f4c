//! Service token acquisition and caching
//!
//! The service token asserts the service's own identity. It is requested over
//! mutual TLS with the business-partner certificate and signed with a fresh
//! P-256 proof key. The key stays paired with the token for as long as the
//! token is cached; a new token always brings a new key.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use url::Url;
use xsts_signing::{ProofKey, ProofKeyJwk, SIGNATURE_HEADER};

use crate::certs::Certificate;
use crate::client::{host_of, signature_value};
use crate::config::XstsConfig;
use crate::endpoints::EndpointDirectory;
use crate::error::AuthError;

const SERVICE_TOKEN_KEY: &str = "service_token";

/// Service token with the proof key used to obtain it
#[derive(Debug, Clone)]
pub struct ServiceToken {
    token: String,
    issue_instant: DateTime<Utc>,
    not_after: DateTime<Utc>,
    proof_key: ProofKey,
}

impl ServiceToken {
    /// Opaque token
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// When the token was issued
    #[must_use]
    pub fn issue_instant(&self) -> DateTime<Utc> {
        self.issue_instant
    }

    /// When the token stops being valid
    #[must_use]
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Proof key bound to the token
    #[must_use]
    pub fn proof_key(&self) -> &ProofKey {
        &self.proof_key
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceTokenRequest<'a> {
    relying_party: &'a str,
    token_type: &'a str,
    properties: ServiceTokenProperties,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceTokenProperties {
    proof_key: ProofKeyJwk,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IssuedToken {
    issue_instant: DateTime<Utc>,
    not_after: DateTime<Utc>,
    token: String,
}

/// Obtains and caches the service token
#[derive(Debug)]
pub struct ServiceTokenManager {
    config: Arc<XstsConfig>,
    directory: Arc<EndpointDirectory>,
    http_client: reqwest::Client,
    cache: Cache<&'static str, ServiceToken>,
}

impl ServiceTokenManager {
    /// Create a manager authenticating with the business-partner certificate
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the certificate has no private
    /// key or the TLS client cannot be built.
    pub fn new(
        config: Arc<XstsConfig>,
        directory: Arc<EndpointDirectory>,
        business_partner: &Certificate,
    ) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .identity(business_partner.identity()?)
            .build()
            .map_err(|e| AuthError::configuration(format!("Failed to create mutual TLS client: {e}")))?;
        Ok(Self::with_client(config, directory, http_client))
    }

    /// Create a manager over a prepared HTTP client
    pub fn with_client(config: Arc<XstsConfig>, directory: Arc<EndpointDirectory>, http_client: reqwest::Client) -> Self {
        let cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(config.service_token_ttl())
            .build();
        Self {
            config,
            directory,
            http_client,
            cache,
        }
    }

    /// Current service token, requesting a new one when none is cached
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ServiceToken`] with the response body when the
    /// issuer refuses, or a directory error if the issuer host has no policy.
    pub async fn get_service_token(&self) -> Result<ServiceToken, AuthError> {
        self.cache
            .try_get_with(SERVICE_TOKEN_KEY, self.request_service_token())
            .await
            .map_err(|e| (*e).clone())
    }

    /// Request a new service token, bypassing the cache
    ///
    /// # Errors
    ///
    /// As [`ServiceTokenManager::get_service_token`].
    #[tracing::instrument(skip(self))]
    pub async fn request_service_token(&self) -> Result<ServiceToken, AuthError> {
        let url = Url::parse(&self.config.service_token_url)
            .map_err(|e| AuthError::configuration(format!("service_token_url: {e}")))?;
        let (_, policy) = self.directory.lookup(host_of(&url)?).await?;

        let proof_key = ProofKey::generate_p256();
        let body = serde_json::to_vec(&ServiceTokenRequest {
            relying_party: &self.config.service_token_relying_party,
            token_type: "JWT",
            properties: ServiceTokenProperties {
                proof_key: proof_key.to_jwk()?,
            },
        })
        .map_err(|e| AuthError::configuration(format!("Failed to encode service token request: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let signature = signature_value(&policy, &proof_key, &Method::POST, &url, &headers, &body)?;
        headers.insert(SIGNATURE_HEADER, signature);

        let refused = |status: u16, body: String| {
            error!(status, body = %body, "Service token request failed");
            AuthError::ServiceToken { status, body }
        };

        let response = self
            .http_client
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| refused(0, e.to_string()))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| refused(status.as_u16(), e.to_string()))?;
        if !status.is_success() {
            return Err(refused(status.as_u16(), text));
        }

        let issued: IssuedToken = serde_json::from_str(&text)
            .map_err(|e| refused(status.as_u16(), format!("Invalid service token response: {e}")))?;
        info!(not_after = %issued.not_after, "Obtained service token");
        Ok(ServiceToken {
            token: issued.token,
            issue_instant: issued.issue_instant,
            not_after: issued.not_after,
            proof_key,
        })
    }
}
