//! Delegated and service-auth XSTS tokens
//!
//! A delegated token asserts one user's identity to one relying party in one
//! sandbox. It is issued in exchange for the user's delegation token plus the
//! service token, and signed with the service token's proof key. Tokens are
//! cached per `(subject, relying party, sandbox)` for exactly their issued
//! lifetime.
//!
//! Service-auth tokens are issued the same way without a delegation token and
//! carry `-` in place of a user hash.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method};
use moka::Expiry;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use url::Url;
use xsts_signing::{ProofKey, SIGNATURE_HEADER};

use crate::claims::UserClaims;
use crate::client::{host_of, signature_value};
use crate::config::XstsConfig;
use crate::endpoints::EndpointDirectory;
use crate::envelope::XBL_SCHEME;
use crate::error::AuthError;
use crate::service_token::ServiceTokenManager;

/// Contract version sent to the XSTS authorize endpoint
pub const XSTS_CONTRACT_VERSION: &str = "1";

const CONTRACT_VERSION_HEADER: &str = "x-xbl-contract-version";

const MAX_CACHED_TOKENS: u64 = 10_000;

/// User display claims returned with a delegated token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayUser {
    /// User hash
    pub user_hash: String,
    /// Gamertag, when released to the relying party
    pub gamertag: Option<String>,
}

/// Delegated or service-auth token as issued
#[derive(Debug, Clone)]
pub struct DelegatedToken {
    token: String,
    issue_instant: DateTime<Utc>,
    not_after: DateTime<Utc>,
    relying_party: String,
    sandbox: String,
    proof_key: ProofKey,
    users: Vec<DisplayUser>,
}

impl DelegatedToken {
    /// `Authorization` header value
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

    /// Relying party the token is scoped to
    #[must_use]
    pub fn relying_party(&self) -> &str {
        &self.relying_party
    }

    /// Sandbox the token is scoped to
    #[must_use]
    pub fn sandbox(&self) -> &str {
        &self.sandbox
    }

    /// Proof key inherited from the service token
    #[must_use]
    pub fn proof_key(&self) -> &ProofKey {
        &self.proof_key
    }

    /// Display claims returned by the issuer
    #[must_use]
    pub fn users(&self) -> &[DisplayUser] {
        &self.users
    }

    /// Issued lifetime, zero if the issuer reported an inverted range
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        (self.not_after - self.issue_instant).to_std().unwrap_or(Duration::ZERO)
    }
}

/// What a later signed request needs: the token and its proof key
#[derive(Debug, Clone)]
pub struct CachedToken {
    token: String,
    proof_key: ProofKey,
}

impl CachedToken {
    /// `Authorization` header value
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Proof key to sign requests with
    #[must_use]
    pub fn proof_key(&self) -> &ProofKey {
        &self.proof_key
    }
}

impl From<&DelegatedToken> for CachedToken {
    fn from(token: &DelegatedToken) -> Self {
        Self {
            token: token.token.clone(),
            proof_key: token.proof_key.clone(),
        }
    }
}

/// Whom a cached token speaks for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenSubject {
    /// A user, by stable id
    User(String),
    /// The service itself, by service name
    Service(String),
}

/// Delegated token cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenCacheKey {
    /// Token subject
    pub subject: TokenSubject,
    /// Relying party
    pub relying_party: String,
    /// Sandbox id
    pub sandbox: String,
}

#[derive(Debug, Clone)]
struct TimedToken {
    token: CachedToken,
    ttl: Duration,
}

struct IssuedLifetime;

impl Expiry<TokenCacheKey, TimedToken> for IssuedLifetime {
    fn expire_after_create(&self, _key: &TokenCacheKey, value: &TimedToken, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AuthorizeRequest<'a> {
    relying_party: &'a str,
    token_type: &'a str,
    properties: AuthorizeProperties<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AuthorizeProperties<'a> {
    service_token: &'a str,
    sandbox_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    delegation_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthorizeResponse {
    issue_instant: DateTime<Utc>,
    not_after: DateTime<Utc>,
    token: String,
    #[serde(default)]
    display_claims: DisplayClaims,
}

#[derive(Debug, Default, Deserialize)]
struct DisplayClaims {
    #[serde(default)]
    xui: Vec<DisplayClaimsUser>,
}

#[derive(Debug, Deserialize)]
struct DisplayClaimsUser {
    #[serde(default)]
    uhs: String,
    #[serde(default)]
    gtg: Option<String>,
}

/// Obtains and caches delegated and service-auth tokens
#[derive(Debug)]
pub struct DelegatedTokenManager {
    config: Arc<XstsConfig>,
    directory: Arc<EndpointDirectory>,
    service_tokens: Arc<ServiceTokenManager>,
    http_client: reqwest::Client,
    cache: Cache<TokenCacheKey, TimedToken>,
}

impl DelegatedTokenManager {
    /// Create a manager over the shared service token manager
    pub fn new(
        config: Arc<XstsConfig>,
        directory: Arc<EndpointDirectory>,
        service_tokens: Arc<ServiceTokenManager>,
        http_client: reqwest::Client,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_CACHED_TOKENS)
            .expire_after(IssuedLifetime)
            .build();
        Self {
            config,
            directory,
            service_tokens,
            http_client,
            cache,
        }
    }

    /// Token for a user, from cache or freshly issued
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DelegatedToken`] if the issuer refuses, or a
    /// service token or directory error that prevented the request.
    pub async fn get_delegated_token(
        &self,
        user_id: &str,
        delegation_token: &str,
        relying_party: &str,
        sandbox: &str,
    ) -> Result<CachedToken, AuthError> {
        let key = TokenCacheKey {
            subject: TokenSubject::User(user_id.to_string()),
            relying_party: relying_party.to_string(),
            sandbox: sandbox.to_string(),
        };
        self.cached_or_issue(key, Some(delegation_token)).await
    }

    /// Token for the user selected from inbound claims
    ///
    /// The cache is keyed by the user's pxuid, or by user hash when the
    /// token does not carry one.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DelegatedToken`] if the user has no delegation
    /// token, otherwise as [`DelegatedTokenManager::get_delegated_token`].
    pub async fn get_for_user(
        &self,
        user: &UserClaims,
        relying_party: &str,
        sandbox: &str,
    ) -> Result<CachedToken, AuthError> {
        let delegation_token = user.delegation_token().ok_or_else(|| AuthError::DelegatedToken {
            status: 0,
            body: format!("User {} has no delegation token", user.user_hash()),
        })?;
        self.get_delegated_token(user.cache_identity(), delegation_token, relying_party, sandbox)
            .await
    }

    /// Token asserting the service's own identity
    ///
    /// # Errors
    ///
    /// As [`DelegatedTokenManager::get_delegated_token`].
    pub async fn get_service_auth_token(&self, relying_party: &str, sandbox: &str) -> Result<CachedToken, AuthError> {
        let key = TokenCacheKey {
            subject: TokenSubject::Service(self.config.service_name.clone()),
            relying_party: relying_party.to_string(),
            sandbox: sandbox.to_string(),
        };
        self.cached_or_issue(key, None).await
    }

    async fn cached_or_issue(&self, key: TokenCacheKey, delegation_token: Option<&str>) -> Result<CachedToken, AuthError> {
        if let Some(entry) = self.cache.get(&key).await {
            debug!(relying_party = %key.relying_party, sandbox = %key.sandbox, "Using cached XSTS token");
            return Ok(entry.token);
        }

        // Concurrent misses may both issue; either result is valid for the key.
        let issued = self
            .request_token(delegation_token, &key.relying_party, &key.sandbox)
            .await?;
        let cached = CachedToken::from(&issued);
        self.cache
            .insert(
                key,
                TimedToken {
                    token: cached.clone(),
                    ttl: issued.lifetime(),
                },
            )
            .await;
        Ok(cached)
    }

    /// Request a token from the XSTS authorize endpoint, bypassing the cache
    ///
    /// Without a delegation token the result is a service-auth token.
    ///
    /// # Errors
    ///
    /// As [`DelegatedTokenManager::get_delegated_token`].
    #[tracing::instrument(skip(self, delegation_token), fields(delegated = delegation_token.is_some()))]
    pub async fn request_token(
        &self,
        delegation_token: Option<&str>,
        relying_party: &str,
        sandbox: &str,
    ) -> Result<DelegatedToken, AuthError> {
        let service_token = self.service_tokens.get_service_token().await?;

        let url = Url::parse(&self.config.xsts_authorize_url)
            .map_err(|e| AuthError::configuration(format!("xsts_authorize_url: {e}")))?;
        let (_, policy) = self.directory.lookup(host_of(&url)?).await?;

        let body = serde_json::to_vec(&AuthorizeRequest {
            relying_party,
            token_type: "JWT",
            properties: AuthorizeProperties {
                service_token: service_token.token(),
                sandbox_id: sandbox,
                delegation_token,
            },
        })
        .map_err(|e| AuthError::configuration(format!("Failed to encode authorize request: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTRACT_VERSION_HEADER, HeaderValue::from_static(XSTS_CONTRACT_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let signature = signature_value(&policy, service_token.proof_key(), &Method::POST, &url, &headers, &body)?;
        headers.insert(SIGNATURE_HEADER, signature);

        let refused = |status: u16, body: String| {
            error!(status, body = %body, "XSTS authorize request failed");
            AuthError::DelegatedToken { status, body }
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

        let issued: AuthorizeResponse = serde_json::from_str(&text)
            .map_err(|e| refused(status.as_u16(), format!("Invalid authorize response: {e}")))?;

        let user_hash = match delegation_token {
            Some(_) => issued
                .display_claims
                .xui
                .first()
                .map(|user| user.uhs.clone())
                .filter(|uhs| !uhs.is_empty())
                .ok_or_else(|| refused(status.as_u16(), "Authorize response has no user hash".to_string()))?,
            None => "-".to_string(),
        };

        info!(
            relying_party = %relying_party,
            sandbox = %sandbox,
            not_after = %issued.not_after,
            "Obtained XSTS token"
        );
        Ok(DelegatedToken {
            token: format!("{XBL_SCHEME} x={user_hash};{}", issued.token),
            issue_instant: issued.issue_instant,
            not_after: issued.not_after,
            relying_party: relying_party.to_string(),
            sandbox: sandbox.to_string(),
            proof_key: service_token.proof_key().clone(),
            users: issued
                .display_claims
                .xui
                .into_iter()
                .map(|user| DisplayUser {
                    user_hash: user.uhs,
                    gamertag: user.gtg,
                })
                .collect(),
        })
    }

    /// Number of cached tokens
    ///
    /// Approximate until the cache has run its pending maintenance.
    #[must_use]
    pub fn cached_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
