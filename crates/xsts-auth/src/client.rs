//! Signed outbound calls to platform services
//!
//! [`XblClient`] looks up the target host in the endpoint directory, obtains
//! the token for that host's relying party, and signs the request with the
//! token's own proof key. Handlers never touch proof keys or caches.

use std::sync::Arc;

use http::header::{AUTHORIZATION, HeaderValue};
use http::{HeaderMap, Method};
use tracing::debug;
use url::Url;
use xsts_signing::{PlatformTime, ProofKey, RequestFacts, SIGNATURE_HEADER, SignaturePolicy};

use crate::claims::UserClaims;
use crate::delegated::{CachedToken, DelegatedTokenManager};
use crate::endpoints::EndpointDirectory;
use crate::error::AuthError;

/// Path plus query string of a URL, as signed
pub(crate) fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    }
}

/// Host of an outbound URL
pub(crate) fn host_of(url: &Url) -> Result<&str, AuthError> {
    url.host_str()
        .ok_or_else(|| AuthError::http(format!("{url} has no host")))
}

/// Compute the `Signature` header for an outbound request
pub(crate) fn signature_value(
    policy: &SignaturePolicy,
    key: &ProofKey,
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<HeaderValue, AuthError> {
    let path = path_and_query(url);
    let facts = RequestFacts::new(method.as_str(), &path, headers, body);
    let signature = xsts_signing::sign(policy, key, PlatformTime::now()?, &facts)?;
    HeaderValue::from_str(&signature).map_err(|e| AuthError::http(format!("Invalid signature header: {e}")))
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue, AuthError> {
    HeaderValue::from_str(value).map_err(|e| AuthError::http(format!("Invalid header value: {e}")))
}

/// Builds and sends signed requests to platform services
#[derive(Debug, Clone)]
pub struct XblClient {
    http_client: reqwest::Client,
    directory: Arc<EndpointDirectory>,
    tokens: Arc<DelegatedTokenManager>,
}

impl XblClient {
    /// Create a client over shared token managers
    pub fn new(http_client: reqwest::Client, directory: Arc<EndpointDirectory>, tokens: Arc<DelegatedTokenManager>) -> Self {
        Self {
            http_client,
            directory,
            tokens,
        }
    }

    /// Build a request made on behalf of a user
    ///
    /// # Errors
    ///
    /// - [`AuthError::EndpointNotFound`] if the host is unknown or has no
    ///   relying party
    /// - [`AuthError::DelegatedToken`] if no delegated token can be obtained
    /// - [`AuthError::Signing`] if the policy rejects the proof key
    pub async fn user_request(
        &self,
        user: &UserClaims,
        sandbox: &str,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Result<reqwest::Request, AuthError> {
        let url = Url::parse(url).map_err(|e| AuthError::http(format!("Invalid URL {url}: {e}")))?;
        let (relying_party, policy) = self.target(&url).await?;
        let token = self.tokens.get_for_user(user, &relying_party, sandbox).await?;
        self.build(&token, &policy, method, url, headers, body)
    }

    /// Build a request made with the service's own identity
    ///
    /// # Errors
    ///
    /// As [`XblClient::user_request`].
    pub async fn service_request(
        &self,
        sandbox: &str,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Result<reqwest::Request, AuthError> {
        let url = Url::parse(url).map_err(|e| AuthError::http(format!("Invalid URL {url}: {e}")))?;
        let (relying_party, policy) = self.target(&url).await?;
        let token = self.tokens.get_service_auth_token(&relying_party, sandbox).await?;
        self.build(&token, &policy, method, url, headers, body)
    }

    /// Send a request built by this client
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Http`] on transport failure. Status codes are left
    /// to the caller.
    pub async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, AuthError> {
        self.http_client.execute(request).await.map_err(AuthError::http)
    }

    async fn target(&self, url: &Url) -> Result<(String, SignaturePolicy), AuthError> {
        let host = host_of(url)?;
        let (endpoint, policy) = self.directory.lookup(host).await?;
        let relying_party = endpoint.relying_party.ok_or_else(|| AuthError::EndpointNotFound {
            host: host.to_string(),
        })?;
        Ok((relying_party, policy))
    }

    fn build(
        &self,
        token: &CachedToken,
        policy: &SignaturePolicy,
        method: Method,
        url: Url,
        mut headers: HeaderMap,
        body: Vec<u8>,
    ) -> Result<reqwest::Request, AuthError> {
        headers.insert(AUTHORIZATION, header_value(token.token())?);
        let signature = signature_value(policy, token.proof_key(), &method, &url, &headers, &body)?;
        headers.insert(SIGNATURE_HEADER, signature);
        debug!(method = %method, url = %url, "Signed outbound request");

        let mut request = reqwest::Request::new(method, url);
        *request.headers_mut() = headers;
        *request.body_mut() = Some(body.into());
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_and_query() {
        let url = Url::parse("https://inventory.xboxlive.com/users/me/inventory?count=5").unwrap();
        assert_eq!(path_and_query(&url), "/users/me/inventory?count=5");
        let bare = Url::parse("https://collections.mp.microsoft.com").unwrap();
        assert_eq!(path_and_query(&bare), "/");
    }

    #[test]
    fn test_signature_value_verifies() {
        let key = ProofKey::generate_p256();
        let policy = SignaturePolicy::default();
        let url = Url::parse("https://xsts.auth.xboxlive.com/xsts/authorize").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("XBL3.0 x=-;token"));

        let value = signature_value(&policy, &key, &Method::POST, &url, &headers, b"{}").unwrap();
        let facts = RequestFacts::new("POST", "/xsts/authorize", &headers, b"{}");
        assert!(xsts_signing::verify(&policy, &key.verifying_key(), value.to_str().unwrap(), &facts, None).unwrap());
    }
}
