//! Certificate resolution with a permanent cache
//!
//! Certificates are resolved by thumbprint from three places: the local store
//! (the service's own certificates), the XSTS signing-key listing, and the
//! license-signing endpoint. Every successful resolution is cached for the
//! life of the process.
//!
//! A local-store miss is remembered as known-missing so a
//! thumbprint that is not installed is not searched for again. Remote lookups
//! ignore that marker: the platform may publish a rotated key at any time.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::{Certificate, CertificateStore, Thumbprint};
use crate::config::CertificateSource;
use crate::error::AuthError;

/// Cached outcome of a thumbprint lookup
#[derive(Debug, Clone)]
enum CertificateEntry {
    Found(Arc<Certificate>),
    KnownMissing,
}

#[derive(Debug, Deserialize)]
struct LicenseCertificateResponse {
    #[serde(rename = "Certificate")]
    certificate: String,
}

/// Thumbprint-keyed certificate cache
///
/// Safe to share between concurrent requests. Two tasks racing on the same
/// missing thumbprint may both fetch it; both write the same certificate.
#[derive(Debug)]
pub struct CertificateResolver {
    store: Arc<dyn CertificateStore>,
    entries: DashMap<Thumbprint, CertificateEntry>,
    http_client: reqwest::Client,
}

impl CertificateResolver {
    /// Create a resolver over a local store
    pub fn new(store: Arc<dyn CertificateStore>, http_client: reqwest::Client) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            http_client,
        }
    }

    fn cached(&self, thumbprint: &Thumbprint) -> Option<CertificateEntry> {
        self.entries.get(thumbprint).map(|entry| entry.value().clone())
    }

    fn remember(&self, certificate: Certificate) -> Arc<Certificate> {
        let certificate = Arc::new(certificate);
        self.entries.insert(
            certificate.thumbprint().clone(),
            CertificateEntry::Found(Arc::clone(&certificate)),
        );
        certificate
    }

    /// Resolve a certificate from the cache or the local store
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CertificateNotFound`] if the thumbprint is not
    /// installed locally. The miss is remembered.
    pub fn get_by_thumbprint(&self, thumbprint: &Thumbprint) -> Result<Arc<Certificate>, AuthError> {
        match self.cached(thumbprint) {
            Some(CertificateEntry::Found(certificate)) => return Ok(certificate),
            Some(CertificateEntry::KnownMissing) => {
                return Err(AuthError::CertificateNotFound {
                    thumbprint: thumbprint.to_string(),
                });
            }
            None => {}
        }

        if let Some(certificate) = self.store.find(thumbprint) {
            debug!(thumbprint = %thumbprint, "Certificate resolved from local store");
            return Ok(self.remember(certificate));
        }

        warn!(thumbprint = %thumbprint, "Certificate not in local store");
        self.entries
            .entry(thumbprint.clone())
            .or_insert(CertificateEntry::KnownMissing);
        Err(AuthError::CertificateNotFound {
            thumbprint: thumbprint.to_string(),
        })
    }

    /// Resolve a token-signing certificate published by a remote authority
    ///
    /// A cached certificate is returned without any network call. Otherwise
    /// the certificate is downloaded from `url`, checked against the
    /// thumbprint in `x5t`, and cached.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`] if `x5t` is not a thumbprint
    /// - [`AuthError::Http`] if the authority cannot be reached
    /// - [`AuthError::CertificateMismatch`] if the download has a different
    ///   thumbprint; nothing is cached in that case
    #[tracing::instrument(skip(self), fields(thumbprint = tracing::field::Empty))]
    pub async fn resolve_from_remote(
        &self,
        url: &str,
        x5t: &str,
        source: CertificateSource,
    ) -> Result<Arc<Certificate>, AuthError> {
        let expected = Thumbprint::from_x5t(x5t)?;
        tracing::Span::current().record("thumbprint", tracing::field::display(&expected));

        if let Some(CertificateEntry::Found(certificate)) = self.cached(&expected) {
            return Ok(certificate);
        }

        info!("Fetching signing certificate");
        let body = match source {
            CertificateSource::SigningKeys => {
                let listing: HashMap<String, String> = self.fetch_json(url).await?;
                listing
                    .get(x5t)
                    .cloned()
                    .ok_or_else(|| AuthError::CertificateMismatch {
                        expected: expected.to_string(),
                        actual: "not published".to_string(),
                    })?
            }
            CertificateSource::LicenseSigning => {
                let response: LicenseCertificateResponse = self.fetch_json(url).await?;
                response.certificate
            }
        };

        let certificate = Certificate::from_text(&body)?;
        if certificate.thumbprint() != &expected {
            error!(
                actual = %certificate.thumbprint(),
                "Downloaded certificate does not match requested thumbprint"
            );
            return Err(AuthError::CertificateMismatch {
                expected: expected.to_string(),
                actual: certificate.thumbprint().to_string(),
            });
        }

        Ok(self.remember(certificate))
    }

    /// Fetch the current XSTS signing-key listing and cache every certificate
    ///
    /// The listing is a JSON array of base64 certificate bodies; a map of
    /// `x5t` to PEM body is accepted as well.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Http`] if the listing cannot be fetched and
    /// [`AuthError::Configuration`] if an entry is not a certificate.
    #[tracing::instrument(skip(self))]
    pub async fn preload_signing_keys(&self, url: &str) -> Result<Vec<Thumbprint>, AuthError> {
        let listing: serde_json::Value = self.fetch_json(url).await?;
        let bodies: Vec<&str> = match &listing {
            serde_json::Value::Array(items) => items.iter().filter_map(serde_json::Value::as_str).collect(),
            serde_json::Value::Object(map) => map.values().filter_map(serde_json::Value::as_str).collect(),
            _ => return Err(AuthError::http("Unexpected signing-key listing shape")),
        };

        let mut loaded = Vec::with_capacity(bodies.len());
        for body in bodies {
            let certificate = self.remember(Certificate::from_text(body)?);
            loaded.push(certificate.thumbprint().clone());
        }
        info!(count = loaded.len(), "Preloaded XSTS signing certificates");
        Ok(loaded)
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, AuthError> {
        let response = self.http_client.get(url).send().await.map_err(|e| {
            error!(url = %url, error = %e, "Certificate authority unreachable");
            AuthError::http(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            error!(url = %url, status = %status, "Certificate authority returned error status");
            return Err(AuthError::http(format!("{url} returned {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::http(format!("Invalid response from {url}: {e}")))
    }

    /// Whether a certificate is cached for the thumbprint
    #[must_use]
    pub fn is_cached(&self, thumbprint: &Thumbprint) -> bool {
        matches!(self.cached(thumbprint), Some(CertificateEntry::Found(_)))
    }

    /// Whether the thumbprint is remembered as missing from the local store
    #[must_use]
    pub fn is_known_missing(&self, thumbprint: &Thumbprint) -> bool {
        matches!(self.cached(thumbprint), Some(CertificateEntry::KnownMissing))
    }

    /// Number of cached certificates
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.value(), CertificateEntry::Found(_)))
            .count()
    }
}
