//! Process start-up wiring
//!
//! [`XstsServices::bootstrap`] builds every shared component once. Only a
//! missing relying-party or business-partner certificate is fatal; the
//! signing-key listing and endpoint manifest are loaded on demand if they
//! cannot be fetched at start-up.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::certs::{Certificate, CertificateResolver, CertificateStore, Thumbprint};
use crate::client::XblClient;
use crate::config::XstsConfig;
use crate::delegated::DelegatedTokenManager;
use crate::endpoints::EndpointDirectory;
use crate::error::AuthError;
use crate::pipeline::TokenValidator;
use crate::service_token::ServiceTokenManager;

/// Shared trust layer components
#[derive(Debug, Clone)]
pub struct XstsServices {
    /// Configuration in effect
    pub config: Arc<XstsConfig>,
    /// Certificate cache
    pub resolver: Arc<CertificateResolver>,
    /// Endpoint and policy directory
    pub directory: Arc<EndpointDirectory>,
    /// Inbound token validator
    pub validator: Arc<TokenValidator>,
    /// Service token manager
    pub service_tokens: Arc<ServiceTokenManager>,
    /// Delegated token manager
    pub delegated_tokens: Arc<DelegatedTokenManager>,
    /// Signed outbound client
    pub client: XblClient,
}

fn required_certificate(
    resolver: &CertificateResolver,
    role: &str,
    thumbprint: Option<&str>,
) -> Result<Arc<Certificate>, AuthError> {
    let thumbprint = thumbprint.ok_or_else(|| AuthError::configuration(format!("No {role} certificate thumbprint configured")))?;
    let thumbprint = Thumbprint::parse(thumbprint)?;
    let certificate = resolver.get_by_thumbprint(&thumbprint).map_err(|e| {
        error!(role, thumbprint = %thumbprint, error = %e, "Required certificate unavailable");
        AuthError::configuration(format!("{role} certificate {thumbprint} unavailable: {e}"))
    })?;
    if !certificate.has_private_key() {
        error!(role, thumbprint = %thumbprint, "Required certificate has no private key");
        return Err(AuthError::configuration(format!(
            "{role} certificate {thumbprint} has no private key"
        )));
    }
    Ok(certificate)
}

impl XstsServices {
    /// Build all components from configuration and a local certificate store
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the configuration is invalid or
    /// the relying-party or business-partner certificate is missing from the
    /// store. The embedding application should treat this as unrecoverable.
    #[tracing::instrument(skip_all, fields(service = %config.service_name))]
    pub async fn bootstrap(config: XstsConfig, store: Arc<dyn CertificateStore>) -> Result<Self, AuthError> {
        config.validate()?;
        let config = Arc::new(config);
        let http_client = config.http_client()?;

        let resolver = Arc::new(CertificateResolver::new(store, http_client.clone()));
        let relying_party = required_certificate(&resolver, "relying party", config.relying_party_thumbprint.as_deref())?;
        let business_partner = required_certificate(
            &resolver,
            "business partner",
            config.business_partner_thumbprint.as_deref(),
        )?;
        info!(
            relying_party = %relying_party.thumbprint(),
            business_partner = %business_partner.thumbprint(),
            "Service certificates loaded"
        );

        if let Err(e) = resolver.preload_signing_keys(&config.signing_keys_url).await {
            warn!(error = %e, "Signing keys not preloaded; they will be fetched per token");
        }

        let directory = Arc::new(EndpointDirectory::new(&config, http_client.clone()));
        if let Err(e) = directory.load().await {
            warn!(error = %e, "Endpoint manifest not loaded; it will be fetched on first use");
        }

        let service_tokens = Arc::new(ServiceTokenManager::new(
            Arc::clone(&config),
            Arc::clone(&directory),
            &business_partner,
        )?);
        let delegated_tokens = Arc::new(DelegatedTokenManager::new(
            Arc::clone(&config),
            Arc::clone(&directory),
            Arc::clone(&service_tokens),
            http_client.clone(),
        ));
        let validator = Arc::new(TokenValidator::new(Arc::clone(&config), Arc::clone(&resolver)));
        let client = XblClient::new(http_client, Arc::clone(&directory), Arc::clone(&delegated_tokens));

        Ok(Self {
            config,
            resolver,
            directory,
            validator,
            service_tokens,
            delegated_tokens,
            client,
        })
    }

    /// Tower layer validating inbound tokens with the shared validator
    #[cfg(feature = "middleware")]
    #[must_use]
    pub fn layer(&self) -> crate::tower::XstsAuthLayer {
        crate::tower::XstsAuthLayer::new(Arc::clone(&self.validator))
    }
}
