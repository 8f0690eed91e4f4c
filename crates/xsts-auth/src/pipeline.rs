//! Inbound XSTS token validation
//!
//! [`TokenValidator::validate`] turns an `Authorization` header value into
//! [`ClientClaims`] or an [`AuthError`]. Stages run strictly in order:
//!
//! 1. split `XBL3.0 x=<userHash>;<token>` and parse the five-segment envelope
//! 2. resolve the relying-party certificate named by the envelope `x5t`
//! 3. unwrap the content key with RSA-OAEP
//! 4. check the authentication tag, then AES-CBC decrypt
//! 5. inflate the inner JWT
//! 6. check the inner `x5u` against the trusted issuers and fetch its certificate
//! 7. verify the RS256 signature
//! 8. select the user entry and check the lifetime against `now`
//!
//! The validator keeps no state of its own; the certificate cache is the only
//! thing shared between calls.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use tracing::{debug, warn};

use crate::certs::{CertificateResolver, Thumbprint};
use crate::claims::{ClientClaims, XstsPayload};
use crate::config::XstsConfig;
use crate::envelope::{CompactEnvelope, inflate, parse_authorization};
use crate::error::AuthError;

/// Validates inbound XSTS tokens
#[derive(Debug, Clone)]
pub struct TokenValidator {
    config: Arc<XstsConfig>,
    resolver: Arc<CertificateResolver>,
}

impl TokenValidator {
    /// Create a validator sharing a certificate resolver
    pub fn new(config: Arc<XstsConfig>, resolver: Arc<CertificateResolver>) -> Self {
        Self { config, resolver }
    }

    /// Certificate resolver used by this validator
    #[must_use]
    pub fn resolver(&self) -> &Arc<CertificateResolver> {
        &self.resolver
    }

    /// Validate an `Authorization` header value at time `now`
    ///
    /// Failures are logged here with full detail; map them to a caller-facing
    /// response with [`AuthError::rejection`].
    ///
    /// # Errors
    ///
    /// Any [`AuthError`] from the stages listed in the module documentation.
    #[tracing::instrument(skip_all)]
    pub async fn validate(&self, authorization: &str, now: SystemTime) -> Result<ClientClaims, AuthError> {
        match self.validate_inner(authorization, now).await {
            Ok(claims) => {
                debug!(
                    sandbox = %claims.sandbox(),
                    audience = %claims.audience(),
                    user_hash = %claims.selected_user_hash(),
                    "XSTS token validated"
                );
                Ok(claims)
            }
            Err(e) => {
                warn!(error = %e, "XSTS token rejected");
                Err(e)
            }
        }
    }

    async fn validate_inner(&self, authorization: &str, now: SystemTime) -> Result<ClientClaims, AuthError> {
        let (user_hash, token) = parse_authorization(authorization)?;
        let envelope = CompactEnvelope::parse(token)?;

        let thumbprint = Thumbprint::from_x5t(&envelope.header().x5t)?;
        let relying_party = self.resolver.get_by_thumbprint(&thumbprint)?;
        let content_key = relying_party.unwrap_key(envelope.encrypted_key())?;
        let plaintext = envelope.open(&content_key)?;

        let inner = match envelope.header().zip.as_deref() {
            Some("DEF") => inflate(&plaintext)?,
            Some(other) => return Err(AuthError::malformed(format!("Unsupported compression {other}"))),
            None => String::from_utf8(plaintext).map_err(|_| AuthError::malformed("Inner token is not UTF-8"))?,
        };

        let payload = self.verify_inner(&inner).await?;
        let claims = ClientClaims::from_payload(payload, user_hash)?;
        claims.check_lifetime(now)?;
        Ok(claims)
    }

    async fn verify_inner(&self, inner: &str) -> Result<XstsPayload, AuthError> {
        let header = decode_header(inner).map_err(|e| AuthError::malformed(format!("Invalid inner token header: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::Signature {
                reason: format!("Unexpected inner token algorithm {:?}", header.alg),
            });
        }
        let x5u = header
            .x5u
            .as_deref()
            .ok_or_else(|| AuthError::malformed("Inner token header has no x5u"))?;
        let x5t = header
            .x5t
            .as_deref()
            .ok_or_else(|| AuthError::malformed("Inner token header has no x5t"))?;

        let source = self.config.certificate_source(x5u)?;
        let certificate = self.resolver.resolve_from_remote(x5u, x5t, source).await?;
        let key = DecodingKey::from_rsa_der(&certificate.rsa_public_key_pkcs1_der()?);

        // Lifetime is checked against the caller's clock, not the library's.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        decode::<XstsPayload>(inner, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::Json(_) | ErrorKind::Base64(_) | ErrorKind::Utf8(_) | ErrorKind::InvalidToken => {
                    AuthError::malformed(format!("Invalid inner token: {e}"))
                }
                _ => AuthError::Signature { reason: e.to_string() },
            })
    }
}
