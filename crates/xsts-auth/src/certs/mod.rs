//! Certificates and their resolution
//!
//! - [`Thumbprint`] - SHA-1 certificate identifier, upper-case hex
//! - [`Certificate`] - parsed X.509 certificate, optionally with its private key
//! - [`store`] - local trust store holding the service's own certificates
//! - [`resolver`] - permanent cache over the local store and remote authorities

pub mod resolver;
pub mod store;

pub use resolver::CertificateResolver;
pub use store::{CertificateStore, MemoryCertificateStore};

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD, engine::general_purpose::URL_SAFE_NO_PAD};
use rsa::pkcs1::{DecodeRsaPrivateKey as _, EncodeRsaPublicKey as _};
use rsa::pkcs8::{DecodePrivateKey as _, DecodePublicKey as _};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use rustls_pki_types::PrivateKeyDer;
use sha1::{Digest, Sha1};
use x509_cert::der::{Decode as _, Encode as _};

use crate::error::AuthError;

/// SHA-1 thumbprint of a DER certificate, upper-case hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Thumbprint(String);

impl Thumbprint {
    /// Thumbprint of DER certificate bytes
    #[must_use]
    pub fn of_der(der: &[u8]) -> Self {
        Self(hex::encode_upper(Sha1::digest(der)))
    }

    /// Thumbprint carried in a JOSE `x5t` header (base64url SHA-1)
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if the value is not base64url or
    /// does not hold a 20-byte digest.
    pub fn from_x5t(x5t: &str) -> Result<Self, AuthError> {
        let digest = URL_SAFE_NO_PAD
            .decode(x5t.trim_end_matches('='))
            .map_err(|e| AuthError::malformed(format!("x5t is not base64url: {e}")))?;
        if digest.len() != 20 {
            return Err(AuthError::malformed(format!("x5t holds {} bytes, expected 20", digest.len())));
        }
        Ok(Self(hex::encode_upper(digest)))
    }

    /// Parse a hex thumbprint as shown by certificate tooling
    ///
    /// Spaces and colons are ignored and case is normalised.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] unless the value is 40 hex digits.
    pub fn parse(value: &str) -> Result<Self, AuthError> {
        let cleaned: String = value
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if cleaned.len() != 40 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AuthError::configuration(format!("Invalid certificate thumbprint: {value}")));
        }
        Ok(Self(cleaned))
    }

    /// Upper-case hex form
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `x5t` form of this thumbprint
    #[must_use]
    pub fn to_x5t(&self) -> String {
        hex::decode(&self.0).map_or_else(|_| String::new(), |digest| URL_SAFE_NO_PAD.encode(digest))
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract DER bytes from PEM text, or from a bare base64 body
///
/// Text holding a PEM boundary is read as PEM and its first `CERTIFICATE`
/// section is used. Anything else is taken as the base64 DER that the
/// license endpoint and array listings publish.
///
/// # Errors
///
/// Returns [`AuthError::Configuration`] if the PEM holds no certificate
/// section or the body does not decode.
pub fn certificate_der_from_text(text: &str) -> Result<Vec<u8>, AuthError> {
    if text.contains("-----BEGIN") {
        let first = rustls_pemfile::certs(&mut text.as_bytes())
            .next()
            .ok_or_else(|| AuthError::configuration("PEM text holds no CERTIFICATE section"))?
            .map_err(|e| AuthError::configuration(format!("Invalid PEM certificate: {e}")))?;
        return Ok(first.as_ref().to_vec());
    }
    let body: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(body)
        .map_err(|e| AuthError::configuration(format!("Certificate body is not base64: {e}")))
}

fn rsa_private_key_from_pem(key_pem: &str) -> Result<RsaPrivateKey, String> {
    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "PEM text holds no private key section".to_string())?;
    match key {
        PrivateKeyDer::Pkcs8(der) => RsaPrivateKey::from_pkcs8_der(der.secret_pkcs8_der()).map_err(|e| e.to_string()),
        PrivateKeyDer::Pkcs1(der) => RsaPrivateKey::from_pkcs1_der(der.secret_pkcs1_der()).map_err(|e| e.to_string()),
        _ => Err("not an RSA private key".to_string()),
    }
}

/// Parsed X.509 certificate
#[derive(Clone)]
pub struct Certificate {
    thumbprint: Thumbprint,
    der: Vec<u8>,
    public_key: Option<RsaPublicKey>,
    private_key: Option<RsaPrivateKey>,
    identity_pem: Option<String>,
}

impl Certificate {
    /// Parse DER certificate bytes
    ///
    /// Certificates without an RSA key parse successfully but cannot verify
    /// token signatures.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the bytes are not a certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, AuthError> {
        let parsed = x509_cert::Certificate::from_der(der)
            .map_err(|e| AuthError::configuration(format!("Invalid X.509 certificate: {e}")))?;
        let spki = parsed
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| AuthError::configuration(format!("Invalid subject public key: {e}")))?;

        Ok(Self {
            thumbprint: Thumbprint::of_der(der),
            der: der.to_vec(),
            public_key: RsaPublicKey::from_public_key_der(&spki).ok(),
            private_key: None,
            identity_pem: None,
        })
    }

    /// Parse a certificate published as PEM or bare base64
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the text holds no certificate.
    pub fn from_text(text: &str) -> Result<Self, AuthError> {
        Self::from_der(&certificate_der_from_text(text)?)
    }

    /// Attach the PEM private key belonging to this certificate
    ///
    /// The certificate and key PEM together also form the client identity for
    /// mutual TLS.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if an RSA certificate's key cannot
    /// be parsed or does not belong to the certificate.
    pub fn with_private_key_pem(mut self, certificate_pem: &str, key_pem: &str) -> Result<Self, AuthError> {
        if let Some(public_key) = &self.public_key {
            let private_key = rsa_private_key_from_pem(key_pem)
                .map_err(|e| AuthError::configuration(format!("Invalid RSA private key for {}: {e}", self.thumbprint)))?;
            if RsaPublicKey::from(&private_key) != *public_key {
                return Err(AuthError::configuration(format!(
                    "Private key does not match certificate {}",
                    self.thumbprint
                )));
            }
            self.private_key = Some(private_key);
        }
        self.identity_pem = Some(format!("{}\n{}", certificate_pem.trim_end(), key_pem.trim_end()));
        Ok(self)
    }

    /// Certificate thumbprint
    #[must_use]
    pub fn thumbprint(&self) -> &Thumbprint {
        &self.thumbprint
    }

    /// DER encoding
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Whether the private key is available
    #[must_use]
    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// RSA public key
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Signature`] if the certificate key is not RSA.
    pub fn rsa_public_key(&self) -> Result<&RsaPublicKey, AuthError> {
        self.public_key.as_ref().ok_or_else(|| AuthError::Signature {
            reason: format!("Certificate {} does not hold an RSA key", self.thumbprint),
        })
    }

    /// PKCS#1 DER of the RSA public key, as `jsonwebtoken` expects
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Signature`] if the key is missing or not encodable.
    pub fn rsa_public_key_pkcs1_der(&self) -> Result<Vec<u8>, AuthError> {
        let document = self.rsa_public_key()?.to_pkcs1_der().map_err(|e| AuthError::Signature {
            reason: format!("Failed to encode public key of {}: {e}", self.thumbprint),
        })?;
        Ok(document.as_bytes().to_vec())
    }

    /// Unwrap an RSA-OAEP (SHA-1) encrypted content key
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Decryption`] without a private key or when the
    /// ciphertext was not produced for this key.
    pub fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, AuthError> {
        let private_key = self.private_key.as_ref().ok_or_else(|| AuthError::Decryption {
            reason: format!("No private key for certificate {}", self.thumbprint),
        })?;
        private_key
            .decrypt(Oaep::new::<Sha1>(), wrapped)
            .map_err(|e| AuthError::Decryption {
                reason: format!("Content key unwrap failed: {e}"),
            })
    }

    /// Client identity for mutual TLS
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] when no private key was attached or
    /// the TLS backend rejects it.
    pub fn identity(&self) -> Result<reqwest::Identity, AuthError> {
        let pem = self.identity_pem.as_ref().ok_or_else(|| {
            AuthError::configuration(format!("Certificate {} has no private key for TLS", self.thumbprint))
        })?;
        reqwest::Identity::from_pem(pem.as_bytes())
            .map_err(|e| AuthError::configuration(format!("Invalid TLS identity {}: {e}", self.thumbprint)))
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("thumbprint", &self.thumbprint)
            .field("rsa", &self.public_key.is_some())
            .field("private_key", &self.private_key.is_some())
            .finish_non_exhaustive()
    }
}
