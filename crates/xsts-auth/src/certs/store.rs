//! Local certificate store
//!
//! Holds the service's own certificates: the relying-party certificate whose
//! private key unwraps inbound tokens, and the business-partner certificate
//! used as the mutual-TLS client identity.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use tracing::info;

use super::{Certificate, Thumbprint};
use crate::error::AuthError;

/// Source of locally installed certificates
pub trait CertificateStore: Send + Sync + fmt::Debug {
    /// Find a certificate by thumbprint
    fn find(&self, thumbprint: &Thumbprint) -> Option<Certificate>;
}

/// In-memory certificate store
#[derive(Debug, Default, Clone)]
pub struct MemoryCertificateStore {
    certificates: HashMap<Thumbprint, Certificate>,
}

impl MemoryCertificateStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a certificate, returning its thumbprint
    pub fn insert(&mut self, certificate: Certificate) -> Thumbprint {
        let thumbprint = certificate.thumbprint().clone();
        self.certificates.insert(thumbprint.clone(), certificate);
        thumbprint
    }

    /// Add a certificate and its private key from PEM text
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if either PEM is invalid or the
    /// key does not belong to the certificate.
    pub fn insert_pem(&mut self, certificate_pem: &str, key_pem: &str) -> Result<Thumbprint, AuthError> {
        let certificate = Certificate::from_text(certificate_pem)?.with_private_key_pem(certificate_pem, key_pem)?;
        Ok(self.insert(certificate))
    }

    /// Load a certificate and private key from PEM files
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if a file cannot be read or its
    /// content is invalid.
    pub fn load_pem_files(&mut self, certificate_path: &Path, key_path: &Path) -> Result<Thumbprint, AuthError> {
        let read = |path: &Path| {
            std::fs::read_to_string(path)
                .map_err(|e| AuthError::configuration(format!("Failed to read {}: {e}", path.display())))
        };
        let thumbprint = self.insert_pem(&read(certificate_path)?, &read(key_path)?)?;
        info!(
            thumbprint = %thumbprint,
            path = %certificate_path.display(),
            "Loaded certificate into local store"
        );
        Ok(thumbprint)
    }

    /// Number of certificates held
    #[must_use]
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn find(&self, thumbprint: &Thumbprint) -> Option<Certificate> {
        self.certificates.get(thumbprint).cloned()
    }
}
