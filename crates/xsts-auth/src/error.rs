//! Error types for XSTS authentication
//!
//! Pipeline failures carry full detail for the server-side log. Callers only
//! ever see the generic text returned by [`AuthError::rejection`].

use http::StatusCode;
use thiserror::Error;
use xsts_signing::SigningError;

/// Errors raised by the trust layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No `Authorization` header on a protected request
    #[error("Missing Authorization header")]
    MissingAuthorization,

    /// Header or token does not have the expected structure
    #[error("Malformed XSTS token: {reason}")]
    MalformedToken {
        /// What was wrong with it
        reason: String,
    },

    /// Content key could not be unwrapped or content could not be decrypted
    #[error("XSTS token decryption failed: {reason}")]
    Decryption {
        /// Description of the failure
        reason: String,
    },

    /// Authentication tag mismatch
    #[error("XSTS token integrity check failed")]
    Integrity,

    /// Signing certificate URL is not on the trusted issuer list
    #[error("Untrusted certificate issuer: {url}")]
    UntrustedIssuer {
        /// The rejected `x5u` value
        url: String,
    },

    /// Inner JWT signature did not verify
    #[error("XSTS token signature invalid: {reason}")]
    Signature {
        /// Description of the failure
        reason: String,
    },

    /// No user claims entry matches the selected user hash
    #[error("No user claims for user hash {user_hash}")]
    UserNotFound {
        /// Hash supplied in the Authorization header
        user_hash: String,
    },

    /// Token is not valid yet
    #[error("XSTS token not valid before {not_before} (now {now})")]
    NotYetValid {
        /// `nbf` as epoch seconds
        not_before: i64,
        /// Validation time as epoch seconds
        now: i64,
    },

    /// Token has expired
    #[error("XSTS token expired at {expires} (now {now})")]
    Expired {
        /// `exp` as epoch seconds
        expires: i64,
        /// Validation time as epoch seconds
        now: i64,
    },

    /// Downloaded certificate does not have the requested thumbprint
    #[error("Certificate thumbprint mismatch: expected {expected}, got {actual}")]
    CertificateMismatch {
        /// Requested thumbprint
        expected: String,
        /// What was actually downloaded
        actual: String,
    },

    /// Certificate is neither cached nor in the local store
    #[error("Certificate not found: {thumbprint}")]
    CertificateNotFound {
        /// Requested thumbprint
        thumbprint: String,
    },

    /// Service token request was refused
    #[error("Service token request failed with status {status}: {body}")]
    ServiceToken {
        /// HTTP status (0 when no response was received)
        status: u16,
        /// Response body or transport error, kept for diagnostics
        body: String,
    },

    /// Delegated token request was refused
    #[error("Delegated token request failed with status {status}: {body}")]
    DelegatedToken {
        /// HTTP status (0 when no response was received)
        status: u16,
        /// Response body or transport error, kept for diagnostics
        body: String,
    },

    /// Host has no endpoint entry in the platform manifest
    #[error("No endpoint registered for host {host}")]
    EndpointNotFound {
        /// Requested host
        host: String,
    },

    /// Endpoint has no usable signature policy
    #[error("No signature policy for host {host}")]
    PolicyNotFound {
        /// Requested host
        host: String,
    },

    /// Transport or decoding failure talking to a platform authority
    #[error("HTTP request failed: {reason}")]
    Http {
        /// Description of the failure
        reason: String,
    },

    /// Invalid configuration or local key material
    #[error("Configuration error: {reason}")]
    Configuration {
        /// Description of the problem
        reason: String,
    },

    /// Request signing failed
    #[error(transparent)]
    Signing(#[from] SigningError),
}

impl AuthError {
    /// Create a malformed-token error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedToken {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create an HTTP transport error
    pub fn http(reason: impl std::fmt::Display) -> Self {
        Self::Http {
            reason: reason.to_string(),
        }
    }

    /// Whether the error is a token lifetime failure
    #[must_use]
    pub fn is_lifetime(&self) -> bool {
        matches!(self, Self::Expired { .. } | Self::NotYetValid { .. })
    }

    /// Status and body presented to an inbound caller
    ///
    /// Internal detail is never part of the body.
    #[must_use]
    pub fn rejection(&self) -> (StatusCode, &'static str) {
        match self {
            Self::MissingAuthorization => (StatusCode::FORBIDDEN, "Access Denied: Missing Authorization header"),
            Self::Expired { .. } | Self::NotYetValid { .. } => {
                (StatusCode::UNAUTHORIZED, "Access Denied: XSTS token expired")
            }
            _ => (StatusCode::FORBIDDEN, "Access Denied: XSTS token invalid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_hides_detail() {
        let error = AuthError::Decryption {
            reason: "OAEP padding error at byte 17".to_string(),
        };
        let (status, body) = error.rejection();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!body.contains("OAEP"));
    }

    #[test]
    fn test_lifetime_errors_are_unauthorized() {
        let expired = AuthError::Expired { expires: 10, now: 11 };
        let early = AuthError::NotYetValid { not_before: 10, now: 9 };
        assert_eq!(expired.rejection().0, StatusCode::UNAUTHORIZED);
        assert_eq!(early.rejection().0, StatusCode::UNAUTHORIZED);
        assert!(expired.is_lifetime());
        assert!(!AuthError::Integrity.is_lifetime());
    }

    #[test]
    fn test_missing_header_is_forbidden() {
        assert_eq!(AuthError::MissingAuthorization.rejection().0, StatusCode::FORBIDDEN);
    }
}
