//! Signing error types

use thiserror::Error;

/// Errors raised while producing or checking a canonical signature
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SigningError {
    /// Timestamp cannot be represented as a Windows file time
    #[error("Timestamp is not a valid platform file time: {ticks}")]
    InvalidTimestamp {
        /// Offending tick count
        ticks: i64,
    },

    /// Request method was empty
    #[error("HTTP method must not be empty")]
    EmptyMethod,

    /// The proof key's algorithm is not accepted by the policy
    #[error("Algorithm {algorithm} is not supported by signature policy v{version}")]
    UnsupportedAlgorithm {
        /// Algorithm of the proof key
        algorithm: String,
        /// Policy version
        version: u32,
    },

    /// Signature header could not be decoded
    #[error("Malformed signature header: {reason}")]
    MalformedHeader {
        /// What was wrong with it
        reason: String,
    },

    /// Underlying cryptographic operation failed
    #[error("Cryptographic operation failed: {reason}")]
    CryptographicError {
        /// Description of the failure
        reason: String,
    },

    /// Key material could not be encoded or decoded
    #[error("Key encoding failed: {reason}")]
    KeyEncoding {
        /// Description of the failure
        reason: String,
    },
}
