//! Signature policy model
//!
//! Policies are published by the platform alongside its endpoint table. Field
//! names match the manifest's PascalCase JSON.

use serde::{Deserialize, Serialize};

use crate::types::SignatureAlgorithm;
use crate::{DEFAULT_CLOCK_SKEW_SECONDS, DEFAULT_MAX_BODY_BYTES};

fn default_clock_skew() -> u64 {
    DEFAULT_CLOCK_SKEW_SECONDS
}

/// Rules describing what a request signature covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignaturePolicy {
    /// Policy version, signed as the first canonical element
    pub version: u32,

    /// Accepted algorithm names, in preference order
    #[serde(default)]
    pub supported_algorithms: Vec<String>,

    /// Extra headers covered by the signature. Order is significant.
    #[serde(default)]
    pub extra_headers: Vec<String>,

    /// Upper bound on body bytes fed into the signature
    pub max_body_bytes: u64,

    /// Allowed distance between the signed timestamp and the verifier's clock
    #[serde(default = "default_clock_skew")]
    pub clock_skew_seconds: u64,

    /// Skip the clock-skew check on verification
    #[serde(default)]
    pub ignore_clock_skew: bool,
}

impl SignaturePolicy {
    /// Whether the policy accepts the given algorithm
    ///
    /// An empty algorithm list places no restriction.
    #[must_use]
    pub fn supports(&self, algorithm: SignatureAlgorithm) -> bool {
        self.supported_algorithms.is_empty()
            || self
                .supported_algorithms
                .iter()
                .any(|name| name.eq_ignore_ascii_case(algorithm.as_str()))
    }

    /// Number of body bytes a signature covers for a body of `len` bytes
    #[must_use]
    pub fn signed_body_len(&self, len: usize) -> usize {
        usize::try_from(self.max_body_bytes).map_or(len, |max| len.min(max))
    }
}

impl Default for SignaturePolicy {
    fn default() -> Self {
        Self {
            version: 1,
            supported_algorithms: vec!["ES256".to_string(), "RS256".to_string()],
            extra_headers: Vec::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            clock_skew_seconds: DEFAULT_CLOCK_SKEW_SECONDS,
            ignore_clock_skew: false,
        }
    }
}
