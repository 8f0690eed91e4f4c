//! Endpoint and signature policy directory
//!
//! The platform publishes one manifest mapping hosts to relying parties and
//! signature policies. Only HTTPS entries for the configured target hosts are
//! kept. The table is fetched once, on first use, and never refreshed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use xsts_signing::SignaturePolicy;

use crate::config::XstsConfig;
use crate::error::AuthError;

/// How an endpoint host is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HostType {
    /// Exact host name
    #[default]
    #[serde(alias = "fqdn")]
    Fqdn,
    /// `*.<domain>` pattern
    #[serde(alias = "wildcard")]
    Wildcard,
    /// Any other kind the platform may publish
    #[serde(other)]
    Other,
}

/// One manifest endpoint entry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Endpoint {
    /// `https` or `http`
    pub protocol: String,
    /// Host or wildcard pattern
    pub host: String,
    /// Match kind
    pub host_type: HostType,
    /// Relying party tokens for this host are scoped to
    pub relying_party: Option<String>,
    /// Optional sub relying party
    pub sub_relying_party: Option<String>,
    /// Token type requested for the relying party
    pub token_type: Option<String>,
    /// Index into the manifest signature policies
    pub signature_policy_index: Option<usize>,
    /// Path for services not rooted at `/`
    pub path: Option<String>,
    /// Minimum TLS version
    pub min_tls_version: Option<String>,
    /// Indices of pinned server certificates
    pub server_cert_index: Vec<usize>,
}

/// Platform endpoint manifest
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointManifest {
    /// Endpoint entries
    #[serde(rename = "EndPoints")]
    pub end_points: Vec<Endpoint>,
    /// Signature policies referenced by index
    #[serde(rename = "SignaturePolicies")]
    pub signature_policies: Vec<SignaturePolicy>,
}

#[derive(Debug, Default)]
struct EndpointTable {
    by_host: HashMap<String, Endpoint>,
    policies: Vec<SignaturePolicy>,
}

impl EndpointTable {
    fn build(manifest: EndpointManifest, targets: &[String]) -> Self {
        let mut by_host = HashMap::new();
        for endpoint in manifest.end_points {
            let host = endpoint.host.to_ascii_lowercase();
            let targeted = targets.iter().any(|t| t.eq_ignore_ascii_case(&host));
            if targeted && endpoint.protocol.eq_ignore_ascii_case("https") {
                by_host.entry(host).or_insert(endpoint);
            }
        }
        Self {
            by_host,
            policies: manifest.signature_policies,
        }
    }

    fn find(&self, host: &str) -> Option<&Endpoint> {
        let host = host.to_ascii_lowercase();
        if let Some(endpoint) = self.by_host.get(&host) {
            return Some(endpoint);
        }

        let labels: Vec<&str> = host.rsplit('.').take(2).collect();
        if let [tld, domain] = labels.as_slice()
            && let Some(endpoint) = self.by_host.get(&format!("*.{domain}.{tld}"))
        {
            return Some(endpoint);
        }

        // Deeper wildcard patterns such as `*.mp.microsoft.com`
        self.by_host
            .iter()
            .filter(|(pattern, e)| e.host_type == HostType::Wildcard || pattern.starts_with("*."))
            .filter_map(|(pattern, e)| {
                let suffix = pattern.strip_prefix('*')?;
                host.ends_with(suffix).then_some((suffix.len(), e))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, e)| e)
    }
}

/// Host to endpoint and policy lookup over the platform manifest
#[derive(Debug)]
pub struct EndpointDirectory {
    table: OnceCell<EndpointTable>,
    http_client: reqwest::Client,
    url: String,
    targets: Vec<String>,
}

impl EndpointDirectory {
    /// Create a directory that fetches the manifest on first lookup
    pub fn new(config: &XstsConfig, http_client: reqwest::Client) -> Self {
        Self {
            table: OnceCell::new(),
            http_client,
            url: config.endpoints_url.clone(),
            targets: config.target_endpoints.clone(),
        }
    }

    /// Create a directory from an already fetched manifest
    #[must_use]
    pub fn from_manifest(manifest: EndpointManifest, targets: &[String]) -> Self {
        Self {
            table: OnceCell::from(EndpointTable::build(manifest, targets)),
            http_client: reqwest::Client::new(),
            url: String::new(),
            targets: targets.to_vec(),
        }
    }

    /// Fetch the manifest if it has not been loaded yet
    ///
    /// A failed fetch is not remembered; the next call tries again.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Http`] if the manifest cannot be fetched or parsed.
    pub async fn load(&self) -> Result<(), AuthError> {
        self.table().await.map(|_| ())
    }

    async fn table(&self) -> Result<&EndpointTable, AuthError> {
        self.table
            .get_or_try_init(|| async {
                info!(url = %self.url, "Fetching endpoint manifest");
                let response = self.http_client.get(&self.url).send().await.map_err(|e| {
                    warn!(url = %self.url, error = %e, "Endpoint manifest unreachable");
                    AuthError::http(e)
                })?;
                let status = response.status();
                if !status.is_success() {
                    return Err(AuthError::http(format!("{} returned {status}", self.url)));
                }
                let manifest: EndpointManifest = response
                    .json()
                    .await
                    .map_err(|e| AuthError::http(format!("Invalid endpoint manifest: {e}")))?;
                let table = EndpointTable::build(manifest, &self.targets);
                info!(
                    endpoints = table.by_host.len(),
                    policies = table.policies.len(),
                    "Endpoint manifest loaded"
                );
                Ok(table)
            })
            .await
    }

    /// Endpoint and signature policy for a host
    ///
    /// Exact matches win over `*.<domain>.<tld>` wildcards, which win over
    /// longer wildcard suffixes.
    ///
    /// # Errors
    ///
    /// - [`AuthError::EndpointNotFound`] if no entry matches
    /// - [`AuthError::PolicyNotFound`] if the entry has no valid policy index
    /// - [`AuthError::Http`] if the manifest cannot be loaded
    pub async fn lookup(&self, host: &str) -> Result<(Endpoint, SignaturePolicy), AuthError> {
        let table = self.table().await?;
        let endpoint = table.find(host).ok_or_else(|| AuthError::EndpointNotFound {
            host: host.to_string(),
        })?;
        let policy = endpoint
            .signature_policy_index
            .and_then(|index| table.policies.get(index))
            .ok_or_else(|| AuthError::PolicyNotFound {
                host: host.to_string(),
            })?;
        debug!(host = %host, pattern = %endpoint.host, "Endpoint resolved");
        Ok((endpoint.clone(), policy.clone()))
    }

    /// Number of retained endpoints, zero before the manifest is loaded
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.get().map_or(0, |table| table.by_host.len())
    }

    /// Whether no endpoint is retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn manifest() -> EndpointManifest {
        serde_json::from_value(serde_json::json!({
            "EndPoints": [
                {
                    "Protocol": "https",
                    "Host": "*.xboxlive.com",
                    "HostType": "wildcard",
                    "RelyingParty": "http://xboxlive.com",
                    "TokenType": "JWT",
                    "SignaturePolicyIndex": 0
                },
                {
                    "Protocol": "https",
                    "Host": "collections.mp.microsoft.com",
                    "HostType": "fqdn",
                    "RelyingParty": "https://b2b.mp.microsoft.com",
                    "SignaturePolicyIndex": 1,
                    "ServerCertIndex": [0]
                },
                {
                    "Protocol": "http",
                    "Host": "privileges.xboxlive.com",
                    "HostType": "fqdn",
                    "RelyingParty": "http://banned.example"
                },
                {
                    "Protocol": "https",
                    "Host": "unrelated.example.com",
                    "HostType": "fqdn",
                    "SignaturePolicyIndex": 0
                }
            ],
            "SignaturePolicies": [
                { "Version": 1, "SupportedAlgorithms": ["ES256"], "MaxBodyBytes": 8192 },
                { "Version": 1, "SupportedAlgorithms": ["ES256"], "ExtraHeaders": ["Content-Type"], "MaxBodyBytes": 0 }
            ]
        }))
        .unwrap()
    }

    fn targets() -> Vec<String> {
        crate::config::DEFAULT_TARGET_ENDPOINTS
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_exact_match_wins() {
        let directory = EndpointDirectory::from_manifest(manifest(), &targets());
        let (endpoint, policy) = directory.lookup("Collections.MP.Microsoft.com").await.unwrap();
        assert_eq!(endpoint.relying_party.as_deref(), Some("https://b2b.mp.microsoft.com"));
        assert_eq!(policy.extra_headers, vec!["Content-Type".to_string()]);
        assert_eq!(endpoint.server_cert_index, vec![0]);
    }

    #[tokio::test]
    async fn test_wildcard_fallback() {
        let directory = EndpointDirectory::from_manifest(manifest(), &targets());
        let (endpoint, policy) = directory.lookup("foo.xboxlive.com").await.unwrap();
        assert_eq!(endpoint.host, "*.xboxlive.com");
        assert_eq!(endpoint.host_type, HostType::Wildcard);
        assert_eq!(policy.max_body_bytes, 8192);
    }

    #[tokio::test]
    async fn test_non_https_and_untargeted_dropped() {
        let directory = EndpointDirectory::from_manifest(manifest(), &targets());
        assert_eq!(directory.len(), 2);
        // The plain-HTTP entry is dropped, so the wildcard answers instead.
        let (endpoint, _) = directory.lookup("privileges.xboxlive.com").await.unwrap();
        assert_eq!(endpoint.host, "*.xboxlive.com");
        assert!(matches!(
            directory.lookup("unrelated.example.com").await,
            Err(AuthError::EndpointNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_policy_index() {
        let mut manifest = manifest();
        manifest.end_points[1].signature_policy_index = Some(7);
        let directory = EndpointDirectory::from_manifest(manifest, &targets());
        assert!(matches!(
            directory.lookup("collections.mp.microsoft.com").await,
            Err(AuthError::PolicyNotFound { .. })
        ));
    }

    #[test]
    fn test_deeper_wildcard_suffix() {
        let mut manifest = manifest();
        manifest.end_points.push(Endpoint {
            protocol: "https".to_string(),
            host: "*.mp.microsoft.com".to_string(),
            host_type: HostType::Wildcard,
            signature_policy_index: Some(0),
            ..Endpoint::default()
        });
        let mut hosts = targets();
        hosts.push("*.mp.microsoft.com".to_string());
        let table = EndpointTable::build(manifest, &hosts);
        assert_eq!(table.find("purchase.mp.microsoft.com").map(|e| e.host.as_str()), Some("*.mp.microsoft.com"));
        assert!(table.find("example.org").is_none());
    }

    #[tokio::test]
    async fn test_first_duplicate_host_wins() {
        let mut manifest = manifest();
        manifest.end_points.push(Endpoint {
            protocol: "https".to_string(),
            host: "Collections.mp.microsoft.com".to_string(),
            host_type: HostType::Fqdn,
            relying_party: Some("http://second.rp".to_string()),
            signature_policy_index: Some(0),
            ..Endpoint::default()
        });
        let directory = EndpointDirectory::from_manifest(manifest, &targets());
        assert_eq!(directory.len(), 2);
        let (endpoint, policy) = directory.lookup("collections.mp.microsoft.com").await.unwrap();
        assert_eq!(endpoint.relying_party.as_deref(), Some("https://b2b.mp.microsoft.com"));
        assert_eq!(policy.max_body_bytes, 0);
    }
}
