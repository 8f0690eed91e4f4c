//! Common test utilities for integration tests
//!
//! Provides RSA certificate fixtures, a reference token encryptor producing
//! XSTS-shaped compact envelopes, and wiremock helpers for the platform
//! authorities.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write as _;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aes::Aes128;
use base64::{Engine as _, engine::general_purpose::STANDARD, engine::general_purpose::URL_SAFE_NO_PAD};
use cbc::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs1::EncodeRsaPrivateKey as _;
use rsa::pkcs8::{EncodePrivateKey as _, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde_json::{Value, json};
use sha1::Sha1;
use sha2::Sha256;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use xsts_auth::{
    CertificateResolver, CertificateSource, EndpointDirectory, EndpointManifest, MemoryCertificateStore, Thumbprint,
    TokenValidator, XstsConfig,
};

pub const NOT_BEFORE: u64 = 1_700_000_000;
pub const EXPIRES: u64 = 1_700_086_400;
pub const USER_HASH: &str = "2535405290";
pub const SANDBOX: &str = "XDKS.1";

/// RSA certificate with its private key
pub struct RsaIdentity {
    pub key: RsaPrivateKey,
    pub key_pem: String,
    pub cert_pem: String,
    pub der: Vec<u8>,
}

impl RsaIdentity {
    pub fn generate(name: &str) -> Self {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let key_pem = key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
        let key_pair = rcgen::KeyPair::from_pem_and_sign_algo(&key_pem, &rcgen::PKCS_RSA_SHA256).unwrap();
        let cert = rcgen::CertificateParams::new(vec![name.to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();
        Self {
            key,
            key_pem,
            cert_pem: cert.pem(),
            der: cert.der().to_vec(),
        }
    }

    pub fn thumbprint(&self) -> Thumbprint {
        Thumbprint::of_der(&self.der)
    }

    pub fn x5t(&self) -> String {
        self.thumbprint().to_x5t()
    }

    pub fn base64_der(&self) -> String {
        STANDARD.encode(&self.der)
    }
}

/// Certificate whose key decrypts inbound tokens
pub static RELYING_PARTY: LazyLock<RsaIdentity> = LazyLock::new(|| RsaIdentity::generate("rp.gameservice.test"));

/// Certificate whose key signs inner tokens
pub static TOKEN_SIGNER: LazyLock<RsaIdentity> = LazyLock::new(|| RsaIdentity::generate("xsts.auth.test"));

/// Certificate used as the mutual-TLS client identity
pub static BUSINESS_PARTNER: LazyLock<RsaIdentity> = LazyLock::new(|| RsaIdentity::generate("bp.gameservice.test"));

pub fn at(seconds: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds)
}

/// Inner token payload with two users
pub fn payload(not_before: u64, expires: u64) -> Value {
    json!({
        "aud": "rp://gameservice.test/",
        "iss": "xsts.auth.xboxlive.com",
        "sbx": SANDBOX,
        "nbf": not_before,
        "exp": expires,
        "xdi": { "dty": "XboxOne", "dvr": "10.0.19041.4046", "dgr": "7ED1C4B3" },
        "xti": { "tid": "1234567890", "tvr": "1.0.0.0" },
        "xui": [
            {
                "uhs": USER_HASH,
                "gtg": "Major Nelson",
                "ptx": "9A11D4F3EC8B1C0E",
                "agg": "Adult",
                "prv": "184 185 254",
                "dlt": "delegation-token-1",
                "ctr": "US"
            },
            {
                "uhs": "1111111111",
                "gtg": "Player Two",
                "dlt": "delegation-token-2"
            }
        ]
    })
}

/// Inputs of the reference encryptor
pub struct TokenSpec<'a> {
    pub payload: Value,
    pub x5u: String,
    pub signer: &'a RsaIdentity,
    pub header_x5t: String,
    pub recipient: &'a RsaIdentity,
}

impl<'a> TokenSpec<'a> {
    pub fn new(server: &MockServer, payload: Value) -> Self {
        Self {
            payload,
            x5u: signing_keys_url(server),
            signer: &TOKEN_SIGNER,
            header_x5t: TOKEN_SIGNER.x5t(),
            recipient: &RELYING_PARTY,
        }
    }

    /// Produce the five-segment compact envelope
    pub fn seal(&self) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.x5t = Some(self.header_x5t.clone());
        header.x5u = Some(self.x5u.clone());
        let signing_key = self.signer.key.to_pkcs1_der().unwrap();
        let inner = jsonwebtoken::encode(&header, &self.payload, &EncodingKey::from_rsa_der(signing_key.as_bytes())).unwrap();

        let mut deflater = DeflateEncoder::new(Vec::new(), Compression::default());
        deflater.write_all(inner.as_bytes()).unwrap();
        let compressed = deflater.finish().unwrap();

        let content_key: [u8; 32] = rand::random();
        let iv: [u8; 16] = rand::random();
        let ciphertext = cbc::Encryptor::<Aes128>::new_from_slices(&content_key[16..], &iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(&compressed);

        let protected = URL_SAFE_NO_PAD.encode(
            json!({
                "alg": "RSA-OAEP",
                "enc": "A128CBC-HS256",
                "zip": "DEF",
                "x5t": self.recipient.x5t(),
            })
            .to_string(),
        );

        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&content_key[..16]).unwrap();
        mac.update(protected.as_bytes());
        mac.update(&iv);
        mac.update(&ciphertext);
        mac.update(&((protected.len() as u64) * 8).to_be_bytes());
        let tag = mac.finalize().into_bytes()[..16].to_vec();

        let wrapped = RsaPublicKey::from(&self.recipient.key)
            .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha1>(), &content_key)
            .unwrap();

        [
            protected,
            URL_SAFE_NO_PAD.encode(wrapped),
            URL_SAFE_NO_PAD.encode(iv),
            URL_SAFE_NO_PAD.encode(ciphertext),
            URL_SAFE_NO_PAD.encode(tag),
        ]
        .join(".")
    }
}

pub fn authorization(user_hash: &str, token: &str) -> String {
    format!("XBL3.0 x={user_hash};{token}")
}

/// Flip one bit of a base64url segment of a compact token
pub fn flip_bit(token: &str, segment: usize, bit: usize) -> String {
    let mut segments: Vec<String> = token.split('.').map(ToString::to_string).collect();
    let mut bytes = URL_SAFE_NO_PAD.decode(&segments[segment]).unwrap();
    bytes[bit / 8] ^= 1 << (bit % 8);
    segments[segment] = URL_SAFE_NO_PAD.encode(bytes);
    segments.join(".")
}

pub fn signing_keys_url(server: &MockServer) -> String {
    format!("{}/xsts/signingkeys", server.uri())
}

pub fn license_url(server: &MockServer) -> String {
    format!("{}/licensing/certificate", server.uri())
}

/// Configuration pointing every authority at the mock server
pub fn config(server: &MockServer) -> XstsConfig {
    let uri = server.uri();
    XstsConfig::default()
        .with_service_token_url(format!("{uri}/service/authenticate"))
        .with_xsts_authorize_url(format!("{uri}/xsts/authorize"))
        .with_endpoints_url(format!("{uri}/titles/default/endpoints"))
        .with_signing_keys_url(signing_keys_url(server))
        .with_trusted_issuers(BTreeMap::from([("127.0.0.1".to_string(), CertificateSource::SigningKeys)]))
        .with_target_endpoints(["127.0.0.1"])
}

pub fn relying_party_store() -> MemoryCertificateStore {
    let mut store = MemoryCertificateStore::new();
    store
        .insert_pem(&RELYING_PARTY.cert_pem, &RELYING_PARTY.key_pem)
        .unwrap();
    store
}

pub fn resolver(store: MemoryCertificateStore) -> Arc<CertificateResolver> {
    Arc::new(CertificateResolver::new(Arc::new(store), reqwest::Client::new()))
}

pub fn validator(server: &MockServer) -> TokenValidator {
    TokenValidator::new(Arc::new(config(server)), resolver(relying_party_store()))
}

/// Serve the signing-key map `{x5t: PEM}`
pub async fn mount_signing_keys(server: &MockServer, entries: &[(&str, &str)], expected_calls: u64) {
    let listing: serde_json::Map<String, Value> = entries
        .iter()
        .map(|(x5t, pem)| ((*x5t).to_string(), Value::String((*pem).to_string())))
        .collect();
    Mock::given(method("GET"))
        .and(path("/xsts/signingkeys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Object(listing)))
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Manifest with one HTTPS endpoint for the mock server host
pub fn manifest(policy: Value) -> EndpointManifest {
    serde_json::from_value(json!({
        "EndPoints": [
            {
                "Protocol": "https",
                "Host": "127.0.0.1",
                "HostType": "fqdn",
                "RelyingParty": "http://xboxlive.com",
                "TokenType": "JWT",
                "SignaturePolicyIndex": 0
            }
        ],
        "SignaturePolicies": [policy]
    }))
    .unwrap()
}

pub fn default_policy() -> Value {
    json!({
        "Version": 1,
        "SupportedAlgorithms": ["ES256"],
        "ExtraHeaders": ["x-xbl-contract-version", "Content-Type"],
        "MaxBodyBytes": 8192
    })
}

pub fn directory() -> Arc<EndpointDirectory> {
    Arc::new(EndpointDirectory::from_manifest(
        manifest(default_policy()),
        &["127.0.0.1".to_string()],
    ))
}

/// Headers of a received mock request as an `http::HeaderMap`
pub fn received_headers(request: &wiremock::Request) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in request.headers.iter() {
        headers.append(
            http::HeaderName::from_bytes(name.as_str().as_bytes()).unwrap(),
            http::HeaderValue::from_bytes(value.as_bytes()).unwrap(),
        );
    }
    headers
}

/// Path plus query of a received mock request
pub fn received_path(request: &wiremock::Request) -> String {
    match request.url.query() {
        Some(query) => format!("{}?{query}", request.url.path()),
        None => request.url.path().to_string(),
    }
}

pub fn issued_token(token: &str, lifetime: chrono::Duration) -> Value {
    let issued = chrono::Utc::now();
    json!({
        "IssueInstant": issued.to_rfc3339(),
        "NotAfter": (issued + lifetime).to_rfc3339(),
        "Token": token,
        "DisplayClaims": { "xui": [ { "uhs": USER_HASH, "gtg": "Major Nelson" } ] }
    })
}
