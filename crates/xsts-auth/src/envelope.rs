//! Compact encrypted envelope of an XSTS token
//!
//! The token is five base64url segments: protected header, wrapped content
//! key, IV, ciphertext and authentication tag. The content key is split in
//! half: HMAC-SHA256 key first, AES-CBC key second. The tag is the first half
//! of `HMAC(aad ++ iv ++ ciphertext ++ bitlen(aad))` where `aad` is the ASCII
//! of the header segment.
//!
//! The tag is checked before anything is decrypted, so no byte of tampered
//! content is ever processed.

use std::io::Read as _;

use aes::{Aes128, Aes192, Aes256};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use flate2::read::DeflateDecoder;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AuthError;

/// Authorization scheme of XSTS tokens
pub const XBL_SCHEME: &str = "XBL3.0";

/// Upper bound on the inflated inner token
const MAX_INFLATED_BYTES: u64 = 1024 * 1024;

/// Split an `Authorization` value into user hash and compact token
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] unless the value has the form
/// `XBL3.0 x=<userHash>;<token>`.
pub fn parse_authorization(value: &str) -> Result<(&str, &str), AuthError> {
    let (scheme, rest) = value
        .trim()
        .split_once(' ')
        .ok_or_else(|| AuthError::malformed("Authorization has no scheme"))?;
    if !scheme.eq_ignore_ascii_case(XBL_SCHEME) {
        return Err(AuthError::malformed(format!("Unsupported scheme {scheme}")));
    }
    let (user_hash, token) = rest
        .trim_start()
        .strip_prefix("x=")
        .and_then(|claims| claims.split_once(';'))
        .ok_or_else(|| AuthError::malformed("Authorization is not x=<userHash>;<token>"))?;
    if user_hash.is_empty() || token.is_empty() {
        return Err(AuthError::malformed("Empty user hash or token"));
    }
    Ok((user_hash, token))
}

/// Protected header of the envelope
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvelopeHeader {
    /// Key management algorithm, always `RSA-OAEP`
    pub alg: String,
    /// Content encryption algorithm
    #[serde(default)]
    pub enc: Option<String>,
    /// Compression, `DEF` when present
    #[serde(default)]
    pub zip: Option<String>,
    /// Thumbprint of the certificate that can unwrap the content key
    pub x5t: String,
}

fn decode_segment(name: &str, segment: &str) -> Result<Vec<u8>, AuthError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::malformed(format!("{name} segment is not base64url: {e}")))
}

/// Parsed compact envelope
#[derive(Debug, Clone)]
pub struct CompactEnvelope {
    protected: String,
    header: EnvelopeHeader,
    encrypted_key: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

impl CompactEnvelope {
    /// Split and decode the five segments
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] for a wrong segment count, bad
    /// base64url, or a header that is not the expected JSON.
    pub fn parse(token: &str) -> Result<Self, AuthError> {
        let segments: Vec<&str> = token.split('.').collect();
        let [protected, encrypted_key, iv, ciphertext, tag] = segments.as_slice() else {
            return Err(AuthError::malformed(format!(
                "Expected 5 token segments, found {}",
                segments.len()
            )));
        };

        let header: EnvelopeHeader = serde_json::from_slice(&decode_segment("header", protected)?)
            .map_err(|e| AuthError::malformed(format!("Invalid envelope header: {e}")))?;
        if header.alg != "RSA-OAEP" {
            return Err(AuthError::malformed(format!("Unsupported key algorithm {}", header.alg)));
        }

        Ok(Self {
            protected: (*protected).to_string(),
            header,
            encrypted_key: decode_segment("key", encrypted_key)?,
            iv: decode_segment("iv", iv)?,
            ciphertext: decode_segment("ciphertext", ciphertext)?,
            tag: decode_segment("tag", tag)?,
        })
    }

    /// Protected header
    #[must_use]
    pub fn header(&self) -> &EnvelopeHeader {
        &self.header
    }

    /// Wrapped content encryption key
    #[must_use]
    pub fn encrypted_key(&self) -> &[u8] {
        &self.encrypted_key
    }

    /// Check the tag and decrypt the content with an unwrapped key
    ///
    /// # Errors
    ///
    /// - [`AuthError::Decryption`] if the key length is not 32, 48 or 64 bytes
    /// - [`AuthError::Integrity`] if the tag does not match
    /// - [`AuthError::Decryption`] if the padded plaintext is invalid
    pub fn open(&self, content_key: &[u8]) -> Result<Vec<u8>, AuthError> {
        if !matches!(content_key.len(), 32 | 48 | 64) {
            return Err(AuthError::Decryption {
                reason: format!("Unexpected content key length {}", content_key.len()),
            });
        }
        let (mac_key, aes_key) = content_key.split_at(content_key.len() / 2);

        let expected = authentication_tag(mac_key, self.protected.as_bytes(), &self.iv, &self.ciphertext)?;
        if !bool::from(expected.ct_eq(&self.tag)) {
            return Err(AuthError::Integrity);
        }

        decrypt_cbc(aes_key, &self.iv, &self.ciphertext)
    }
}

/// Authentication tag over the envelope parts
///
/// # Errors
///
/// Returns [`AuthError::Decryption`] if the MAC key is rejected.
pub fn authentication_tag(mac_key: &[u8], aad: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, AuthError> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(mac_key).map_err(|e| AuthError::Decryption {
        reason: format!("Invalid MAC key: {e}"),
    })?;
    let aad_bits = (aad.len() as u64) * 8;
    mac.update(aad);
    mac.update(iv);
    mac.update(ciphertext);
    mac.update(&aad_bits.to_be_bytes());
    let full = mac.finalize().into_bytes();
    Ok(full[..full.len() / 2].to_vec())
}

fn decrypt_cbc(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, AuthError> {
    let failed = |e: &dyn std::fmt::Display| AuthError::Decryption {
        reason: format!("AES-CBC decryption failed: {e}"),
    };
    match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|e| failed(&e))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| failed(&e)),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|e| failed(&e))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| failed(&e)),
        _ => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|e| failed(&e))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| failed(&e)),
    }
}

/// Inflate raw DEFLATE content into the inner compact JWT
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the content does not inflate to
/// UTF-8 text.
pub fn inflate(compressed: &[u8]) -> Result<String, AuthError> {
    let mut inner = String::new();
    DeflateDecoder::new(compressed)
        .take(MAX_INFLATED_BYTES)
        .read_to_string(&mut inner)
        .map_err(|e| AuthError::malformed(format!("Inner token does not inflate: {e}")))?;
    Ok(inner)
}
