// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Gateway checksum codec.
//!
//! Every request to the gateway, and every callback from it, carries an
//! `X-VERIFY` header of the form:
//!
//! ```text
//! hex(sha256(base64(payload) ++ endpoint ++ secret)) ### key_index
//! ```
//!
//! The status check signs an empty payload over its path; callbacks sign the
//! already-encoded `response` field with an empty endpoint.

use std::fmt;

use base64ct::{Base64, Encoding};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const SIGNATURE_SEPARATOR: &str = "###";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("key ring must contain at least one key")]
    EmptyKeyRing,

    #[error("malformed signing key entry: {0}")]
    MalformedKey(String),
}

/// Sign a raw payload. The payload is base64-encoded (standard alphabet,
/// padded) before hashing.
pub fn sign(payload: &[u8], endpoint: &str, secret: &str, key_index: &str) -> String {
    sign_encoded(&Base64::encode_string(payload), endpoint, secret, key_index)
}

/// Sign a payload that is already base64-encoded.
pub fn sign_encoded(encoded_payload: &str, endpoint: &str, secret: &str, key_index: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(encoded_payload.as_bytes());
    hasher.update(endpoint.as_bytes());
    hasher.update(secret.as_bytes());
    format!(
        "{}{SIGNATURE_SEPARATOR}{key_index}",
        hex::encode(hasher.finalize())
    )
}

pub fn verify(payload: &[u8], endpoint: &str, secret: &str, key_index: &str, candidate: &str) -> bool {
    signatures_match(&sign(payload, endpoint, secret, key_index), candidate)
}

fn signatures_match(expected: &str, candidate: &str) -> bool {
    let candidate = candidate.trim().to_ascii_lowercase();
    expected.as_bytes().ct_eq(candidate.as_bytes()).into()
}

// =============================================================================
// Key Ring
// =============================================================================

/// A salt key and the index the gateway knows it by.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey {
    secret: String,
    index: String,
}

impl SigningKey {
    pub fn new(secret: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            index: index.into(),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("secret", &"<redacted>")
            .field("index", &self.index)
            .finish()
    }
}

/// Ordered set of signing keys. The first key signs outbound requests; all
/// keys are accepted on inbound verification, which allows rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRing {
    keys: Vec<SigningKey>,
}

impl KeyRing {
    pub fn new(keys: Vec<SigningKey>) -> Result<Self, SignatureError> {
        if keys.is_empty() {
            return Err(SignatureError::EmptyKeyRing);
        }
        Ok(Self { keys })
    }

    /// Parse `secret:index[,secret:index...]`. The index is everything after
    /// the last `:`.
    pub fn parse(raw: &str) -> Result<Self, SignatureError> {
        let keys = raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (secret, index) = entry
                    .rsplit_once(':')
                    .ok_or_else(|| SignatureError::MalformedKey("missing ':index'".to_string()))?;
                let (secret, index) = (secret.trim(), index.trim());
                if secret.is_empty() || index.is_empty() {
                    return Err(SignatureError::MalformedKey(
                        "secret and index must be non-empty".to_string(),
                    ));
                }
                Ok(SigningKey::new(secret, index))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(keys)
    }

    pub fn active(&self) -> &SigningKey {
        &self.keys[0]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn sign(&self, payload: &[u8], endpoint: &str) -> String {
        let key = self.active();
        sign(payload, endpoint, &key.secret, &key.index)
    }

    pub fn sign_encoded(&self, encoded_payload: &str, endpoint: &str) -> String {
        let key = self.active();
        sign_encoded(encoded_payload, endpoint, &key.secret, &key.index)
    }

    /// First key whose signature over `payload` matches `candidate`.
    pub fn verify(&self, payload: &[u8], endpoint: &str, candidate: &str) -> Option<&SigningKey> {
        self.keys
            .iter()
            .find(|key| verify(payload, endpoint, &key.secret, &key.index, candidate))
    }

    /// Like [`KeyRing::verify`] for a payload received base64-encoded.
    pub fn verify_encoded(
        &self,
        encoded_payload: &str,
        endpoint: &str,
        candidate: &str,
    ) -> Option<&SigningKey> {
        self.keys.iter().find(|key| {
            let expected = sign_encoded(encoded_payload, endpoint, &key.secret, &key.index);
            signatures_match(&expected, candidate)
        })
    }
}
