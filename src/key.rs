//! License key set model.
//!
//! License servers answer ClearKey-style requests with a JSON Web Key set:
//! `{"keys": [{"kty": "oct", "k": "...", "kid": "..."}], "type": "temporary"}`.
//! A `k` without any `.` is a usable base64url key. Otherwise it is a wrapped
//! key `encryptedKey.encryptedPublicKey.iv` (Base58, Base58, hex).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::{decode_base58, decode_hex};

/// Separator between the segments of a wrapped key.
const WRAPPED_KEY_SEPARATOR: char = '.';

/// A license response key set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    /// Keys in server order.
    pub keys: Vec<KeyEntry>,
    /// License type reported by the server (e.g. "temporary").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

/// A single key of a [`KeySet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    /// Key type, usually "oct".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kty: Option<String>,
    /// Key material, plain or wrapped.
    pub k: String,
    /// Key ID as sent by the server.
    pub kid: String,
}

impl KeySet {
    /// Parse a raw license response.
    ///
    /// Fails with [`Error::Protocol`] when the body is not a key set or
    /// carries no keys.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let key_set: KeySet = serde_json::from_slice(data)
            .map_err(|e| Error::Protocol(format!("Malformed license response: {}", e)))?;
        if key_set.keys.is_empty() {
            return Err(Error::Protocol(
                "License response contains no keys".to_string(),
            ));
        }
        Ok(key_set)
    }

    /// Serialize back to the wire shape.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::Protocol(format!("Failed to serialize key set: {}", e)))
    }
}

impl KeyEntry {
    /// Whether `k` is a wrapped key rather than a plain one.
    #[must_use]
    pub fn is_wrapped(&self) -> bool {
        self.k.contains(WRAPPED_KEY_SEPARATOR)
    }

    /// Decode the wrapped key segments, or `None` for a plain key.
    pub fn wrapped_key(&self) -> Result<Option<WrappedKey>> {
        if !self.is_wrapped() {
            return Ok(None);
        }
        WrappedKey::parse(&self.k).map(Some)
    }
}

/// Decoded segments of a wrapped `k`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    /// AES-CBC encrypted content key.
    pub encrypted_key: Vec<u8>,
    /// AES-ECB encrypted key for `encrypted_key`.
    pub encrypted_public_key: Vec<u8>,
    /// CBC initialization vector.
    pub iv: Vec<u8>,
}

impl WrappedKey {
    /// Split and decode `encryptedKey.encryptedPublicKey.iv`.
    pub fn parse(k: &str) -> Result<Self> {
        let segments: Vec<&str> = k.split(WRAPPED_KEY_SEPARATOR).collect();
        let [encrypted_key, encrypted_public_key, iv] = segments.as_slice() else {
            return Err(Error::MalformedInput(format!(
                "Wrapped key must have 3 segments, got {}",
                segments.len()
            )));
        };

        Ok(Self {
            encrypted_key: decode_base58(encrypted_key)?,
            encrypted_public_key: decode_base58(encrypted_public_key)?,
            iv: decode_hex(iv)?,
        })
    }
}
