//! Single-key derivation from key URIs.
//!
//! Stream playlists reference their AES key through a URI path instead of a
//! license request:
//!
//! - `/{slot_id}/{hex_public_key}`: legacy, HMAC keyed with the static
//!   stream key over `slot_id`.
//! - `/v2/{slot_id}/{base58_public_key}`: HMAC keyed with the derived secret
//!   over `slot_id || device_id`.
//!
//! Either way the HMAC output decrypts the public key with AES-ECB and the
//! result is the stream key. [`KeyUriSource`] serves it as a byte stream.
use std::io;

use tracing::debug;

use crate::crypto::{aes_ecb_decrypt, common_secret, hmac_sha256, TS_COMMON_KEY};
use crate::error::{Error, Result};
use crate::utils::{decode_base58, decode_hex};

/// A parsed key URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyUri {
    /// `/{slot_id}/{hex_public_key}`
    V1 { slot_id: String, public_key: Vec<u8> },
    /// `/v2/{slot_id}/{base58_public_key}`
    V2 { slot_id: String, public_key: Vec<u8> },
}

impl KeyUri {
    /// Parse a key URI or bare path.
    ///
    /// For full URIs (`scheme://host/...`) the host selects the layout: `v2`
    /// means the path is `/{slot_id}/{base58_public_key}`, anything else means
    /// `/{slot_id}/{hex_public_key}`. Bare paths select v2 with a leading `v2`
    /// segment. Extra segments are rejected.
    pub fn parse(uri: &str) -> Result<Self> {
        let without_suffix = uri.split(['?', '#']).next().unwrap_or_default();
        let (host, path) = match without_suffix.split_once("://") {
            Some((_, rest)) => rest.split_once('/').unwrap_or((rest, "")),
            None => ("", without_suffix),
        };
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match (host, segments.as_slice()) {
            ("v2", [slot_id, public_key]) | ("", ["v2", slot_id, public_key]) => Ok(KeyUri::V2 {
                slot_id: (*slot_id).to_string(),
                public_key: decode_base58(public_key)?,
            }),
            (host, [slot_id, public_key]) if host != "v2" && *slot_id != "v2" => {
                Ok(KeyUri::V1 {
                    slot_id: (*slot_id).to_string(),
                    public_key: decode_hex(public_key)?,
                })
            }
            _ => Err(Error::MalformedInput(format!(
                "Key URI must be /{{slot}}/{{key}} or /v2/{{slot}}/{{key}}: {}",
                uri
            ))),
        }
    }

    /// Derive the stream key for `device_id`.
    pub fn derive_key(&self, device_id: &str) -> Result<Vec<u8>> {
        match self {
            KeyUri::V1 {
                slot_id,
                public_key,
            } => {
                let key = hmac_sha256(TS_COMMON_KEY, slot_id.as_bytes())?;
                aes_ecb_decrypt(public_key, &key)
            }
            KeyUri::V2 {
                slot_id,
                public_key,
            } => {
                let message = format!("{}{}", slot_id, device_id);
                let key = hmac_sha256(common_secret(), message.as_bytes())?;
                aes_ecb_decrypt(public_key, &key)
            }
        }
    }
}

/// Serves a derived stream key as a readable byte source.
#[derive(Debug)]
pub struct KeyUriSource {
    device_id: String,
    uri: Option<String>,
    key: Option<Vec<u8>>,
    position: usize,
}

impl KeyUriSource {
    /// Create a closed source for `device_id`.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            uri: None,
            key: None,
            position: 0,
        }
    }

    /// Derive the key for `uri` and return its length in bytes.
    pub fn open(&mut self, uri: &str) -> Result<usize> {
        let key = KeyUri::parse(uri)?.derive_key(&self.device_id)?;
        debug!(len = key.len(), "derived stream key from key URI");
        let len = key.len();
        self.uri = Some(uri.to_string());
        self.key = Some(key);
        self.position = 0;
        Ok(len)
    }

    /// URI passed to the last successful [`open`](Self::open).
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Copy up to `read_length` key bytes into `buffer[offset..]`.
    ///
    /// Returns `Ok(None)` once the whole key has been read.
    pub fn read_into(
        &mut self,
        buffer: &mut [u8],
        offset: usize,
        read_length: usize,
    ) -> Result<Option<usize>> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::InvalidState("Key URI source is not open".to_string()))?;

        let remaining = &key[self.position..];
        if remaining.is_empty() {
            return Ok(None);
        }
        if offset > buffer.len() {
            return Err(Error::InvalidState(format!(
                "Read offset {} is past buffer length {}",
                offset,
                buffer.len()
            )));
        }

        let length = remaining
            .len()
            .min(read_length)
            .min(buffer.len() - offset);
        buffer[offset..offset + length].copy_from_slice(&remaining[..length]);
        self.position += length;
        Ok(Some(length))
    }

    /// Release the derived key.
    pub fn close(&mut self) {
        self.key = None;
        self.uri = None;
        self.position = 0;
    }
}

impl io::Read for KeyUriSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        match self.read_into(buf, 0, len) {
            Ok(Some(n)) => Ok(n),
            Ok(None) => Ok(0),
            Err(e) => Err(io::Error::other(e)),
        }
    }
}
