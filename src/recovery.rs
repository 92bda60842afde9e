//! License key recovery.
//!
//! Turns a license response whose first key is wrapped into one carrying the
//! plain key:
//!
//! 1. `hash_key = HMAC-SHA256(common_secret, kid || device_id)`
//! 2. `public_key = AES-ECB-decrypt(encrypted_public_key, hash_key)`
//! 3. `plain_key = AES-CBC-decrypt(encrypted_key, public_key, iv)`
//!
//! The recovered key is base64 text; it is mapped onto the standard base64
//! alphabet before being written back into the key set.
use tracing::debug;

use crate::crypto::{aes_cbc_decrypt, aes_ecb_decrypt, common_secret, hmac_sha256};
use crate::error::{Error, Result};
use crate::key::{KeySet, WrappedKey};
use crate::utils::to_standard_base64;

/// Recovers wrapped license keys for one device.
#[derive(Debug, Clone)]
pub struct KeyRecovery {
    device_id: String,
}

impl KeyRecovery {
    /// Create a recovery pipeline bound to `device_id`.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    /// Device identifier mixed into the HMAC message.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Recover a raw license response and re-serialize it.
    ///
    /// A response whose first key is plain comes back unchanged, modulo
    /// re-serialization.
    pub fn recover(&self, response: &[u8]) -> Result<Vec<u8>> {
        let key_set = KeySet::from_slice(response)?;
        self.recover_key_set(key_set)?.to_vec()
    }

    /// Recover the first key of a parsed key set.
    pub fn recover_key_set(&self, mut key_set: KeySet) -> Result<KeySet> {
        let entry = key_set
            .keys
            .first_mut()
            .ok_or_else(|| Error::Protocol("License response contains no keys".to_string()))?;

        let Some(wrapped) = entry.wrapped_key()? else {
            debug!(kid = %entry.kid, "license key is already plain");
            return Ok(key_set);
        };

        let plain_key = self.unwrap_key(&entry.kid, &wrapped)?;
        let plain_key = String::from_utf8(plain_key)
            .map_err(|_| Error::Crypto("Recovered key is not valid text".to_string()))?;
        entry.k = to_standard_base64(&plain_key);
        debug!(kid = %entry.kid, "recovered wrapped license key");

        Ok(key_set)
    }

    /// Decrypt the content key bytes of a wrapped key.
    pub fn unwrap_key(&self, kid: &str, wrapped: &WrappedKey) -> Result<Vec<u8>> {
        let mut message = Vec::with_capacity(kid.len() + self.device_id.len());
        message.extend_from_slice(kid.as_bytes());
        message.extend_from_slice(self.device_id.as_bytes());

        let hash_key = hmac_sha256(common_secret(), &message)?;
        let public_key = aes_ecb_decrypt(&wrapped.encrypted_public_key, &hash_key)?;
        aes_cbc_decrypt(&wrapped.encrypted_key, &public_key, &wrapped.iv)
    }
}
