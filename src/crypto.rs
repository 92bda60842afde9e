//! Symmetric primitives used by key recovery.
//!
//! - HMAC-SHA256 keyed with the derived secret or the static stream key.
//! - AES-ECB without padding, which unwraps the per-title public key.
//! - AES-CBC with PKCS#7 padding, which unwraps the content key.
//!
//! AES functions accept 16, 24 or 32 byte keys.
use std::sync::LazyLock;

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, KeyInit, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::rc4::Rc4;

type HmacSha256 = Hmac<Sha256>;

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// RC4-wrapped form of the common secret.
const COMMON_SECRET_BLOB: [u8; 32] = [
    0xd4, 0xb7, 0x18, 0xbb, 0xba, 0x9c, 0xfb, 0x7d, 0x01, 0x92, 0xa5, 0x8f, 0x9e, 0x2d, 0x14, 0x6a,
    0xfc, 0x5d, 0xb2, 0x9e, 0x43, 0x52, 0xde, 0x05, 0xfc, 0x4c, 0xf2, 0xc1, 0x00, 0x58, 0x04, 0xbb,
];

/// RC4 key unwrapping [`COMMON_SECRET_BLOB`].
const COMMON_SECRET_RC4_KEY: [u8; 16] = [
    0xdb, 0x98, 0xa8, 0xe7, 0xce, 0xca, 0x34, 0x24, 0xd9, 0x75, 0x28, 0x0f, 0x90, 0xbd, 0x03, 0xee,
];

/// HMAC key for legacy (v1) transport stream key URIs.
pub const TS_COMMON_KEY: &[u8; 32] = b"DiCUaHk2VTS7MLEA&n9YHR>'D^gT1zbs";

static COMMON_SECRET: LazyLock<[u8; 32]> = LazyLock::new(|| {
    let mut secret = [0u8; 32];
    Rc4::new(&COMMON_SECRET_RC4_KEY)
        .and_then(|mut rc4| rc4.update(&COMMON_SECRET_BLOB, &mut secret))
        .expect("RC4 over fixed-size constants");
    secret
});

/// The process-wide derived secret used as HMAC key for key recovery.
///
/// Computed on first use and never mutated afterwards.
pub fn common_secret() -> &'static [u8; 32] {
    &COMMON_SECRET
}

/// HMAC-SHA256 of `message` under `key`.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| Error::Crypto(format!("Invalid HMAC key: {}", e)))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// Decrypt `data` with AES in ECB mode, no padding.
///
/// `data` must be a whole number of blocks.
pub fn aes_ecb_decrypt(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % AES_BLOCK_SIZE != 0 {
        return Err(Error::Crypto(format!(
            "AES-ECB input length {} is not a multiple of {}",
            data.len(),
            AES_BLOCK_SIZE
        )));
    }

    let decrypted = match key.len() {
        16 => ecb::Decryptor::<Aes128>::new_from_slice(key)
            .map_err(invalid_key)?
            .decrypt_padded_vec_mut::<NoPadding>(data),
        24 => ecb::Decryptor::<Aes192>::new_from_slice(key)
            .map_err(invalid_key)?
            .decrypt_padded_vec_mut::<NoPadding>(data),
        32 => ecb::Decryptor::<Aes256>::new_from_slice(key)
            .map_err(invalid_key)?
            .decrypt_padded_vec_mut::<NoPadding>(data),
        n => return Err(invalid_key_length(n)),
    };

    decrypted.map_err(|e| Error::Crypto(format!("AES-ECB decryption failed: {}", e)))
}

/// Decrypt `data` with AES in CBC mode and strip PKCS#7 padding.
pub fn aes_cbc_decrypt(data: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    if iv.len() != AES_BLOCK_SIZE {
        return Err(Error::Crypto(format!(
            "Invalid IV length: expected {}, got {}",
            AES_BLOCK_SIZE,
            iv.len()
        )));
    }

    let decrypted = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(invalid_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(data),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(invalid_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(data),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(invalid_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(data),
        n => return Err(invalid_key_length(n)),
    };

    decrypted.map_err(|e| Error::Crypto(format!("AES-CBC decryption failed: {}", e)))
}

fn invalid_key(e: aes::cipher::InvalidLength) -> Error {
    Error::Crypto(format!("Invalid AES key: {}", e))
}

fn invalid_key_length(len: usize) -> Error {
    Error::Crypto(format!(
        "Invalid AES key length: expected 16, 24 or 32, got {}",
        len
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_secret_unwraps_blob() {
        assert_eq!(
            hex::encode(common_secret()),
            "3af0298c219469522a313570e8583005a642e73edd58e3ea2fb7339d3df1597e"
        );
        // Cached value is stable.
        assert!(std::ptr::eq(common_secret(), common_secret()));
    }

    #[test]
    fn hmac_rfc4231_case_2() {
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn ecb_fips197_vector() {
        let key = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let ciphertext = hex::decode("69c4e0d86a7b0430d8cdb78070b4c55a").unwrap();
        let plaintext = aes_ecb_decrypt(&ciphertext, &key).unwrap();
        assert_eq!(hex::encode(plaintext), "00112233445566778899aabbccddeeff");
    }

    #[test]
    fn ecb_rejects_partial_blocks_and_bad_keys() {
        let key = [0u8; 16];
        assert!(matches!(aes_ecb_decrypt(&[0u8; 15], &key), Err(Error::Crypto(_))));
        assert!(matches!(aes_ecb_decrypt(&[], &key), Err(Error::Crypto(_))));
        assert!(matches!(aes_ecb_decrypt(&[0u8; 16], &[0u8; 20]), Err(Error::Crypto(_))));
        assert!(aes_ecb_decrypt(&[0u8; 32], &[0u8; 24]).is_ok());
        assert!(aes_ecb_decrypt(&[0u8; 32], &[0u8; 32]).is_ok());
    }

    #[test]
    fn cbc_strips_padding() {
        let ciphertext = hex::decode("9834ed518cbc8fbe9af3c6ecb75eb8c0").unwrap();
        let plaintext = aes_cbc_decrypt(&ciphertext, &[0u8; 16], &[0u8; 16]).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn cbc_reports_bad_padding_and_iv() {
        // Wrong key gives garbage padding.
        let ciphertext = hex::decode("9834ed518cbc8fbe9af3c6ecb75eb8c0").unwrap();
        let result = aes_cbc_decrypt(&ciphertext, &[1u8; 16], &[0u8; 16]);
        assert!(matches!(result, Err(Error::Crypto(_))));

        assert!(matches!(
            aes_cbc_decrypt(&ciphertext, &[0u8; 16], &[0u8; 8]),
            Err(Error::Crypto(_))
        ));
        assert!(matches!(
            aes_cbc_decrypt(&ciphertext, &[0u8; 17], &[0u8; 16]),
            Err(Error::Crypto(_))
        ));
    }
}
