//! Text decoding helpers shared by key recovery and URI key derivation.
use crate::error::{Error, Result};

/// Strictly decode a hex string.
///
/// Input must have even length and contain only hex digits (either case).
pub fn decode_hex(text: &str) -> Result<Vec<u8>> {
    hex::decode(text).map_err(|e| match e {
        hex::FromHexError::OddLength => Error::MalformedInput(format!(
            "Odd number of hex characters ({})",
            text.len()
        )),
        hex::FromHexError::InvalidHexCharacter { c, index } => Error::MalformedInput(format!(
            "Illegal hexadecimal character {:?} at index {}",
            c, index
        )),
        other => Error::MalformedInput(format!("Invalid hex string: {}", other)),
    })
}

/// Decode a Base58 string using the Bitcoin alphabet.
pub fn decode_base58(text: &str) -> Result<Vec<u8>> {
    bs58::decode(text)
        .with_alphabet(bs58::Alphabet::BITCOIN)
        .into_vec()
        .map_err(|e| match e {
            bs58::decode::Error::InvalidCharacter { character, index } => {
                Error::MalformedInput(format!(
                    "Illegal Base58 character {:?} at index {}",
                    character, index
                ))
            }
            other => Error::MalformedInput(format!("Invalid Base58 string: {}", other)),
        })
}

/// Map the URL-safe base64 alphabet onto the standard one (`-` to `+`, `_` to `/`).
#[must_use]
pub fn to_standard_base64(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect()
}
