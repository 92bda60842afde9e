//! RC4 stream cipher.
//!
//! This is the classic algorithm, key schedule included. It is only used to
//! unwrap an embedded constant and is not meant to protect anything.

use crate::error::{Error, Result};

/// RC4 keystream state.
///
/// The state advances with every processed byte, so feeding the same input
/// through one instance twice does not give the same output.
#[derive(Clone)]
pub struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    /// Maximum key length in bytes.
    pub const MAX_KEY_LEN: usize = 256;

    /// Run the key schedule for `key` (1 to 256 bytes).
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() || key.len() > Self::MAX_KEY_LEN {
            return Err(Error::Crypto(format!(
                "Invalid RC4 key length: {}",
                key.len()
            )));
        }

        let mut s = [0u8; 256];
        for (i, v) in s.iter_mut().enumerate() {
            *v = i as u8;
        }

        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }

        Ok(Self { s, i: 0, j: 0 })
    }

    /// XOR `src` with the keystream into `dst`.
    ///
    /// Both slices must have the same length.
    pub fn update(&mut self, src: &[u8], dst: &mut [u8]) -> Result<()> {
        if src.len() != dst.len() {
            return Err(Error::Crypto(format!(
                "RC4 output length {} does not match input length {}",
                dst.len(),
                src.len()
            )));
        }

        for (out, byte) in dst.iter_mut().zip(src) {
            *out = byte ^ self.next_byte();
        }
        Ok(())
    }

    /// Transform `data` and return the result as a new buffer.
    pub fn process(&mut self, data: &[u8]) -> Vec<u8> {
        data.iter().map(|b| b ^ self.next_byte()).collect()
    }

    fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.s[self.i as usize]);
        self.s.swap(self.i as usize, self.j as usize);
        let idx = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
        self.s[idx as usize]
    }
}

impl std::fmt::Debug for Rc4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rc4").finish_non_exhaustive()
    }
}
