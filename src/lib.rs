//! rsmediadrm - DRM license session management with key recovery.
//!
//! This crate provides:
//! - A reference counted DRM session state machine driven on its own thread.
//! - A license request client with per scheme routing and header layering.
//! - Recovery of wrapped ClearKey license keys and key URI derivation.
//! - RC4, AES and HMAC helpers used by the recovery pipeline.
//!
//! The platform decryption engine is abstracted behind
//! [`platform::MediaDrm`]; license servers are reached through
//! [`transport::Transport`].
//!
//! Feature flags:
//! - `http`: blocking HTTP transport (default).
//! - `cli`: enable the CLI binary.
#![allow(clippy::result_large_err)]

/// License request client.
pub mod callback;
/// YAML license configuration.
pub mod config;
/// Cryptographic primitives and the derived common secret.
pub mod crypto;
/// Threaded session owner.
pub mod driver;
/// Common error types and Result alias.
pub mod error;
/// Content init data.
pub mod init_data;
/// License key set representation.
pub mod key;
/// Key URI derivation.
pub mod key_uri;
/// Per scheme session manager.
pub mod manager;
/// Platform DRM engine capability.
pub mod platform;
/// RC4 stream cipher.
pub mod rc4;
/// License key recovery pipeline.
pub mod recovery;
/// DRM scheme identities.
pub mod scheme;
/// DRM session state machine.
pub mod session;
/// License server transport.
pub mod transport;
/// Shared helper utilities.
pub mod utils;

pub use error::{DrmSessionError, Error, Result};
