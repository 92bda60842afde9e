//! Error types for rsmediadrm.

use thiserror::Error;

use crate::platform::PlatformError;

/// Main error type for rsmediadrm operations.
///
/// Values are cheap to clone so that one failure can be stored as a
/// session's last error and handed to listeners at the same time.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No session or endpoint exists for the requested DRM scheme.
    #[error("Unsupported DRM scheme: {0}")]
    UnsupportedScheme(String),

    /// Network or I/O failure while talking to a license server.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The license server returned a payload that could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Decryption, HMAC or key-length failure.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Bad hex or Base58 encoding.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// The operation is not valid for the current session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The platform decryption engine reported a failure.
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// Loaded keys have expired.
    #[error("Keys expired")]
    KeysExpired,

    /// Fatal failure captured into session state.
    #[error(transparent)]
    DrmSession(#[from] DrmSessionError),

    /// Invalid or unreadable configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if the underlying cause is a "not provisioned" platform failure.
    pub fn is_not_provisioned(&self) -> bool {
        matches!(self, Error::Platform(PlatformError::NotProvisioned))
    }
}

/// A session-fatal failure, wrapping the error that caused it.
#[derive(Debug, Clone, Error)]
#[error("DRM session failed: {cause}")]
pub struct DrmSessionError {
    #[source]
    cause: Box<Error>,
}

impl DrmSessionError {
    /// Wrap a causing error.
    pub fn new(cause: Error) -> Self {
        Self {
            cause: Box::new(cause),
        }
    }

    /// The error that made the session fail.
    pub fn cause(&self) -> &Error {
        &self.cause
    }
}

/// Result type alias for rsmediadrm operations.
pub type Result<T> = std::result::Result<T, Error>;
