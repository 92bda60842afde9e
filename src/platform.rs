//! Platform DRM engine capability.
//!
//! The engine that actually holds keys and decrypts samples lives outside
//! this crate. Sessions drive it through [`MediaDrm`] and receive its
//! asynchronous events through an [`EventSink`].
use std::collections::HashMap;

use thiserror::Error;

/// Failures reported by the platform engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The device must be provisioned before this call can succeed.
    #[error("Device is not provisioned")]
    NotProvisioned,

    /// The provisioning server refused the device.
    #[error("Denied by server: {0}")]
    DeniedByServer(String),

    /// Any other engine failure.
    #[error("Platform DRM failure: {0}")]
    Other(String),
}

/// License type requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Streaming,
    Offline,
    Release,
}

/// Provisioning payload produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    /// Opaque signed request.
    pub data: Vec<u8>,
    /// Provisioning server URL.
    pub default_url: String,
}

/// Key request payload produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    /// Opaque license challenge.
    pub data: Vec<u8>,
    /// License server URL suggested by the content, may be empty.
    pub default_url: String,
}

/// Asynchronous engine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrmEvent {
    /// Keys are needed (again).
    KeyRequired,
    /// Loaded keys have expired.
    KeyExpired,
    /// The engine lost its provisioning.
    ProvisionRequired,
}

/// Receives engine events for one session.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: DrmEvent);
}

/// Platform DRM engine for one scheme.
///
/// All calls happen on the session owner; implementations need not be
/// thread safe beyond `Send`.
pub trait MediaDrm: Send + 'static {
    /// Opaque crypto context handed to decoders.
    type Crypto: Clone + Send + 'static;

    /// Register the sink for asynchronous events.
    fn set_event_sink(&mut self, _sink: Box<dyn EventSink>) {}

    fn open_session(&mut self) -> Result<Vec<u8>, PlatformError>;

    fn close_session(&mut self, session_id: &[u8]);

    fn create_crypto(&mut self, session_id: &[u8]) -> Result<Self::Crypto, PlatformError>;

    fn get_provision_request(&mut self) -> Result<ProvisionRequest, PlatformError>;

    fn provide_provision_response(&mut self, response: &[u8]) -> Result<(), PlatformError>;

    fn get_key_request(
        &mut self,
        session_id: &[u8],
        init_data: &[u8],
        mime_type: &str,
        key_type: KeyType,
        optional_parameters: Option<&HashMap<String, String>>,
    ) -> Result<KeyRequest, PlatformError>;

    fn provide_key_response(
        &mut self,
        session_id: &[u8],
        response: &[u8],
    ) -> Result<(), PlatformError>;

    /// Key status as reported by the engine.
    fn query_key_status(
        &self,
        _session_id: &[u8],
    ) -> Result<HashMap<String, String>, PlatformError> {
        Ok(HashMap::new())
    }

    /// Whether decoding `mime_type` needs a secure decoder with this context.
    fn requires_secure_decoder(&self, _crypto: &Self::Crypto, _mime_type: &str) -> bool {
        false
    }
}
