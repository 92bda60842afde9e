//! License request client.
//!
//! Routes provisioning and key requests to the right server, composes the
//! request headers and, for ClearKey, recovers wrapped keys in the response.
use std::collections::HashMap;

use tracing::debug;

use crate::config::{Endpoints, LicenseConfig};
use crate::error::{Error, Result};
use crate::platform::{KeyRequest, ProvisionRequest};
use crate::recovery::KeyRecovery;
use crate::scheme::SchemeId;
use crate::transport::{HeaderSet, Transport};

/// SOAP action required by PlayReady license servers.
pub const PLAYREADY_SOAP_ACTION: &str =
    "http://schemas.microsoft.com/DRM/2007/03/protocols/AcquireLicense";

/// Query parameter carrying the signed provisioning request.
const SIGNED_REQUEST_PARAM: &str = "signedRequest";

/// Executes provisioning and key requests for a session.
///
/// Calls block and are made from the session's request worker.
pub trait MediaDrmCallback: Send + Sync {
    fn execute_provision_request(
        &self,
        scheme: SchemeId,
        request: &ProvisionRequest,
    ) -> Result<Vec<u8>>;

    fn execute_key_request(&self, scheme: SchemeId, request: &KeyRequest) -> Result<Vec<u8>>;
}

/// License client talking to configured endpoints through a [`Transport`].
#[derive(Debug)]
pub struct LicenseClient<T> {
    transport: T,
    endpoints: Endpoints,
    key_request_headers: HashMap<String, String>,
    recovery: KeyRecovery,
}

impl<T: Transport> LicenseClient<T> {
    pub fn new(transport: T, config: &LicenseConfig) -> Self {
        Self {
            transport,
            endpoints: config.endpoints.clone(),
            key_request_headers: config.key_request_headers.clone(),
            recovery: KeyRecovery::new(config.device_id.clone()),
        }
    }

    /// Headers for a key request: base, then scheme defaults, then caller overrides.
    pub fn key_request_headers(&self, scheme: SchemeId) -> HeaderSet {
        let base = HeaderSet::new().with("Content-Type", "application/octet-stream");
        let scheme_headers = match scheme {
            SchemeId::PlayReady => base
                .with("Content-Type", "text/xml")
                .with("SOAPAction", PLAYREADY_SOAP_ACTION),
            SchemeId::Widevine | SchemeId::ClearKey => base,
        };
        scheme_headers.overlay(&self.key_request_headers)
    }

    /// Provisioning URL: the request's default URL plus the signed request.
    pub fn provision_url(request: &ProvisionRequest) -> Result<String> {
        let signed = std::str::from_utf8(&request.data).map_err(|_| {
            Error::Protocol("Provisioning request payload is not text".to_string())
        })?;
        let separator = if request.default_url.contains('?') {
            '&'
        } else {
            '?'
        };
        Ok(format!(
            "{}{}{}={}",
            request.default_url, separator, SIGNED_REQUEST_PARAM, signed
        ))
    }

    fn endpoint(&self, scheme: SchemeId) -> Result<&str> {
        self.endpoints.get(scheme).ok_or_else(|| {
            Error::UnsupportedScheme(format!("No license endpoint configured for {}", scheme))
        })
    }
}

impl<T: Transport> MediaDrmCallback for LicenseClient<T> {
    fn execute_provision_request(
        &self,
        scheme: SchemeId,
        request: &ProvisionRequest,
    ) -> Result<Vec<u8>> {
        let url = Self::provision_url(request)?;
        debug!(%scheme, "executing provisioning request");
        self.transport.post(&url, &[], &HeaderSet::new())
    }

    fn execute_key_request(&self, scheme: SchemeId, request: &KeyRequest) -> Result<Vec<u8>> {
        let url = self.endpoint(scheme)?;
        let headers = self.key_request_headers(scheme);
        debug!(%scheme, bytes = request.data.len(), "executing key request");

        let response = self.transport.post(url, &request.data, &headers)?;
        match scheme {
            SchemeId::ClearKey => self.recovery.recover(&response),
            SchemeId::Widevine | SchemeId::PlayReady => Ok(response),
        }
    }
}
