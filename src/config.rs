//! License client configuration.
//!
//! Example YAML:
//!
//! ```yaml
//! device_id: 0b7e1f6a-...
//! endpoints:
//!   clearkey: https://license.example.com/clearkey?t=TOKEN
//!   widevine: https://license.example.com/widevine?t=TOKEN
//! key_request_headers:
//!   X-Custom: value
//! ```
use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::scheme::SchemeId;

/// Scheme specific license endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Endpoints {
    pub clearkey: Option<String>,
    pub widevine: Option<String>,
    pub playready: Option<String>,
}

impl Endpoints {
    /// Configured endpoint for `scheme`.
    pub fn get(&self, scheme: SchemeId) -> Option<&str> {
        match scheme {
            SchemeId::ClearKey => self.clearkey.as_deref(),
            SchemeId::Widevine => self.widevine.as_deref(),
            SchemeId::PlayReady => self.playready.as_deref(),
        }
    }

    fn is_empty(&self) -> bool {
        self.clearkey.is_none() && self.widevine.is_none() && self.playready.is_none()
    }
}

/// License client configuration loaded from YAML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LicenseConfig {
    /// Device identifier used for key recovery.
    pub device_id: String,
    /// Key request endpoints per scheme.
    pub endpoints: Endpoints,
    /// Headers added to every key request, overriding scheme defaults.
    #[serde(default)]
    pub key_request_headers: HashMap<String, String>,
    /// Optional parameters passed to the platform key request.
    #[serde(default)]
    pub key_request_parameters: Option<HashMap<String, String>>,
    /// User agent for the HTTP transport.
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl LicenseConfig {
    pub fn new(device_id: impl Into<String>, endpoints: Endpoints) -> Self {
        Self {
            device_id: device_id.into(),
            endpoints,
            key_request_headers: HashMap::new(),
            key_request_parameters: None,
            user_agent: None,
        }
    }

    /// Load and validate a YAML configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Parse and validate a YAML configuration.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: LicenseConfig =
            serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(Error::Config("device_id must not be empty".to_string()));
        }
        if self.endpoints.is_empty() {
            return Err(Error::Config(
                "at least one license endpoint must be configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml() {
        let config = LicenseConfig::from_yaml_str(
            r#"
device_id: dev1
endpoints:
  clearkey: https://license.example.com/clearkey
key_request_headers:
  X-Custom: yes-please
"#,
        )
        .unwrap();

        assert_eq!(config.device_id, "dev1");
        assert_eq!(
            config.endpoints.get(SchemeId::ClearKey),
            Some("https://license.example.com/clearkey")
        );
        assert_eq!(config.endpoints.get(SchemeId::Widevine), None);
        assert_eq!(
            config.key_request_headers.get("X-Custom").map(String::as_str),
            Some("yes-please")
        );
        assert!(config.key_request_parameters.is_none());
    }

    #[test]
    fn rejects_incomplete_config() {
        let missing_endpoints = "device_id: dev1\nendpoints: {}\n";
        assert!(matches!(
            LicenseConfig::from_yaml_str(missing_endpoints),
            Err(Error::Config(_))
        ));

        let empty_device = "device_id: ''\nendpoints:\n  widevine: https://x\n";
        assert!(matches!(
            LicenseConfig::from_yaml_str(empty_device),
            Err(Error::Config(_))
        ));

        assert!(matches!(
            LicenseConfig::from_yaml_str("endpoints: {}"),
            Err(Error::Config(_))
        ));
    }
}
