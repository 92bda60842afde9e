//! DRM scheme identities.
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{Error, Result};

/// Widevine system UUID.
pub const WIDEVINE_UUID: Uuid = Uuid::from_u128(0xedef8ba979d64acea3c827dcd51d21ed);
/// ClearKey system UUID.
pub const CLEARKEY_UUID: Uuid = Uuid::from_u128(0xe2719d58a985b3c9781ab030af78d30e);
/// PlayReady system UUID.
pub const PLAYREADY_UUID: Uuid = Uuid::from_u128(0x9a04f07998404286ab92e65be0885f95);

/// Known DRM schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemeId {
    Widevine,
    ClearKey,
    PlayReady,
}

impl SchemeId {
    /// All schemes this crate knows about.
    pub const ALL: [SchemeId; 3] = [SchemeId::Widevine, SchemeId::ClearKey, SchemeId::PlayReady];

    pub fn to_uuid(self) -> Uuid {
        match self {
            SchemeId::Widevine => WIDEVINE_UUID,
            SchemeId::ClearKey => CLEARKEY_UUID,
            SchemeId::PlayReady => PLAYREADY_UUID,
        }
    }

    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|scheme| scheme.to_uuid() == *uuid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchemeId::Widevine => "widevine",
            SchemeId::ClearKey => "clearkey",
            SchemeId::PlayReady => "playready",
        }
    }
}

impl fmt::Display for SchemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemeId {
    type Err = Error;

    /// Accepts a scheme name (case-insensitive) or its system UUID.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        if let Some(scheme) = Self::ALL.into_iter().find(|scheme| scheme.as_str() == normalized) {
            return Ok(scheme);
        }
        Uuid::parse_str(&normalized)
            .ok()
            .and_then(|uuid| Self::from_uuid(&uuid))
            .ok_or_else(|| Error::UnsupportedScheme(s.to_string()))
    }
}
