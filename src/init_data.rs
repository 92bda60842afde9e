//! Content DRM init data.
//!
//! A piece of content may carry init data for several schemes. Sessions pick
//! the entry matching their own scheme.
use byteorder::{BigEndian, ByteOrder};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::scheme::SchemeId;

/// Init data for one scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeData {
    /// System UUID of the scheme.
    pub uuid: Uuid,
    /// Container mime type (e.g. `video/mp4`).
    pub mime_type: String,
    /// Scheme specific init data passed to the platform engine.
    pub data: Vec<u8>,
}

impl SchemeData {
    pub fn new(uuid: Uuid, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            uuid,
            mime_type: mime_type.into(),
            data,
        }
    }

    /// The known scheme for this entry, if any.
    pub fn scheme(&self) -> Option<SchemeId> {
        SchemeId::from_uuid(&self.uuid)
    }
}

/// All init data entries found for a piece of content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrmInitData {
    entries: Vec<SchemeData>,
}

impl DrmInitData {
    pub fn new(entries: Vec<SchemeData>) -> Self {
        Self { entries }
    }

    /// Build init data from one or more concatenated `pssh` boxes.
    ///
    /// Each box becomes an entry keyed by its system id, holding the whole box.
    pub fn from_pssh_boxes(mime_type: &str, data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::Protocol("Init data must not be empty".to_string()));
        }

        let mut entries = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let (system_id, box_len) = parse_pssh_header(rest)?;
            entries.push(SchemeData::new(system_id, mime_type, rest[..box_len].to_vec()));
            rest = &rest[box_len..];
        }
        Ok(Self { entries })
    }

    /// First entry for `scheme`.
    pub fn get(&self, scheme: SchemeId) -> Option<&SchemeData> {
        let uuid = scheme.to_uuid();
        self.entries.iter().find(|entry| entry.uuid == uuid)
    }

    pub fn entries(&self) -> &[SchemeData] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Validate a `pssh` box header and return (system id, box length).
fn parse_pssh_header(data: &[u8]) -> Result<(Uuid, usize)> {
    if data.len() < 8 {
        return Err(Error::Protocol("PSSH box too short".to_string()));
    }

    let mut offset = 0;
    let size = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
    offset += 4;
    if &data[offset..offset + 4] != b"pssh" {
        return Err(Error::Protocol("Not a PSSH box".to_string()));
    }
    offset += 4;

    let box_len = match size {
        0 => data.len(),
        1 => {
            if data.len() < 16 {
                return Err(Error::Protocol("PSSH box too short".to_string()));
            }
            let large = BigEndian::read_u64(&data[offset..offset + 8]);
            let large = usize::try_from(large).map_err(|_| {
                Error::Protocol(format!("PSSH box size {} exceeds address space", large))
            })?;
            offset += 8;
            large
        }
        n => n,
    };

    if box_len > data.len() || box_len < offset + 4 + 16 + 4 {
        return Err(Error::Protocol(format!(
            "Invalid PSSH box size {} for {} bytes",
            box_len,
            data.len()
        )));
    }

    let version = data[offset];
    if version > 1 {
        return Err(Error::Protocol(format!("Unsupported PSSH version {}", version)));
    }
    offset += 4;

    let system_id = Uuid::from_slice(&data[offset..offset + 16])
        .map_err(|_| Error::Protocol("Invalid PSSH system id".to_string()))?;
    offset += 16;

    if version == 1 {
        let kid_count = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
        offset = offset.saturating_add(4).saturating_add(kid_count.saturating_mul(16));
    }

    if box_len < offset.saturating_add(4) {
        return Err(Error::Protocol("Missing PSSH data length".to_string()));
    }
    let data_size = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
    offset += 4;
    if offset + data_size != box_len {
        return Err(Error::Protocol("PSSH data length mismatch".to_string()));
    }

    Ok((system_id, box_len))
}
