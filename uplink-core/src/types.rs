//! Core data types for uplink

use serde::{Deserialize, Serialize};

/// Part numbers are 1-based positive integers
pub type PartNumber = u32;

/// Maximum length of a destination key in bytes
pub const MAX_KEY_LEN: usize = 1024;

/// Destination object identifier within the store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Create a new key with validation
    pub fn new(key: &str) -> crate::Result<Self> {
        if key.is_empty() {
            return Err(crate::UploadError::InvalidDestination("empty key".to_string()));
        }

        if key.len() > MAX_KEY_LEN {
            return Err(crate::UploadError::InvalidDestination(format!(
                "key is {} bytes, limit is {}",
                key.len(),
                MAX_KEY_LEN
            )));
        }

        if key.chars().any(|c| c.is_control()) {
            return Err(crate::UploadError::InvalidDestination(
                "control characters not allowed".to_string(),
            ));
        }

        Ok(ObjectKey(key.to_string()))
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = crate::UploadError;

    fn try_from(value: String) -> crate::Result<Self> {
        ObjectKey::new(&value)
    }
}

impl From<ObjectKey> for String {
    fn from(key: ObjectKey) -> Self {
        key.0
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque session identifier assigned by the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(String);

impl UploadId {
    /// Wrap a store-assigned id, rejecting empty values
    pub fn new(id: &str) -> crate::Result<Self> {
        if id.trim().is_empty() {
            return Err(crate::UploadError::MissingInput("uploadId".to_string()));
        }
        Ok(UploadId(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content hash used as the part ETag by content-addressed stores
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create hash from data using BLAKE3
    pub fn new(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        ContentHash(hash.into())
    }

    /// Get hash as bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Get hash as hex string
    pub fn to_hex(&self) -> String {
        crate::hex::encode(self.0)
    }
}

/// A part as reported by the store's authoritative listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    #[serde(rename = "PartNumber")]
    pub part_number: PartNumber,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// A listing entry before validation; any field may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPartRecord {
    #[serde(rename = "PartNumber")]
    pub part_number: Option<PartNumber>,
    #[serde(rename = "Size")]
    pub size: Option<u64>,
    #[serde(rename = "ETag")]
    pub etag: Option<String>,
}

impl RawPartRecord {
    /// Validate that every required field is present
    pub fn into_record(self) -> crate::Result<PartRecord> {
        match (self.part_number, self.size, self.etag.as_deref()) {
            (Some(part_number), Some(size), Some(etag)) if part_number > 0 && !etag.is_empty() => {
                Ok(PartRecord {
                    part_number,
                    size,
                    etag: etag.to_string(),
                })
            }
            _ => Err(crate::UploadError::InvalidPartRecord(
                serde_json::to_string(&self).unwrap_or_else(|_| format!("{:?}", self)),
            )),
        }
    }
}

impl From<PartRecord> for RawPartRecord {
    fn from(record: PartRecord) -> Self {
        RawPartRecord {
            part_number: Some(record.part_number),
            size: Some(record.size),
            etag: Some(record.etag),
        }
    }
}

/// A part the caller declares as uploaded when completing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: PartNumber,
    #[serde(rename = "ETag")]
    pub etag: String,
}

impl CompletedPart {
    pub fn new(part_number: PartNumber, etag: impl Into<String>) -> Self {
        CompletedPart {
            part_number,
            etag: etag.into(),
        }
    }
}

/// The uploader's description of a file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        FileDescriptor {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}
