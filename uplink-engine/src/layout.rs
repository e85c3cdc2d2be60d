//! Partition key layout and stored records

use serde::{Deserialize, Serialize};
use uplink_core::{PartNumber, StoreError, StoreResult};

/// An open upload session, keyed by upload id in `uploads`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub key: String,
    pub content_type: String,
}

/// An uploaded part, keyed by [`part_key`] in `parts`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartEntry {
    pub size: u64,
    pub etag: String,
}

/// A finished object, keyed by object key in `objects`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectManifest {
    pub size: u64,
    pub content_type: String,
    /// Part blob hashes in assembly order
    pub parts: Vec<String>,
}

/// Width of the zero-padded part number, enough for the 10000 part cap
const PART_NUMBER_WIDTH: usize = 5;

pub fn part_key(upload_id: &str, part_number: PartNumber) -> Vec<u8> {
    format!("{}:{:0width$}", upload_id, part_number, width = PART_NUMBER_WIDTH).into_bytes()
}

pub fn part_prefix(upload_id: &str) -> Vec<u8> {
    format!("{}:", upload_id).into_bytes()
}

/// Part number encoded in a `parts` key
pub fn parse_part_key(key: &[u8]) -> Option<PartNumber> {
    let key = std::str::from_utf8(key).ok()?;
    let (_, number) = key.rsplit_once(':')?;
    number.parse().ok()
}

pub fn blob_key(etag: &str) -> Vec<u8> {
    format!("blob:{}", etag).into_bytes()
}

pub fn blob_ref_key(etag: &str) -> Vec<u8> {
    format!("blobref:{}", etag).into_bytes()
}

pub fn encode_ref_count(count: u32) -> [u8; 4] {
    count.to_le_bytes()
}

pub fn decode_ref_count(bytes: &[u8]) -> StoreResult<u32> {
    bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| StoreError::Unavailable("corrupt blob reference count".to_string()))
}

pub fn encode<T: Serialize>(record: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| StoreError::Unavailable(format!("encode record: {}", e)))
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| StoreError::Unavailable(format!("corrupt record: {}", e)))
}
