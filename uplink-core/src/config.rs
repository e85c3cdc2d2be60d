//! Part-size, concurrency and expiry policy

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Result, UploadError};

/// Upload policy shared by the orchestrator and client drivers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadConfig {
    /// Part size for files under the count cap
    pub default_chunk_size_bytes: u64,
    /// Part-count cap; larger files get bigger parts
    pub max_part_count: u64,
    /// Upper bound on parts a driver prepares and uploads at once
    pub max_concurrent_parts: usize,
    /// Validity window passed to the URL issuer
    pub presigned_url_expiry_seconds: u64,
    pub min_part_size_bytes: u64,
    pub max_part_size_bytes: u64,
    pub max_part_number: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            default_chunk_size_bytes: crate::DEFAULT_CHUNK_SIZE_BYTES,
            max_part_count: crate::DEFAULT_MAX_PART_COUNT,
            max_concurrent_parts: crate::DEFAULT_MAX_CONCURRENT_PARTS,
            presigned_url_expiry_seconds: crate::DEFAULT_PRESIGNED_URL_EXPIRY_SECS,
            min_part_size_bytes: crate::STORE_MIN_PART_SIZE_BYTES,
            max_part_size_bytes: crate::STORE_MAX_PART_SIZE_BYTES,
            max_part_number: crate::STORE_MAX_PART_NUMBER,
        }
    }
}

impl UploadConfig {
    /// Load from a JSON file; absent fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| {
            UploadError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: UploadConfig = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.presigned_url_expiry_seconds)
    }

    /// Check the policy against itself and the store's hard limits
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(UploadError::InvalidConfig(msg));

        if self.default_chunk_size_bytes == 0 {
            return invalid("defaultChunkSizeBytes must be positive".into());
        }
        if self.max_part_count == 0 {
            return invalid("maxPartCount must be positive".into());
        }
        if self.max_concurrent_parts == 0 {
            return invalid("maxConcurrentParts must be positive".into());
        }
        if self.presigned_url_expiry_seconds == 0
            || self.presigned_url_expiry_seconds > crate::MAX_PRESIGNED_URL_EXPIRY_SECS
        {
            return invalid(format!(
                "presignedUrlExpirySeconds must be within 1..={}",
                crate::MAX_PRESIGNED_URL_EXPIRY_SECS
            ));
        }
        if self.max_part_number == 0 {
            return invalid("maxPartNumber must be positive".into());
        }
        if self.max_part_count > self.max_part_number as u64 {
            return invalid(format!(
                "maxPartCount {} exceeds the store part-number cap {}",
                self.max_part_count, self.max_part_number
            ));
        }
        if self.default_chunk_size_bytes < self.min_part_size_bytes {
            return invalid(format!(
                "defaultChunkSizeBytes {} is below the store minimum {}",
                self.default_chunk_size_bytes, self.min_part_size_bytes
            ));
        }
        if self.default_chunk_size_bytes > self.max_part_size_bytes {
            return invalid(format!(
                "defaultChunkSizeBytes {} is above the store maximum {}",
                self.default_chunk_size_bytes, self.max_part_size_bytes
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = UploadConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_chunk_size_bytes, 20 * 1024 * 1024);
        assert_eq!(config.max_part_count, 9000);
        assert_eq!(config.max_concurrent_parts, 5);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: UploadConfig =
            serde_json::from_str(r#"{"maxPartCount": 100, "presignedUrlExpirySeconds": 60}"#)
                .unwrap();
        assert_eq!(config.max_part_count, 100);
        assert_eq!(config.presigned_url_expiry(), Duration::from_secs(60));
        assert_eq!(config.default_chunk_size_bytes, crate::DEFAULT_CHUNK_SIZE_BYTES);
    }

    #[test]
    fn rejects_inconsistent_policy() {
        let cases = [
            UploadConfig { max_concurrent_parts: 0, ..Default::default() },
            UploadConfig { presigned_url_expiry_seconds: 0, ..Default::default() },
            UploadConfig { presigned_url_expiry_seconds: 700_000, ..Default::default() },
            UploadConfig { max_part_count: 20_000, ..Default::default() },
            UploadConfig { default_chunk_size_bytes: 1024, ..Default::default() },
        ];
        for config in cases {
            let err = config.validate().unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::InvalidConfig, "{:?}", config);
        }
    }
}
