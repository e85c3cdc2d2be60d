//! Part sizing
//!
//! Decides how a file of a given size is divided into numbered parts so the
//! part count never exceeds the configured cap.

use serde::{Deserialize, Serialize};
use std::ops::{Range, RangeInclusive};

use crate::{PartNumber, Result, UploadConfig, UploadError};

/// Chunk size for a file of `file_size` bytes.
///
/// Uses `default_chunk_size` while the file fits in `max_part_count` parts of
/// that size, otherwise grows parts to `ceil(file_size / max_part_count)`.
/// An empty file yields the default size (one empty part). Degenerate limits
/// of zero yield a single part covering the whole file.
pub fn chunk_size(file_size: u64, default_chunk_size: u64, max_part_count: u64) -> u64 {
    if default_chunk_size == 0 || max_part_count == 0 {
        return file_size.max(1);
    }
    if file_size == 0 {
        return default_chunk_size;
    }
    if file_size.div_ceil(default_chunk_size) <= max_part_count {
        default_chunk_size
    } else {
        file_size.div_ceil(max_part_count)
    }
}

/// How one file is split into parts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartPlan {
    pub file_size: u64,
    pub chunk_size: u64,
    pub part_count: u32,
}

impl PartPlan {
    /// All part numbers of this plan, starting at 1
    pub fn part_numbers(&self) -> RangeInclusive<PartNumber> {
        1..=self.part_count
    }

    /// Byte range covered by `part_number`, or None if outside the plan
    pub fn part_range(&self, part_number: PartNumber) -> Option<Range<u64>> {
        if part_number == 0 || part_number > self.part_count {
            return None;
        }
        let start = (part_number as u64 - 1) * self.chunk_size;
        let end = (start + self.chunk_size).min(self.file_size);
        Some(start..end.max(start))
    }
}

/// Part sizing clamped to the store's part size limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartSizer {
    default_chunk_size: u64,
    max_part_count: u64,
    min_part_size: u64,
    max_part_size: u64,
}

impl PartSizer {
    pub fn new(
        default_chunk_size: u64,
        max_part_count: u64,
        min_part_size: u64,
        max_part_size: u64,
    ) -> Result<Self> {
        if default_chunk_size == 0 || max_part_count == 0 {
            return Err(UploadError::InvalidConfig(
                "chunk size and part count must be positive".to_string(),
            ));
        }
        if min_part_size > max_part_size {
            return Err(UploadError::InvalidConfig(format!(
                "minimum part size {} exceeds maximum part size {}",
                min_part_size, max_part_size
            )));
        }
        Ok(PartSizer {
            default_chunk_size,
            max_part_count,
            min_part_size,
            max_part_size,
        })
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        Self::new(
            config.default_chunk_size_bytes,
            config.max_part_count,
            config.min_part_size_bytes,
            config.max_part_size_bytes,
        )
    }

    /// Chunk size for `file_size`, clamped up to the store minimum
    pub fn chunk_size(&self, file_size: u64) -> Result<u64> {
        let size = chunk_size(file_size, self.default_chunk_size, self.max_part_count)
            .max(self.min_part_size);

        if size > self.max_part_size {
            return Err(UploadError::InvalidConfig(format!(
                "a {} byte file needs {} byte parts, above the {} byte part limit",
                file_size, size, self.max_part_size
            )));
        }

        let count = file_size.div_ceil(size).max(1);
        if count > self.max_part_count {
            return Err(UploadError::InvalidConfig(format!(
                "a {} byte file needs {} parts, above the cap of {}",
                file_size, count, self.max_part_count
            )));
        }

        Ok(size)
    }

    /// Full plan for `file_size`
    pub fn plan(&self, file_size: u64) -> Result<PartPlan> {
        let chunk_size = self.chunk_size(file_size)?;
        let part_count = file_size.div_ceil(chunk_size).max(1);
        let part_count = u32::try_from(part_count).map_err(|_| {
            UploadError::InvalidConfig(format!("{} parts do not fit a part number", part_count))
        })?;
        Ok(PartPlan {
            file_size,
            chunk_size,
            part_count,
        })
    }
}
