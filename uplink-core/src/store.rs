//! Object store boundary consumed by the orchestrator

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{CompletedPart, ObjectKey, PartNumber, RawPartRecord, StoreResult, UploadId};

/// Identity of a freshly created store session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedUpload {
    pub key: String,
    pub upload_id: String,
}

/// One page of a part listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartsPage {
    pub parts: Vec<RawPartRecord>,
    /// Marker for the next page; None once the listing is exhausted
    pub next_marker: Option<PartNumber>,
}

/// Multipart capabilities of an S3-compatible store.
///
/// The store is the single source of truth for sessions and parts and
/// provides its own concurrency control.
#[async_trait]
pub trait MultipartStore: Send + Sync {
    /// Allocate a new upload session for `key`
    async fn create(&self, key: &ObjectKey, content_type: &str) -> StoreResult<CreatedUpload>;

    /// List parts after `marker` (exclusive), one page at a time
    async fn list_parts(
        &self,
        upload_id: &UploadId,
        key: &ObjectKey,
        marker: Option<PartNumber>,
    ) -> StoreResult<PartsPage>;

    /// Finalize the object from the declared parts, returning its location if known
    async fn complete(
        &self,
        upload_id: &UploadId,
        key: &ObjectKey,
        parts: &[CompletedPart],
    ) -> StoreResult<Option<String>>;

    /// Discard the session and release any uploaded part bytes
    async fn abort(&self, upload_id: &UploadId, key: &ObjectKey) -> StoreResult<()>;
}
