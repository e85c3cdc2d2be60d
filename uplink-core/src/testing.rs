//! In-memory store and signer doubles with fault injection

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::{
    CompletedPart, ContentHash, CreatedUpload, Ed25519UrlSigner, KeyPair, MultipartStore,
    ObjectKey, PartNumber, PartRecord, PartTarget, PartUrlSigner, PartsPage, RawPartRecord,
    Result, StoreError, StoreResult, UploadError, UploadId,
};

#[derive(Debug, Default)]
struct OpenUpload {
    key: String,
    content_type: String,
    parts: BTreeMap<PartNumber, Vec<u8>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    uploads: HashMap<String, OpenUpload>,
    objects: HashMap<String, (String, Vec<u8>)>,
    unavailable: bool,
    corrupt_listing: bool,
    stuck_marker: bool,
    replay_listing: bool,
}

/// A multipart store held entirely in memory.
///
/// Follows the same acceptance rules as a real S3-compatible store
/// (ascending parts, matching ETags, minimum size for non-final parts) and
/// lets tests inject outages and malformed listings.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    page_size: usize,
    min_part_size: u64,
    aborts: Arc<AtomicUsize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            state: Arc::new(Mutex::new(MemoryState::default())),
            page_size: 1000,
            min_part_size: 0,
            aborts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Limit how many records one listing page carries
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Enforce a minimum size on every part but the last
    pub fn with_min_part_size(mut self, min_part_size: u64) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    /// Make every call fail with `Unavailable` until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Drop the ETag from the first record of every listing page
    pub fn corrupt_listing(&self, corrupt: bool) {
        self.lock().corrupt_listing = corrupt;
    }

    /// Serve the page after the marker but hand the same marker back
    pub fn stick_marker(&self, stuck: bool) {
        self.lock().stuck_marker = stuck;
    }

    /// Ignore the marker and serve the first page on every call
    pub fn replay_listing(&self, replay: bool) {
        self.lock().replay_listing = replay;
    }

    /// Store a part body directly, returning its ETag
    pub fn put_part(
        &self,
        upload_id: &str,
        part_number: PartNumber,
        body: &[u8],
    ) -> StoreResult<String> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::NoSuchUpload { upload_id: upload_id.to_string() })?;
        upload.parts.insert(part_number, body.to_vec());
        Ok(ContentHash::new(body).to_hex())
    }

    pub fn is_open(&self, upload_id: &str) -> bool {
        self.lock().uploads.contains_key(upload_id)
    }

    pub fn open_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    /// Content type the session was created with
    pub fn content_type(&self, upload_id: &str) -> Option<String> {
        self.lock().uploads.get(upload_id).map(|u| u.content_type.clone())
    }

    /// Assembled bytes of a completed object
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).map(|(_, body)| body.clone())
    }

    /// Number of abort calls that reached the store
    pub fn abort_calls(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(state: &MemoryState) -> StoreResult<()> {
        if state.unavailable {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }
}

fn open_upload<'a>(
    state: &'a MemoryState,
    upload_id: &UploadId,
    key: &ObjectKey,
) -> StoreResult<&'a OpenUpload> {
    match state.uploads.get(upload_id.as_str()) {
        Some(upload) if upload.key == key.as_str() => Ok(upload),
        _ => Err(StoreError::NoSuchUpload {
            upload_id: upload_id.to_string(),
        }),
    }
}

#[async_trait]
impl MultipartStore for MemoryStore {
    async fn create(&self, key: &ObjectKey, content_type: &str) -> StoreResult<CreatedUpload> {
        let mut state = self.lock();
        Self::check_available(&state)?;

        let upload_id = ulid::Ulid::new().to_string();
        state.uploads.insert(
            upload_id.clone(),
            OpenUpload {
                key: key.to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(CreatedUpload {
            key: key.to_string(),
            upload_id,
        })
    }

    async fn list_parts(
        &self,
        upload_id: &UploadId,
        key: &ObjectKey,
        marker: Option<PartNumber>,
    ) -> StoreResult<PartsPage> {
        let state = self.lock();
        Self::check_available(&state)?;
        let upload = open_upload(&state, upload_id, key)?;

        let after = if state.replay_listing { None } else { marker };
        let mut remaining = upload
            .parts
            .range(after.map_or(1, |m| m.saturating_add(1))..)
            .map(|(&part_number, body)| {
                RawPartRecord::from(PartRecord {
                    part_number,
                    size: body.len() as u64,
                    etag: ContentHash::new(body).to_hex(),
                })
            });

        let mut parts: Vec<RawPartRecord> = remaining.by_ref().take(self.page_size).collect();
        let has_more = remaining.next().is_some();

        if state.corrupt_listing {
            if let Some(first) = parts.first_mut() {
                first.etag = None;
            }
        }

        let next_marker = match (has_more, marker) {
            (false, _) => None,
            (true, Some(marker)) if state.stuck_marker => Some(marker),
            (true, _) => parts.last().and_then(|p| p.part_number),
        };
        Ok(PartsPage { parts, next_marker })
    }

    async fn complete(
        &self,
        upload_id: &UploadId,
        key: &ObjectKey,
        parts: &[CompletedPart],
    ) -> StoreResult<Option<String>> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        let upload = open_upload(&state, upload_id, key)?;

        let mut body = Vec::new();
        let mut previous = 0;
        for (index, declared) in parts.iter().enumerate() {
            if declared.part_number <= previous {
                return Err(StoreError::InvalidPart("parts must ascend".to_string()));
            }
            previous = declared.part_number;

            let stored = upload.parts.get(&declared.part_number).ok_or_else(|| {
                StoreError::PartMismatch(format!(
                    "part {} was never uploaded",
                    declared.part_number
                ))
            })?;
            if ContentHash::new(stored).to_hex() != declared.etag.trim_matches('"') {
                return Err(StoreError::PartMismatch(format!(
                    "ETag of part {} does not match",
                    declared.part_number
                )));
            }
            let is_last = index + 1 == parts.len();
            if !is_last && (stored.len() as u64) < self.min_part_size {
                return Err(StoreError::PartMismatch(format!(
                    "part {} is smaller than {} bytes",
                    declared.part_number, self.min_part_size
                )));
            }
            body.extend_from_slice(stored);
        }

        if let Some(upload) = state.uploads.remove(upload_id.as_str()) {
            state
                .objects
                .insert(upload.key, (upload.content_type, body));
        }
        Ok(Some(format!("memory://{}", key)))
    }

    async fn abort(&self, upload_id: &UploadId, key: &ObjectKey) -> StoreResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        Self::check_available(&state)?;
        open_upload(&state, upload_id, key)?;
        state.uploads.remove(upload_id.as_str());
        Ok(())
    }
}

/// Signer that fails for one part number and counts every call
pub struct FailingSigner {
    inner: Ed25519UrlSigner,
    fail_on: PartNumber,
    calls: AtomicUsize,
}

impl FailingSigner {
    pub fn new(fail_on: PartNumber) -> Self {
        FailingSigner {
            inner: Ed25519UrlSigner::new(KeyPair::generate(), "http://signer.test"),
            fail_on,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PartUrlSigner for FailingSigner {
    async fn presign_upload_part(
        &self,
        target: &PartTarget,
        expires_in: Duration,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if target.part_number == self.fail_on {
            return Err(UploadError::Signing(format!(
                "refusing to sign part {}",
                target.part_number
            )));
        }
        self.inner.presign_upload_part(target, expires_in).await
    }
}
