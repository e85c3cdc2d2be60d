//! Multipart operations over the local partitions

use async_trait::async_trait;
use fjall::Batch;
use std::collections::{BTreeMap, HashMap};
use std::sync::MutexGuard;
use uplink_core::auth::uri_encode;
use uplink_core::{
    CompletedPart, ContentHash, CreatedUpload, MultipartStore, ObjectKey, PartNumber, PartsPage,
    RawPartRecord, StoreError, StoreResult, UploadId,
};

use crate::layout::{
    blob_key, blob_ref_key, decode, decode_ref_count, encode, encode_ref_count, parse_part_key,
    part_key, part_prefix, ObjectManifest, PartEntry, UploadRecord,
};
use crate::{storage_error, LocalStore};

/// A finished object read back from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Path a completed object is served under
pub fn object_location(key: &ObjectKey) -> String {
    format!("/objects/{}", uri_encode(key.as_str()))
}

impl LocalStore {
    /// Open a session for `key`
    pub fn create_upload(&self, key: &ObjectKey, content_type: &str) -> StoreResult<CreatedUpload> {
        let upload_id = ulid::Ulid::new().to_string();
        let record = UploadRecord {
            key: key.to_string(),
            content_type: content_type.to_string(),
        };

        self.uploads
            .insert(upload_id.as_str(), encode(&record)?)
            .map_err(storage_error)?;
        self.persist()?;

        Ok(CreatedUpload {
            key: key.to_string(),
            upload_id,
        })
    }

    /// Store one part body, replacing any earlier body for the same number.
    ///
    /// Returns the part's ETag.
    pub fn upload_part(
        &self,
        upload_id: &UploadId,
        key: &ObjectKey,
        part_number: PartNumber,
        body: &[u8],
    ) -> StoreResult<String> {
        if part_number == 0 || part_number > self.limits.max_part_number {
            return Err(StoreError::InvalidPart(format!(
                "part number {} outside 1..={}",
                part_number, self.limits.max_part_number
            )));
        }
        if body.len() as u64 > self.limits.max_part_size {
            return Err(StoreError::InvalidPart(format!(
                "part of {} bytes exceeds the {} byte limit",
                body.len(),
                self.limits.max_part_size
            )));
        }

        let _guard = self.lock()?;
        self.open_upload(upload_id, key)?;

        let etag = ContentHash::new(body).to_hex();
        let entry_key = part_key(upload_id.as_str(), part_number);

        let mut deltas = HashMap::new();
        *deltas.entry(etag.clone()).or_insert(0) += 1;
        if let Some(previous) = self.parts.get(&entry_key).map_err(storage_error)? {
            let previous: PartEntry = decode(&previous)?;
            *deltas.entry(previous.etag).or_insert(0) -= 1;
        }

        let entry = PartEntry {
            size: body.len() as u64,
            etag: etag.clone(),
        };

        let mut batch = self.keyspace().batch();
        self.apply_ref_deltas(&mut batch, &deltas, Some((etag.as_str(), body)))?;
        batch.insert(&self.parts, entry_key, encode(&entry)?);
        batch.commit().map_err(storage_error)?;
        self.persist()?;

        Ok(etag)
    }

    /// One page of parts after `marker`
    pub fn list_part_page(
        &self,
        upload_id: &UploadId,
        key: &ObjectKey,
        marker: Option<PartNumber>,
    ) -> StoreResult<PartsPage> {
        self.open_upload(upload_id, key)?;

        let prefix = part_prefix(upload_id.as_str());
        let start = match marker {
            Some(marker) => part_key(upload_id.as_str(), marker.saturating_add(1)),
            None => prefix.clone(),
        };

        let mut parts = Vec::new();
        let mut has_more = false;
        for item in self.parts.range(start..) {
            let (entry_key, value) = item.map_err(storage_error)?;
            if !entry_key.starts_with(&prefix) {
                break;
            }
            if parts.len() == self.limits.page_size {
                has_more = true;
                break;
            }

            let entry: PartEntry = decode(&value)?;
            parts.push(RawPartRecord {
                part_number: parse_part_key(&entry_key),
                size: Some(entry.size),
                etag: Some(entry.etag),
            });
        }

        let next_marker = if has_more {
            parts.last().and_then(|p| p.part_number)
        } else {
            None
        };
        Ok(PartsPage { parts, next_marker })
    }

    /// Assemble the object from `declared` and close the session
    pub fn complete_upload(
        &self,
        upload_id: &UploadId,
        key: &ObjectKey,
        declared: &[CompletedPart],
    ) -> StoreResult<String> {
        if declared.is_empty() {
            return Err(StoreError::InvalidPart("no parts declared".to_string()));
        }

        let _guard = self.lock()?;
        let record = self.open_upload(upload_id, key)?;
        let stored = self.stored_parts(upload_id)?;

        let mut manifest = ObjectManifest {
            size: 0,
            content_type: record.content_type,
            parts: Vec::with_capacity(declared.len()),
        };

        let mut previous = 0;
        for (index, part) in declared.iter().enumerate() {
            if part.part_number <= previous {
                return Err(StoreError::InvalidPart(
                    "parts must be in ascending part number order".to_string(),
                ));
            }
            previous = part.part_number;

            let entry = stored.get(&part.part_number).ok_or_else(|| {
                StoreError::PartMismatch(format!("part {} was never uploaded", part.part_number))
            })?;
            if entry.etag != part.etag.trim_matches('"') {
                return Err(StoreError::PartMismatch(format!(
                    "ETag mismatch for part {}",
                    part.part_number
                )));
            }
            let is_last = index + 1 == declared.len();
            if !is_last && entry.size < self.limits.min_part_size {
                return Err(StoreError::PartMismatch(format!(
                    "part {} is {} bytes, below the {} byte minimum",
                    part.part_number, entry.size, self.limits.min_part_size
                )));
            }

            manifest.size += entry.size;
            manifest.parts.push(entry.etag.clone());
        }

        let mut deltas: HashMap<String, i64> = HashMap::new();
        for etag in &manifest.parts {
            *deltas.entry(etag.clone()).or_insert(0) += 1;
        }
        for entry in stored.values() {
            *deltas.entry(entry.etag.clone()).or_insert(0) -= 1;
        }
        if let Some(existing) = self.objects.get(key.as_str()).map_err(storage_error)? {
            let existing: ObjectManifest = decode(&existing)?;
            for etag in existing.parts {
                *deltas.entry(etag).or_insert(0) -= 1;
            }
        }

        let mut batch = self.keyspace().batch();
        self.apply_ref_deltas(&mut batch, &deltas, None)?;
        for part_number in stored.keys() {
            batch.remove(&self.parts, part_key(upload_id.as_str(), *part_number));
        }
        batch.remove(&self.uploads, upload_id.as_str());
        batch.insert(&self.objects, key.as_str(), encode(&manifest)?);
        batch.commit().map_err(storage_error)?;
        self.persist()?;

        Ok(object_location(key))
    }

    /// Drop the session and every part it holds
    pub fn abort_upload(&self, upload_id: &UploadId, key: &ObjectKey) -> StoreResult<()> {
        let _guard = self.lock()?;
        self.open_upload(upload_id, key)?;
        let stored = self.stored_parts(upload_id)?;

        let mut deltas: HashMap<String, i64> = HashMap::new();
        for entry in stored.values() {
            *deltas.entry(entry.etag.clone()).or_insert(0) -= 1;
        }

        let mut batch = self.keyspace().batch();
        self.apply_ref_deltas(&mut batch, &deltas, None)?;
        for part_number in stored.keys() {
            batch.remove(&self.parts, part_key(upload_id.as_str(), *part_number));
        }
        batch.remove(&self.uploads, upload_id.as_str());
        batch.commit().map_err(storage_error)?;
        self.persist()?;

        Ok(())
    }

    /// Read a completed object
    pub fn read_object(&self, key: &ObjectKey) -> StoreResult<Option<StoredObject>> {
        let stored = self.objects.get(key.as_str()).map_err(storage_error)?;
        let manifest: ObjectManifest = match stored {
            Some(bytes) => decode(&bytes)?,
            None => return Ok(None),
        };

        let mut body = Vec::with_capacity(manifest.size as usize);
        for etag in &manifest.parts {
            let blob = self
                .blobs
                .get(blob_key(etag))
                .map_err(storage_error)?
                .ok_or_else(|| StoreError::Unavailable(format!("missing part blob {}", etag)))?;
            body.extend_from_slice(&blob);
        }

        Ok(Some(StoredObject {
            content_type: manifest.content_type,
            body,
        }))
    }

    /// Whether `upload_id` names an open session
    pub fn is_open(&self, upload_id: &UploadId) -> StoreResult<bool> {
        Ok(self.uploads.get(upload_id.as_str()).map_err(storage_error)?.is_some())
    }

    pub fn open_upload_count(&self) -> StoreResult<usize> {
        let mut count = 0;
        for item in self.uploads.iter() {
            item.map_err(storage_error)?;
            count += 1;
        }
        Ok(count)
    }

    /// Number of distinct part bodies held
    pub fn blob_count(&self) -> StoreResult<usize> {
        let mut count = 0;
        for item in self.blobs.prefix("blob:") {
            item.map_err(storage_error)?;
            count += 1;
        }
        Ok(count)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Unavailable("store write lock poisoned".to_string()))
    }

    fn open_upload(&self, upload_id: &UploadId, key: &ObjectKey) -> StoreResult<UploadRecord> {
        let no_such_upload = || StoreError::NoSuchUpload {
            upload_id: upload_id.to_string(),
        };

        let bytes = self
            .uploads
            .get(upload_id.as_str())
            .map_err(storage_error)?
            .ok_or_else(no_such_upload)?;
        let record: UploadRecord = decode(&bytes)?;
        if record.key != key.as_str() {
            return Err(no_such_upload());
        }
        Ok(record)
    }

    fn stored_parts(&self, upload_id: &UploadId) -> StoreResult<BTreeMap<PartNumber, PartEntry>> {
        let mut parts = BTreeMap::new();
        for item in self.parts.prefix(part_prefix(upload_id.as_str())) {
            let (entry_key, value) = item.map_err(storage_error)?;
            let part_number = parse_part_key(&entry_key)
                .ok_or_else(|| StoreError::Unavailable("corrupt part key".to_string()))?;
            parts.insert(part_number, decode(&value)?);
        }
        Ok(parts)
    }

    /// Stage reference count changes, writing or dropping blob bodies as
    /// counts leave or reach zero
    fn apply_ref_deltas(
        &self,
        batch: &mut Batch,
        deltas: &HashMap<String, i64>,
        new_blob: Option<(&str, &[u8])>,
    ) -> StoreResult<()> {
        for (etag, &delta) in deltas {
            if delta == 0 {
                continue;
            }

            let current = match self.blobs.get(blob_ref_key(etag)).map_err(storage_error)? {
                Some(bytes) => decode_ref_count(&bytes)?,
                None => 0,
            };
            let next = i64::from(current) + delta;

            if next <= 0 {
                batch.remove(&self.blobs, blob_key(etag));
                batch.remove(&self.blobs, blob_ref_key(etag));
                continue;
            }

            if current == 0 {
                let body = new_blob
                    .filter(|(new_etag, _)| *new_etag == etag.as_str())
                    .map(|(_, body)| body)
                    .ok_or_else(|| StoreError::Unavailable(format!("missing part blob {}", etag)))?;
                batch.insert(&self.blobs, blob_key(etag), body);
            }

            let next = u32::try_from(next)
                .map_err(|_| StoreError::Unavailable("blob reference count overflow".to_string()))?;
            batch.insert(&self.blobs, blob_ref_key(etag), encode_ref_count(next).to_vec());
        }
        Ok(())
    }
}

#[async_trait]
impl MultipartStore for LocalStore {
    async fn create(&self, key: &ObjectKey, content_type: &str) -> StoreResult<CreatedUpload> {
        self.create_upload(key, content_type)
    }

    async fn list_parts(
        &self,
        upload_id: &UploadId,
        key: &ObjectKey,
        marker: Option<PartNumber>,
    ) -> StoreResult<PartsPage> {
        self.list_part_page(upload_id, key, marker)
    }

    async fn complete(
        &self,
        upload_id: &UploadId,
        key: &ObjectKey,
        parts: &[CompletedPart],
    ) -> StoreResult<Option<String>> {
        self.complete_upload(upload_id, key, parts).map(Some)
    }

    async fn abort(&self, upload_id: &UploadId, key: &ObjectKey) -> StoreResult<()> {
        self.abort_upload(upload_id, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreLimits;

    fn limits() -> StoreLimits {
        StoreLimits {
            min_part_size: 4,
            max_part_size: 1024,
            max_part_number: 100,
            page_size: 2,
        }
    }

    fn ids(store: &LocalStore, key: &str) -> (UploadId, ObjectKey) {
        let key = ObjectKey::new(key).unwrap();
        let created = store.create_upload(&key, "text/plain").unwrap();
        (UploadId::new(&created.upload_id).unwrap(), key)
    }

    #[test]
    fn test_part_replacement_releases_old_blob() {
        let (store, _temp) = LocalStore::temp(limits()).unwrap();
        let (id, key) = ids(&store, "k");

        store.upload_part(&id, &key, 1, b"first").unwrap();
        assert_eq!(store.blob_count().unwrap(), 1);

        let etag = store.upload_part(&id, &key, 1, b"second").unwrap();
        assert_eq!(store.blob_count().unwrap(), 1);
        assert_eq!(etag, ContentHash::new(b"second").to_hex());
    }

    #[test]
    fn test_identical_parts_share_a_blob() {
        let (store, _temp) = LocalStore::temp(limits()).unwrap();
        let (id, key) = ids(&store, "k");

        store.upload_part(&id, &key, 1, b"same").unwrap();
        store.upload_part(&id, &key, 2, b"same").unwrap();
        assert_eq!(store.blob_count().unwrap(), 1);

        store.abort_upload(&id, &key).unwrap();
        assert_eq!(store.blob_count().unwrap(), 0);
    }

    #[test]
    fn test_part_limits() {
        let (store, _temp) = LocalStore::temp(limits()).unwrap();
        let (id, key) = ids(&store, "k");

        assert!(matches!(store.upload_part(&id, &key, 0, b"x"), Err(StoreError::InvalidPart(_))));
        assert!(matches!(store.upload_part(&id, &key, 101, b"x"), Err(StoreError::InvalidPart(_))));
        assert!(matches!(
            store.upload_part(&id, &key, 1, &[0u8; 1025]),
            Err(StoreError::InvalidPart(_))
        ));
    }

    #[test]
    fn test_location_is_encoded() {
        let key = ObjectKey::new("a b/c.txt").unwrap();
        assert_eq!(object_location(&key), "/objects/a%20b%2Fc.txt");
    }
}
