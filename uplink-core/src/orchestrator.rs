//! Multipart upload orchestration
//!
//! Every operation either fully succeeds or fails with a classified error
//! and leaves the session state untouched. The orchestrator holds no session
//! table; the store owns session state and arbitrates concurrent part writes.

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    CompletedPart, FileDescriptor, KeyNamer, MultipartStore, ObjectKey, PartNumber, PartPlan,
    PartRecord, PartSizer, PartTarget, PartUrlSigner, Result, SessionState, StoreError,
    UploadConfig, UploadError, UploadId, UploadSession,
};

/// A newly created session and, when the file size is known, its part plan
#[derive(Debug, Clone)]
pub struct StartedUpload {
    pub session: UploadSession,
    pub plan: Option<PartPlan>,
}

/// One presigned URL per requested part number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartUrls {
    pub presigned_urls: BTreeMap<PartNumber, String>,
}

/// Result of a successful completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Result of an abort request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// The store discarded the session
    Aborted,
    /// The session was already completed or aborted; nothing left to release
    AlreadyFinalized,
}

/// Drives the multipart protocol against a store
pub struct UploadOrchestrator {
    store: Arc<dyn MultipartStore>,
    signer: Arc<dyn PartUrlSigner>,
    namer: KeyNamer,
    sizer: PartSizer,
    config: UploadConfig,
}

impl UploadOrchestrator {
    pub fn new(
        store: Arc<dyn MultipartStore>,
        signer: Arc<dyn PartUrlSigner>,
        namer: KeyNamer,
        config: UploadConfig,
    ) -> Result<Self> {
        config.validate()?;
        let sizer = PartSizer::from_config(&config)?;
        Ok(UploadOrchestrator {
            store,
            signer,
            namer,
            sizer,
            config,
        })
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Name the destination and ask the store for a new session
    pub async fn start_upload(
        &self,
        file: Option<&FileDescriptor>,
        filename_params: &serde_json::Value,
    ) -> Result<StartedUpload> {
        let file = file.ok_or_else(|| UploadError::MissingInput("file".to_string()))?;

        let plan = file.size.map(|size| self.sizer.plan(size)).transpose()?;

        let key = ObjectKey::new(&(self.namer)(file, filename_params))?;
        let content_type = file.content_type.as_deref().unwrap_or("");

        let created = self.store.create(&key, content_type).await?;
        let key = ObjectKey::new(&created.key).map_err(|_| {
            UploadError::StoreUnavailable("store returned an empty key".to_string())
        })?;
        let upload_id = UploadId::new(&created.upload_id).map_err(|_| {
            UploadError::StoreUnavailable("store returned an empty upload id".to_string())
        })?;

        info!(
            upload_id = %upload_id,
            key = %key,
            part_count = plan.map(|p| p.part_count),
            "multipart upload created"
        );

        Ok(StartedUpload {
            session: UploadSession::created(key, upload_id),
            plan,
        })
    }

    /// Issue one presigned URL per part number, all or nothing
    pub async fn issue_part_urls(
        &self,
        session: &mut UploadSession,
        part_numbers: &[PartNumber],
        expiry: Option<Duration>,
    ) -> Result<PartUrls> {
        session.ensure_open()?;
        self.validate_part_numbers(part_numbers)?;

        let expiry = expiry.unwrap_or_else(|| self.config.presigned_url_expiry());
        if expiry.as_secs() == 0 || expiry.as_secs() > crate::MAX_PRESIGNED_URL_EXPIRY_SECS {
            return Err(UploadError::MissingInput(format!(
                "expires must be within 1..={} seconds",
                crate::MAX_PRESIGNED_URL_EXPIRY_SECS
            )));
        }

        let targets: Vec<PartTarget> = part_numbers
            .iter()
            .map(|&part_number| PartTarget {
                key: session.key().clone(),
                upload_id: session.upload_id().clone(),
                part_number,
            })
            .collect();

        let urls = try_join_all(
            targets
                .iter()
                .map(|target| self.signer.presign_upload_part(target, expiry)),
        )
        .await?;

        let presigned_urls: BTreeMap<PartNumber, String> =
            part_numbers.iter().copied().zip(urls).collect();
        debug_assert_eq!(presigned_urls.len(), part_numbers.len());

        session.advance(SessionState::PartsIssued)?;

        debug!(
            upload_id = %session.upload_id(),
            part_count = presigned_urls.len(),
            expiry_secs = expiry.as_secs(),
            "issued part URLs"
        );

        Ok(PartUrls { presigned_urls })
    }

    /// Fetch the store's full part inventory, failing on any incomplete record
    pub async fn list_parts(&self, session: &mut UploadSession) -> Result<Vec<PartRecord>> {
        session.ensure_open()?;

        let mut parts: Vec<PartRecord> = Vec::new();
        let mut seen = BTreeSet::new();
        let mut marker = None;

        loop {
            let page = self
                .store
                .list_parts(session.upload_id(), session.key(), marker)
                .await?;

            for raw in page.parts {
                let record = raw.into_record()?;
                if !seen.insert(record.part_number) {
                    return Err(UploadError::InvalidPartRecord(format!(
                        "part {} listed twice",
                        record.part_number
                    )));
                }
                parts.push(record);
            }

            match page.next_marker {
                Some(next) if marker.map_or(true, |prev| next > prev) => marker = Some(next),
                Some(next) => {
                    return Err(UploadError::StoreUnavailable(format!(
                        "part listing marker did not advance past {}",
                        next
                    )));
                }
                None => break,
            }
        }

        parts.sort_by_key(|p| p.part_number);
        session.reconcile(&parts);

        debug!(
            upload_id = %session.upload_id(),
            part_count = parts.len(),
            "listed parts"
        );

        Ok(parts)
    }

    /// Ask the store to assemble the object from the declared parts
    pub async fn complete_upload(
        &self,
        session: &mut UploadSession,
        parts: &[CompletedPart],
    ) -> Result<Completion> {
        session.ensure_open()?;
        validate_declared_parts(parts)?;

        let location = match self
            .store
            .complete(session.upload_id(), session.key(), parts)
            .await
        {
            Ok(location) => location,
            Err(err) => {
                warn!(
                    upload_id = %session.upload_id(),
                    key = %session.key(),
                    error = %err,
                    "store rejected completion"
                );
                return Err(err.into());
            }
        };

        session.advance(SessionState::Completed)?;

        info!(
            upload_id = %session.upload_id(),
            key = %session.key(),
            part_count = parts.len(),
            "multipart upload completed"
        );

        Ok(Completion { location })
    }

    /// Discard the session; repeating the call reports `AlreadyFinalized`
    pub async fn abort_upload(&self, session: &mut UploadSession) -> Result<AbortOutcome> {
        if session.state().is_terminal() {
            warn!(
                upload_id = %session.upload_id(),
                state = ?session.state(),
                "abort of finalized upload"
            );
            return Ok(AbortOutcome::AlreadyFinalized);
        }

        let outcome = match self.store.abort(session.upload_id(), session.key()).await {
            Ok(()) => AbortOutcome::Aborted,
            Err(StoreError::NoSuchUpload { .. }) => AbortOutcome::AlreadyFinalized,
            Err(err) => return Err(err.into()),
        };

        session.advance(SessionState::Aborted)?;

        match outcome {
            AbortOutcome::Aborted => {
                info!(
                    upload_id = %session.upload_id(),
                    key = %session.key(),
                    "multipart upload aborted"
                )
            }
            AbortOutcome::AlreadyFinalized => {
                warn!(upload_id = %session.upload_id(), "store no longer holds upload")
            }
        }

        Ok(outcome)
    }

    fn validate_part_numbers(&self, part_numbers: &[PartNumber]) -> Result<()> {
        if part_numbers.is_empty() {
            return Err(UploadError::MissingInput("partNumbers".to_string()));
        }

        let cap = self.config.max_part_number;
        let mut seen = BTreeSet::new();
        for &part_number in part_numbers {
            if part_number == 0 || part_number > cap {
                return Err(UploadError::MissingInput(format!(
                    "part number {} outside 1..={}",
                    part_number, cap
                )));
            }
            if !seen.insert(part_number) {
                return Err(UploadError::MissingInput(format!(
                    "part number {} requested twice",
                    part_number
                )));
            }
        }
        Ok(())
    }
}

fn validate_declared_parts(parts: &[CompletedPart]) -> Result<()> {
    if parts.is_empty() {
        return Err(UploadError::MissingInput("parts".to_string()));
    }

    let mut previous = 0;
    for part in parts {
        if part.etag.trim().is_empty() {
            return Err(UploadError::MissingInput(format!(
                "ETag of part {}",
                part.part_number
            )));
        }
        if part.part_number <= previous {
            return Err(UploadError::MissingInput(
                "parts must be listed in ascending part number order without repeats".to_string(),
            ));
        }
        previous = part.part_number;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_parts_must_ascend() {
        let ok = [CompletedPart::new(1, "a"), CompletedPart::new(3, "b")];
        assert!(validate_declared_parts(&ok).is_ok());

        let unordered = [CompletedPart::new(2, "a"), CompletedPart::new(1, "b")];
        assert!(validate_declared_parts(&unordered).is_err());

        let repeated = [CompletedPart::new(1, "a"), CompletedPart::new(1, "a")];
        assert!(validate_declared_parts(&repeated).is_err());

        let zero = [CompletedPart::new(0, "a")];
        assert!(validate_declared_parts(&zero).is_err());

        let blank = [CompletedPart::new(1, " ")];
        assert!(validate_declared_parts(&blank).is_err());

        assert!(validate_declared_parts(&[]).is_err());
    }
}
