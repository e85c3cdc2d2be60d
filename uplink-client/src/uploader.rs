//! Bounded-concurrency upload driver
//!
//! Splits a file per the part plan, requests presigned URLs for at most
//! `max_concurrent_parts` parts at a time, PUTs those parts in parallel and
//! finalizes against the server's own part listing.

use std::collections::BTreeMap;

use bytes::Bytes;
use futures::future::try_join_all;
use serde_json::Value;
use tracing::{debug, info, warn};
use uplink_core::{
    CompletedPart, FileDescriptor, PartNumber, PartPlan, PartRecord, PartSizer, UploadConfig,
};

use crate::{Client, ClientError, Result};

/// Client-side upload policy
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub config: UploadConfig,
    pub filename_params: Value,
    pub content_type: Option<String>,
    /// Presigned URL lifetime requested per batch; server default when None
    pub expires: Option<u64>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        UploadOptions {
            config: UploadConfig::default(),
            filename_params: Value::Object(Default::default()),
            content_type: None,
            expires: None,
        }
    }
}

impl UploadOptions {
    /// Part size this client would pick for a file of `file_size` bytes
    pub fn chunk_size(&self, file_size: u64) -> Result<u64> {
        Ok(PartSizer::from_config(&self.config)?.chunk_size(file_size)?)
    }

    /// Parts kept in flight at once, never less than one
    pub fn limit(&self) -> usize {
        self.config.max_concurrent_parts.max(1)
    }
}

/// Outcome of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub key: String,
    pub upload_id: String,
    pub location: Option<String>,
    pub parts: Vec<CompletedPart>,
    /// Parts PUT by this call; lower than `parts.len()` after a resume
    pub uploaded_parts: usize,
}

pub struct Uploader {
    client: Client,
    options: UploadOptions,
    sizer: PartSizer,
}

impl Uploader {
    pub fn new(client: Client, options: UploadOptions) -> Result<Self> {
        let sizer = PartSizer::from_config(&options.config)?;
        Ok(Uploader {
            client,
            options,
            sizer,
        })
    }

    /// Upload `data` as a new object named after `name`.
    ///
    /// The server session is aborted if any part fails, so no orphaned
    /// parts are left behind.
    pub async fn upload(&self, name: &str, data: Bytes) -> Result<UploadReport> {
        let mut file = FileDescriptor::new(name).with_size(data.len() as u64);
        file.content_type = self.options.content_type.clone();

        let created = self
            .client
            .create_multipart_upload(&file, &self.options.filename_params)
            .await?;
        info!(key = %created.key, upload_id = %created.upload_id, "upload session created");

        let plan = match created.plan {
            Some(plan) => plan,
            None => self.sizer.plan(data.len() as u64)?,
        };

        let pending: Vec<PartNumber> = plan.part_numbers().collect();
        match self
            .drive(&created.key, &created.upload_id, &plan, &data, &pending)
            .await
        {
            Ok(report) => Ok(report),
            Err(err) => {
                warn!(
                    upload_id = %created.upload_id,
                    error = %err,
                    "upload failed, aborting session"
                );
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload(&created.key, &created.upload_id)
                    .await
                {
                    warn!(upload_id = %created.upload_id, error = %abort_err, "abort failed");
                }
                Err(err)
            }
        }
    }

    /// Continue an interrupted upload, sending only the parts the server
    /// does not already hold with the right size.
    ///
    /// The session is left open on failure so it can be resumed again.
    pub async fn resume(&self, key: &str, upload_id: &str, data: Bytes) -> Result<UploadReport> {
        let plan = self.sizer.plan(data.len() as u64)?;
        let known = index_parts(self.client.list_parts(key, upload_id).await?);

        let pending: Vec<PartNumber> = plan
            .part_numbers()
            .filter(|n| {
                let expected = plan.part_range(*n).map(|r| r.end - r.start);
                known.get(n).map(|record| record.size) != expected
            })
            .collect();
        info!(
            upload_id = %upload_id,
            present = plan.part_count as usize - pending.len(),
            pending = pending.len(),
            "resuming upload"
        );

        self.drive(key, upload_id, &plan, &data, &pending).await
    }

    async fn drive(
        &self,
        key: &str,
        upload_id: &str,
        plan: &PartPlan,
        data: &Bytes,
        pending: &[PartNumber],
    ) -> Result<UploadReport> {
        let mut sent = BTreeMap::new();

        for batch in pending.chunks(self.options.limit()) {
            let urls = self
                .client
                .prepare_upload_parts(key, upload_id, batch, self.options.expires)
                .await?;

            let puts = batch.iter().map(|&n| {
                let url = urls.presigned_urls.get(&n).cloned();
                let range = plan.part_range(n);
                async move {
                    let url = url.ok_or_else(|| {
                        ClientError::InvalidResponse(format!("no presigned URL for part {}", n))
                    })?;
                    let range = range.ok_or_else(|| {
                        ClientError::InvalidResponse(format!("part {} outside plan", n))
                    })?;
                    let body = data.slice(range.start as usize..range.end as usize);
                    let etag = self.client.put_part(&url, n, body).await?;
                    Ok::<_, ClientError>((n, etag))
                }
            });

            for (n, etag) in try_join_all(puts).await? {
                debug!(part = n, etag = %etag, "part uploaded");
                sent.insert(n, etag);
            }
        }

        let parts = self.reconcile(key, upload_id, plan, &sent).await?;
        let completion = self
            .client
            .complete_multipart_upload(key, upload_id, &parts)
            .await?;
        info!(key = %key, upload_id = %upload_id, parts = parts.len(), "upload completed");

        Ok(UploadReport {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            location: completion.location,
            parts,
            uploaded_parts: sent.len(),
        })
    }

    /// Build the completion list from the server's listing, checking it
    /// against every ETag this call received.
    async fn reconcile(
        &self,
        key: &str,
        upload_id: &str,
        plan: &PartPlan,
        sent: &BTreeMap<PartNumber, String>,
    ) -> Result<Vec<CompletedPart>> {
        let listed = index_parts(self.client.list_parts(key, upload_id).await?);

        plan.part_numbers()
            .map(|n| {
                let record = listed.get(&n).ok_or_else(|| {
                    ClientError::InvalidResponse(format!("part {} missing from listing", n))
                })?;
                let etag = record.etag.trim_matches('"');
                if let Some(expected) = sent.get(&n) {
                    if expected != etag {
                        return Err(ClientError::InvalidResponse(format!(
                            "part {} listed with ETag {}, uploaded as {}",
                            n, etag, expected
                        )));
                    }
                }
                Ok(CompletedPart::new(n, etag))
            })
            .collect()
    }
}

fn index_parts(records: Vec<PartRecord>) -> BTreeMap<PartNumber, PartRecord> {
    records.into_iter().map(|r| (r.part_number, r)).collect()
}
