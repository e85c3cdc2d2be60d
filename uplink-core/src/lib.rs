//! Multipart upload orchestration for S3-compatible object stores
//!
//! The orchestrator is a stateless proxy over the store's own session: it
//! creates uploads, issues short-lived per-part write URLs, reconciles the
//! part inventory and finalizes or aborts, while [`PartSizer`] decides how a
//! file is divided.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod naming;
pub mod orchestrator;
pub mod session;
pub mod sizer;
pub mod store;
pub mod types;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use auth::{Ed25519UrlSigner, KeyPair, PartGrant, PartTarget, PartUrlSigner};
pub use config::UploadConfig;
pub use dispatch::{dispatch, Operation, Response, Status};
pub use error::*;
pub use naming::{content_addressed_namer, KeyNamer};
pub use orchestrator::{AbortOutcome, Completion, PartUrls, StartedUpload, UploadOrchestrator};
pub use session::{SessionState, UploadSession};
pub use sizer::{chunk_size, PartPlan, PartSizer};
pub use store::{CreatedUpload, MultipartStore, PartsPage};
pub use types::*;

/// Result type alias for uplink operations
pub type Result<T> = std::result::Result<T, UploadError>;

/// Part size used while a file fits under the part-count cap
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 20 * 1024 * 1024;

/// Part-count cap that triggers the grow-to-fit sizing branch
pub const DEFAULT_MAX_PART_COUNT: u64 = 9000;

/// Parts a client driver keeps in flight at once
pub const DEFAULT_MAX_CONCURRENT_PARTS: usize = 5;

/// Validity window of a presigned part URL
pub const DEFAULT_PRESIGNED_URL_EXPIRY_SECS: u64 = 300;

/// Smallest non-final part an S3-compatible store accepts
pub const STORE_MIN_PART_SIZE_BYTES: u64 = 5 * 1024 * 1024;

/// Largest single part an S3-compatible store accepts
pub const STORE_MAX_PART_SIZE_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Highest part number an S3-compatible store accepts
pub const STORE_MAX_PART_NUMBER: u32 = 10_000;

/// Longest presigned URL validity a store honors (7 days)
pub const MAX_PRESIGNED_URL_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

pub(crate) mod hex {
    use std::fmt::Write;

    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().fold(String::new(), |mut output, b| {
            let _ = write!(output, "{:02x}", b);
            output
        })
    }

    pub fn decode(s: &str) -> Option<Vec<u8>> {
        if s.len() % 2 != 0 || !s.is_ascii() {
            return None;
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
            .collect()
    }
}
