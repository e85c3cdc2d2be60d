//! Error types for uplink

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the multipart upload protocol
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Missing param: {0}")]
    MissingInput(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Invalid parts: {0}")]
    InvalidPartRecord(String),

    #[error("Part mismatch: {0}")]
    PartMismatch(String),

    #[error("Endpoint could not be found: {0}")]
    UnknownOperation(String),

    #[error("Upload {upload_id} is already finalized")]
    AlreadyFinalized { upload_id: String },

    #[error("Invalid session transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: crate::SessionState,
        to: crate::SessionState,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stable, serializable classification of an [`UploadError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MissingInput,
    StoreUnavailable,
    InvalidDestination,
    InvalidPartRecord,
    PartMismatch,
    UnknownOperation,
    AlreadyFinalized,
    InvalidTransition,
    PermissionDenied,
    SigningFailed,
    InvalidConfig,
    Internal,
}

impl UploadError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::MissingInput(_) => ErrorKind::MissingInput,
            UploadError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            UploadError::InvalidDestination(_) => ErrorKind::InvalidDestination,
            UploadError::InvalidPartRecord(_) => ErrorKind::InvalidPartRecord,
            UploadError::PartMismatch(_) => ErrorKind::PartMismatch,
            UploadError::UnknownOperation(_) => ErrorKind::UnknownOperation,
            UploadError::AlreadyFinalized { .. } => ErrorKind::AlreadyFinalized,
            UploadError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            UploadError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            UploadError::Signing(_) => ErrorKind::SigningFailed,
            UploadError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            UploadError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the caller may retry the same operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::StoreUnavailable(_))
    }

    /// Returns true for outcomes that are reported but never fatal
    pub fn is_informational(&self) -> bool {
        matches!(self, UploadError::AlreadyFinalized { .. })
    }
}

/// Failures reported by a [`crate::MultipartStore`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("no such upload: {upload_id}")]
    NoSuchUpload { upload_id: String },

    #[error("part mismatch: {0}")]
    PartMismatch(String),

    #[error("invalid part: {0}")]
    InvalidPart(String),
}

impl From<StoreError> for UploadError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => UploadError::StoreUnavailable(msg),
            StoreError::InvalidDestination(msg) => UploadError::InvalidDestination(msg),
            StoreError::NoSuchUpload { upload_id } => UploadError::AlreadyFinalized { upload_id },
            StoreError::PartMismatch(msg) => UploadError::PartMismatch(msg),
            StoreError::InvalidPart(msg) => UploadError::MissingInput(msg),
        }
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_unavailable_is_retryable() {
        assert!(UploadError::StoreUnavailable("timeout".into()).is_retryable());
        assert!(!UploadError::PartMismatch("etag".into()).is_retryable());
        assert!(!UploadError::MissingInput("uploadId".into()).is_retryable());
    }

    #[test]
    fn no_such_upload_maps_to_already_finalized() {
        let err: UploadError = StoreError::NoSuchUpload { upload_id: "u1".into() }.into();
        assert_eq!(err.kind(), ErrorKind::AlreadyFinalized);
        assert!(err.is_informational());
    }

    #[test]
    fn kind_serializes_by_name() {
        let json = serde_json::to_string(&ErrorKind::PartMismatch).unwrap();
        assert_eq!(json, "\"PartMismatch\"");
    }
}
