//! Client error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The server classified the failure
    #[error("{kind} ({status}): {message}")]
    Api {
        status: u16,
        kind: String,
        message: String,
    },

    #[error("Part {part_number} upload failed with status {status}")]
    PartUpload { part_number: u32, status: u16 },

    #[error("Upload error: {0}")]
    Upload(#[from] uplink_core::UploadError),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl ClientError {
    /// Server-side error kind, when the server reported one
    pub fn kind(&self) -> Option<&str> {
        match self {
            ClientError::Api { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Returns true if the same request may succeed when repeated
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Connection(_) => true,
            ClientError::Api { status, .. } | ClientError::PartUpload { status, .. } => {
                *status == 503
            }
            ClientError::Upload(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<hyper::http::Error> for ClientError {
    fn from(err: hyper::http::Error) -> Self {
        ClientError::Http(err.to_string())
    }
}

impl From<hyper_util::client::legacy::Error> for ClientError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        ClientError::Connection(err.to_string())
    }
}

impl From<hyper::Error> for ClientError {
    fn from(err: hyper::Error) -> Self {
        ClientError::Connection(err.to_string())
    }
}
