//! uplink client: the five multipart operations over HTTP and an upload
//! driver that keeps a bounded number of parts in flight

pub mod client;
pub mod error;
pub mod uploader;

pub use client::{Client, CreatedSession};
pub use error::ClientError;
pub use uploader::{UploadOptions, UploadReport, Uploader};

pub type Result<T> = std::result::Result<T, ClientError>;
