//! Presigned part-upload permissions
//!
//! - Ed25519 key management
//! - Canonical upload-part signing into time-limited URLs
//! - Constant-time comparisons for verification

pub mod keys;
pub mod presign;
pub mod timing;

pub use keys::*;
pub use presign::*;
pub use timing::*;
