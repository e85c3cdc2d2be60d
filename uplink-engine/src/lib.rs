//! Local multipart store on fjall
//!
//! Sessions, parts and finished objects live in separate partitions of one
//! keyspace. Part bodies are stored once per content hash with a reference
//! count, so retried or repeated parts and the objects assembled from them
//! share storage.

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uplink_core::{StoreError, StoreResult, UploadConfig};

pub mod layout;
pub mod multipart;

pub use layout::{ObjectManifest, PartEntry, UploadRecord};
pub use multipart::StoredObject;

/// Part size and numbering limits a store enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// Smallest size of every part but the last at completion
    pub min_part_size: u64,
    pub max_part_size: u64,
    pub max_part_number: u32,
    /// Records per listing page
    pub page_size: usize,
}

impl StoreLimits {
    pub fn from_config(config: &UploadConfig) -> Self {
        StoreLimits {
            min_part_size: config.min_part_size_bytes,
            max_part_size: config.max_part_size_bytes,
            max_part_number: config.max_part_number,
            page_size: 1000,
        }
    }
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

/// Multipart store backed by a fjall keyspace
#[derive(Clone)]
pub struct LocalStore {
    keyspace: Arc<Keyspace>,
    pub(crate) uploads: PartitionHandle,
    pub(crate) parts: PartitionHandle,
    pub(crate) blobs: PartitionHandle,
    pub(crate) objects: PartitionHandle,
    pub(crate) limits: StoreLimits,
    // Serializes read-modify-write of reference counts
    pub(crate) write_lock: Arc<Mutex<()>>,
}

impl LocalStore {
    /// Open or create a store at `path`
    pub fn open(path: impl AsRef<Path>, limits: StoreLimits) -> StoreResult<Self> {
        let keyspace = Config::new(path).open().map_err(storage_error)?;

        let open = |name: &str| {
            keyspace
                .open_partition(name, PartitionCreateOptions::default())
                .map_err(storage_error)
        };
        let uploads = open("uploads")?;
        let parts = open("parts")?;
        let blobs = open("blobs")?;
        let objects = open("objects")?;

        Ok(LocalStore {
            keyspace: Arc::new(keyspace),
            uploads,
            parts,
            blobs,
            objects,
            limits,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Create a store in a temporary directory for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp(limits: StoreLimits) -> StoreResult<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let store = Self::open(temp_dir.path(), limits)?;
        Ok((store, temp_dir))
    }

    pub fn limits(&self) -> &StoreLimits {
        &self.limits
    }

    pub(crate) fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Persist all changes to disk
    pub fn persist(&self) -> StoreResult<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(storage_error)
    }
}

pub(crate) fn storage_error(err: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(err.to_string())
}
