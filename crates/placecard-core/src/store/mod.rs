//! Record and file store interfaces plus their adapters

mod memory;
mod r2;
mod sheets;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AssetRef, CompanyRecord, RecordId, RecordVersion, Snapshot};
use crate::validate::PhotoFormat;

pub use memory::{MemoryFileStore, MemoryRecordStore};
pub use r2::{R2Config, R2FileStore};
pub use sheets::{SheetsConfig, SheetsRecordStore};

/// Errors reported by store adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Record {0} not found")]
    NotFound(RecordId),
    /// Network failure, timeout, throttling or a 5xx answer. Worth retrying.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// Stored data could not be read back as a record.
    #[error("Malformed stored data: {0}")]
    Malformed(String),
    /// The store refused the request; retrying will not help.
    #[error("Store rejected request: {0}")]
    Rejected(String),
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "record_not_found",
            Self::Unavailable(_) => "store_unavailable",
            Self::Malformed(_) => "store_malformed",
            Self::Rejected(_) => "store_rejected",
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written; carries the new version.
    Written(RecordVersion),
    /// The stored version no longer matched; carries the current version.
    VersionMismatch(RecordVersion),
}

/// System of record for company records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch(&self, id: &RecordId) -> StoreResult<Snapshot>;

    /// Write `record` only if the stored version still equals `expected`.
    async fn write(
        &self,
        id: &RecordId,
        record: &CompanyRecord,
        expected: RecordVersion,
    ) -> StoreResult<WriteOutcome>;

    /// Records whose name matches `name`, ignoring case and spacing.
    async fn find_by_name(&self, name: &str) -> StoreResult<Vec<CompanyRecord>>;

    /// Records with at least one blank field.
    async fn unfilled(&self) -> StoreResult<Vec<CompanyRecord>>;

    /// Whether `write` compares and writes as one atomic step. Stores that
    /// cannot guarantee it get their writes re-read by the sync engine.
    fn atomic_writes(&self) -> bool {
        true
    }
}

/// Remote storage for photo bytes.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store `bytes` under their content hash. Storing the same content twice
    /// returns the same reference.
    async fn put(&self, bytes: &[u8], hash: &str, content_type: &str) -> StoreResult<AssetRef>;

    async fn delete(&self, asset: &AssetRef) -> StoreResult<()>;
}

/// Object key for a photo with the given content hash.
pub(crate) fn photo_key(hash: &str, content_type: &str) -> String {
    let extension =
        PhotoFormat::from_content_type(content_type).map_or("bin", PhotoFormat::extension);
    format!("photos/{hash}.{extension}")
}
