//! Photo asset manager
//!
//! Uploads photo bytes to the file store under their content hash and edits
//! a record's photo list. The engine never deletes assets: one object backs
//! every record that holds the same bytes, so a photo dropped from one card
//! may still be on another. Dropped photos and uploads from cancelled
//! sessions stay in the bucket unreferenced.

use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::models::AssetRef;
use crate::retry::{with_backoff, RetryPolicy};
use crate::store::FileStore;
use crate::validate::{validate_photo, ReasonCode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhotoError {
    #[error("Photo upload failed: {0}")]
    UploadFailed(String),

    #[error("Photo format is not supported")]
    UnsupportedFormat,

    #[error("Photo is empty")]
    EmptyContent,

    #[error("There is no photo {slot}")]
    NoSuchSlot { slot: usize },
}

impl PhotoError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UploadFailed(_) => "upload_failed",
            Self::UnsupportedFormat => "unsupported_format",
            Self::EmptyContent => "empty_photo",
            Self::NoSuchSlot { .. } => "no_such_slot",
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::UploadFailed(_))
    }
}

/// SHA-256 of `bytes`, lowercase hex.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Put `asset` at zero-based `slot`, appending when the slot is past the end
/// or not given.
#[must_use]
pub fn place(photos: &[AssetRef], slot: Option<usize>, asset: AssetRef) -> Vec<AssetRef> {
    let mut next = photos.to_vec();
    match slot {
        Some(index) if index < next.len() => next[index] = asset,
        _ => next.push(asset),
    }
    next
}

/// Drop the photo at zero-based `slot`. Nothing is deleted remotely.
pub fn remove(photos: &[AssetRef], slot: usize) -> Result<Vec<AssetRef>, PhotoError> {
    if slot >= photos.len() {
        return Err(PhotoError::NoSuchSlot { slot: slot + 1 });
    }
    let mut next = photos.to_vec();
    next.remove(slot);
    Ok(next)
}

/// Content hashes remembered per process.
const UPLOAD_CACHE_SIZE: usize = 1024;

pub struct PhotoAssetManager {
    files: Arc<dyn FileStore>,
    retry: RetryPolicy,
    /// Most recently uploaded hashes and their references.
    uploaded: Mutex<LruCache<String, AssetRef>>,
}

impl PhotoAssetManager {
    pub fn new(files: Arc<dyn FileStore>, retry: RetryPolicy) -> Self {
        let capacity = NonZeroUsize::new(UPLOAD_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            files,
            retry,
            uploaded: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Upload photo bytes and return their reference.
    ///
    /// Recently uploaded bytes are not sent again. Older ones are, and the
    /// store answers with the same reference.
    pub async fn upload(&self, bytes: &[u8]) -> Result<AssetRef, PhotoError> {
        let format = validate_photo(bytes).map_err(|error| match error.reason {
            ReasonCode::EmptyPhoto => PhotoError::EmptyContent,
            _ => PhotoError::UnsupportedFormat,
        })?;
        let hash = content_hash(bytes);

        if let Some(existing) = self.cached(&hash) {
            tracing::debug!(%hash, "Photo already uploaded");
            return Ok(existing);
        }

        let asset = with_backoff(&self.retry, "photo upload", || {
            self.files.put(bytes, &hash, format.content_type())
        })
        .await
        .map_err(|error| PhotoError::UploadFailed(error.to_string()))?;

        tracing::info!(%hash, asset = %asset, "Uploaded photo");
        self.uploaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(hash, asset.clone());
        Ok(asset)
    }

    /// Upload `bytes` and put the result at zero-based `slot` of `photos`.
    /// The record itself is not touched.
    pub async fn replace(
        &self,
        photos: &[AssetRef],
        slot: Option<usize>,
        bytes: &[u8],
    ) -> Result<(AssetRef, Vec<AssetRef>), PhotoError> {
        let asset = self.upload(bytes).await?;
        let next = place(photos, slot, asset.clone());
        Ok((asset, next))
    }

    fn cached(&self, hash: &str) -> Option<AssetRef> {
        self.uploaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
            .cloned()
    }
}

impl std::fmt::Debug for PhotoAssetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoAssetManager")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
