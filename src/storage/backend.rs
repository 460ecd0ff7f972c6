//! Object-store backend trait
//!
//! The remote blob store is an opaque collaborator. Implementations translate
//! their transport's behavior into this small operation set; the gateway owns
//! all state tracking above it.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::StorageError;

use super::types::{DownloadUrl, ObjectMetadata};

/// Event emitted by a resumable upload
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Bytes moved so far. `total_bytes` may be 0 while the store has not
    /// committed to a total.
    Progress {
        bytes_transferred: u64,
        total_bytes: u64,
    },
    /// Terminal: the object is stored and retrievable at `url`
    Completed { url: DownloadUrl },
    /// Terminal: the transfer failed
    Failed { cause: String },
}

/// Stream of upload events, ending with `Completed` or `Failed`
pub type UploadStream = BoxStream<'static, UploadEvent>;

/// Operations the gateway consumes from a remote blob store
#[async_trait]
pub trait ObjectStoreBackend: Send + Sync + 'static {
    /// Begin a resumable upload of `payload` to `key`.
    ///
    /// Issues the transfer immediately; the returned stream reports progress
    /// and exactly one terminal event. Dropping the stream does not cancel a
    /// transfer the store has already accepted.
    fn begin_upload(&self, key: &str, payload: Bytes) -> UploadStream;

    /// Resolve the retrieval URL of an existing object
    async fn resolve_url(&self, key: &str) -> Result<DownloadUrl, StorageError>;

    /// Read object metadata without fetching the payload
    async fn metadata(&self, key: &str) -> Result<ObjectMetadata, StorageError>;

    /// Delete an object. Not idempotent: deleting an absent key is
    /// `StorageError::NotFound`.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Keys of the direct objects under `prefix`, in store-defined order
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
