// src/blob_store.rs
//
// The remote object-store capability the disk is built on.
//
// Backends: MemoryContainer (memory_store.rs), LocalFsContainer
// (file_store.rs), AzureBlobContainer (azure_client.rs, feature "azure").

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::StoreError;

/// Body of a ranged GET, delivered in pieces.
pub type BlobByteStream = BoxStream<'static, Result<Bytes, StoreError>>;

/// One listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobListing {
    pub name: String,
    pub size: u64,
}

/// Acknowledgment of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: bool,
}

/// A container of block blobs.
///
/// Committed objects are visible to `list_blobs` and `get_range`; staged
/// blocks are not, until `commit_block_list` names them.
#[async_trait]
pub trait BlobContainer: Send + Sync {
    /// Container name, for logging.
    fn container_name(&self) -> &str;

    /// One page of committed blobs whose name starts with `prefix`, in
    /// lexicographic order. `page_size_hint` caps the page when honoured.
    async fn list_blobs(
        &self,
        prefix: &str,
        page_size_hint: Option<u32>,
    ) -> Result<Vec<BlobListing>, StoreError>;

    /// Open a download of `length` bytes starting at `offset`. The stream may
    /// end early if the blob is shorter.
    async fn get_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
    ) -> Result<BlobByteStream, StoreError>;

    /// Upload one block under `block_id` without making it visible.
    async fn stage_block(
        &self,
        key: &str,
        block_id: &str,
        payload: Bytes,
    ) -> Result<(), StoreError>;

    /// Materialize `key` from the staged blocks, in the given order.
    async fn commit_block_list(&self, key: &str, block_ids: &[String]) -> Result<(), StoreError>;

    async fn delete_blob(&self, key: &str) -> Result<DeleteOutcome, StoreError>;
}
