// tests/test_unique_id.rs
//
// check_unique_id matches whole keys only.

mod common;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use blobdisk::{
    BlobByteStream, BlobContainer, BlobListing, DeleteOutcome, DiskError, MemoryContainer,
    StoreError, WriteMode,
};
use common::{build_disk, small_settings};

#[tokio::test]
async fn exact_name_required() -> Result<()> {
    let container = Arc::new(MemoryContainer::new("c"));
    for key in ["shard/abc", "shard/abcd", "shard/abc_x"] {
        container.insert(key, Bytes::from_static(b"."));
    }
    let (disk, _) = build_disk(container, small_settings(1024));

    assert!(disk.check_unique_id("shard/abc").await?);
    assert!(disk.check_unique_id("shard/abcd").await?);
    assert!(!disk.check_unique_id("shard/ab").await?);
    assert!(!disk.check_unique_id("shard/abcde").await?);
    Ok(())
}

#[tokio::test]
async fn committed_writes_become_visible_to_check_unique_id() -> Result<()> {
    let (disk, _) = build_disk(Arc::new(MemoryContainer::new("c")), small_settings(1024));
    let mut w = disk.open_for_write("part/0001", 64, WriteMode::Rewrite)?;
    w.write(b"payload").await?;
    let key = w.blob_key().to_string();

    assert!(!disk.check_unique_id(&key).await?);
    w.finalize().await?;
    assert!(disk.check_unique_id(&key).await?);
    Ok(())
}

/// Container whose listing always fails.
struct BrokenListing;

#[async_trait]
impl BlobContainer for BrokenListing {
    fn container_name(&self) -> &str {
        "broken"
    }

    async fn list_blobs(
        &self,
        _prefix: &str,
        _hint: Option<u32>,
    ) -> Result<Vec<BlobListing>, StoreError> {
        Err(StoreError::Transient("listing timed out".into()))
    }

    async fn get_range(
        &self,
        key: &str,
        _offset: u64,
        _length: u64,
    ) -> Result<BlobByteStream, StoreError> {
        Err(StoreError::NotFound(key.to_string()))
    }

    async fn stage_block(&self, _key: &str, _id: &str, _payload: Bytes) -> Result<(), StoreError> {
        Ok(())
    }

    async fn commit_block_list(&self, _key: &str, _ids: &[String]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete_blob(&self, _key: &str) -> Result<DeleteOutcome, StoreError> {
        Ok(DeleteOutcome { deleted: false })
    }
}

#[tokio::test]
async fn list_failure_is_an_error_not_false() {
    let (disk, _) = build_disk(Arc::new(BrokenListing), small_settings(1024));
    let err = disk.check_unique_id("anything").await.unwrap_err();
    assert!(matches!(err, DiskError::StorageProtocol { op: "list_blobs", .. }));
}
