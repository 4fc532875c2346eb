// tests/common/mod.rs
//
// Shared helpers for the integration tests: a fault-injecting container,
// deterministic test data and a disk builder.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use blobdisk::{
    BlobByteStream, BlobContainer, BlobListing, DeleteOutcome, DiskBlobStorage, DiskSettings,
    MemoryContainer, MemoryMetadataStore, StoreError,
};

/// Install a fmt subscriber once; honors RUST_LOG.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic, non-repeating-looking bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 251) as u8).collect()
}

/// Failure injected into one ranged GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The stream yields a transient error as its first item.
    Transient,
    /// The request fails to open with a broken stream.
    Broken,
    /// The stream delivers its first piece, then ends early.
    Truncated,
}

/// In-memory container with scripted failures and call counters.
pub struct FaultyContainer {
    pub inner: MemoryContainer,
    /// Every commit fails with a protocol error.
    pub fail_commit: AtomicBool,
    /// Deletes of this key report `deleted: false`.
    pub refuse_delete: Mutex<Option<String>>,
    /// Faults consumed one per ranged GET, front first.
    faults: Mutex<VecDeque<Fault>>,

    pub get_calls: AtomicUsize,
    pub stage_calls: AtomicUsize,
    pub commit_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl FaultyContainer {
    pub fn new() -> Self {
        Self::wrap(MemoryContainer::new("faulty"))
    }

    pub fn wrap(inner: MemoryContainer) -> Self {
        Self {
            inner,
            fail_commit: AtomicBool::new(false),
            refuse_delete: Mutex::new(None),
            faults: Mutex::new(VecDeque::new()),
            get_calls: AtomicUsize::new(0),
            stage_calls: AtomicUsize::new(0),
            commit_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub fn gets(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Queue faults for the next ranged GETs, in order.
    pub fn script(&self, faults: impl IntoIterator<Item = Fault>) {
        self.faults.lock().unwrap().extend(faults);
    }

    pub fn repeat(&self, fault: Fault, times: usize) {
        self.script(std::iter::repeat_n(fault, times));
    }
}

#[async_trait]
impl BlobContainer for FaultyContainer {
    fn container_name(&self) -> &str {
        self.inner.container_name()
    }

    async fn list_blobs(
        &self,
        prefix: &str,
        page_size_hint: Option<u32>,
    ) -> Result<Vec<BlobListing>, StoreError> {
        self.inner.list_blobs(prefix, page_size_hint).await
    }

    async fn get_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
    ) -> Result<BlobByteStream, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.faults.lock().unwrap().pop_front();
        if fault == Some(Fault::Broken) {
            return Err(StoreError::StreamBroken("connection dropped".into()));
        }
        let body = self.inner.get_range(key, offset, length).await?;
        let body: BlobByteStream = match fault {
            Some(Fault::Transient) => {
                let timeout = StoreError::Transient("read timed out".into());
                Box::pin(stream::iter(vec![Err::<Bytes, _>(timeout)]))
            }
            Some(Fault::Truncated) => Box::pin(body.take(1)),
            _ => body,
        };
        Ok(body)
    }

    async fn stage_block(
        &self,
        key: &str,
        block_id: &str,
        payload: Bytes,
    ) -> Result<(), StoreError> {
        self.stage_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.stage_block(key, block_id, payload).await
    }

    async fn commit_block_list(&self, key: &str, block_ids: &[String]) -> Result<(), StoreError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Protocol("commit rejected".into()));
        }
        self.inner.commit_block_list(key, block_ids).await
    }

    async fn delete_blob(&self, key: &str) -> Result<DeleteOutcome, StoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let refused = self.refuse_delete.lock().unwrap().as_deref() == Some(key);
        if refused {
            return Ok(DeleteOutcome { deleted: false });
        }
        self.inner.delete_blob(key).await
    }
}

/// A disk over `container` with a fresh in-memory metadata store.
pub fn build_disk(
    container: Arc<dyn BlobContainer>,
    settings: DiskSettings,
) -> (DiskBlobStorage, Arc<MemoryMetadataStore>) {
    let metadata = Arc::new(MemoryMetadataStore::new("/var/lib/blobdisk/meta"));
    let disk = DiskBlobStorage::new("blob_disk", container, metadata.clone(), settings)
        .expect("valid test settings");
    (disk, metadata)
}

/// Settings with small parts and fast-failing retries.
pub fn small_settings(part: usize) -> DiskSettings {
    DiskSettings { max_single_part_upload_size: part, ..Default::default() }
}
