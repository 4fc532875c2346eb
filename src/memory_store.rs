// src/memory_store.rs
//
// In-process block-blob container. Keeps the staging/commit split of a real
// block-blob service so writers and readers behave the same as against a
// remote store.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

use crate::blob_store::{BlobByteStream, BlobContainer, BlobListing, DeleteOutcome};
use crate::constants::DEFAULT_MEMORY_STREAM_CHUNK;
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    committed: BTreeMap<String, Bytes>,
    // blob key -> block id -> payload
    staged: HashMap<String, HashMap<String, Bytes>>,
}

pub struct MemoryContainer {
    name: String,
    stream_chunk: usize,
    inner: Mutex<Inner>,
}

impl MemoryContainer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stream_chunk: DEFAULT_MEMORY_STREAM_CHUNK,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Size of the pieces a ranged GET is delivered in.
    pub fn with_stream_chunk(mut self, bytes: usize) -> Self {
        self.stream_chunk = bytes.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Committed content of `key`, if any.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.lock().committed.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().committed.contains_key(key)
    }

    /// Insert a committed object directly, bypassing staging.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.lock().committed.insert(key.into(), data.into());
    }

    pub fn committed_keys(&self) -> Vec<String> {
        self.lock().committed.keys().cloned().collect()
    }

    /// Number of blocks staged and not yet committed for `key`.
    pub fn staged_block_count(&self, key: &str) -> usize {
        self.lock().staged.get(key).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl BlobContainer for MemoryContainer {
    fn container_name(&self) -> &str {
        &self.name
    }

    async fn list_blobs(
        &self,
        prefix: &str,
        page_size_hint: Option<u32>,
    ) -> Result<Vec<BlobListing>, StoreError> {
        let inner = self.lock();
        let limit = page_size_hint.map_or(usize::MAX, |n| n as usize);
        Ok(inner
            .committed
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .take(limit)
            .map(|(name, data)| BlobListing { name: name.clone(), size: data.len() as u64 })
            .collect())
    }

    async fn get_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
    ) -> Result<BlobByteStream, StoreError> {
        let data = self
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(length as usize).min(data.len());
        let body = data.slice(start..end);
        trace!("memory GET {}/{} range {}..{}", self.name, key, start, end);

        let step = self.stream_chunk;
        let pieces: Vec<Result<Bytes, StoreError>> = (0..body.len())
            .step_by(step)
            .map(|at| Ok(body.slice(at..(at + step).min(body.len()))))
            .collect();
        Ok(Box::pin(stream::iter(pieces)))
    }

    async fn stage_block(
        &self,
        key: &str,
        block_id: &str,
        payload: Bytes,
    ) -> Result<(), StoreError> {
        self.lock()
            .staged
            .entry(key.to_string())
            .or_default()
            .insert(block_id.to_string(), payload);
        Ok(())
    }

    async fn commit_block_list(&self, key: &str, block_ids: &[String]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let empty = HashMap::new();
        let staged = inner.staged.get(key).unwrap_or(&empty);

        let mut assembled = BytesMut::new();
        for id in block_ids {
            let block = staged.get(id).ok_or_else(|| {
                StoreError::Protocol(format!("block '{id}' was never staged for '{key}'"))
            })?;
            assembled.extend_from_slice(block);
        }

        inner.staged.remove(key);
        inner.committed.insert(key.to_string(), assembled.freeze());
        Ok(())
    }

    async fn delete_blob(&self, key: &str) -> Result<DeleteOutcome, StoreError> {
        let deleted = self.lock().committed.remove(key).is_some();
        Ok(DeleteOutcome { deleted })
    }
}
