// src/block_writer.rs
//
// Chunked writer for one block blob.
//
// Design:
// - write() buffers into a caller-sized buffer and flushes when it fills
// - flush() stages the buffered bytes as blocks of at most
//   max_single_part_upload_size, one after another, each under a fresh
//   64-char id; the id list is the only record of the blob's layout
// - finalize() flushes the tail and commits the id list exactly once
// - a writer dropped before finalize is abandoned: nothing is committed and
//   the staged blocks are left for the store to expire

use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::blob_store::BlobContainer;
use crate::constants::BLOCK_ID_LEN;
use crate::error::DiskError;
use crate::ids::IdGenerator;
use crate::settings::DiskSettings;

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedBlob {
    pub key: String,
    pub size: u64,
    pub block_count: usize,
}

#[derive(Debug)]
enum WriterState {
    Open,
    Finalized(FinalizedBlob),
    /// A stage or commit call failed; the blob can no longer be committed.
    Failed,
    Abandoned,
}

pub struct BlockBlobWriter {
    container: Arc<dyn BlobContainer>,
    blob_key: String,
    settings: Arc<DiskSettings>,
    ids: Arc<dyn IdGenerator>,
    buf: BytesMut,
    buf_capacity: usize,
    block_ids: Vec<String>,
    bytes_written: u64,
    state: WriterState,
}

impl BlockBlobWriter {
    pub fn new(
        container: Arc<dyn BlobContainer>,
        blob_key: impl Into<String>,
        buf_size: usize,
        settings: Arc<DiskSettings>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let buf_capacity = buf_size.max(1);
        Self {
            container,
            blob_key: blob_key.into(),
            settings,
            ids,
            buf: BytesMut::with_capacity(buf_capacity),
            buf_capacity,
            block_ids: Vec::new(),
            bytes_written: 0,
            state: WriterState::Open,
        }
    }

    pub fn blob_key(&self) -> &str {
        &self.blob_key
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Ids staged so far, in commit order.
    pub fn block_ids(&self) -> &[String] {
        &self.block_ids
    }

    pub fn settings(&self) -> &Arc<DiskSettings> {
        &self.settings
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.state, WriterState::Finalized(_))
    }

    fn ensure_open(&self) -> Result<(), DiskError> {
        match self.state {
            WriterState::Open => Ok(()),
            _ => Err(DiskError::WriterClosed { key: self.blob_key.clone() }),
        }
    }

    pub async fn write(&mut self, mut data: &[u8]) -> Result<(), DiskError> {
        self.ensure_open()?;
        while !data.is_empty() {
            let take = (self.buf_capacity - self.buf.len()).min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            self.bytes_written += take as u64;
            data = &data[take..];
            if self.buf.len() >= self.buf_capacity {
                self.flush().await?;
            }
        }
        Ok(())
    }

    /// Stage everything buffered so far.
    pub async fn flush(&mut self) -> Result<(), DiskError> {
        self.ensure_open()?;
        if self.buf.is_empty() {
            return Ok(());
        }

        let pending: Bytes = self.buf.split().freeze();
        let part_size = self.settings.max_single_part_upload_size.max(1);
        let mut staged = 0usize;

        for start in (0..pending.len()).step_by(part_size) {
            let piece = pending.slice(start..(start + part_size).min(pending.len()));
            let block_id = self.ids.random_ascii(BLOCK_ID_LEN);
            trace!("staging block {} ({} bytes) for {}", block_id, piece.len(), self.blob_key);

            if let Err(e) = self.container.stage_block(&self.blob_key, &block_id, piece).await {
                self.state = WriterState::Failed;
                return Err(DiskError::storage("stage_block", &self.blob_key, e));
            }
            self.block_ids.push(block_id);
            staged += 1;
        }

        debug!(
            "flushed {} bytes of {} as {} blocks ({} total)",
            pending.len(),
            self.blob_key,
            staged,
            self.block_ids.len()
        );
        Ok(())
    }

    /// Flush and commit. Later calls return the first result's blob.
    pub async fn finalize(&mut self) -> Result<FinalizedBlob, DiskError> {
        match &self.state {
            WriterState::Finalized(blob) => return Ok(blob.clone()),
            WriterState::Open => {}
            WriterState::Failed | WriterState::Abandoned => {
                return Err(DiskError::WriterClosed { key: self.blob_key.clone() });
            }
        }

        self.flush().await?;
        if let Err(e) = self.container.commit_block_list(&self.blob_key, &self.block_ids).await {
            self.state = WriterState::Failed;
            return Err(DiskError::storage("commit_block_list", &self.blob_key, e));
        }

        let blob = FinalizedBlob {
            key: self.blob_key.clone(),
            size: self.bytes_written,
            block_count: self.block_ids.len(),
        };
        debug!("committed {} ({} bytes, {} blocks)", blob.key, blob.size, blob.block_count);
        self.state = WriterState::Finalized(blob.clone());
        Ok(blob)
    }

    /// Give up on the blob without committing.
    pub fn abandon(&mut self) {
        if let WriterState::Open = self.state {
            debug!("abandoning {} with {} staged blocks", self.blob_key, self.block_ids.len());
            self.buf.clear();
            self.state = WriterState::Abandoned;
        }
    }
}

impl Drop for BlockBlobWriter {
    fn drop(&mut self) {
        if let WriterState::Open = self.state {
            warn!(
                "writer for {} dropped without finalize; {} bytes abandoned, nothing committed",
                self.blob_key, self.bytes_written
            );
        }
    }
}

impl std::fmt::Debug for BlockBlobWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockBlobWriter")
            .field("blob_key", &self.blob_key)
            .field("bytes_written", &self.bytes_written)
            .field("blocks", &self.block_ids.len())
            .field("state", &self.state)
            .finish()
    }
}
