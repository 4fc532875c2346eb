// src/gather_reader.rs
//
// Reads one logical file that is stored as an ordered list of blobs.
//
// GatherReader maps logical ranges onto per-blob ranged GETs and owns the
// retry policy. Two front ends sit on top of it:
//   - SequentialBlobReader: std::io::Read + Seek, blocking the calling thread
//   - PrefetchReader: chunk reads submitted to the ReadExecutor, delivered in
//     offset order

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

use crate::blob_store::{BlobByteStream, BlobContainer};
use crate::constants::{RETRY_INITIAL_BACKOFF, RETRY_MAX_BACKOFF};
use crate::error::{DiskError, StoreError};
use crate::executor::{ReadExecutor, ReadHandle};
use crate::metadata::{BlobObjectRef, FileMetadata};
use crate::runtime::run_on_global_rt;
use crate::settings::DiskSettings;

/// Random-access reader over the concatenation of a file's blobs.
pub struct GatherReader {
    path: String,
    container: Arc<dyn BlobContainer>,
    blobs: Vec<BlobObjectRef>,
    /// Logical offset at which each blob starts.
    starts: Vec<u64>,
    total_size: u64,
    settings: Arc<DiskSettings>,
}

impl GatherReader {
    pub fn new(
        path: impl Into<String>,
        container: Arc<dyn BlobContainer>,
        metadata: &FileMetadata,
        settings: Arc<DiskSettings>,
    ) -> Self {
        let blobs = metadata.blobs().to_vec();
        let mut starts = Vec::with_capacity(blobs.len());
        let mut total_size = 0u64;
        for b in &blobs {
            starts.push(total_size);
            total_size += b.size;
        }
        Self { path: path.into(), container, blobs, starts, total_size, settings }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn settings(&self) -> &Arc<DiskSettings> {
        &self.settings
    }

    pub fn blobs(&self) -> &[BlobObjectRef] {
        &self.blobs
    }

    /// Map a logical offset to `(blob index, offset inside that blob)`.
    /// `None` at or past the end of the file.
    pub fn locate(&self, offset: u64) -> Option<(usize, u64)> {
        if offset >= self.total_size {
            return None;
        }
        // Last blob starting at or before `offset`; empty blobs share a start
        // with their successor and are skipped by taking the last match.
        let idx = self.starts.partition_point(|&s| s <= offset) - 1;
        Some((idx, offset - self.starts[idx]))
    }

    /// Read up to `len` bytes at `offset`. Short only at end of file.
    pub async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes, DiskError> {
        let end = offset.saturating_add(len as u64).min(self.total_size);
        if offset >= end {
            return Ok(Bytes::new());
        }

        let mut out = BytesMut::with_capacity((end - offset) as usize);
        let mut pos = offset;
        while pos < end {
            let Some((idx, within)) = self.locate(pos) else { break };
            let blob = &self.blobs[idx];
            let take = (blob.size - within).min(end - pos);
            let piece = self.fetch_blob_range(blob, within, take).await?;
            out.extend_from_slice(&piece);
            pos += take;
        }
        Ok(out.freeze())
    }

    /// Ranged GET of one blob piece, spending the read and download budgets.
    async fn fetch_blob_range(
        &self,
        blob: &BlobObjectRef,
        start: u64,
        len: u64,
    ) -> Result<Bytes, DiskError> {
        let max_reads = self.settings.max_single_read_retries;
        let max_downloads = self.settings.max_single_download_retries;

        let mut out = BytesMut::with_capacity(len as usize);
        let mut read_failures = 0usize;
        let mut download_failures = 0usize;
        let mut stream: Option<BlobByteStream> = None;

        while (out.len() as u64) < len {
            let pos = start + out.len() as u64;
            let remaining = len - out.len() as u64;

            if stream.is_none() {
                trace!("GET {} range {}+{}", blob.key, pos, remaining);
                match self.container.get_range(&blob.key, pos, remaining).await {
                    Ok(s) => stream = Some(s),
                    Err(e) if e.is_retryable() => {
                        download_failures += 1;
                        if download_failures >= max_downloads {
                            return Err(exhausted("download", &blob.key, download_failures, e));
                        }
                        warn!(
                            "Download of {} failed (attempt {}/{}): {}",
                            blob.key, download_failures, max_downloads, e
                        );
                        backoff(download_failures).await;
                        continue;
                    }
                    Err(e) => return Err(DiskError::storage("download", &blob.key, e)),
                }
            }
            let Some(body) = stream.as_mut() else { continue };
            let item = body.next().await;

            match item {
                Some(Ok(chunk)) => {
                    read_failures = 0;
                    let take = (chunk.len() as u64).min(remaining) as usize;
                    out.extend_from_slice(&chunk[..take]);
                }
                Some(Err(e)) if e.is_transient_read() => {
                    stream = None;
                    read_failures += 1;
                    if read_failures >= max_reads {
                        return Err(exhausted("read", &blob.key, read_failures, e));
                    }
                    warn!(
                        "Read of {} at {} failed (attempt {}/{}): {}",
                        blob.key, pos, read_failures, max_reads, e
                    );
                    backoff(read_failures).await;
                }
                Some(Err(e)) if e.is_retryable() => {
                    stream = None;
                    download_failures += 1;
                    if download_failures >= max_downloads {
                        return Err(exhausted("download", &blob.key, download_failures, e));
                    }
                    warn!(
                        "Download stream of {} died at {} (attempt {}/{}): {}",
                        blob.key, pos, download_failures, max_downloads, e
                    );
                    backoff(download_failures).await;
                }
                Some(Err(e)) => return Err(DiskError::storage("read", &blob.key, e)),
                None => {
                    stream = None;
                    download_failures += 1;
                    let e = StoreError::StreamBroken(format!(
                        "stream ended at {} of {}",
                        pos,
                        start + len
                    ));
                    if download_failures >= max_downloads {
                        return Err(exhausted("download", &blob.key, download_failures, e));
                    }
                    warn!("{} for {}, reopening", e, blob.key);
                    backoff(download_failures).await;
                }
            }
        }
        Ok(out.freeze())
    }
}

fn exhausted(op: &'static str, key: &str, attempts: usize, source: StoreError) -> DiskError {
    DiskError::RetriesExhausted { op, key: key.to_string(), attempts, source }
}

async fn backoff(attempt: usize) {
    let shift = attempt.saturating_sub(1).min(16) as u32;
    let delay = RETRY_INITIAL_BACKOFF.saturating_mul(1 << shift).min(RETRY_MAX_BACKOFF);
    tokio::time::sleep(delay.max(Duration::from_millis(1))).await;
}

/// Blocking `Read + Seek` over a [`GatherReader`], one buffer-sized request at a time.
pub struct SequentialBlobReader {
    reader: Arc<GatherReader>,
    buffer_size: usize,
    position: u64,
    buffer: Bytes,
    buffer_start: u64,
}

impl SequentialBlobReader {
    pub fn new(reader: Arc<GatherReader>, buffer_size: usize) -> Self {
        Self {
            reader,
            buffer_size: buffer_size.max(1),
            position: 0,
            buffer: Bytes::new(),
            buffer_start: 0,
        }
    }

    pub fn gather(&self) -> &GatherReader {
        &self.reader
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    fn buffered(&self) -> Option<&[u8]> {
        let end = self.buffer_start + self.buffer.len() as u64;
        if self.position >= self.buffer_start && self.position < end {
            Some(&self.buffer[(self.position - self.buffer_start) as usize..])
        } else {
            None
        }
    }

    fn fill(&mut self) -> Result<(), DiskError> {
        let reader = Arc::clone(&self.reader);
        let (offset, len) = (self.position, self.buffer_size);
        let bytes = run_on_global_rt(async move { Ok(reader.read_range(offset, len).await) })
            .map_err(|e| DiskError::Executor(e.to_string()))??;
        self.buffer = bytes;
        self.buffer_start = offset;
        Ok(())
    }
}

impl Read for SequentialBlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.reader.total_size() {
            return Ok(0);
        }
        if self.buffered().is_none() {
            self.fill()?;
        }
        let Some(avail) = self.buffered() else { return Ok(0) };
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for SequentialBlobReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.reader.total_size().checked_add_signed(d),
            SeekFrom::Current(d) => self.position.checked_add_signed(d),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )
        })?;
        self.position = target;
        Ok(target)
    }
}

/// Pool-backed reader that keeps up to `thread_pool_size` chunk reads in
/// flight and hands them out strictly in offset order.
pub struct PrefetchReader {
    reader: Arc<GatherReader>,
    executor: Arc<ReadExecutor>,
    chunk_size: usize,
    window: usize,
    /// Next offset to schedule.
    next_offset: u64,
    /// Offset of the next chunk handed to the caller.
    position: u64,
    inflight: VecDeque<ReadHandle<Bytes>>,
}

impl PrefetchReader {
    pub fn new(reader: Arc<GatherReader>, executor: Arc<ReadExecutor>, chunk_size: usize) -> Self {
        let window = reader.settings().thread_pool_size.max(1);
        Self {
            reader,
            executor,
            chunk_size: chunk_size.max(1),
            window,
            next_offset: 0,
            position: 0,
            inflight: VecDeque::new(),
        }
    }

    pub fn gather(&self) -> &GatherReader {
        &self.reader
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Reads currently queued or running for this reader.
    pub fn prefetch_depth(&self) -> usize {
        self.inflight.len()
    }

    /// Submit an independent read; it does not move the reader's position.
    pub fn submit_read(&self, offset: u64, len: usize) -> ReadHandle<Bytes> {
        let reader = Arc::clone(&self.reader);
        self.executor.submit(async move { reader.read_range(offset, len).await })
    }

    fn top_up(&mut self) {
        while self.inflight.len() < self.window && self.next_offset < self.reader.total_size() {
            let handle = self.submit_read(self.next_offset, self.chunk_size);
            self.inflight.push_back(handle);
            self.next_offset += self.chunk_size as u64;
        }
    }

    /// Next chunk in file order, or `None` at end of file.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, DiskError> {
        self.top_up();
        let Some(handle) = self.inflight.pop_front() else { return Ok(None) };
        let chunk = match handle.await {
            Ok(c) => c,
            Err(e) => {
                self.inflight.clear();
                self.next_offset = self.position;
                return Err(e);
            }
        };
        self.position += chunk.len() as u64;
        self.top_up();
        Ok(Some(chunk))
    }

    /// Move to `offset`. Reads already issued for other offsets run to
    /// completion but their results are dropped.
    pub fn seek(&mut self, offset: u64) {
        self.inflight.clear();
        self.position = offset.min(self.reader.total_size());
        self.next_offset = self.position;
    }

    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, DiskError> {
        let mut out = Vec::with_capacity((self.reader.total_size() - self.position) as usize);
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryContainer;

    fn layout(sizes: &[u64]) -> (Arc<MemoryContainer>, FileMetadata, Vec<u8>) {
        let container = Arc::new(MemoryContainer::new("t").with_stream_chunk(3));
        let mut all = Vec::new();
        let mut blobs = Vec::new();
        for (i, &size) in sizes.iter().enumerate() {
            let data: Vec<u8> = (0..size).map(|j| (i as u64 * 31 + j) as u8).collect();
            let key = format!("f_{i}");
            container.insert(key.clone(), data.clone());
            all.extend_from_slice(&data);
            blobs.push(BlobObjectRef::new(key, size));
        }
        (container, FileMetadata::from_blobs(blobs), all)
    }

    #[test]
    fn locate_walks_blob_sizes() {
        let (c, meta, _) = layout(&[4, 0, 6]);
        let r = GatherReader::new("f", c, &meta, Arc::new(DiskSettings::default()));
        assert_eq!(r.locate(0), Some((0, 0)));
        assert_eq!(r.locate(3), Some((0, 3)));
        assert_eq!(r.locate(4), Some((2, 0)));
        assert_eq!(r.locate(9), Some((2, 5)));
        assert_eq!(r.locate(10), None);
    }

    #[tokio::test]
    async fn ranges_spanning_blobs_are_concatenated_in_order() {
        let (c, meta, all) = layout(&[5, 7, 2]);
        let r = GatherReader::new("f", c, &meta, Arc::new(DiskSettings::default()));
        assert_eq!(&r.read_range(3, 8).await.unwrap()[..], &all[3..11]);
        assert_eq!(&r.read_range(0, 100).await.unwrap()[..], &all[..]);
        assert!(r.read_range(14, 4).await.unwrap().is_empty());
    }

    #[test]
    fn sequential_reader_reads_and_seeks() {
        let (c, meta, all) = layout(&[5, 7, 2]);
        let r = Arc::new(GatherReader::new("f", c, &meta, Arc::new(DiskSettings::default())));
        let mut rd = SequentialBlobReader::new(r, 4);

        let mut out = Vec::new();
        rd.read_to_end(&mut out).unwrap();
        assert_eq!(out, all);

        rd.seek(SeekFrom::End(-3)).unwrap();
        let mut tail = Vec::new();
        rd.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, &all[11..]);
        assert!(rd.seek(SeekFrom::Current(-100)).is_err());
    }

    #[tokio::test]
    async fn prefetch_delivers_in_offset_order() {
        let (c, meta, all) = layout(&[10, 3, 17, 1]);
        let settings = Arc::new(DiskSettings { thread_pool_size: 3, ..Default::default() });
        let r = Arc::new(GatherReader::new("f", c, &meta, settings));
        let mut p = PrefetchReader::new(r, Arc::new(ReadExecutor::new(3)), 4);

        let mut offsets = Vec::new();
        let mut out = Vec::new();
        while let Some(chunk) = p.next_chunk().await.unwrap() {
            offsets.push(out.len());
            out.extend_from_slice(&chunk);
            assert!(p.prefetch_depth() <= 3);
        }
        assert_eq!(out, all);
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));

        p.seek(20);
        assert_eq!(p.read_to_end().await.unwrap(), &all[20..]);
    }
}
