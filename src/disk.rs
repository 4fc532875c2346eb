// src/disk.rs
//
// DiskBlobStorage: a remote block-blob container presented as a disk of
// files. Paths resolve to blob lists through the metadata store; reads go
// through the gather reader, writes through the block writer, removals
// through the path keeper. Settings are a hot-swappable snapshot.

use futures::future::BoxFuture;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::blob_store::BlobContainer;
use crate::block_writer::{BlockBlobWriter, FinalizedBlob};
use crate::constants::{BLOB_NAME_SUFFIX_LEN, DEFAULT_READ_BUFFER_SIZE};
use crate::error::DiskError;
use crate::executor::ReadExecutor;
use crate::gather_reader::{GatherReader, PrefetchReader, SequentialBlobReader};
use crate::ids::{AlphanumericIds, IdGenerator};
use crate::metadata::{BlobObjectRef, MetadataHandle, MetadataStore, WriteMode};
use crate::path_keeper::{BlobPathKeeper, PathKeeper, remove_batch};
use crate::probe;
use crate::seek_avoiding::SeekAvoidingReader;
use crate::settings::{DiskConfig, DiskSettings, SettingsHolder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskType {
    BlobStorage,
}

impl DiskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskType::BlobStorage => "blob_storage",
        }
    }
}

impl std::fmt::Display for DiskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMethod {
    /// Blocking reads on the calling thread.
    #[default]
    Read,
    /// Chunk reads prefetched on the shared read pool.
    Threadpool,
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub method: ReadMethod,
    /// Bytes per remote request (sequential) or per prefetched chunk.
    pub buffer_size: usize,
    /// Wrap sequential readers so short forward seeks read through.
    pub avoid_seeks: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { method: ReadMethod::Read, buffer_size: DEFAULT_READ_BUFFER_SIZE, avoid_seeks: true }
    }
}

/// Reader returned by [`DiskBlobStorage::open_for_read`].
pub enum BlobFileReader {
    Direct(SequentialBlobReader),
    SeekAvoiding(SeekAvoidingReader<SequentialBlobReader>),
    Threadpool(PrefetchReader),
}

impl BlobFileReader {
    fn gather(&self) -> &GatherReader {
        match self {
            BlobFileReader::Direct(r) => r.gather(),
            BlobFileReader::SeekAvoiding(r) => r.get_ref().gather(),
            BlobFileReader::Threadpool(r) => r.gather(),
        }
    }

    pub fn path(&self) -> &str {
        self.gather().path()
    }

    pub fn total_size(&self) -> u64 {
        self.gather().total_size()
    }

    /// Settings captured when the reader was opened.
    pub fn settings(&self) -> &Arc<DiskSettings> {
        self.gather().settings()
    }
}

/// Write session for one file: a block writer plus the metadata handle that
/// learns about the blob once it is committed.
pub struct BlobFileWriter {
    writer: BlockBlobWriter,
    metadata: Box<dyn MetadataHandle>,
    container: Arc<dyn BlobContainer>,
    recorded: bool,
}

impl BlobFileWriter {
    pub fn path(&self) -> &str {
        self.metadata.path()
    }

    pub fn blob_key(&self) -> &str {
        self.writer.blob_key()
    }

    pub fn bytes_written(&self) -> u64 {
        self.writer.bytes_written()
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), DiskError> {
        self.writer.write(data).await
    }

    pub async fn flush(&mut self) -> Result<(), DiskError> {
        self.writer.flush().await
    }

    /// Commit the blob and record it in the file's metadata. Blobs a rewrite
    /// replaced are deleted afterwards. Repeated calls return the same blob
    /// and touch neither the store nor the metadata.
    pub async fn finalize(&mut self) -> Result<FinalizedBlob, DiskError> {
        let blob = self.writer.finalize().await?;
        if self.recorded {
            return Ok(blob);
        }
        let replaced = self
            .metadata
            .commit_blob(BlobObjectRef::new(blob.key.clone(), blob.size))
            .map_err(|e| DiskError::metadata(self.metadata.path(), e))?;
        self.recorded = true;

        if !replaced.is_empty() {
            let keys = replaced.into_iter().map(|b| b.key).collect();
            // The new blob is committed and recorded either way.
            if let Err(e) = remove_batch(self.container.as_ref(), keys).await {
                warn!("rewrite of {} left replaced blobs behind: {}", self.metadata.path(), e);
            }
        }
        Ok(blob)
    }

    pub fn abandon(&mut self) {
        self.writer.abandon();
    }
}

/// How a [`DiskBlobStorage::write_file_with`] session ended.
#[derive(Debug)]
pub enum WriteSessionOutcome {
    Committed(FinalizedBlob),
    Aborted { blob_key: String, error: DiskError },
}

impl WriteSessionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, WriteSessionOutcome::Committed(_))
    }
}

pub struct DiskBlobStorage {
    name: String,
    container: Arc<dyn BlobContainer>,
    metadata: Arc<dyn MetadataStore>,
    settings: SettingsHolder,
    ids: Arc<dyn IdGenerator>,
    executor: OnceCell<Arc<ReadExecutor>>,
}

impl DiskBlobStorage {
    pub fn new(
        name: impl Into<String>,
        container: Arc<dyn BlobContainer>,
        metadata: Arc<dyn MetadataStore>,
        settings: DiskSettings,
    ) -> Result<Self, DiskError> {
        settings.validate()?;
        Ok(Self {
            name: name.into(),
            container,
            metadata,
            settings: SettingsHolder::new(settings),
            ids: Arc::new(AlphanumericIds),
            executor: OnceCell::new(),
        })
    }

    /// Build from configuration; unset values use defaults.
    pub fn from_config(
        name: impl Into<String>,
        container: Arc<dyn BlobContainer>,
        metadata: Arc<dyn MetadataStore>,
        config: &DiskConfig,
    ) -> Result<Self, DiskError> {
        Self::new(name, container, metadata, DiskSettings::from_config(config)?)
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn disk_type(&self) -> DiskType {
        DiskType::BlobStorage
    }

    pub fn is_remote(&self) -> bool {
        true
    }

    pub fn supports_zero_copy_replication(&self) -> bool {
        true
    }

    pub fn container(&self) -> &Arc<dyn BlobContainer> {
        &self.container
    }

    pub fn metadata_store(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> Arc<DiskSettings> {
        self.settings.get()
    }

    /// The shared read pool, created on first threadpool read.
    pub fn read_executor(&self) -> Arc<ReadExecutor> {
        Arc::clone(
            self.executor
                .get_or_init(|| Arc::new(ReadExecutor::new(self.settings.get().thread_pool_size))),
        )
    }

    pub fn exists(&self, path: &str) -> bool {
        self.metadata.exists(path)
    }

    pub fn open_for_read(
        &self,
        path: &str,
        options: &ReadOptions,
    ) -> Result<BlobFileReader, DiskError> {
        let settings = self.settings.get();
        let meta = self.metadata.read_meta(path).map_err(|e| DiskError::metadata(path, e))?;
        trace!("Read from file by path: {}/{}", self.metadata.root_path(), path);

        let reader = Arc::new(GatherReader::new(
            path,
            Arc::clone(&self.container),
            &meta,
            Arc::clone(&settings),
        ));
        Ok(match options.method {
            ReadMethod::Threadpool => {
                let prefetch =
                    PrefetchReader::new(reader, self.read_executor(), options.buffer_size);
                BlobFileReader::Threadpool(prefetch)
            }
            ReadMethod::Read => {
                let direct = SequentialBlobReader::new(reader, options.buffer_size);
                if options.avoid_seeks {
                    let min_seek = settings.min_bytes_for_seek;
                    BlobFileReader::SeekAvoiding(SeekAvoidingReader::new(direct, min_seek))
                } else {
                    BlobFileReader::Direct(direct)
                }
            }
        })
    }

    /// Start writing `path`. The blob gets a fresh key `<path>_<8 random chars>`;
    /// nothing is visible until the returned writer is finalized.
    pub fn open_for_write(
        &self,
        path: &str,
        buf_size: usize,
        mode: WriteMode,
    ) -> Result<BlobFileWriter, DiskError> {
        let settings = self.settings.get();
        let metadata = self
            .metadata
            .read_or_create_meta_for_writing(path, mode)
            .map_err(|e| DiskError::metadata(path, e))?;
        let blob_key = format!("{}_{}", path, self.ids.random_ascii(BLOB_NAME_SUFFIX_LEN));

        trace!(
            "{} to file by path: {}/{}. Blob Storage path: {}",
            if mode == WriteMode::Rewrite { "Write" } else { "Append" },
            self.metadata.root_path(),
            path,
            blob_key
        );

        let writer = BlockBlobWriter::new(
            Arc::clone(&self.container),
            blob_key,
            buf_size,
            settings,
            Arc::clone(&self.ids),
        );
        Ok(BlobFileWriter {
            writer,
            metadata,
            container: Arc::clone(&self.container),
            recorded: false,
        })
    }

    /// Run `body` against a fresh writer for `path`, then finalize once if it
    /// succeeded or abandon otherwise. Only failing to open is an `Err`.
    pub async fn write_file_with<F>(
        &self,
        path: &str,
        buf_size: usize,
        mode: WriteMode,
        body: F,
    ) -> Result<WriteSessionOutcome, DiskError>
    where
        F: for<'w> FnOnce(&'w mut BlobFileWriter) -> BoxFuture<'w, Result<(), DiskError>>,
    {
        let mut writer = self.open_for_write(path, buf_size, mode)?;
        let blob_key = writer.blob_key().to_string();

        if let Err(error) = body(&mut writer).await {
            debug!("write session for {} failed, abandoning {}: {}", path, blob_key, error);
            writer.abandon();
            return Ok(WriteSessionOutcome::Aborted { blob_key, error });
        }
        Ok(match writer.finalize().await {
            Ok(blob) => WriteSessionOutcome::Committed(blob),
            Err(error) => WriteSessionOutcome::Aborted { blob_key, error },
        })
    }

    pub async fn check_unique_id(&self, id: &str) -> Result<bool, DiskError> {
        probe::check_unique_id(self.container.as_ref(), id).await
    }

    pub fn create_path_keeper(&self) -> BlobPathKeeper {
        BlobPathKeeper::new()
    }

    /// Delete every key queued in `keeper`. See [`remove_batch`] for the
    /// stop-at-first-failure behavior.
    pub async fn remove_from_remote(
        &self,
        keeper: &mut dyn PathKeeper,
    ) -> Result<usize, DiskError> {
        let keys = keeper.take_paths();
        remove_batch(self.container.as_ref(), keys).await
    }

    /// Point `to` at the blobs of `from` without copying them.
    pub fn create_hard_link(&self, from: &str, to: &str) -> Result<(), DiskError> {
        self.metadata.create_hard_link(from, to).map_err(|e| DiskError::metadata(to, e))
    }

    pub async fn remove_file(&self, path: &str) -> Result<usize, DiskError> {
        self.remove_files(&[path]).await
    }

    /// Unlink `paths` and delete the blobs nothing references any more.
    /// Returns the number of blobs deleted.
    ///
    /// Every path must exist; otherwise nothing is unlinked. If an unlink
    /// still fails midway, the blobs already orphaned are deleted before the
    /// metadata error is returned.
    pub async fn remove_files<S: AsRef<str>>(&self, paths: &[S]) -> Result<usize, DiskError> {
        let mut names = paths.iter().map(AsRef::<str>::as_ref);
        if let Some(missing) = names.find(|p| !self.metadata.exists(p)) {
            let source = anyhow::anyhow!("no metadata for '{missing}'");
            return Err(DiskError::metadata(missing, source));
        }

        let mut keeper = self.create_path_keeper();
        let mut unlink_error = None;
        for path in paths {
            let path = path.as_ref();
            match self.metadata.unlink(path) {
                Ok(orphaned) => {
                    for blob in orphaned {
                        keeper.add_path(blob.key);
                    }
                }
                Err(e) => {
                    unlink_error = Some(DiskError::metadata(path, e));
                    break;
                }
            }
        }

        let removed = self.remove_from_remote(&mut keeper).await;
        match unlink_error {
            Some(err) => {
                if let Err(e) = removed {
                    warn!("cleanup after failed unlink did not finish: {}", e);
                }
                Err(err)
            }
            None => removed,
        }
    }

    /// Replace the settings snapshot. Running operations keep the one they
    /// started with; an invalid config leaves the current snapshot in place.
    pub fn reload_settings(&self, config: &DiskConfig) -> Result<(), DiskError> {
        let new_settings = DiskSettings::from_config(config)?;
        let pool_size = new_settings.thread_pool_size;
        self.settings.set(new_settings);
        debug!("reloaded settings for disk {}", self.name);

        if let Some(exec) = self.executor.get() {
            exec.set_max_threads(pool_size);
        }
        Ok(())
    }
}

impl std::fmt::Debug for DiskBlobStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskBlobStorage")
            .field("name", &self.name)
            .field("container", &self.container.container_name())
            .field("metadata_root", &self.metadata.root_path())
            .field("settings", &self.settings)
            .finish()
    }
}
