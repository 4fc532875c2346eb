// src/file_store.rs
//
// LocalFsContainer: a block-blob container on a local directory.
//
// Layout under the root:
//   <key>                              committed objects ('/' in keys maps to subdirectories)
//   .staging/<escaped key>/<block id>  staged, uncommitted blocks
//
// Commit concatenates the listed blocks into a temp file inside the staging
// area and renames it over <key>, so readers see either the old object or the
// complete new one.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::blob_store::{BlobByteStream, BlobContainer, BlobListing, DeleteOutcome};
use crate::constants::LOCAL_STAGING_DIR;
use crate::error::StoreError;

const COMMIT_TMP_NAME: &str = "commit.tmp";

#[derive(Debug, Clone)]
pub struct LocalFsContainer {
    name: String,
    root: PathBuf,
}

impl LocalFsContainer {
    /// Use `root` as the container, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(LOCAL_STAGING_DIR)).await?;
        let name = root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("local")
            .to_string();
        Ok(Self { name, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        let valid = !key.is_empty()
            && rel.components().all(|c| matches!(c, Component::Normal(_)))
            && rel.components().next() != Some(Component::Normal(OsStr::new(LOCAL_STAGING_DIR)));
        if !valid {
            return Err(StoreError::Protocol(format!("invalid blob key '{key}'")));
        }
        Ok(self.root.join(rel))
    }

    fn staging_dir(&self, key: &str) -> PathBuf {
        self.root.join(LOCAL_STAGING_DIR).join(escape_key(key))
    }

    fn block_path(&self, key: &str, block_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !block_id.is_empty()
            && block_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::Protocol(format!("invalid block id '{block_id}'")));
        }
        Ok(self.staging_dir(key).join(block_id))
    }

    /// Concatenate the staged blocks, in order, into `tmp`.
    async fn assemble_blocks(
        &self,
        key: &str,
        block_ids: &[String],
        tmp: &Path,
    ) -> Result<(), StoreError> {
        let mut out = fs::File::create(tmp).await?;
        for id in block_ids {
            let block = match fs::read(self.block_path(key, id)?).await {
                Ok(b) => b,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(StoreError::Protocol(format!(
                        "block '{id}' was never staged for '{key}'"
                    )));
                }
                Err(e) => return Err(e.into()),
            };
            out.write_all(&block).await?;
        }
        out.sync_all().await?;
        Ok(())
    }

    /// Walk committed objects, returning keys relative to the root.
    async fn collect_keys(&self) -> Result<Vec<(String, u64)>, StoreError> {
        let mut out = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_name = entry.file_name();
                let Some(file_name) = file_name.to_str() else { continue };
                if prefix.is_empty() && file_name == LOCAL_STAGING_DIR {
                    continue;
                }
                let key = if prefix.is_empty() {
                    file_name.to_string()
                } else {
                    format!("{prefix}/{file_name}")
                };

                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push((entry.path(), key));
                } else {
                    out.push((key, meta.len()));
                }
            }
        }
        Ok(out)
    }
}

/// Remove a committed object's staging directory, logging what is left behind.
async fn discard_staging(staging: &Path) {
    match fs::remove_dir_all(staging).await {
        Err(e) if e.kind() != ErrorKind::NotFound => {
            warn!("could not clean staging area {}: {}", staging.display(), e);
        }
        _ => {}
    }
}

/// Flatten a key into a single path component for the staging area.
fn escape_key(key: &str) -> String {
    key.replace('%', "%25").replace('/', "%2F")
}

#[async_trait]
impl BlobContainer for LocalFsContainer {
    fn container_name(&self) -> &str {
        &self.name
    }

    async fn list_blobs(
        &self,
        prefix: &str,
        page_size_hint: Option<u32>,
    ) -> Result<Vec<BlobListing>, StoreError> {
        let mut all = self.collect_keys().await?;
        all.retain(|(name, _)| name.starts_with(prefix));
        all.sort();

        let limit = page_size_hint.map_or(usize::MAX, |n| n as usize);
        Ok(all
            .into_iter()
            .take(limit)
            .map(|(name, size)| BlobListing { name, size })
            .collect())
    }

    async fn get_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
    ) -> Result<BlobByteStream, StoreError> {
        let path = self.object_path(key)?;
        let mut file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.take(length).read_to_end(&mut buf).await?;
        trace!("local GET {} range {}+{} -> {} bytes", path.display(), offset, length, buf.len());

        Ok(Box::pin(stream::once(async move { Ok(Bytes::from(buf)) })))
    }

    async fn stage_block(
        &self,
        key: &str,
        block_id: &str,
        payload: Bytes,
    ) -> Result<(), StoreError> {
        self.object_path(key)?;
        let path = self.block_path(key, block_id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &payload).await?;
        Ok(())
    }

    async fn commit_block_list(&self, key: &str, block_ids: &[String]) -> Result<(), StoreError> {
        let target = self.object_path(key)?;
        let staging = self.staging_dir(key);
        fs::create_dir_all(&staging).await?;

        let tmp = staging.join(COMMIT_TMP_NAME);
        if let Err(e) = self.assemble_blocks(key, block_ids, &tmp).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&tmp, &target).await?;
        debug!("committed {} blocks into {}", block_ids.len(), target.display());

        // The object is visible from here on; leftover blocks are not a failure.
        discard_staging(&staging).await;
        Ok(())
    }

    async fn delete_blob(&self, key: &str) -> Result<DeleteOutcome, StoreError> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(DeleteOutcome { deleted: true }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DeleteOutcome { deleted: false }),
            Err(e) => Err(e.into()),
        }
    }
}
