// src/metadata.rs
//
// The local metadata collaborator: maps logical file paths to the blobs that
// hold their bytes. The disk only consumes this interface; persistence and
// encoding of metadata belong to the implementation.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One remote object and its byte length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobObjectRef {
    pub key: String,
    pub size: u64,
}

impl BlobObjectRef {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self { key: key.into(), size }
    }
}

/// Blobs backing one logical file, in read order.
///
/// `total_size` always equals the sum of blob sizes. `ref_count` counts the
/// paths sharing this record (hard links, zero-copy replicas).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    blobs: Vec<BlobObjectRef>,
    total_size: u64,
    ref_count: u32,
    read_only: bool,
}

impl Default for FileMetadata {
    fn default() -> Self {
        Self { blobs: Vec::new(), total_size: 0, ref_count: 1, read_only: false }
    }
}

impl FileMetadata {
    pub fn from_blobs(blobs: Vec<BlobObjectRef>) -> Self {
        let total_size = blobs.iter().map(|b| b.size).sum();
        Self { blobs, total_size, ..Default::default() }
    }

    pub fn blobs(&self) -> &[BlobObjectRef] {
        &self.blobs
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn push_blob(&mut self, blob: BlobObjectRef) {
        self.total_size += blob.size;
        self.blobs.push(blob);
    }

    fn clear_blobs(&mut self) {
        self.blobs.clear();
        self.total_size = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the file's blobs with the newly written one.
    Rewrite,
    /// Add the newly written blob after the existing ones.
    Append,
}

/// Mutable view of one file's metadata during a write session.
pub trait MetadataHandle: Send {
    fn path(&self) -> &str;

    /// Metadata as it was when the session opened.
    fn metadata(&self) -> &FileMetadata;

    /// Record a committed blob and persist the result.
    ///
    /// Returns the blobs a rewrite dropped that no other path references;
    /// the caller owns their removal. Appends return nothing.
    fn commit_blob(&mut self, blob: BlobObjectRef) -> Result<Vec<BlobObjectRef>>;
}

pub trait MetadataStore: Send + Sync {
    /// Location of the metadata, for log messages.
    fn root_path(&self) -> &str;

    fn exists(&self, path: &str) -> bool;

    fn read_meta(&self, path: &str) -> Result<FileMetadata>;

    fn read_or_create_meta_for_writing(
        &self,
        path: &str,
        mode: WriteMode,
    ) -> Result<Box<dyn MetadataHandle>>;

    /// Point `to` at the same record as `from`, raising its ref count.
    fn create_hard_link(&self, from: &str, to: &str) -> Result<()>;

    /// Remove `path`. Returns the blobs that no path references any more,
    /// empty while other links remain.
    fn unlink(&self, path: &str) -> Result<Vec<BlobObjectRef>>;
}

type SharedRecord = Arc<Mutex<FileMetadata>>;
type FileTable = Arc<Mutex<HashMap<String, SharedRecord>>>;

fn lock_record(rec: &SharedRecord) -> MutexGuard<'_, FileMetadata> {
    rec.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_table(table: &FileTable) -> MutexGuard<'_, HashMap<String, SharedRecord>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process metadata store. Hard links share one record.
#[derive(Default)]
pub struct MemoryMetadataStore {
    root: String,
    files: FileTable,
}

impl MemoryMetadataStore {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into(), files: FileTable::default() }
    }

    fn record(&self, path: &str) -> Option<SharedRecord> {
        lock_table(&self.files).get(path).cloned()
    }

    /// Register `path` with the given metadata, replacing any previous entry.
    pub fn insert(&self, path: impl Into<String>, meta: FileMetadata) {
        lock_table(&self.files).insert(path.into(), Arc::new(Mutex::new(meta)));
    }

    pub fn set_read_only(&self, path: &str, read_only: bool) -> Result<()> {
        let Some(rec) = self.record(path) else { bail!("no metadata for '{path}'") };
        lock_record(&rec).set_read_only(read_only);
        Ok(())
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = lock_table(&self.files).keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn root_path(&self) -> &str {
        &self.root
    }

    fn exists(&self, path: &str) -> bool {
        lock_table(&self.files).contains_key(path)
    }

    fn read_meta(&self, path: &str) -> Result<FileMetadata> {
        match self.record(path) {
            Some(rec) => Ok(lock_record(&rec).clone()),
            None => bail!("no metadata for '{path}'"),
        }
    }

    fn read_or_create_meta_for_writing(
        &self,
        path: &str,
        mode: WriteMode,
    ) -> Result<Box<dyn MetadataHandle>> {
        let snapshot = match self.record(path) {
            Some(rec) => {
                let meta = lock_record(&rec).clone();
                if meta.read_only() {
                    bail!("'{path}' is read-only");
                }
                meta
            }
            None => FileMetadata::default(),
        };

        Ok(Box::new(MemoryMetadataHandle {
            path: path.to_string(),
            mode,
            snapshot,
            files: Arc::clone(&self.files),
        }))
    }

    fn create_hard_link(&self, from: &str, to: &str) -> Result<()> {
        let mut files = lock_table(&self.files);
        let Some(rec) = files.get(from).cloned() else { bail!("no metadata for '{from}'") };
        if files.contains_key(to) {
            bail!("'{to}' already exists");
        }
        lock_record(&rec).ref_count += 1;
        files.insert(to.to_string(), rec);
        Ok(())
    }

    fn unlink(&self, path: &str) -> Result<Vec<BlobObjectRef>> {
        let Some(rec) = lock_table(&self.files).remove(path) else {
            bail!("no metadata for '{path}'")
        };
        let mut meta = lock_record(&rec);
        meta.ref_count = meta.ref_count.saturating_sub(1);
        if meta.ref_count == 0 {
            meta.total_size = 0;
            Ok(std::mem::take(&mut meta.blobs))
        } else {
            Ok(Vec::new())
        }
    }
}

/// Write-session view; nothing reaches the store until `commit_blob`.
struct MemoryMetadataHandle {
    path: String,
    mode: WriteMode,
    snapshot: FileMetadata,
    files: FileTable,
}

impl MetadataHandle for MemoryMetadataHandle {
    fn path(&self) -> &str {
        &self.path
    }

    fn metadata(&self) -> &FileMetadata {
        &self.snapshot
    }

    fn commit_blob(&mut self, blob: BlobObjectRef) -> Result<Vec<BlobObjectRef>> {
        let mut files = lock_table(&self.files);
        let Some(rec) = files.get(&self.path).cloned() else {
            let mut meta = FileMetadata::default();
            if self.mode == WriteMode::Append {
                meta = self.snapshot.clone();
            }
            meta.push_blob(blob);
            self.snapshot = meta.clone();
            files.insert(self.path.clone(), Arc::new(Mutex::new(meta)));
            return Ok(Vec::new());
        };

        let mut meta = lock_record(&rec);
        if meta.read_only() {
            bail!("'{}' became read-only during the write", self.path);
        }
        match self.mode {
            // Appends update the shared record so every hard link sees them.
            WriteMode::Append => {
                meta.push_blob(blob);
                self.snapshot = meta.clone();
                Ok(Vec::new())
            }
            // A rewrite of a linked path detaches it; the other links keep
            // the old blobs.
            WriteMode::Rewrite if meta.ref_count > 1 => {
                meta.ref_count -= 1;
                drop(meta);
                let fresh = FileMetadata::from_blobs(vec![blob]);
                self.snapshot = fresh.clone();
                files.insert(self.path.clone(), Arc::new(Mutex::new(fresh)));
                Ok(Vec::new())
            }
            WriteMode::Rewrite => {
                let replaced = std::mem::take(&mut meta.blobs);
                meta.clear_blobs();
                meta.push_blob(blob);
                self.snapshot = meta.clone();
                Ok(replaced)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_size_tracks_blobs() {
        let meta =
            FileMetadata::from_blobs(vec![BlobObjectRef::new("a", 3), BlobObjectRef::new("b", 4)]);
        assert_eq!(meta.total_size(), 7);
        assert_eq!(meta.ref_count(), 1);
    }

    #[test]
    fn nothing_visible_before_commit() {
        let store = MemoryMetadataStore::new("/meta");
        let mut h = store.read_or_create_meta_for_writing("f", WriteMode::Rewrite).unwrap();
        assert!(!store.exists("f"));
        h.commit_blob(BlobObjectRef::new("f_x", 10)).unwrap();
        assert_eq!(store.read_meta("f").unwrap().total_size(), 10);
    }

    #[test]
    fn append_keeps_existing_blobs_rewrite_replaces_them() {
        let store = MemoryMetadataStore::new("/meta");
        store.insert("f", FileMetadata::from_blobs(vec![BlobObjectRef::new("old", 5)]));

        let mut h = store.read_or_create_meta_for_writing("f", WriteMode::Append).unwrap();
        h.commit_blob(BlobObjectRef::new("new", 2)).unwrap();
        let meta = store.read_meta("f").unwrap();
        let keys: Vec<_> = meta.blobs().iter().map(|b| b.key.clone()).collect();
        assert_eq!(keys, vec!["old", "new"]);

        let mut h = store.read_or_create_meta_for_writing("f", WriteMode::Rewrite).unwrap();
        let replaced = h.commit_blob(BlobObjectRef::new("fresh", 1)).unwrap();
        assert_eq!(replaced, vec![BlobObjectRef::new("old", 5), BlobObjectRef::new("new", 2)]);
        let meta = store.read_meta("f").unwrap();
        assert_eq!(meta.blobs(), &[BlobObjectRef::new("fresh", 1)]);
        assert_eq!(meta.total_size(), 1);
    }

    #[test]
    fn hard_links_share_blobs_until_last_unlink() {
        let store = MemoryMetadataStore::new("/meta");
        store.insert("a", FileMetadata::from_blobs(vec![BlobObjectRef::new("k", 1)]));
        store.create_hard_link("a", "b").unwrap();
        assert_eq!(store.read_meta("b").unwrap().ref_count(), 2);

        assert!(store.unlink("a").unwrap().is_empty());
        assert_eq!(store.unlink("b").unwrap(), vec![BlobObjectRef::new("k", 1)]);
        assert!(store.paths().is_empty());
    }

    #[test]
    fn rewrite_of_linked_path_leaves_other_links_alone() {
        let store = MemoryMetadataStore::new("/meta");
        store.insert("a", FileMetadata::from_blobs(vec![BlobObjectRef::new("k", 1)]));
        store.create_hard_link("a", "b").unwrap();

        let mut h = store.read_or_create_meta_for_writing("a", WriteMode::Rewrite).unwrap();
        assert!(h.commit_blob(BlobObjectRef::new("k2", 2)).unwrap().is_empty());

        let a = store.read_meta("a").unwrap();
        let b = store.read_meta("b").unwrap();
        assert_eq!(a.blobs(), &[BlobObjectRef::new("k2", 2)]);
        assert_eq!(a.ref_count(), 1);
        assert_eq!(b.blobs(), &[BlobObjectRef::new("k", 1)]);
        assert_eq!(b.ref_count(), 1);
    }

    #[test]
    fn read_only_files_reject_writers() {
        let store = MemoryMetadataStore::new("/meta");
        store.insert("f", FileMetadata::default());
        store.set_read_only("f", true).unwrap();
        assert!(store.read_or_create_meta_for_writing("f", WriteMode::Append).is_err());
    }
}
