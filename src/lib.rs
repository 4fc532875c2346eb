// src/lib.rs
//
// Crate root: module tree and public re-exports.
//
// A blob disk stores each file as one or more block blobs in a remote
// container. Writes stage blocks and commit them atomically; reads gather
// the file's blobs back in order, retrying transient failures.

// ===== Remote store backends =====
pub mod blob_store;
pub mod file_store;
pub mod memory_store;
#[cfg(feature = "azure")]
pub mod azure_client;

// ===== Disk core =====
pub mod block_writer;
pub mod constants;
pub mod disk;
pub mod error;
pub mod gather_reader;
pub mod ids;
pub mod metadata;
pub mod path_keeper;
pub mod probe;
pub mod seek_avoiding;
pub mod settings;

// ===== Runtime plumbing =====
pub mod executor;
pub mod runtime;

pub use blob_store::{BlobByteStream, BlobContainer, BlobListing, DeleteOutcome};
pub use block_writer::{BlockBlobWriter, FinalizedBlob};
pub use disk::{
    BlobFileReader, BlobFileWriter, DiskBlobStorage, DiskType, ReadMethod, ReadOptions,
    WriteSessionOutcome,
};
pub use error::{DiskError, StoreError};
pub use executor::{ReadExecutor, ReadHandle};
pub use file_store::LocalFsContainer;
pub use gather_reader::{GatherReader, PrefetchReader, SequentialBlobReader};
pub use ids::{AlphanumericIds, IdGenerator};
pub use memory_store::MemoryContainer;
pub use metadata::{
    BlobObjectRef, FileMetadata, MemoryMetadataStore, MetadataHandle, MetadataStore, WriteMode,
};
pub use path_keeper::{BlobPathKeeper, PathKeeper, remove_batch};
pub use probe::check_unique_id;
pub use seek_avoiding::SeekAvoidingReader;
pub use settings::{DiskConfig, DiskSettings, SettingsHolder};

#[cfg(feature = "azure")]
pub use azure_client::AzureBlobContainer;
