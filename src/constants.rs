// src/constants.rs
//
// Centralized constants for blobdisk to avoid hardcoded values throughout the codebase

use std::time::Duration;

/// Default upper bound for one staged block (100 MiB)
pub const DEFAULT_MAX_SINGLE_PART_UPLOAD_SIZE: usize = 100 * 1024 * 1024;

/// Default forward-seek distance below which bytes are read and discarded (1 MiB)
pub const DEFAULT_MIN_BYTES_FOR_SEEK: u64 = 1024 * 1024;

/// Default attempts for reading from an already open download stream
pub const DEFAULT_MAX_SINGLE_READ_RETRIES: usize = 3;

/// Default attempts for (re)opening a ranged download
pub const DEFAULT_MAX_SINGLE_DOWNLOAD_RETRIES: usize = 3;

/// Default size of the asynchronous read pool
pub const DEFAULT_THREAD_POOL_SIZE: usize = 16;

/// Default read granularity for sequential and prefetching readers (1 MiB)
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Length of the random suffix appended to a logical path to form a blob key
pub const BLOB_NAME_SUFFIX_LEN: usize = 8;

/// Length of a random staged-block identifier
pub const BLOCK_ID_LEN: usize = 64;

/// Page size used by the existence probe; one listing entry is enough
pub const UNIQUE_ID_PROBE_PAGE_SIZE: u32 = 1;

/// First sleep between retries; doubles on every further attempt
pub const RETRY_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Ceiling for the retry sleep
pub const RETRY_MAX_BACKOFF: Duration = Duration::from_millis(1600);

/// Piece size the in-memory store uses when streaming a ranged GET (64 KiB)
pub const DEFAULT_MEMORY_STREAM_CHUNK: usize = 64 * 1024;

/// Reserved directory under a local container root holding uncommitted blocks
pub const LOCAL_STAGING_DIR: &str = ".staging";

/// Environment prefix for per-disk configuration variables
pub const ENV_PREFIX: &str = "BLOBDISK";

/// Environment override for the global runtime worker count
pub const ENV_RT_THREADS: &str = "BLOBDISK_RT_THREADS";
