// src/path_keeper.rs
//
// Collects remote keys of removed files and deletes them in one pass.

use std::collections::HashSet;
use tracing::{debug, info, trace};

use crate::blob_store::BlobContainer;
use crate::error::{DiskError, StoreError};

/// Ordered set of remote keys pending deletion.
pub trait PathKeeper: Send {
    /// Queue `key`; a key already queued is ignored.
    fn add_path(&mut self, key: String);

    /// Drain the queued keys in insertion order.
    fn take_paths(&mut self) -> Vec<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default, Clone)]
pub struct BlobPathKeeper {
    paths: Vec<String>,
    seen: HashSet<String>,
}

impl BlobPathKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }
}

impl PathKeeper for BlobPathKeeper {
    fn add_path(&mut self, key: String) {
        if self.seen.insert(key.clone()) {
            self.paths.push(key);
        }
    }

    fn take_paths(&mut self) -> Vec<String> {
        self.seen.clear();
        std::mem::take(&mut self.paths)
    }

    fn len(&self) -> usize {
        self.paths.len()
    }
}

/// Delete `keys` one after another and stop at the first failure.
///
/// A delete the store does not acknowledge as done (including a missing
/// blob) counts as a failure. The error names the failing key and carries
/// the keys after it, which were not attempted.
pub async fn remove_batch(
    container: &dyn BlobContainer,
    keys: Vec<String>,
) -> Result<usize, DiskError> {
    let total = keys.len();
    let mut keys = keys.into_iter();
    let mut position = 0usize;

    while let Some(key) = keys.next() {
        trace!("deleting {}/{}", container.container_name(), key);
        let failure = match container.delete_blob(&key).await {
            Ok(outcome) if outcome.deleted => None,
            Ok(_) => Some(StoreError::Protocol(format!("store did not delete '{key}'"))),
            Err(e) => Some(e),
        };

        if let Some(source) = failure {
            info!("Caught an error while deleting file {}: {}", key, source);
            return Err(DiskError::BatchDelete { key, position, remaining: keys.collect(), source });
        }
        position += 1;
    }

    debug!("deleted {} blobs from {}", total, container.container_name());
    Ok(total)
}
