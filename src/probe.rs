// src/probe.rs
//
// Existence check for a blob key.

use tracing::trace;

use crate::blob_store::BlobContainer;
use crate::constants::UNIQUE_ID_PROBE_PAGE_SIZE;
use crate::error::DiskError;

/// True if a blob named exactly `id` exists.
///
/// Lists with `id` as prefix and a one-entry page: names sort
/// lexicographically, so an exact match, if present, is the first entry.
/// Longer keys sharing the prefix are not matches. List failures are
/// returned as errors, never as `false`.
pub async fn check_unique_id(container: &dyn BlobContainer, id: &str) -> Result<bool, DiskError> {
    let entries = container
        .list_blobs(id, Some(UNIQUE_ID_PROBE_PAGE_SIZE))
        .await
        .map_err(|e| DiskError::storage("list_blobs", id, e))?;

    let found = entries.iter().any(|entry| entry.name == id);
    trace!(
        "probe {}/{}: {} listed, exact match {}",
        container.container_name(),
        id,
        entries.len(),
        found
    );
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryContainer;

    #[tokio::test]
    async fn prefix_match_is_not_enough() {
        let c = MemoryContainer::new("t");
        c.insert("data/part_abcd1234", &b"x"[..]);
        assert!(!check_unique_id(&c, "data/part").await.unwrap());
        assert!(check_unique_id(&c, "data/part_abcd1234").await.unwrap());
        assert!(!check_unique_id(&c, "data/part_abcd12345").await.unwrap());
    }
}
