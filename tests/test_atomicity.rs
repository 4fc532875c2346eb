// tests/test_atomicity.rs
//
// A write either becomes fully visible at commit or not at all.

mod common;

use anyhow::Result;
use futures::FutureExt;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use blobdisk::{DiskError, MetadataStore, WriteMode, WriteSessionOutcome};
use common::{FaultyContainer, build_disk, pattern, small_settings};

#[tokio::test]
async fn failed_commit_leaves_nothing_readable() -> Result<()> {
    let container = Arc::new(FaultyContainer::new());
    container.fail_commit.store(true, Ordering::SeqCst);
    let (disk, meta) = build_disk(container.clone(), small_settings(1024));

    let mut w = disk.open_for_write("data.bin", 4096, WriteMode::Rewrite)?;
    let key = w.blob_key().to_string();
    w.write(&pattern(10_000)).await?;

    let err = w.finalize().await.unwrap_err();
    assert!(err.is_storage_protocol(), "unexpected error: {err}");
    assert!(!container.inner.contains(&key));
    assert!(!disk.check_unique_id(&key).await?);
    assert!(!meta.exists("data.bin"));

    // The writer is poisoned; a retry cannot commit a partial object.
    container.fail_commit.store(false, Ordering::SeqCst);
    assert!(matches!(w.finalize().await, Err(DiskError::WriterClosed { .. })));
    assert!(!container.inner.contains(&key));
    Ok(())
}

#[tokio::test]
async fn failed_commit_keeps_previous_metadata() -> Result<()> {
    let container = Arc::new(FaultyContainer::new());
    let (disk, meta) = build_disk(container.clone(), small_settings(16));

    let mut w = disk.open_for_write("f", 64, WriteMode::Rewrite)?;
    w.write(b"v1").await?;
    let v1 = w.finalize().await?;

    container.fail_commit.store(true, Ordering::SeqCst);
    let outcome = disk
        .write_file_with("f", 64, WriteMode::Rewrite, |w| {
            async move { w.write(b"version two").await }.boxed()
        })
        .await?;
    assert!(matches!(outcome, WriteSessionOutcome::Aborted { .. }));

    let file = meta.read_meta("f")?;
    assert_eq!(file.blobs().len(), 1);
    assert_eq!(file.blobs()[0].key, v1.key);
    Ok(())
}

#[tokio::test]
async fn dropped_writer_commits_nothing() -> Result<()> {
    let container = Arc::new(FaultyContainer::new());
    let (disk, meta) = build_disk(container.clone(), small_settings(8));

    let key = {
        let mut w = disk.open_for_write("f", 8, WriteMode::Rewrite)?;
        w.write(&pattern(40)).await?;
        w.blob_key().to_string()
    };

    assert!(container.stage_calls.load(Ordering::SeqCst) > 0);
    assert_eq!(container.commit_calls.load(Ordering::SeqCst), 0);
    assert!(!container.inner.contains(&key));
    assert!(!meta.exists("f"));
    Ok(())
}
