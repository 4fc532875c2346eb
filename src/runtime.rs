// src/runtime.rs
//
//! Process-global multi-thread Tokio runtime used by synchronous readers and
//! by the asynchronous read pool. Blocking callers hand futures to it through
//! [`run_on_global_rt`].

use anyhow::Result;
use once_cell::sync::OnceCell;
use std::sync::mpsc;
use std::thread;
use tokio::runtime::{Builder as TokioBuilder, Handle};
use tokio::sync::oneshot;
use tracing::debug;

use crate::constants::ENV_RT_THREADS;

static RT_HANDLE: OnceCell<Handle> = OnceCell::new();

/// Create (once) a background multi-thread Tokio runtime and return its Handle.
pub fn global_rt_handle() -> &'static Handle {
    RT_HANDLE.get_or_init(|| {
        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name("blobdisk-rt".to_string())
            .spawn(move || {
                let threads = runtime_threads();
                debug!("Creating Tokio runtime with {} worker threads", threads);

                let rt = TokioBuilder::new_multi_thread()
                    .enable_io()
                    .enable_time()
                    .worker_threads(threads)
                    .thread_name("blobdisk-rt-worker")
                    .build()
                    .expect("failed to build global tokio runtime");

                // Hand a Handle back to the creator, then park the runtime forever.
                let handle = rt.handle().clone();
                tx.send(handle).expect("send runtime handle");
                rt.block_on(std::future::pending::<()>());
            })
            .expect("failed to spawn blobdisk runtime thread");

        rx.recv().expect("receive runtime handle")
    })
}

/// Worker count: `BLOBDISK_RT_THREADS` if set, else twice the cores within 8..=32.
fn runtime_threads() -> usize {
    std::env::var(ENV_RT_THREADS)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or_else(|| (num_cpus::get() * 2).clamp(8, 32))
}

/// Run an async `fut` on the global runtime and block the **current** thread
/// until it completes. Works from plain threads and from inside another runtime.
pub fn run_on_global_rt<F, T>(fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = global_rt_handle().clone();
    match Handle::try_current() {
        Ok(_) => {
            // oneshot::blocking_recv panics inside a runtime; use a std channel there.
            let (tx, rx) = mpsc::channel();
            handle.spawn(async move {
                let _ = tx.send(fut.await);
            });
            rx.recv()
                .map_err(|_| anyhow::anyhow!("global runtime task crashed: RecvError(())"))?
        }
        Err(_) => {
            let (tx, rx) = oneshot::channel();
            handle.spawn(async move {
                let _ = tx.send(fut.await);
            });
            rx.blocking_recv()
                .map_err(|_| anyhow::anyhow!("global runtime task crashed: RecvError(())"))?
        }
    }
}
