// src/executor.rs
//
// Bounded, resizable pool for asynchronous remote reads.
//
// Tasks run on the global runtime; a semaphore caps how many are doing
// remote I/O at once. Resizing adds permits immediately or retires them as
// running reads release theirs.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::DiskError;
use crate::runtime::{global_rt_handle, run_on_global_rt};

pub struct ReadExecutor {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_threads: Mutex<usize>,
    in_flight: Arc<AtomicUsize>,
}

impl ReadExecutor {
    /// Pool on the global runtime.
    pub fn new(max_threads: usize) -> Self {
        Self::with_handle(global_rt_handle().clone(), max_threads)
    }

    pub fn with_handle(handle: Handle, max_threads: usize) -> Self {
        let max_threads = max_threads.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_threads)),
            max_threads: Mutex::new(max_threads),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn max_threads(&self) -> usize {
        *self.max_threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn set_max_threads(&self, n: usize) {
        let n = n.max(1);
        let mut current = self.max_threads.lock().unwrap_or_else(PoisonError::into_inner);
        if n == *current {
            return;
        }
        debug!("resizing read pool {} -> {}", *current, n);

        if n > *current {
            self.permits.add_permits(n - *current);
        } else {
            let surplus = (*current - n) as u32;
            let permits = Arc::clone(&self.permits);
            self.handle.spawn(async move {
                if let Ok(p) = permits.acquire_many_owned(surplus).await {
                    p.forget();
                }
            });
        }
        *current = n;
    }

    /// Queue `fut` on the pool; it starts once a permit is free.
    pub fn submit<F, T>(&self, fut: F) -> ReadHandle<T>
    where
        F: Future<Output = Result<T, DiskError>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        let inner = self.handle.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| DiskError::Executor(e.to_string()))?;
            in_flight.fetch_add(1, Ordering::SeqCst);
            trace!("read pool task started");
            let out = fut.await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            out
        });
        ReadHandle { inner }
    }
}

/// Result of a pool-backed read. Await it, or [`wait`](Self::wait) from a
/// plain thread.
pub struct ReadHandle<T> {
    inner: JoinHandle<Result<T, DiskError>>,
}

impl<T: Send + 'static> ReadHandle<T> {
    pub fn wait(self) -> Result<T, DiskError> {
        run_on_global_rt(async move { Ok(self.await) })
            .map_err(|e| DiskError::Executor(e.to_string()))?
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T> Future for ReadHandle<T> {
    type Output = Result<T, DiskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(out)) => Poll::Ready(out),
            Poll::Ready(Err(join)) => Poll::Ready(Err(DiskError::Executor(join.to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrency_is_capped() {
        let pool = Arc::new(ReadExecutor::new(2));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool_ref = Arc::clone(&pool);
                let peak = Arc::clone(&peak);
                pool.submit(async move {
                    peak.fetch_max(pool_ref.in_flight(), Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(i)
                })
            })
            .collect();

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        assert_eq!(results, (0..8).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn resize_updates_limit() {
        let pool = ReadExecutor::new(4);
        pool.set_max_threads(8);
        assert_eq!(pool.max_threads(), 8);
        pool.set_max_threads(2);
        assert_eq!(pool.max_threads(), 2);
        pool.set_max_threads(0);
        assert_eq!(pool.max_threads(), 1);
    }

    #[test]
    fn wait_blocks_for_result() {
        let pool = ReadExecutor::new(1);
        let v = pool.submit(async { Ok::<_, DiskError>(7u8) }).wait().unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn task_errors_come_back_through_the_handle() {
        let pool = ReadExecutor::new(1);
        let err = pool
            .submit(async { Err::<(), _>(DiskError::Configuration("bad".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, DiskError::Configuration(_)));
    }
}
